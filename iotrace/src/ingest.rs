use crate::registry::Registry;
use crate::resolve::SysfsResolver;
use crate::resource::Identity;
use crate::types::event::{Actor, EventKind, IoAccess, Level};
use crate::types::{Error, Result};
use iotrace_common::IoEvent;
use log::{debug, warn};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Feeds `IoEvent` frames from an instrumentation source into the registry.
pub struct Ingestor {
    registry: Arc<Registry>,
    resolver: Arc<SysfsResolver>,
}

impl Ingestor {
    pub fn new(registry: Arc<Registry>, resolver: Arc<SysfsResolver>) -> Self {
        Self { registry, resolver }
    }

    /// Records one event. Returns whether it was stored.
    pub async fn process_event(&self, event: &IoEvent) -> Result<bool> {
        let kind = EventKind::try_from(event.kind)?;
        if kind == EventKind::Empty {
            return Err(Error::Command(format!(
                "event kind '{}' is not an access",
                kind.as_char()
            )));
        }
        let level = Level::try_from(event.level)?;

        let device = match self.resolver.kernel_device_name(event.dev).await {
            Ok(device) => device,
            Err(err) => {
                metrics::counter!("iotrace_events_dropped", "reason" => "unknown_device")
                    .increment(1);
                debug!("no block device for dev {:#x}: {err}", event.dev);
                return Ok(false);
            }
        };

        if level == Level::Block && !self.registry.device_monitored(&device) {
            return Ok(false);
        }

        let access = IoAccess {
            kind,
            level,
            offset: event.offset,
            size: event.size,
        };
        let actor = Actor::from_raw(event.comm, event.tgid);

        Ok(self.registry.record_event_at(
            &Identity::new(device, event.inode),
            access,
            actor,
            Duration::from_nanos(event.timestamp_ns),
        ))
    }

    /// Consumes frames until the source closes. Returns the number of frames read.
    pub async fn run<S>(&self, mut source: S) -> Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut frame = [0u8; IoEvent::SIZE];
        let mut frames = 0u64;

        loop {
            match source.read_exact(&mut frame).await {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            frames += 1;

            let event: IoEvent = bytemuck::pod_read_unaligned(&frame);
            if let Err(err) = self.process_event(&event).await {
                warn!("dropping malformed event: {err}");
            }
        }

        Ok(frames)
    }
}
