use crate::ring::RingBuffer;
use crate::snapshot::SnapshotReader;
use crate::types::event::{Actor, EventRecord, IoAccess, Level, Timestamp};
use crate::types::{Error, Result};
use iotrace_common::SECTOR_SIZE;
use log::debug;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Stable key of a monitored file: block device name and inode number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    device: Arc<str>,
    inode: u64,
}

impl Identity {
    pub fn new(device: impl Into<Arc<str>>, inode: u64) -> Self {
        Self {
            device: device.into(),
            inode,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }
}

/// `<device>_<inode>`, e.g. `sda1_1312`. Doubles as the per-resource handle.
impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.device, self.inode)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Command(format!("invalid resource handle '{s}'"));
        let (device, inode) = s.rsplit_once('_').ok_or_else(invalid)?;
        if device.is_empty() {
            return Err(invalid());
        }
        let inode = inode.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(device, inode))
    }
}

/// State guarded by the same lock as the ring cursors.
#[derive(Debug)]
pub(crate) struct LogControl {
    pub(crate) enabled: bool,
    pub(crate) time_zero: Duration,
    /// Slot of the last entry handed out by a reader, if any.
    pub(crate) last_shown: Option<usize>,
}

/// Point-in-time view of a resource, rendered as the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub enabled: bool,
    pub time_zero: Duration,
    pub capacity: usize,
    pub count: usize,
}

/// `enabled_flag time_zero capacity count`
impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.enabled as u8,
            Timestamp(self.time_zero),
            self.capacity,
            self.count
        )
    }
}

pub struct MonitoredResource {
    identity: Identity,
    ring: RingBuffer<LogControl>,
}

impl MonitoredResource {
    /// New resources start enabled with their time zero at `now`.
    pub fn try_new(identity: Identity, capacity: usize, now: Duration) -> Result<Self> {
        let control = LogControl {
            enabled: true,
            time_zero: now,
            last_shown: None,
        };
        Ok(Self {
            identity,
            ring: RingBuffer::try_new(capacity, control)?,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Stores an access observed at `now`. Returns `false` when the log is
    /// stopped and the access was dropped.
    pub fn record_event(&self, access: IoAccess, actor: Actor, now: Duration) -> bool {
        let mut guard = self.ring.lock();
        let control = guard.header();
        if !control.enabled {
            return false;
        }

        let size = match access.level {
            Level::Block => access.size.saturating_mul(SECTOR_SIZE),
            _ => access.size,
        };
        let timestamp = now.saturating_sub(control.time_zero);

        guard.insert(EventRecord {
            timestamp,
            kind: access.kind,
            level: access.level,
            offset: access.offset,
            size,
            actor,
        });

        true
    }

    pub fn enable(&self) {
        self.ring.lock().header_mut().enabled = true;
    }

    pub fn disable(&self) {
        self.ring.lock().header_mut().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.ring.lock().header().enabled
    }

    /// Clears the log; with `also_time` the time zero moves to `now`.
    pub fn reset(&self, also_time: bool, now: Duration) {
        let mut guard = self.ring.lock();
        guard.reset();
        if also_time {
            guard.header_mut().time_zero = now;
        }
        debug!("{}: log reset (time reset: {also_time})", self.identity);
    }

    pub fn status(&self) -> Status {
        let guard = self.ring.lock();
        let control = guard.header();
        Status {
            enabled: control.enabled,
            time_zero: control.time_zero,
            capacity: guard.capacity(),
            count: guard.count(),
        }
    }

    /// Opens a reader over the entries currently held.
    pub fn snapshot(self: &Arc<Self>) -> SnapshotReader {
        SnapshotReader::open(Arc::clone(self))
    }

    pub(crate) fn ring(&self) -> &RingBuffer<LogControl> {
        &self.ring
    }
}
