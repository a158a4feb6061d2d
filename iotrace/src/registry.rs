//! Set of monitored resources keyed by identity.
//!
//! The registry lock covers membership and alias lists only. It is never held
//! while a resource's content lock is taken, except for the instant needed to
//! clone a resource handle out of the list.

use crate::clock::{Clock, MonotonicClock};
use crate::resource::{Identity, MonitoredResource};
use crate::types::event::{Actor, IoAccess};
use crate::types::{Error, Result};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new log was allocated for the identity.
    Created,
    /// The identity was known; the path was added as one more alias.
    AliasAdded,
    /// The identity and the path were both known already.
    AlreadyMonitored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    AliasRemoved,
    /// The last alias went away and the log was freed.
    ResourceDestroyed,
}

/// One line of the resource list: identity followed by its aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub identity: Identity,
    pub aliases: Vec<String>,
}

impl Display for Listing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identity)?;
        for alias in &self.aliases {
            write!(f, " {alias}")?;
        }
        Ok(())
    }
}

struct Entry {
    resource: Arc<MonitoredResource>,
    aliases: Vec<String>,
}

impl Entry {
    fn identity(&self) -> &Identity {
        self.resource.identity()
    }
}

pub struct Registry {
    resources: RwLock<Vec<Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            resources: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    pub fn find(&self, identity: &Identity) -> Option<Arc<MonitoredResource>> {
        self.resources
            .read()
            .iter()
            .find(|entry| entry.identity() == identity)
            .map(|entry| Arc::clone(&entry.resource))
    }

    pub fn find_alias(&self, alias: &str) -> Option<Arc<MonitoredResource>> {
        self.resources
            .read()
            .iter()
            .find(|entry| entry.aliases.iter().any(|a| a == alias))
            .map(|entry| Arc::clone(&entry.resource))
    }

    /// Resolves a control handle: a registered alias, else a `<device>_<inode>` identity.
    pub fn lookup(&self, handle: &str) -> Result<Arc<MonitoredResource>> {
        if let Some(resource) = self.find_alias(handle) {
            return Ok(resource);
        }
        handle
            .parse::<Identity>()
            .ok()
            .and_then(|identity| self.find(&identity))
            .ok_or_else(|| Error::NotFound(handle.to_owned()))
    }

    pub fn is_monitored(&self, identity: &Identity) -> bool {
        self.resources
            .read()
            .iter()
            .any(|entry| entry.identity() == identity)
    }

    /// Whether any monitored resource lives on `device`.
    pub fn device_monitored(&self, device: &str) -> bool {
        self.resources
            .read()
            .iter()
            .any(|entry| entry.identity().device() == device)
    }

    pub fn aliases(&self, identity: &Identity) -> Option<Vec<String>> {
        self.resources
            .read()
            .iter()
            .find(|entry| entry.identity() == identity)
            .map(|entry| entry.aliases.clone())
    }

    /// Starts monitoring `identity` under `alias`.
    ///
    /// A known identity only gains the alias; its capacity is left unchanged.
    pub fn add(&self, identity: Identity, alias: &str, capacity: usize) -> Result<AddOutcome> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }

        if let Some(outcome) = Self::add_alias(&mut self.resources.write(), &identity, alias) {
            return Ok(outcome);
        }

        // Allocate before publishing; nothing is registered if this fails.
        let resource = MonitoredResource::try_new(identity.clone(), capacity, self.clock.now())?;

        let mut resources = self.resources.write();
        if let Some(outcome) = Self::add_alias(&mut resources, &identity, alias) {
            return Ok(outcome);
        }
        resources.push(Entry {
            resource: Arc::new(resource),
            aliases: vec![alias.to_owned()],
        });
        info!("ready to log {capacity} events for {alias} ({identity})");

        Ok(AddOutcome::Created)
    }

    fn add_alias(resources: &mut [Entry], identity: &Identity, alias: &str) -> Option<AddOutcome> {
        let entry = resources
            .iter_mut()
            .find(|entry| entry.identity() == identity)?;

        if entry.aliases.iter().any(|a| a == alias) {
            info!("{alias} is already monitored");
            return Some(AddOutcome::AlreadyMonitored);
        }

        entry.aliases.push(alias.to_owned());
        info!("{alias} is monitored ({identity})");
        Some(AddOutcome::AliasAdded)
    }

    /// Forgets `alias`; the resource goes away with its last alias.
    pub fn remove_alias(&self, alias: &str) -> Result<RemoveOutcome> {
        let removed = {
            let mut resources = self.resources.write();
            let Some(index) = resources
                .iter()
                .position(|entry| entry.aliases.iter().any(|a| a == alias))
            else {
                warn!("'{alias}' not monitored");
                return Err(Error::NotFound(alias.to_owned()));
            };

            let entry = &mut resources[index];
            entry.aliases.retain(|a| a != alias);
            info!("stop monitoring {alias}");

            if entry.aliases.is_empty() {
                Some(resources.remove(index))
            } else {
                None
            }
        };

        match removed {
            Some(entry) => {
                info!("stop monitoring {}", entry.identity());
                Ok(RemoveOutcome::ResourceDestroyed)
            }
            None => Ok(RemoveOutcome::AliasRemoved),
        }
    }

    /// Records an access observed now, by the registry clock.
    pub fn record_event(&self, identity: &Identity, access: IoAccess, actor: Actor) -> bool {
        self.record_event_at(identity, access, actor, self.clock.now())
    }

    /// Event source entry point. `now` is the monotonic time of the access.
    /// Never fails: accesses to unknown or stopped resources are dropped.
    /// Returns whether the access was stored.
    pub fn record_event_at(
        &self,
        identity: &Identity,
        access: IoAccess,
        actor: Actor,
        now: Duration,
    ) -> bool {
        let resource = self
            .resources
            .read()
            .iter()
            .find(|entry| entry.identity() == identity)
            .map(|entry| Arc::clone(&entry.resource));

        let Some(resource) = resource else {
            metrics::counter!("iotrace_events_dropped", "reason" => "unmonitored").increment(1);
            debug!("no log for {identity}");
            return false;
        };

        if resource.record_event(access, actor, now) {
            metrics::counter!("iotrace_events_recorded").increment(1);
            true
        } else {
            metrics::counter!("iotrace_events_dropped", "reason" => "stopped").increment(1);
            debug!(
                "{identity}: {} {} {} {} - log inactive",
                access.kind.as_char(),
                access.level.as_ref(),
                access.offset,
                access.size
            );
            false
        }
    }

    /// One entry per resource, in registration order.
    pub fn listing(&self) -> Vec<Listing> {
        self.resources
            .read()
            .iter()
            .map(|entry| Listing {
                identity: entry.identity().clone(),
                aliases: entry.aliases.clone(),
            })
            .collect()
    }

    /// Drops every resource. Returns how many were monitored.
    pub fn teardown(&self) -> usize {
        let entries = std::mem::take(&mut *self.resources.write());
        for entry in &entries {
            info!("stop monitoring {}", entry.identity());
        }
        entries.len()
    }
}
