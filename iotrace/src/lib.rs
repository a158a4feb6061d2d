//! Per-file I/O event logs.
//!
//! A [`registry::Registry`] tracks monitored files by block device and inode.
//! Each file owns a fixed-size ring of [`types::event::EventRecord`]s that
//! event sources append to through [`registry::Registry::record_event`], and
//! that a single consumer drains with a [`snapshot::SnapshotReader`].

pub mod clock;
pub mod control;
pub mod ingest;
pub mod registry;
pub mod resolve;
pub mod resource;
pub mod ring;
pub mod server;
pub mod snapshot;
pub mod types;

pub use registry::Registry;
pub use types::{Error, Result};
