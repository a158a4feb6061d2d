use iotrace_common::{
    KIND_EMPTY, KIND_READ, KIND_WRITE, LEVEL_BLK, LEVEL_FS, LEVEL_VFS, TASK_COMM_LEN,
};
use num_enum::TryFromPrimitive;
use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;
use strum_macros::AsRefStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, AsRefStr)]
#[repr(u8)]
pub enum EventKind {
    Read = KIND_READ,
    Write = KIND_WRITE,

    /// Marks a slot cleared by a reset.
    Empty = KIND_EMPTY,
}

impl EventKind {
    pub const fn as_char(self) -> char {
        self as u8 as char
    }
}

/// Instrumentation point that observed an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, AsRefStr)]
#[repr(u8)]
pub enum Level {
    #[strum(serialize = "VFS")]
    Vfs = LEVEL_VFS,
    #[strum(serialize = "FS")]
    Filesystem = LEVEL_FS,
    #[strum(serialize = "BLK")]
    Block = LEVEL_BLK,
}

/// Task that issued an access: bounded task name and owning process id (tgid).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    comm: [u8; TASK_COMM_LEN],
    tgid: u32,
}

impl Actor {
    pub const UNKNOWN: Self = Self {
        comm: [0; TASK_COMM_LEN],
        tgid: 0,
    };

    /// Builds an actor, truncating `name` to `TASK_COMM_LEN - 1` bytes.
    pub fn new(name: &str, tgid: u32) -> Self {
        let mut comm = [0u8; TASK_COMM_LEN];
        let len = name.len().min(TASK_COMM_LEN - 1);
        comm[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { comm, tgid }
    }

    pub const fn from_raw(comm: [u8; TASK_COMM_LEN], tgid: u32) -> Self {
        Self { comm, tgid }
    }

    pub fn comm(&self) -> Cow<'_, str> {
        match CStr::from_bytes_until_nul(&self.comm) {
            Ok(name) => name.to_string_lossy(),
            Err(_) => String::from_utf8_lossy(&self.comm),
        }
    }

    pub const fn tgid(&self) -> u32 {
        self.tgid
    }
}

impl Debug for Actor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.comm(), self.tgid)
    }
}

/// A single observed access before it is timestamped and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoAccess {
    pub kind: EventKind,
    pub level: Level,
    pub offset: i64,
    pub size: u64,
}

impl IoAccess {
    pub const fn read(level: Level, offset: i64, size: u64) -> Self {
        Self {
            kind: EventKind::Read,
            level,
            offset,
            size,
        }
    }

    pub const fn write(level: Level, offset: i64, size: u64) -> Self {
        Self {
            kind: EventKind::Write,
            level,
            offset,
            size,
        }
    }
}

/// `seconds.nanoseconds`, nanoseconds zero padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(pub Duration);

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.0.as_secs(), self.0.subsec_nanos())
    }
}

/// A stored log entry. `size` is always in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Relative to the owning resource's time zero.
    pub timestamp: Duration,
    pub kind: EventKind,
    pub level: Level,
    pub offset: i64,
    pub size: u64,
    pub actor: Actor,
}

impl EventRecord {
    pub const EMPTY: Self = Self {
        timestamp: Duration::ZERO,
        kind: EventKind::Empty,
        level: Level::Vfs,
        offset: 0,
        size: 0,
        actor: Actor::UNKNOWN,
    };

    pub fn is_empty(&self) -> bool {
        self.kind == EventKind::Empty
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{};{};{};{};{};{};{}",
            Timestamp(self.timestamp),
            self.kind.as_char(),
            self.offset,
            self.size,
            self.level.as_ref(),
            self.actor.comm(),
            self.actor.tgid(),
        )
    }
}
