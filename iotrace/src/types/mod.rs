use crate::types::event::{EventKind, Level};
use num_enum::TryFromPrimitiveError;

pub mod event;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,

    #[error("log capacity must be greater than zero")]
    ZeroCapacity,

    #[error("'{0}' not monitored")]
    NotFound(String),

    #[error("file not found: {0}: {1}")]
    PathNotFound(String, std::io::Error),

    #[error("no block device for {0}")]
    NoBackingDevice(String),

    #[error("no inode for {0}")]
    NoInode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{1}: {0}")]
    Path(std::io::Error, String),

    #[error("Conversion failed: {0}")]
    EventKind(#[from] TryFromPrimitiveError<EventKind>),

    #[error("Conversion failed: {0}")]
    Level(#[from] TryFromPrimitiveError<Level>),

    #[error("{0}")]
    Command(String),

    #[error("command of {0} bytes is too long")]
    CommandTooLong(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
