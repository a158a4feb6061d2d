#![no_std]

use bytemuck::{Pod, Zeroable};

/// Block layer sizes are reported in sectors of this many bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Kernel task name length, NUL terminator included.
pub const TASK_COMM_LEN: usize = 16;

pub const KIND_READ: u8 = b'R';
pub const KIND_WRITE: u8 = b'W';
pub const KIND_EMPTY: u8 = b'?';

pub const LEVEL_VFS: u8 = 0;
pub const LEVEL_FS: u8 = 1;
pub const LEVEL_BLK: u8 = 2;

/// One I/O observation as emitted by an instrumentation point.
///
/// `dev` uses the kernel's internal encoding (`major << 20 | minor`).
/// For `LEVEL_BLK` events `offset` and `size` are in sectors.
/// `timestamp_ns` is `CLOCK_MONOTONIC` at the time of the access.
#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod, Debug)]
pub struct IoEvent {
    pub inode: u64,
    pub offset: i64,
    pub size: u64,
    pub timestamp_ns: u64,

    pub tid:  u32,
    pub tgid: u32,
    pub dev:  u32,

    pub comm: [u8; TASK_COMM_LEN],

    pub kind:  u8,
    pub level: u8,

    pub _pad: [u8; 2],
}

impl IoEvent {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}
