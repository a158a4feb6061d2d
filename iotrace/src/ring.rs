//! Fixed-capacity, overwrite-oldest event storage.
//!
//! Cursors, count and a caller-defined header `H` live behind one content
//! lock. Slot contents are published through per-slot sequence locks so a
//! reader can copy a slot without taking the content lock: it may see a
//! newer record than the one it expected, never a torn one.

use crate::types::event::EventRecord;
use crate::types::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use seqlock::SeqLock;

/// Position of the live entries at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Slot of the oldest valid entry.
    pub oldest: usize,
    /// Number of valid entries.
    pub count: usize,
    /// Slot the next insert writes to.
    pub write_cursor: usize,
}

#[derive(Debug)]
struct RingState<H> {
    write_cursor: usize,
    count: usize,
    header: H,
}

pub struct RingBuffer<H = ()> {
    state: Mutex<RingState<H>>,
    slots: Box<[SeqLock<EventRecord>]>,
}

impl<H> RingBuffer<H> {
    /// Pre-allocates `capacity` empty slots.
    ///
    /// `capacity` must be non-zero; callers validate it.
    pub fn try_new(capacity: usize, header: H) -> Result<Self> {
        debug_assert!(capacity > 0, "ring capacity must be non-zero");

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        slots.extend((0..capacity).map(|_| SeqLock::new(EventRecord::EMPTY)));

        Ok(Self {
            state: Mutex::new(RingState {
                write_cursor: 0,
                count: 0,
                header,
            }),
            slots: slots.into_boxed_slice(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Takes the content lock.
    pub fn lock(&self) -> RingGuard<'_, H> {
        RingGuard {
            slots: &self.slots,
            state: self.state.lock(),
        }
    }

    pub fn insert(&self, record: EventRecord) {
        self.lock().insert(record);
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn snapshot_cursor(&self) -> Cursor {
        self.lock().cursor()
    }

    /// Copies a slot without the content lock.
    pub fn read_slot(&self, index: usize) -> EventRecord {
        self.slots[index % self.slots.len()].read()
    }
}

/// Content lock held over a ring; every mutation goes through here.
pub struct RingGuard<'a, H> {
    slots: &'a [SeqLock<EventRecord>],
    state: MutexGuard<'a, RingState<H>>,
}

impl<H> RingGuard<'_, H> {
    /// Writes `record` at the write cursor, overwriting the oldest entry when full.
    pub fn insert(&mut self, record: EventRecord) {
        let capacity = self.slots.len();
        let slot = self.state.write_cursor;

        *self.slots[slot].lock_write() = record;

        self.state.write_cursor = (slot + 1) % capacity;
        if self.state.count < capacity {
            self.state.count += 1;
        }
    }

    pub fn reset(&mut self) {
        self.state.count = 0;
        self.state.write_cursor = 0;
        for slot in self.slots {
            *slot.lock_write() = EventRecord::EMPTY;
        }
    }

    pub fn cursor(&self) -> Cursor {
        let capacity = self.slots.len();
        let write_cursor = self.state.write_cursor;
        let count = self.state.count;
        Cursor {
            oldest: (write_cursor + capacity - count) % capacity,
            count,
            write_cursor,
        }
    }

    pub fn count(&self) -> usize {
        self.state.count
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn header(&self) -> &H {
        &self.state.header
    }

    pub fn header_mut(&mut self) -> &mut H {
        &mut self.state.header
    }
}
