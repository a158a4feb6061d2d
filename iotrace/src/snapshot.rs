//! Sequential read of one resource's log, oldest entry first.
//!
//! The reader takes the content lock only to capture cursors and to update the
//! resource's `last_shown` marker; slot contents are copied without it. When
//! writers are active, entries overwritten before they are read are lost and
//! the read may stop early once it reaches the live write cursor. Stop the log
//! before reading for a gap-free result.

use crate::resource::MonitoredResource;
use crate::types::event::EventRecord;
use log::{debug, warn};
use std::sync::Arc;

pub struct SnapshotReader {
    resource: Arc<MonitoredResource>,
    start: usize,
    position: usize,
    produced: usize,
    count: usize,
    gaps: usize,
}

impl SnapshotReader {
    pub fn open(resource: Arc<MonitoredResource>) -> Self {
        Self::open_at(resource, 0)
    }

    /// Resumes a read `start` entries past the current oldest entry.
    ///
    /// A resumed read keeps the last shown slot of the previous one, so entries
    /// overwritten in between are reported as a jump.
    pub fn open_at(resource: Arc<MonitoredResource>, start: usize) -> Self {
        let (cursor, enabled) = {
            let mut guard = resource.ring().lock();
            let cursor = guard.cursor();
            if start == 0 {
                guard.header_mut().last_shown = None;
            }
            (cursor, guard.header().enabled)
        };

        if enabled && start < cursor.count {
            debug!("{}: reading while log active", resource.identity());
        }

        let capacity = resource.capacity();
        Self {
            position: (cursor.oldest + start) % capacity,
            start,
            produced: start,
            count: cursor.count,
            gaps: 0,
            resource,
        }
    }

    /// Logical position reached, usable with [`SnapshotReader::open_at`].
    pub fn position(&self) -> usize {
        self.produced
    }

    /// Number of jumps over unread entries seen so far.
    pub fn gaps(&self) -> usize {
        self.gaps
    }
}

impl Iterator for SnapshotReader {
    type Item = EventRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced >= self.count {
            return None;
        }

        let ring = self.resource.ring();
        let capacity = ring.capacity();
        let index = self.position;

        {
            let mut guard = ring.lock();
            if self.produced > self.start && index == guard.cursor().write_cursor {
                self.count = self.produced;
                return None;
            }

            let control = guard.header_mut();
            if let Some(last) = control.last_shown {
                if last != index && index != (last + 1) % capacity {
                    warn!(
                        "{}: jump from {last} to {index}",
                        self.resource.identity()
                    );
                    self.gaps += 1;
                }
            }
            control.last_shown = Some(index);
        }

        let record = ring.read_slot(index);
        self.position = (index + 1) % capacity;
        self.produced += 1;

        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.count.saturating_sub(self.produced)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Identity;
    use crate::types::event::{Actor, IoAccess, Level};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn resource(capacity: usize) -> Arc<MonitoredResource> {
        Arc::new(
            MonitoredResource::try_new(Identity::new("sdb", 12), capacity, Duration::ZERO)
                .unwrap(),
        )
    }

    fn write(res: &MonitoredResource, offset: i64) {
        res.record_event(
            IoAccess::write(Level::Vfs, offset, 1),
            Actor::new("writer", 3),
            Duration::from_nanos(offset as u64),
        );
    }

    fn offsets(reader: SnapshotReader) -> Vec<i64> {
        reader.map(|r| r.offset).collect()
    }

    #[test]
    fn empty_log_yields_nothing() {
        let res = resource(4);
        let mut reader = res.snapshot();
        assert!(reader.next().is_none());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn partial_log_in_insertion_order() {
        let res = resource(8);
        for n in 1..=5 {
            write(&res, n);
        }
        assert_eq!(offsets(res.snapshot()), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn wrapped_log_oldest_first() {
        let res = resource(3);
        for n in 1..=5 {
            write(&res, n);
        }
        res.disable();
        assert_eq!(offsets(res.snapshot()), vec![3, 4, 5]);
    }

    #[test]
    fn exactly_full_log() {
        let res = resource(3);
        for n in 1..=3 {
            write(&res, n);
        }
        assert_eq!(offsets(res.snapshot()), vec![1, 2, 3]);
    }

    #[test]
    fn reader_is_not_affected_by_later_captures() {
        let res = resource(4);
        write(&res, 1);
        write(&res, 2);
        let first = res.snapshot();
        write(&res, 3);

        assert_eq!(offsets(first), vec![1, 2]);
        assert_eq!(offsets(res.snapshot()), vec![1, 2, 3]);
    }

    #[test]
    fn resume_from_position() {
        let res = resource(6);
        for n in 1..=6 {
            write(&res, n);
        }
        res.disable();

        let mut reader = res.snapshot();
        let head: Vec<i64> = reader.by_ref().take(2).map(|r| r.offset).collect();
        assert_eq!(head, vec![1, 2]);

        let rest = SnapshotReader::open_at(Arc::clone(&res), reader.position());
        assert_eq!(offsets(rest), vec![3, 4, 5, 6]);
        assert!(SnapshotReader::open_at(Arc::clone(&res), 6).next().is_none());
    }

    #[test]
    fn overwrite_between_chunks_is_reported() {
        let res = resource(4);
        for n in 1..=4 {
            write(&res, n);
        }

        let mut reader = res.snapshot();
        reader.next();
        reader.next();
        assert_eq!(reader.gaps(), 0);

        // Writers overtake the reader: slots 2 and 3 are lost.
        write(&res, 5);
        write(&res, 6);

        let mut resumed = SnapshotReader::open_at(Arc::clone(&res), reader.position());
        let next = resumed.next().unwrap();
        assert_eq!(next.offset, 5);
        assert_eq!(resumed.gaps(), 1);
    }

    #[test]
    fn stops_at_live_write_cursor() {
        let res = resource(3);
        for n in 1..=3 {
            write(&res, n);
        }
        let mut reader = res.snapshot();
        assert_eq!(reader.next().unwrap().offset, 1);

        // The writer lands on the reader's next slot.
        write(&res, 4);
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn reset_while_reading_never_panics() {
        let res = resource(3);
        for n in 1..=3 {
            write(&res, n);
        }
        let mut reader = res.snapshot();
        reader.next();
        res.reset(false, Duration::ZERO);
        let rest: Vec<_> = reader.collect();
        assert!(rest.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn reads_race_writers_safely() {
        use crate::types::event::EventKind;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let res = resource(16);
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            let writers: Vec<_> = (0..4)
                .map(|w| {
                    let res = &res;
                    s.spawn(move || {
                        for n in 0..20_000 {
                            write(res, w * 100_000 + n);
                        }
                    })
                })
                .collect();

            let reader = s.spawn(|| {
                let mut reads = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let records: Vec<_> = res.snapshot().collect();
                    assert!(records.len() <= res.capacity());
                    assert!(records.iter().all(|r| r.kind == EventKind::Write));
                    reads += 1;
                    if finished {
                        return reads;
                    }
                }
            });

            for writer in writers {
                writer.join().unwrap();
            }
            done.store(true, Ordering::Release);
            assert!(reader.join().unwrap() > 0);
        });

        let status = res.status();
        assert_eq!(status.count, status.capacity);
        assert_eq!(offsets(res.snapshot()).len(), 16);
    }
}
