//! Bounded in-memory queue of log entries awaiting persistence

use std::collections::VecDeque;

use super::LogEntry;

/// Multiple of the capacity the buffer may grow to while persistence keeps failing.
/// Past it the oldest entries are dropped and the drop is reported by the logger.
pub const RETENTION_FACTOR: usize = 10;

/// Queue of entries waiting for the next flush.
///
/// `push` reports when the capacity has been reached so the caller flushes before the
/// next push. `take` swaps the whole queue out, leaving an empty buffer behind for entries
/// logged while the batch is being written. A failed batch goes back to the front with
/// `requeue`, ahead of anything logged since.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
    unreported: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
            unreported: 0,
        }
    }

    /// Append an entry; returns true once the buffer is full and must be flushed
    pub fn push(&mut self, entry: LogEntry) -> bool {
        self.entries.push_back(entry);
        self.enforce_retention_limit();
        self.is_full()
    }

    /// Detach every buffered entry
    pub fn take(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries).into()
    }

    /// Put a failed batch back in front of the live entries
    pub fn requeue(&mut self, batch: Vec<LogEntry>) {
        for entry in batch.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.enforce_retention_limit();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries discarded because the retention limit was hit
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Entries dropped since the last call; the logger reports each drop exactly once
    pub fn take_unreported_drops(&mut self) -> usize {
        std::mem::take(&mut self.unreported)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    fn enforce_retention_limit(&mut self) {
        let limit = self.capacity.saturating_mul(RETENTION_FACTOR);
        while self.entries.len() > limit {
            self.entries.pop_front();
            self.dropped += 1;
            self.unreported += 1;
        }
    }
}
