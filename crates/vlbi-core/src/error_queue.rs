//! Process-wide, mutex-protected ordered set of observed errors.
//!
//! Pushing the same `(number, message)` pair repeatedly bumps `occurrences`
//! and `time_last` rather than growing the set — operators see one entry
//! per distinct failure, with a count of how many times it recurred.

use crate::time::HighResTime;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub number: i32,
    pub message: String,
    pub time: HighResTime,
    pub time_last: HighResTime,
    pub occurrences: u64,
}

/// A thread-safe multiset of [`ErrorEntry`], ordered oldest-first by
/// `time`.
#[derive(Default)]
pub struct ErrorQueue {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        ErrorQueue {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Inserts a new entry, or bumps `occurrences`/`time_last` on an
    /// existing `(number, message)` pair. A zero `number` with an empty
    /// message is a no-op (mirrors `push_error` ignoring "no error").
    pub fn push(&self, number: i32, message: impl Into<String>, now: HighResTime) {
        let message = message.into();
        if number == 0 && message.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.number == number && e.message == message)
        {
            existing.occurrences += 1;
            existing.time_last = now;
            return;
        }
        entries.push(ErrorEntry {
            number,
            message,
            time: now,
            time_last: now,
            occurrences: 1,
        });
    }

    /// Returns the oldest (by `time`) entry without removing it.
    pub fn peek_oldest(&self) -> Option<ErrorEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().min_by_key(|e| e.time).cloned()
    }

    /// Removes and returns the oldest entry.
    pub fn pop_oldest(&self) -> Option<ErrorEntry> {
        let mut entries = self.entries.lock().unwrap();
        let idx = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.time)
            .map(|(i, _)| i)?;
        Some(entries.remove(idx))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
