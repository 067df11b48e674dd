// Per-key attempt counting with scripted failures

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Entry {
    attempts: usize,
    remaining_failures: usize,
}

/// Counts attempts per key and decides which of them fail.
#[derive(Debug, Default)]
pub struct FailureScript {
    entries: Mutex<HashMap<String, Entry>>,
}

impl FailureScript {
    /// Fail the next `times` attempts for `key`.
    pub fn fail(&self, key: &str, times: usize) {
        self.entries
            .lock()
            .entry(key.to_string())
            .or_default()
            .remaining_failures = times;
    }

    /// Fail every attempt for `key`.
    pub fn fail_always(&self, key: &str) {
        self.fail(key, usize::MAX);
    }

    /// Record an attempt. Returns `true` if it should fail.
    pub fn attempt(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_default();
        entry.attempts += 1;

        match entry.remaining_failures {
            0 => false,
            usize::MAX => true,
            _ => {
                entry.remaining_failures -= 1;
                true
            }
        }
    }

    /// Attempts recorded for `key`.
    pub fn attempts(&self, key: &str) -> usize {
        self.entries.lock().get(key).map_or(0, |e| e.attempts)
    }

    /// Attempts recorded for all keys.
    pub fn total_attempts(&self) -> usize {
        self.entries.lock().values().map(|e| e.attempts).sum()
    }
}
