//! Session approval memory.
//!
//! Holds the `(tool, pattern)` keys a human accepted during this process so
//! the same kind of call does not prompt again. Owned by the policy
//! instance rather than living in a global.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ApprovalMemory {
    approved: Mutex<HashSet<(String, String)>>,
}

impl ApprovalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tool: &str, pattern: &str) {
        self.lock().insert((tool.to_string(), pattern.to_string()));
    }

    pub fn contains(&self, tool: &str, pattern: &str) -> bool {
        self.lock()
            .contains(&(tool.to_string(), pattern.to_string()))
    }

    /// Forget every approval.
    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<(String, String)>> {
        // A panic while holding the lock cannot leave the set half-updated
        self.approved.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
