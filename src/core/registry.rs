//! In-memory registry of in-progress review sessions.
//!
//! Owned by the long-lived process and passed by handle to whoever needs it,
//! never ambient global state. Being empty on restart is load-bearing: any
//! persisted record claiming an in-progress review that is absent here is an
//! orphan from a previous process and can be reset.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct ReviewRegistry {
    active: Mutex<HashSet<String>>,
}

impl ReviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a review slot for `spec_id`. Returns false if one is already
    /// active for that spec.
    pub fn begin(&self, spec_id: &str) -> bool {
        self.lock().insert(spec_id.to_string())
    }

    /// Release the slot. Returns false if no review was active.
    pub fn finish(&self, spec_id: &str) -> bool {
        self.lock().remove(spec_id)
    }

    pub fn is_active(&self, spec_id: &str) -> bool {
        self.lock().contains(spec_id)
    }

    /// Sorted snapshot of active spec ids.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
