//! Topic → job cache used to reject duplicate submissions without a
//! database round trip.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

/// Active (queued or processing) jobs keyed by topic.
///
/// This is a fast-reject hint only; the job store is authoritative.
#[derive(Debug, Default)]
pub struct ActiveJobs {
    inner: Mutex<HashMap<String, Uuid>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Uuid>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, topic: &str) -> Option<Uuid> {
        self.map().get(topic).copied()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.map().contains_key(topic)
    }

    pub fn insert(&self, topic: &str, job_id: Uuid) {
        self.map().insert(topic.to_string(), job_id);
    }

    /// Remove the entry for `topic` if it still points at `job_id`.
    ///
    /// Returns whether an entry was removed. A newer job registered under
    /// the same topic is left alone.
    pub fn release(&self, topic: &str, job_id: Uuid) -> bool {
        let mut map = self.map();
        if map.get(topic) == Some(&job_id) {
            map.remove(topic);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn clear(&self) {
        self.map().clear();
    }
}
