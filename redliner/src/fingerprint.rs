//! Per-session document fingerprints.
//!
//! A turn asks [`DocumentFingerprintCache::should_send_full_document`] and then
//! unconditionally records the hash it was given. Callers hold the session lease,
//! so decide-then-record never interleaves for one session.

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct DocumentFingerprintCache {
    hashes: DashMap<String, String>,
}

impl DocumentFingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// False only when both the recorded and current hash exist and are equal.
    pub fn should_send_full_document(&self, session_id: &str, current: Option<&str>) -> bool {
        let Some(current) = current.filter(|h| !h.is_empty()) else {
            return true;
        };
        match self.hashes.get(session_id) {
            Some(recorded) => recorded.value() != current,
            None => true,
        }
    }

    /// Recording an absent or empty hash clears the entry.
    pub fn record_hash(&self, session_id: &str, current: Option<&str>) {
        match current.filter(|h| !h.is_empty()) {
            Some(hash) => {
                self.hashes.insert(session_id.to_string(), hash.to_string());
            }
            None => {
                self.hashes.remove(session_id);
            }
        }
    }

    pub fn forget(&self, session_id: &str) {
        self.hashes.remove(session_id);
    }

    pub fn clear(&self) {
        self.hashes.clear();
    }
}
