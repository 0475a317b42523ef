//! Content change detection
//!
//! A document is analyzed again only when its content fingerprint differs
//! from the one stored at its last analysis.

use crate::storage::{self, Fingerprint, SharedStorage, Storage};
use crate::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Bytes of the SHA-256 digest kept in a fingerprint
const FINGERPRINT_BYTES: usize = 16;

/// Computes the fingerprint of a document body: truncated SHA-256, hex encoded
pub fn content_fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Outcome of comparing fetched content against its stored fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCheck {
    pub identity: String,
    pub content_hash: String,
    /// Never seen, or different from the last recorded fingerprint
    pub changed: bool,
    pub force: bool,
}

impl ContentCheck {
    /// True if the content should be analyzed
    pub fn should_process(&self) -> bool {
        self.changed || self.force
    }
}

/// Decides whether fetched content needs analysis
#[derive(Clone)]
pub struct ChangeDetector {
    storage: SharedStorage,
}

impl ChangeDetector {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    /// Compares `content` against the stored fingerprint without recording it
    ///
    /// Content is analyzed when it was never seen, when its fingerprint
    /// changed, or when `force` is set.
    pub fn check(&self, identity: &str, content: &[u8], force: bool) -> Result<ContentCheck> {
        let hash = content_fingerprint(content);
        let previous = storage::lock(&self.storage)?.get_fingerprint(identity)?;

        let changed = match previous {
            Some(previous) => previous.content_hash != hash,
            None => true,
        };
        if !changed {
            debug!("{} is unchanged since its last analysis", identity);
        }

        Ok(ContentCheck {
            identity: identity.to_string(),
            content_hash: hash,
            changed,
            force,
        })
    }

    /// Stores the fingerprint of a checked document
    ///
    /// Call only once the analysis the check asked for is queued. Unchanged
    /// content only refreshes `last_seen_at`.
    pub fn record(&self, check: &ContentCheck) -> Result<()> {
        storage::lock(&self.storage)?.put_fingerprint(&Fingerprint {
            document_identity: check.identity.clone(),
            content_hash: check.content_hash.clone(),
            last_seen_at: Utc::now(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use std::sync::{Arc, Mutex};

    fn detector() -> ChangeDetector {
        ChangeDetector::new(Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap())))
    }

    /// Checks and records, as a completed fetch does
    fn sighting(detector: &ChangeDetector, content: &[u8], force: bool) -> bool {
        let check = detector.check("https://a.com/", content, force).unwrap();
        detector.record(&check).unwrap();
        check.should_process()
    }

    #[test]
    fn test_fingerprint_is_truncated_hex() {
        let fp = content_fingerprint(b"hello");
        assert_eq!(fp.len(), 32);
        assert_eq!(fp, content_fingerprint(b"hello"));
        assert_ne!(fp, content_fingerprint(b"hello!"));
    }

    #[test]
    fn test_first_sighting_is_processed() {
        let detector = detector();
        assert!(sighting(&detector, b"v1", false));
    }

    #[test]
    fn test_unchanged_content_is_skipped() {
        let detector = detector();
        assert!(sighting(&detector, b"v1", false));
        assert!(!sighting(&detector, b"v1", false));
    }

    #[test]
    fn test_changed_content_is_processed() {
        let detector = detector();
        sighting(&detector, b"v1", false);
        assert!(sighting(&detector, b"v2", false));
        assert!(!sighting(&detector, b"v2", false));
    }

    #[test]
    fn test_force_processes_unchanged_content() {
        let detector = detector();
        sighting(&detector, b"v1", false);
        assert!(sighting(&detector, b"v1", true));
    }

    #[test]
    fn test_unrecorded_check_leaves_content_changed() {
        let detector = detector();

        let check = detector.check("https://a.com/", b"v1", false).unwrap();
        assert!(check.should_process());

        // Nothing was queued for this check, so the next sighting still counts
        assert!(detector.check("https://a.com/", b"v1", false).unwrap().changed);

        detector.record(&check).unwrap();
        let again = detector.check("https://a.com/", b"v1", false).unwrap();
        assert!(!again.changed);
        assert!(!again.should_process());
    }
}
