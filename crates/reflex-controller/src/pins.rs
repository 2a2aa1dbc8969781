//! Pin authorization index
//!
//! A pair of inverse mappings between user ids and salted pin digests,
//! rebuilt atomically whenever the cloud pushes an updated set. A digest
//! shared by two or more users authorizes nobody; every colliding entry is
//! dropped during the rebuild, and nothing about the conflict is surfaced.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Compute the salted pin digest used for lookups
pub fn pin_digest(salt: &str, candidate: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(candidate.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// In-memory user ↔ digest index
#[derive(Debug, Default)]
pub struct PinIndex {
    by_user: HashMap<String, String>,
    by_digest: HashMap<String, String>,
}

impl PinIndex {
    /// Rebuild the index from a pushed user-id → digest map
    ///
    /// Collision handling is order-independent: any digest claimed by more
    /// than one user is excluded entirely.
    pub fn rebuild(entries: &HashMap<String, String>) -> Self {
        let mut digest_counts: HashMap<&str, usize> = HashMap::new();
        for digest in entries.values() {
            *digest_counts.entry(digest.as_str()).or_insert(0) += 1;
        }

        let mut index = Self::default();
        for (user, digest) in entries {
            if digest_counts.get(digest.as_str()).copied() == Some(1) {
                index.by_user.insert(user.clone(), digest.clone());
                index.by_digest.insert(digest.clone(), user.clone());
            }
        }
        index
    }

    /// Look up the user authorized for a digest
    pub fn verify(&self, digest: &str) -> Option<&str> {
        self.by_digest.get(digest).map(String::as_str)
    }

    /// The digest registered for a user
    pub fn digest_for_user(&self, user: &str) -> Option<&str> {
        self.by_user.get(user).map(String::as_str)
    }

    /// Number of authorized entries
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    /// Check whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuild_and_verify() {
        let mut entries = HashMap::new();
        entries.insert("user-a".to_string(), "d1".to_string());
        entries.insert("user-b".to_string(), "d2".to_string());

        let index = PinIndex::rebuild(&entries);

        assert_eq!(index.len(), 2);
        assert_eq!(index.verify("d1"), Some("user-a"));
        assert_eq!(index.verify("d2"), Some("user-b"));
        assert_eq!(index.digest_for_user("user-b"), Some("d2"));
        assert!(index.verify("d3").is_none());
    }

    #[test]
    fn test_collision_authorizes_nobody() {
        let mut entries = HashMap::new();
        entries.insert("user-a".to_string(), "shared".to_string());
        entries.insert("user-b".to_string(), "shared".to_string());
        entries.insert("user-c".to_string(), "d3".to_string());

        let index = PinIndex::rebuild(&entries);

        assert!(index.verify("shared").is_none());
        assert!(index.digest_for_user("user-a").is_none());
        assert!(index.digest_for_user("user-b").is_none());
        assert_eq!(index.verify("d3"), Some("user-c"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_pin_digest_is_salted() {
        let a = pin_digest("place-1", "1234");
        let b = pin_digest("place-2", "1234");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, pin_digest("place-1", "1234"));
    }
}
