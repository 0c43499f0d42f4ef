// SPDX-License-Identifier: Apache-2.0
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies a metric within a [`crate::storage::Storage`].
///
/// Two metrics with the same `(group, id)` pair are the same metric; the
/// pair also determines the metric's on-disk directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId {
    pub group: String,
    pub id: String,
}

impl MetricId {
    pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
        }
    }

    /// The canonical `group/id` form used both for hashing and for display.
    pub fn render(&self) -> String {
        format!("{}/{}", self.group, self.id)
    }

    /// Lowercase hex of the first 16 bytes of SHA-256 over [`Self::render`].
    ///
    /// Meant for embedders that need a filesystem- or URL-safe stand-in for
    /// a metric id without exposing its group/id text.
    pub fn hash(&self) -> MetricIdHash {
        let digest = Sha256::digest(self.render().as_bytes());
        let mut out = String::with_capacity(32);
        for byte in &digest[..16] {
            out.push_str(&format!("{byte:02x}"));
        }
        MetricIdHash(out)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Opaque 16-byte hex digest identifying a [`MetricId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricIdHash(String);

impl MetricIdHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_joins_group_and_id() {
        let id = MetricId::new("system", "cpu-load");
        assert_eq!(id.render(), "system/cpu-load");
        assert_eq!(id.to_string(), "system/cpu-load");
    }

    #[test]
    fn hash_is_stable_and_32_hex_chars() {
        let id = MetricId::new("system", "cpu-load");
        let h1 = id.hash();
        let h2 = id.hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.as_str().len(), 32);
        assert!(h1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_ids_hash_differently() {
        let a = MetricId::new("system", "cpu-load");
        let b = MetricId::new("system", "cpu-temp");
        assert_ne!(a.hash(), b.hash());
    }
}
