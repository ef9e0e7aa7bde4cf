use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque snapshot version identifier.
///
/// Versions are only ever compared for equality; a fresh one is minted for
/// every content change and must never be reused for two different resource
/// sets under the same node identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(String);

// === impl Version ===

impl Version {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
