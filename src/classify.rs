use crate::types::Classification;

/// Default trusted-subnet prefix.
pub const DEFAULT_TRUSTED_PREFIX: &str = "192.168.";

/// Textual source-address heuristic.
///
/// An address is `Legit` iff its text starts with the trusted prefix. Everything else is
/// `Spoofed`, including IPv6 sources and empty input. This is a prefix match on text, not a
/// subnet test: a prefix such as `"10.1"` matches both 10.1.x.x and 10.100.x.x.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    trusted_prefix: String,
}

impl Classifier {
    pub fn new(trusted_prefix: impl Into<String>) -> Self {
        Self {
            trusted_prefix: trusted_prefix.into(),
        }
    }

    pub fn trusted_prefix(&self) -> &str {
        &self.trusted_prefix
    }

    pub fn classify(&self, source_address: &str) -> Classification {
        if source_address.starts_with(&self.trusted_prefix) {
            Classification::Legit
        } else {
            Classification::Spoofed
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_TRUSTED_PREFIX)
    }
}
