//! Administrative credential check for the force-mint trigger.
//!
//! The configured key is kept only as a BLAKE3 digest. A presented
//! credential is hashed and compared against it; `blake3::Hash` equality is
//! constant-time, so the comparison leaks nothing about how much matched.

use thiserror::Error;

use crate::storage::DbError;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid recipient wallet: {0}")]
    InvalidRecipient(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

/// Holds the digest of the admin key, if one is configured.
#[derive(Clone, Default)]
pub struct AdminGate {
    key_digest: Option<blake3::Hash>,
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AdminGate {
    /// An empty or missing key disables the gate: every attempt is refused.
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key_digest: key
                .filter(|k| !k.is_empty())
                .map(|k| blake3::hash(k.as_bytes())),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.key_digest.is_some()
    }

    pub fn authorize(&self, presented: &str) -> Result<(), AdminError> {
        match &self.key_digest {
            Some(expected) if *expected == blake3::hash(presented.as_bytes()) => Ok(()),
            _ => Err(AdminError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_key_is_authorized() {
        let gate = AdminGate::new(Some("s3cret"));
        assert!(gate.is_enabled());
        assert!(gate.authorize("s3cret").is_ok());
    }

    #[test]
    fn wrong_key_is_refused() {
        let gate = AdminGate::new(Some("s3cret"));
        assert!(matches!(gate.authorize("s3cre"), Err(AdminError::Unauthorized)));
        assert!(matches!(gate.authorize(""), Err(AdminError::Unauthorized)));
    }

    #[test]
    fn unconfigured_gate_refuses_everything() {
        for gate in [AdminGate::new(None), AdminGate::new(Some("")), AdminGate::disabled()] {
            assert!(!gate.is_enabled());
            assert!(matches!(gate.authorize(""), Err(AdminError::Unauthorized)));
            assert!(matches!(gate.authorize("anything"), Err(AdminError::Unauthorized)));
        }
    }

    #[test]
    fn debug_output_hides_the_digest() {
        let gate = AdminGate::new(Some("s3cret"));
        let shown = format!("{gate:?}");
        assert!(!shown.contains(&blake3::hash(b"s3cret").to_hex().to_string()));
    }
}
