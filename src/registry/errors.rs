//! Model registry error types
//!
//! Every variant is fatal to the registry operation that raised it. A running
//! engine keeps its loaded strategy when a registry read fails.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Version unknown to the index (or its artifact is gone)
    #[error("Model version not found: {0}")]
    NotFound(String),

    /// Rollback had no eligible target
    #[error("No rollback candidate available")]
    NoRollbackCandidate,

    /// Version id already allocated
    #[error("Model version already exists: {0}")]
    VersionExists(String),

    /// Write lock not acquired in time
    #[error("Registry lock not acquired within {0}ms")]
    LockTimeout(u64),

    /// Artifact path or version id unusable
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// True for the not-found family (unknown version, nothing to roll back to)
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_) | RegistryError::NoRollbackCandidate)
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family() {
        assert!(RegistryError::NotFound("v1".into()).is_not_found());
        assert!(RegistryError::NoRollbackCandidate.is_not_found());
        assert!(!RegistryError::LockTimeout(10).is_not_found());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RegistryError::LockTimeout(5000).to_string(),
            "Registry lock not acquired within 5000ms"
        );
        assert_eq!(
            RegistryError::VersionExists("v1".into()).to_string(),
            "Model version already exists: v1"
        );
    }
}
