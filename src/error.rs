//! Application-wide error types using thiserror
//!
//! Module errors stay precise (`RiskError`, `RegistryError`, ...); binaries
//! and glue code wrap them in `AppError`.

use thiserror::Error;

use crate::adapters::errors::TransportError;
use crate::core::engine::EngineError;
use crate::core::journal::JournalError;
use crate::core::risk::RiskError;
use crate::core::strategy::StrategyError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_module_errors() {
        let err: AppError = RiskError::KillSwitchActive.into();
        assert_eq!(err.to_string(), "Risk error: Kill switch active");

        let err: AppError = TransportError::Timeout(2000).into();
        assert!(matches!(err, AppError::Transport(TransportError::Timeout(2000))));

        let err: AppError = RegistryError::NoRollbackCandidate.into();
        assert!(err.to_string().starts_with("Registry error"));
    }
}
