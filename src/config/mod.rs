//! Configuration module for pipeline settings and YAML loading
//!
//! This module provides:
//! - Configuration types (`AppConfig` and its sections)
//! - YAML loading functionality (`load_config`)
//! - Runtime knobs with environment variable overrides (`constants`)
//! - Logging initialisation (`logging`)

pub mod constants;
mod loader;
pub mod logging;
mod types;

// Re-export types
pub use types::{
    AccountConfig, AppConfig, BusConfig, EngineConfig, JournalConfig, PaperConfig, RegistryConfig,
    SharedConfig, StrategyConfig, StrategyType,
};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};
