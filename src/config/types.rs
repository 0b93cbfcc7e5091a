//! Configuration types loaded from YAML
//!
//! Every section has defaults, so a config file only needs to name what it
//! overrides. `AppConfig::validate` is run by the loader after parsing.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::bus::{BackpressurePolicy, DEFAULT_BUS_CAPACITY};
use crate::core::risk::RiskLimits;
use crate::error::AppError;

// ============================================================================
// Type Aliases
// ============================================================================

/// Type alias for shared configuration access across async tasks
pub type SharedConfig = Arc<RwLock<AppConfig>>;

// ============================================================================
// Enums
// ============================================================================

/// Decision policy selected at startup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    #[default]
    Momentum,
    LinearModel,
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyType::Momentum => write!(f, "momentum"),
            StrategyType::LinearModel => write!(f, "linear_model"),
        }
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Pipeline sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded feed -> pipeline tick queue (the feed waits when full)
    pub tick_queue_capacity: usize,
    /// Rolling feature window length per symbol
    pub feature_window: usize,
    /// Samples required before the strategy is consulted
    pub min_history: usize,
    /// Consult the registry's active pointer after each cycle
    pub hot_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_queue_capacity: 1024,
            feature_window: 50,
            min_history: 20,
            hot_reload: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.tick_queue_capacity == 0 {
            return Err(AppError::Config("engine.tick_queue_capacity must be > 0".to_string()));
        }
        if self.min_history < 2 {
            return Err(AppError::Config(format!(
                "engine.min_history must be >= 2, got {}",
                self.min_history
            )));
        }
        if self.min_history > self.feature_window {
            return Err(AppError::Config(format!(
                "engine.min_history ({}) must be <= engine.feature_window ({})",
                self.min_history, self.feature_window
            )));
        }
        Ok(())
    }
}

/// Event bus sizing and backpressure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
    pub policy: BackpressurePolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUS_CAPACITY,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

/// Account funding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccountConfig {
    pub starting_cash: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            starting_cash: 100_000.0,
        }
    }
}

/// Model registry location and retention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_dir: PathBuf,
    pub keep_last: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("models"),
            keep_last: 10,
        }
    }
}

/// Strategy selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyType,
    /// Artifact loaded at startup (the registry's active version wins once
    /// the engine runs)
    pub artifact: Option<PathBuf>,
    /// Parameter overrides passed to `Strategy::configure`
    pub params: serde_json::Value,
}

/// Trade journal output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct JournalConfig {
    /// JSON-lines file; no journal when absent
    pub path: Option<PathBuf>,
}

/// Synthetic feed and paper broker used by the binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaperConfig {
    pub symbol: String,
    pub start_price: f64,
    /// Maximum absolute price move per tick
    pub step: f64,
    pub interval_ms: u64,
    pub seed: Option<u64>,
    /// Fee as a fraction of notional
    pub fee_rate: f64,
    pub slippage_bps: f64,
    pub latency_ms: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC-USD".to_string(),
            start_price: 50_000.0,
            step: 25.0,
            interval_ms: 250,
            seed: None,
            fee_rate: 0.0005,
            slippage_bps: 1.0,
            latency_ms: 5,
        }
    }
}

impl PaperConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.symbol.trim().is_empty() {
            return Err(AppError::Config("paper.symbol cannot be empty".to_string()));
        }
        if self.start_price <= 0.0 || self.step < 0.0 {
            return Err(AppError::Config(format!(
                "paper: start_price must be > 0 and step >= 0 (got {} / {})",
                self.start_price, self.step
            )));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(AppError::Config(format!(
                "paper.fee_rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        Ok(())
    }
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub bus: BusConfig,
    pub account: AccountConfig,
    pub risk: RiskLimits,
    pub registry: RegistryConfig,
    pub strategy: StrategyConfig,
    pub journal: JournalConfig,
    pub paper: PaperConfig,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        self.engine.validate()?;

        if self.bus.capacity == 0 {
            return Err(AppError::Config("bus.capacity must be > 0".to_string()));
        }

        if !(self.account.starting_cash > 0.0) {
            return Err(AppError::Config(format!(
                "account.starting_cash must be > 0, got {}",
                self.account.starting_cash
            )));
        }

        self.risk
            .validate()
            .map_err(|e| AppError::Config(format!("risk: {}", e)))?;

        if self.registry.keep_last == 0 {
            return Err(AppError::Config("registry.keep_last must be >= 1".to_string()));
        }

        if !(self.strategy.params.is_null() || self.strategy.params.is_object()) {
            return Err(AppError::Config("strategy.params must be a mapping".to_string()));
        }

        self.paper.validate()?;

        Ok(())
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
