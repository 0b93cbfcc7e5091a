//! Decision policies
//!
//! A [`Strategy`] turns (tick, features, position) into an optional order.
//! Strategies are owned by the pipeline activity, so the trait is synchronous
//! and takes `&mut self`. Artifacts are small JSON documents and are read
//! inline during `reload`.
//!
//! Two policies ship with the crate:
//! - [`MomentumStrategy`]: rule-based, trades in the direction of window
//!   momentum. Its artifact is a parameter set.
//! - [`LinearModelStrategy`]: scores a weighted sum of named features. Its
//!   artifact holds the weights.
//!
//! [`StrategyKind`] wraps both and is what the binary builds from config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::adapters::types::{Fill, Order, OrderSide, Tick};
use crate::config::{StrategyConfig, StrategyType};
use crate::core::features::{Features, FEATURE_NAMES};
use crate::core::ledger::{Position, SIZE_EPSILON};

// =============================================================================
// Trait & Errors
// =============================================================================

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Failed to read artifact {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact {path}: {reason}")]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Decision failed: {0}")]
    Decision(String),
}

/// Capability set the engine drives each cycle
pub trait Strategy: Send + 'static {
    fn name(&self) -> &str;

    /// Decide on an order for this tick, if any
    fn on_tick(
        &mut self,
        tick: &Tick,
        features: &Features,
        position: &Position,
    ) -> Result<Option<Order>, StrategyError>;

    /// Called once per fill, after the ledger has applied it
    fn on_fill(&mut self, fill: &Fill, position: &Position);

    /// Merge a parameter update into the current parameters
    fn configure(&mut self, params: &serde_json::Value) -> Result<(), StrategyError>;

    /// Load a new artifact in place. On error the previous state is kept.
    fn reload(&mut self, artifact: &Path) -> Result<(), StrategyError>;

    /// Path of the artifact currently loaded, if any
    fn loaded_artifact(&self) -> Option<&Path>;
}

// =============================================================================
// Helpers
// =============================================================================

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, StrategyError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StrategyError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| StrategyError::InvalidArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Overlay `patch` object keys onto `current` and deserialize the result
fn merge_params<T>(current: &T, patch: &serde_json::Value) -> Result<T, StrategyError>
where
    T: Clone + Serialize + DeserializeOwned,
{
    let patch = match patch {
        serde_json::Value::Null => return Ok(current.clone()),
        serde_json::Value::Object(map) => map,
        other => {
            return Err(StrategyError::InvalidParams(format!(
                "expected an object, got {}",
                other
            )))
        }
    };

    let mut merged =
        serde_json::to_value(current).map_err(|e| StrategyError::InvalidParams(e.to_string()))?;
    if let serde_json::Value::Object(base) = &mut merged {
        for (key, value) in patch {
            if !base.contains_key(key) {
                return Err(StrategyError::InvalidParams(format!("unknown parameter '{}'", key)));
            }
            base.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged).map_err(|e| StrategyError::InvalidParams(e.to_string()))
}

/// Order that moves `position` to `target` size, if they differ
fn rebalance(tick: &Tick, position: &Position, target: f64) -> Option<Order> {
    let delta = target - position.size;
    if delta.abs() < SIZE_EPSILON {
        return None;
    }
    let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
    Some(Order::market(tick.symbol.clone(), side, delta.abs(), tick.mid()))
}

// =============================================================================
// Momentum
// =============================================================================

/// Parameters of [`MomentumStrategy`]; also its artifact format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumParams {
    /// Window momentum that opens a position in its direction
    pub entry_threshold: f64,
    /// Momentum magnitude below which an open position is closed
    pub exit_threshold: f64,
    /// Target absolute position size
    pub position_size: f64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            entry_threshold: 0.002,
            exit_threshold: 0.0005,
            position_size: 0.1,
        }
    }
}

impl MomentumParams {
    fn validate(&self) -> Result<(), String> {
        if !(self.position_size > 0.0) {
            return Err(format!("position_size must be > 0, got {}", self.position_size));
        }
        if !(self.entry_threshold >= 0.0) || !(self.exit_threshold >= 0.0) {
            return Err("thresholds must be >= 0".to_string());
        }
        if self.exit_threshold > self.entry_threshold {
            return Err(format!(
                "exit_threshold ({}) must not exceed entry_threshold ({})",
                self.exit_threshold, self.entry_threshold
            ));
        }
        Ok(())
    }
}

/// Trades in the direction of window momentum
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    params: MomentumParams,
    artifact: Option<PathBuf>,
    fills: u64,
}

impl MomentumStrategy {
    pub fn new(params: MomentumParams) -> Self {
        Self {
            params,
            artifact: None,
            fills: 0,
        }
    }

    pub fn params(&self) -> &MomentumParams {
        &self.params
    }

    pub fn fills_seen(&self) -> u64 {
        self.fills
    }
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self::new(MomentumParams::default())
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn on_tick(
        &mut self,
        tick: &Tick,
        features: &Features,
        position: &Position,
    ) -> Result<Option<Order>, StrategyError> {
        let p = &self.params;
        let target = if features.momentum > p.entry_threshold {
            p.position_size
        } else if features.momentum < -p.entry_threshold {
            -p.position_size
        } else if features.momentum.abs() < p.exit_threshold {
            0.0
        } else {
            return Ok(None);
        };
        Ok(rebalance(tick, position, target))
    }

    fn on_fill(&mut self, fill: &Fill, position: &Position) {
        self.fills += 1;
        debug!(
            strategy = "momentum",
            order_id = %fill.order_id,
            position = position.size,
            "[STRATEGY] Fill observed"
        );
    }

    fn configure(&mut self, params: &serde_json::Value) -> Result<(), StrategyError> {
        let merged: MomentumParams = merge_params(&self.params, params)?;
        merged.validate().map_err(StrategyError::InvalidParams)?;
        self.params = merged;
        info!(params = ?self.params, "[STRATEGY] Momentum reconfigured");
        Ok(())
    }

    fn reload(&mut self, artifact: &Path) -> Result<(), StrategyError> {
        let params: MomentumParams = read_artifact(artifact)?;
        params.validate().map_err(|reason| StrategyError::InvalidArtifact {
            path: artifact.to_path_buf(),
            reason,
        })?;
        self.params = params;
        self.artifact = Some(artifact.to_path_buf());
        Ok(())
    }

    fn loaded_artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }
}

// =============================================================================
// Linear model
// =============================================================================

/// Artifact format of [`LinearModelStrategy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Weight per feature name (see `FEATURE_NAMES`)
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
    /// Score magnitude required to hold a position
    #[serde(default = "default_score_threshold")]
    pub entry_threshold: f64,
    /// Target absolute position size
    #[serde(default = "default_model_position_size")]
    pub position_size: f64,
}

fn default_score_threshold() -> f64 {
    0.5
}

fn default_model_position_size() -> f64 {
    0.1
}

impl LinearModel {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = self.weights.keys().find(|k| !FEATURE_NAMES.contains(&k.as_str())) {
            return Err(format!("unknown feature '{}'", name));
        }
        if self.weights.values().any(|w| !w.is_finite()) || !self.bias.is_finite() {
            return Err("weights and bias must be finite".to_string());
        }
        if !(self.position_size > 0.0) {
            return Err(format!("position_size must be > 0, got {}", self.position_size));
        }
        if !(self.entry_threshold >= 0.0) {
            return Err(format!("entry_threshold must be >= 0, got {}", self.entry_threshold));
        }
        Ok(())
    }

    /// Linear score for a feature snapshot
    pub fn score(&self, features: &Features) -> f64 {
        self.weights
            .iter()
            .map(|(name, weight)| weight * features.get(name).unwrap_or(0.0))
            .sum::<f64>()
            + self.bias
    }
}

/// Runtime overrides accepted by [`LinearModelStrategy::configure`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOverrides {
    pub entry_threshold: Option<f64>,
    pub position_size: Option<f64>,
}

/// Holds a position in the sign of a linear score once it clears a threshold
///
/// Without a loaded model the strategy stays flat and emits nothing.
#[derive(Debug, Clone, Default)]
pub struct LinearModelStrategy {
    model: Option<LinearModel>,
    overrides: LinearOverrides,
    artifact: Option<PathBuf>,
}

impl LinearModelStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with an in-memory model (no artifact path)
    pub fn with_model(model: LinearModel) -> Result<Self, StrategyError> {
        model.validate().map_err(StrategyError::InvalidParams)?;
        Ok(Self {
            model: Some(model),
            ..Self::default()
        })
    }

    pub fn model(&self) -> Option<&LinearModel> {
        self.model.as_ref()
    }
}

impl Strategy for LinearModelStrategy {
    fn name(&self) -> &str {
        "linear_model"
    }

    fn on_tick(
        &mut self,
        tick: &Tick,
        features: &Features,
        position: &Position,
    ) -> Result<Option<Order>, StrategyError> {
        let Some(model) = &self.model else {
            return Ok(None);
        };

        let score = model.score(features);
        if !score.is_finite() {
            return Err(StrategyError::Decision(format!(
                "non-finite score for {}",
                tick.symbol
            )));
        }

        let threshold = self.overrides.entry_threshold.unwrap_or(model.entry_threshold);
        let size = self.overrides.position_size.unwrap_or(model.position_size);
        let target = if score > threshold {
            size
        } else if score < -threshold {
            -size
        } else {
            0.0
        };
        Ok(rebalance(tick, position, target))
    }

    fn on_fill(&mut self, fill: &Fill, position: &Position) {
        debug!(
            strategy = "linear_model",
            order_id = %fill.order_id,
            position = position.size,
            "[STRATEGY] Fill observed"
        );
    }

    fn configure(&mut self, params: &serde_json::Value) -> Result<(), StrategyError> {
        let merged: LinearOverrides = merge_params(&self.overrides, params)?;
        if merged.position_size.is_some_and(|s| !(s > 0.0)) {
            return Err(StrategyError::InvalidParams("position_size must be > 0".to_string()));
        }
        if merged.entry_threshold.is_some_and(|t| !(t >= 0.0)) {
            return Err(StrategyError::InvalidParams("entry_threshold must be >= 0".to_string()));
        }
        self.overrides = merged;
        info!(overrides = ?self.overrides, "[STRATEGY] Linear model reconfigured");
        Ok(())
    }

    fn reload(&mut self, artifact: &Path) -> Result<(), StrategyError> {
        let model: LinearModel = read_artifact(artifact)?;
        model.validate().map_err(|reason| StrategyError::InvalidArtifact {
            path: artifact.to_path_buf(),
            reason,
        })?;
        self.model = Some(model);
        self.artifact = Some(artifact.to_path_buf());
        Ok(())
    }

    fn loaded_artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }
}

// =============================================================================
// Tagged dispatch
// =============================================================================

/// Strategy selected at construction from configuration
#[derive(Debug, Clone)]
pub enum StrategyKind {
    Momentum(MomentumStrategy),
    LinearModel(LinearModelStrategy),
}

impl StrategyKind {
    /// Build the configured strategy and apply its parameters
    ///
    /// A configured artifact is loaded immediately; the engine may still
    /// replace it with the registry's active version on its first cycle.
    pub fn from_config(config: &StrategyConfig) -> Result<Self, StrategyError> {
        let mut strategy = match config.kind {
            StrategyType::Momentum => StrategyKind::Momentum(MomentumStrategy::default()),
            StrategyType::LinearModel => StrategyKind::LinearModel(LinearModelStrategy::new()),
        };
        if let Some(artifact) = &config.artifact {
            strategy.reload(artifact)?;
        }
        if !config.params.is_null() {
            strategy.configure(&config.params)?;
        }
        Ok(strategy)
    }

    fn inner(&self) -> &dyn Strategy {
        match self {
            StrategyKind::Momentum(s) => s,
            StrategyKind::LinearModel(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Strategy {
        match self {
            StrategyKind::Momentum(s) => s,
            StrategyKind::LinearModel(s) => s,
        }
    }
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn on_tick(
        &mut self,
        tick: &Tick,
        features: &Features,
        position: &Position,
    ) -> Result<Option<Order>, StrategyError> {
        self.inner_mut().on_tick(tick, features, position)
    }

    fn on_fill(&mut self, fill: &Fill, position: &Position) {
        self.inner_mut().on_fill(fill, position)
    }

    fn configure(&mut self, params: &serde_json::Value) -> Result<(), StrategyError> {
        self.inner_mut().configure(params)
    }

    fn reload(&mut self, artifact: &Path) -> Result<(), StrategyError> {
        self.inner_mut().reload(artifact)
    }

    fn loaded_artifact(&self) -> Option<&Path> {
        self.inner().loaded_artifact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn tick(mid: f64) -> Tick {
        Tick::new("BTC-USD", mid - 1.0, mid + 1.0, mid, 1.0)
    }

    fn features(momentum: f64) -> Features {
        Features {
            mid: 100.0,
            momentum,
            samples: 10,
            ..Default::default()
        }
    }

    fn long(size: f64) -> Position {
        Position {
            size,
            avg_price: 100.0,
            ..Position::flat("BTC-USD")
        }
    }

    #[test]
    fn test_momentum_opens_in_trend_direction() {
        let mut strategy = MomentumStrategy::default();
        let flat = Position::flat("BTC-USD");

        let order = strategy.on_tick(&tick(100.0), &features(0.01), &flat).unwrap().unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert!((order.size - 0.1).abs() < 1e-12);
        assert_eq!(order.price, 100.0);

        let order = strategy.on_tick(&tick(100.0), &features(-0.01), &flat).unwrap().unwrap();
        assert_eq!(order.side, OrderSide::Sell);
    }

    #[test]
    fn test_momentum_holds_and_closes() {
        let mut strategy = MomentumStrategy::default();

        // Already at target
        assert!(strategy.on_tick(&tick(100.0), &features(0.01), &long(0.1)).unwrap().is_none());
        // Between exit and entry thresholds: hold
        assert!(strategy.on_tick(&tick(100.0), &features(0.001), &long(0.1)).unwrap().is_none());
        // Momentum faded: close
        let order = strategy.on_tick(&tick(100.0), &features(0.0), &long(0.1)).unwrap().unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert!((order.size - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_reverses_through_flip() {
        let mut strategy = MomentumStrategy::default();
        let order = strategy.on_tick(&tick(100.0), &features(-0.01), &long(0.1)).unwrap().unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert!((order.size - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_configure_merges() {
        let mut strategy = MomentumStrategy::default();
        strategy.configure(&json!({"position_size": 0.5})).unwrap();
        assert_eq!(strategy.params().position_size, 0.5);
        assert_eq!(strategy.params().entry_threshold, 0.002);

        assert!(strategy.configure(&json!({"bogus": 1})).is_err());
        assert!(strategy.configure(&json!({"position_size": -1.0})).is_err());
        assert!(strategy.configure(&json!([1, 2])).is_err());
        assert_eq!(strategy.params().position_size, 0.5);
    }

    #[test]
    fn test_momentum_reload_from_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"entry_threshold": 0.01, "exit_threshold": 0.001, "position_size": 2.0}"#)
            .unwrap();

        let mut strategy = MomentumStrategy::default();
        strategy.reload(&path).unwrap();
        assert_eq!(strategy.loaded_artifact(), Some(path.as_path()));
        assert_eq!(strategy.params().position_size, 2.0);
    }

    #[test]
    fn test_failed_reload_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(&good, r#"{"position_size": 3.0}"#).unwrap();
        std::fs::write(&bad, "not json").unwrap();

        let mut strategy = MomentumStrategy::default();
        strategy.reload(&good).unwrap();
        let err = strategy.reload(&bad).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidArtifact { .. }));
        assert!(matches!(
            strategy.reload(&dir.path().join("missing.json")),
            Err(StrategyError::ArtifactIo { .. })
        ));
        assert_eq!(strategy.loaded_artifact(), Some(good.as_path()));
        assert_eq!(strategy.params().position_size, 3.0);
    }

    #[test]
    fn test_linear_model_scores_features() {
        let model = LinearModel {
            weights: HashMap::from([("momentum".to_string(), 100.0)]),
            bias: 0.0,
            entry_threshold: 0.5,
            position_size: 1.0,
        };
        let mut strategy = LinearModelStrategy::with_model(model).unwrap();
        let flat = Position::flat("BTC-USD");

        let order = strategy.on_tick(&tick(100.0), &features(0.01), &flat).unwrap().unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.size, 1.0);

        assert!(strategy.on_tick(&tick(100.0), &features(0.001), &flat).unwrap().is_none());

        strategy.configure(&json!({"entry_threshold": 0.05})).unwrap();
        assert!(strategy.on_tick(&tick(100.0), &features(0.001), &flat).unwrap().is_some());
    }

    #[test]
    fn test_linear_model_without_weights_is_idle() {
        let mut strategy = LinearModelStrategy::new();
        let result = strategy.on_tick(&tick(100.0), &features(0.5), &Position::flat("BTC-USD"));
        assert!(result.unwrap().is_none());
        assert!(strategy.loaded_artifact().is_none());
    }

    #[test]
    fn test_linear_model_rejects_unknown_feature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"weights": {"sentiment": 1.0}}"#).unwrap();

        let mut strategy = LinearModelStrategy::new();
        assert!(matches!(
            strategy.reload(&path),
            Err(StrategyError::InvalidArtifact { .. })
        ));
        assert!(strategy.model().is_none());
    }

    #[test]
    fn test_kind_delegates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"weights": {"ret_1": 10.0}, "bias": 0.1}"#).unwrap();

        let config = StrategyConfig {
            kind: StrategyType::LinearModel,
            artifact: Some(path.clone()),
            params: serde_json::Value::Null,
        };
        let strategy = StrategyKind::from_config(&config).unwrap();
        assert_eq!(strategy.name(), "linear_model");
        assert_eq!(strategy.loaded_artifact(), Some(path.as_path()));

        let config = StrategyConfig {
            kind: StrategyType::Momentum,
            artifact: None,
            params: json!({"position_size": 0.25}),
        };
        let strategy = StrategyKind::from_config(&config).unwrap();
        assert_eq!(strategy.name(), "momentum");
        match strategy {
            StrategyKind::Momentum(inner) => assert_eq!(inner.params().position_size, 0.25),
            other => panic!("unexpected strategy {:?}", other),
        }
    }
}
