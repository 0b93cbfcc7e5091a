//! Core module - Event bus, ledger, risk, features, strategies, engine
//!
//! This module uses **explicit re-exports** instead of glob exports (`pub use module::*`)
//! to provide better API visibility and prevent accidental public API changes.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{Engine, EventBus, RiskLimits};
//! ```

pub mod bus;
pub mod engine;
pub mod events;
pub mod features;
pub mod journal;
pub mod ledger;
pub mod metrics;
pub mod risk;
pub mod strategy;

// Explicit re-exports for bus module
pub use bus::{BackpressurePolicy, EventBus, SharedEventBus, Subscription, DEFAULT_BUS_CAPACITY};

// Explicit re-exports for events module
pub use events::{
    log_event, Alert, AlertSource, Event, TOPIC_ALERTS, TOPIC_FILLS, TOPIC_METRICS, TOPIC_MODELS,
    TOPIC_TICKS,
};

// Explicit re-exports for ledger module
pub use ledger::{FillOutcome, Position, PositionLedger, SIZE_EPSILON};

// Explicit re-exports for risk module
pub use risk::{RiskError, RiskLimits, RiskManager, RiskState, RiskStatus};

// Explicit re-exports for features module
pub use features::{FeatureWindow, Features, FEATURE_NAMES};

// Explicit re-exports for strategy module
pub use strategy::{
    LinearModel, LinearModelStrategy, MomentumParams, MomentumStrategy, Strategy, StrategyError,
    StrategyKind,
};

// Explicit re-exports for metrics module
pub use metrics::{PerformanceMetrics, PerformanceTracker};

// Explicit re-exports for journal module
pub use journal::{
    JournalEntry, JournalError, JsonlJournal, MemoryJournal, NoopJournal, SharedJournal,
    TradeJournal,
};

// Explicit re-exports for engine module
pub use engine::{
    ControlCommand, Engine, EngineError, EngineSnapshot, EngineStatus, SharedSnapshot,
};
