//! Pipeline event payloads
//!
//! Everything the engine publishes on the event bus is an [`Event`]. Payloads
//! are forwarded verbatim to telemetry/UI consumers, so every variant is
//! serializable.
//!
//! # Topics
//!
//! | Topic | Payload |
//! |-------|---------|
//! | `ticks` | [`Event::Tick`] |
//! | `fills` | [`Event::Fill`] |
//! | `alerts` | [`Event::Alert`] |
//! | `metrics` | [`Event::Metrics`] |
//! | `models` | [`Event::ModelReloaded`] |

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::types::{Fill, Tick};
use crate::core::metrics::PerformanceMetrics;

pub const TOPIC_TICKS: &str = "ticks";
pub const TOPIC_FILLS: &str = "fills";
pub const TOPIC_ALERTS: &str = "alerts";
pub const TOPIC_METRICS: &str = "metrics";
pub const TOPIC_MODELS: &str = "models";

/// Component that raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Risk,
    Broker,
    Feed,
    Strategy,
    Journal,
    Registry,
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSource::Risk => write!(f, "RISK"),
            AlertSource::Broker => write!(f, "BROKER"),
            AlertSource::Feed => write!(f, "FEED"),
            AlertSource::Strategy => write!(f, "STRATEGY"),
            AlertSource::Journal => write!(f, "JOURNAL"),
            AlertSource::Registry => write!(f, "REGISTRY"),
        }
    }
}

/// Operator-facing alert carrying a human-readable reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub source: AlertSource,
    pub reason: String,
    pub symbol: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(source: AlertSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            reason: reason.into(),
            symbol: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the symbol the alert relates to
    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Message published on the pipeline's event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Tick(Tick),
    Fill(Fill),
    Alert(Alert),
    Metrics(PerformanceMetrics),
    ModelReloaded {
        version: Option<String>,
        artifact: PathBuf,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Topic this event is published on
    pub fn topic(&self) -> &'static str {
        match self {
            Event::Tick(_) => TOPIC_TICKS,
            Event::Fill(_) => TOPIC_FILLS,
            Event::Alert(_) => TOPIC_ALERTS,
            Event::Metrics(_) => TOPIC_METRICS,
            Event::ModelReloaded { .. } => TOPIC_MODELS,
        }
    }

    /// Borrow the alert payload, if this is an alert
    pub fn as_alert(&self) -> Option<&Alert> {
        match self {
            Event::Alert(alert) => Some(alert),
            _ => None,
        }
    }

    /// Borrow the fill payload, if this is a fill
    pub fn as_fill(&self) -> Option<&Fill> {
        match self {
            Event::Fill(fill) => Some(fill),
            _ => None,
        }
    }
}

/// Log an event using structured tracing fields
///
/// Ticks are logged at DEBUG (high frequency), alerts at WARN, everything
/// else at INFO.
pub fn log_event(event: &Event) {
    match event {
        Event::Tick(tick) => {
            debug!(
                topic = TOPIC_TICKS,
                symbol = %tick.symbol,
                bid = tick.bid,
                ask = tick.ask,
                last = tick.last,
                ""
            );
        }
        Event::Fill(fill) => {
            info!(
                topic = TOPIC_FILLS,
                order_id = %fill.order_id,
                symbol = %fill.symbol,
                side = %fill.side,
                size = fill.size,
                price = fill.price,
                fee = fill.fee,
                ""
            );
        }
        Event::Alert(alert) => {
            warn!(
                topic = TOPIC_ALERTS,
                source = %alert.source,
                symbol = ?alert.symbol,
                reason = %alert.reason,
                ""
            );
        }
        Event::Metrics(metrics) => {
            info!(
                topic = TOPIC_METRICS,
                total_pnl = %format!("{:.2}", metrics.total_pnl),
                win_rate = %format!("{:.2}", metrics.win_rate),
                avg_latency_ms = %format!("{:.3}", metrics.avg_latency_ms),
                drawdown = %format!("{:.4}", metrics.drawdown),
                exposure = %format!("{:.2}", metrics.exposure),
                trades = metrics.trades,
                ""
            );
        }
        Event::ModelReloaded { version, artifact, .. } => {
            info!(
                topic = TOPIC_MODELS,
                version = ?version,
                artifact = %artifact.display(),
                ""
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_source_display() {
        assert_eq!(AlertSource::Risk.to_string(), "RISK");
        assert_eq!(AlertSource::Broker.to_string(), "BROKER");
        assert_eq!(AlertSource::Registry.to_string(), "REGISTRY");
    }

    #[test]
    fn test_alert_builder() {
        let alert = Alert::new(AlertSource::Risk, "kill switch active").for_symbol("BTC-USD");
        assert_eq!(alert.source, AlertSource::Risk);
        assert_eq!(alert.symbol.as_deref(), Some("BTC-USD"));
        assert_eq!(alert.reason, "kill switch active");
    }

    #[test]
    fn test_event_topics() {
        let tick = Event::Tick(Tick::new("BTC-USD", 1.0, 2.0, 1.5, 1.0));
        let alert = Event::Alert(Alert::new(AlertSource::Feed, "disconnected"));
        assert_eq!(tick.topic(), TOPIC_TICKS);
        assert_eq!(alert.topic(), TOPIC_ALERTS);
        assert!(alert.as_alert().is_some());
        assert!(tick.as_alert().is_none());
        assert!(tick.as_fill().is_none());
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = Event::Alert(Alert::new(AlertSource::Broker, "timeout"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"alert\""));
        assert!(json.contains("\"source\":\"broker\""));
    }
}
