//! Aggregate performance metrics
//!
//! The tracker is updated once per fill by the pipeline activity and turned
//! into a [`PerformanceMetrics`] snapshot that is published on the `metrics`
//! topic.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ledger::{FillOutcome, PositionLedger};

/// Published metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    /// Equity change since the tracker started
    pub total_pnl: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    /// Winning closes / all closes (0 when nothing has closed yet)
    pub win_rate: f64,
    /// Mean broker round-trip over the rolling latency window
    pub avg_latency_ms: f64,
    /// Current drawdown fraction reported by the risk manager
    pub drawdown: f64,
    /// Gross marked exposure
    pub exposure: f64,
    /// Number of fills
    pub trades: u64,
    pub equity: f64,
}

/// Accumulates fill outcomes and broker latencies
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    starting_equity: f64,
    latency_window: usize,
    latencies_ms: VecDeque<f64>,
    trades: u64,
    closes: u64,
    wins: u64,
}

impl PerformanceTracker {
    pub fn new(starting_equity: f64, latency_window: usize) -> Self {
        let latency_window = latency_window.max(1);
        Self {
            starting_equity,
            latency_window,
            latencies_ms: VecDeque::with_capacity(latency_window),
            trades: 0,
            closes: 0,
            wins: 0,
        }
    }

    /// Record one fill
    ///
    /// Only fills that took size off a position count toward the win rate,
    /// breakeven closes included. `latency` is the broker round-trip.
    pub fn record_fill(&mut self, outcome: FillOutcome, latency: Duration) {
        self.trades += 1;
        if outcome.is_close() {
            self.closes += 1;
            if outcome.realized > 0.0 {
                self.wins += 1;
            }
        }

        if self.latencies_ms.len() == self.latency_window {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
    }

    pub fn trades(&self) -> u64 {
        self.trades
    }

    pub fn win_rate(&self) -> f64 {
        if self.closes == 0 {
            0.0
        } else {
            self.wins as f64 / self.closes as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            0.0
        } else {
            self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
        }
    }

    /// Build a snapshot from the ledger and the current drawdown
    pub fn snapshot(&self, ledger: &PositionLedger, drawdown: f64) -> PerformanceMetrics {
        let equity = ledger.total_equity();
        PerformanceMetrics {
            total_pnl: equity - self.starting_equity,
            realized_pnl: ledger.realized_pnl(),
            unrealized_pnl: ledger.unrealized_pnl(),
            win_rate: self.win_rate(),
            avg_latency_ms: self.avg_latency_ms(),
            drawdown,
            exposure: ledger.exposure(),
            trades: self.trades,
            equity,
        }
    }
}
