//! Pre-trade risk gate and drawdown kill switch
//!
//! The risk manager keeps its own equity mirror (a private
//! [`PositionLedger`]) fed exclusively through [`RiskManager::update_fill`]
//! and [`RiskManager::update_mark`]. Checks use the *projected* post-fill
//! position, the more conservative of the two possible policies.
//!
//! # State machine
//! `Normal -> KillSwitchActive` on manual activation or when the tracked
//! drawdown reaches `max_daily_drawdown`. Only
//! [`RiskManager::deactivate_kill_switch`] returns to `Normal`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::types::{Fill, Order};
use crate::core::ledger::{Position, PositionLedger};

// =============================================================================
// Types
// =============================================================================

/// Pre-trade rejection reasons
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Kill switch active")]
    KillSwitchActive,

    #[error("Position limit breached for {symbol}: projected {projected} > max {limit}")]
    PositionLimit {
        symbol: String,
        projected: f64,
        limit: f64,
    },

    #[error("Notional limit breached for {symbol}: projected {projected:.2} > max {limit:.2}")]
    NotionalLimit {
        symbol: String,
        projected: f64,
        limit: f64,
    },

    #[error("Drawdown limit reached: {drawdown:.4} >= {limit:.4}")]
    DrawdownLimit { drawdown: f64, limit: f64 },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

/// Session risk limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum absolute position size per symbol (base units)
    pub max_position: f64,
    /// Maximum absolute marked notional per symbol (quote currency)
    pub max_notional: f64,
    /// Drawdown fraction (0-1) that engages the kill switch
    pub max_daily_drawdown: f64,
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_position > 0.0) {
            return Err(format!("max_position must be > 0, got {}", self.max_position));
        }
        if !(self.max_notional > 0.0) {
            return Err(format!("max_notional must be > 0, got {}", self.max_notional));
        }
        if !(self.max_daily_drawdown > 0.0 && self.max_daily_drawdown < 1.0) {
            return Err(format!(
                "max_daily_drawdown must be between 0 and 1 (exclusive), got {}",
                self.max_daily_drawdown
            ));
        }
        Ok(())
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position: 1.0,
            max_notional: 100_000.0,
            max_daily_drawdown: 0.05,
        }
    }
}

/// Snapshot of the drawdown tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub equity_peak: f64,
    pub equity_current: f64,
    /// Worst drawdown fraction seen this session
    pub max_drawdown: f64,
    pub kill_switch: bool,
}

/// Risk gate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskStatus {
    Normal,
    KillSwitchActive,
}

// =============================================================================
// RiskManager
// =============================================================================

/// Pre-trade veto plus drawdown-triggered kill switch
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    state: RiskState,
    mirror: PositionLedger,
    /// Realized PnL at the start of the current session
    session_realized_base: f64,
}

impl RiskManager {
    /// Create a risk manager whose equity mirror starts at `starting_equity`
    pub fn new(limits: RiskLimits, starting_equity: f64) -> Self {
        Self {
            limits,
            state: RiskState {
                equity_peak: starting_equity,
                equity_current: starting_equity,
                max_drawdown: 0.0,
                kill_switch: false,
            },
            mirror: PositionLedger::new(starting_equity),
            session_realized_base: 0.0,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Replace the limits (external control operation)
    pub fn set_limits(&mut self, limits: RiskLimits) {
        info!(
            max_position = limits.max_position,
            max_notional = limits.max_notional,
            max_daily_drawdown = limits.max_daily_drawdown,
            "[RISK] Limits replaced"
        );
        self.limits = limits;
    }

    pub fn state(&self) -> RiskState {
        self.state.clone()
    }

    pub fn status(&self) -> RiskStatus {
        if self.state.kill_switch {
            RiskStatus::KillSwitchActive
        } else {
            RiskStatus::Normal
        }
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.state.kill_switch
    }

    /// Drawdown of current equity from the peak
    pub fn current_drawdown(&self) -> f64 {
        drawdown(self.state.equity_peak, self.state.equity_current)
    }

    /// Position as seen by the equity mirror
    pub fn position(&self, symbol: &str) -> Position {
        self.mirror.position(symbol)
    }

    /// Realized PnL since the last `reset_day`
    pub fn session_realized_pnl(&self) -> f64 {
        self.mirror.realized_pnl() - self.session_realized_base
    }

    /// Vet an order before it reaches the broker
    ///
    /// Checks, in order: kill switch, order shape, projected position size,
    /// projected notional at `mark_price`, tracked drawdown. A drawdown
    /// breach also engages the kill switch.
    pub fn check_order(&mut self, order: &Order, mark_price: f64) -> Result<(), RiskError> {
        if self.state.kill_switch {
            warn!(order_id = %order.id, symbol = %order.symbol, "[RISK] Rejected: kill switch active");
            return Err(RiskError::KillSwitchActive);
        }

        order.validate().map_err(RiskError::InvalidOrder)?;

        let mark = if mark_price > 0.0 { mark_price } else { order.price };
        if !(mark.is_finite() && mark > 0.0) {
            let err = RiskError::InvalidOrder(format!(
                "no positive reference price for {} (mark {}, order price {})",
                order.symbol, mark_price, order.price
            ));
            warn!(order_id = %order.id, error = %err, "[RISK] Rejected");
            return Err(err);
        }
        let exec_price = if order.price > 0.0 { order.price } else { mark };
        let projected = self
            .mirror
            .projected(&order.symbol, order.side, order.size, exec_price);
        let projected_size = projected.size.abs();

        if projected_size > self.limits.max_position {
            let err = RiskError::PositionLimit {
                symbol: order.symbol.clone(),
                projected: projected_size,
                limit: self.limits.max_position,
            };
            warn!(order_id = %order.id, error = %err, "[RISK] Rejected");
            return Err(err);
        }

        let projected_notional = projected_size * mark;
        if projected_notional > self.limits.max_notional {
            let err = RiskError::NotionalLimit {
                symbol: order.symbol.clone(),
                projected: projected_notional,
                limit: self.limits.max_notional,
            };
            warn!(order_id = %order.id, error = %err, "[RISK] Rejected");
            return Err(err);
        }

        if self.state.max_drawdown >= self.limits.max_daily_drawdown {
            let err = RiskError::DrawdownLimit {
                drawdown: self.state.max_drawdown,
                limit: self.limits.max_daily_drawdown,
            };
            warn!(order_id = %order.id, error = %err, "[RISK] Rejected");
            self.activate_kill_switch();
            return Err(err);
        }

        Ok(())
    }

    /// Apply an accepted fill to the equity mirror
    ///
    /// Must be called exactly once per fill, in fill order.
    pub fn update_fill(&mut self, fill: &Fill) {
        self.mirror.apply_fill(fill);
        self.refresh_equity();

        if !self.state.kill_switch && self.state.max_drawdown >= self.limits.max_daily_drawdown {
            warn!(
                drawdown = %format!("{:.4}", self.state.max_drawdown),
                limit = %format!("{:.4}", self.limits.max_daily_drawdown),
                equity = self.state.equity_current,
                "[RISK] Drawdown limit reached on fill"
            );
            self.activate_kill_switch();
        }
    }

    /// Re-mark the equity mirror; tracks drawdown without tripping the switch
    pub fn update_mark(&mut self, symbol: &str, price: f64) {
        self.mirror.update_mark(symbol, price);
        self.refresh_equity();
    }

    /// Engage the kill switch (idempotent)
    pub fn activate_kill_switch(&mut self) {
        if !self.state.kill_switch {
            self.state.kill_switch = true;
            warn!(
                equity = self.state.equity_current,
                peak = self.state.equity_peak,
                max_drawdown = %format!("{:.4}", self.state.max_drawdown),
                "[RISK] KILL SWITCH ENGAGED"
            );
        }
    }

    /// Clear the kill switch and restart drawdown tracking from current equity
    /// (idempotent)
    pub fn deactivate_kill_switch(&mut self) {
        if self.state.kill_switch {
            info!(equity = self.state.equity_current, "[RISK] Kill switch cleared by operator");
        }
        self.state.kill_switch = false;
        self.state.equity_peak = self.state.equity_current;
        self.state.max_drawdown = 0.0;
    }

    /// Start a new session: drawdown and session PnL restart from the current
    /// equity. Limits and the kill switch are left untouched.
    pub fn reset_day(&mut self) {
        self.state.equity_peak = self.state.equity_current;
        self.state.max_drawdown = 0.0;
        self.session_realized_base = self.mirror.realized_pnl();
        info!(equity = self.state.equity_current, "[RISK] Session reset");
    }

    fn refresh_equity(&mut self) {
        let equity = self.mirror.total_equity();
        self.state.equity_current = equity;
        self.state.equity_peak = self.state.equity_peak.max(equity);
        let dd = drawdown(self.state.equity_peak, equity);
        self.state.max_drawdown = self.state.max_drawdown.max(dd);
    }
}

fn drawdown(peak: f64, current: f64) -> f64 {
    if peak > 0.0 {
        ((peak - current) / peak).max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::types::OrderSide;
    use chrono::Utc;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position: 10.0,
            max_notional: 5_000.0,
            max_daily_drawdown: 0.10,
        }
    }

    fn fill(side: OrderSide, size: f64, price: f64) -> Fill {
        Fill {
            order_id: "f".to_string(),
            symbol: "BTC-USD".to_string(),
            side,
            size,
            price,
            fee: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_position_limit_rejects_oversized_order() {
        let mut risk = RiskManager::new(
            RiskLimits {
                max_position: 1.0,
                max_notional: 1_000_000.0,
                max_daily_drawdown: 0.2,
            },
            100_000.0,
        );
        let order = Order::market("BTC-USD", OrderSide::Buy, 2.0, 25_000.0);

        let result = risk.check_order(&order, 25_000.0);
        assert!(matches!(result, Err(RiskError::PositionLimit { .. })));
        assert!(!risk.is_kill_switch_active());
    }

    #[test]
    fn test_projected_position_is_checked_not_current() {
        let mut risk = RiskManager::new(limits(), 100_000.0);
        risk.update_fill(&fill(OrderSide::Buy, 8.0, 100.0));

        // Current 8 is within limits, projected 11 is not
        let order = Order::market("BTC-USD", OrderSide::Buy, 3.0, 100.0);
        assert!(matches!(
            risk.check_order(&order, 100.0),
            Err(RiskError::PositionLimit { .. })
        ));

        // Reducing keeps the projected size within limits
        let order = Order::market("BTC-USD", OrderSide::Sell, 3.0, 100.0);
        assert!(risk.check_order(&order, 100.0).is_ok());
    }

    #[test]
    fn test_notional_limit_uses_mark() {
        let mut risk = RiskManager::new(limits(), 100_000.0);
        let order = Order::market("BTC-USD", OrderSide::Buy, 5.0, 0.0);

        assert!(risk.check_order(&order, 900.0).is_ok());
        assert!(matches!(
            risk.check_order(&order, 1_100.0),
            Err(RiskError::NotionalLimit { .. })
        ));
    }

    #[test]
    fn test_invalid_order_rejected() {
        let mut risk = RiskManager::new(limits(), 100_000.0);
        let order = Order::market("BTC-USD", OrderSide::Buy, 0.0, 100.0);
        assert!(matches!(
            risk.check_order(&order, 100.0),
            Err(RiskError::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_order_without_reference_price_rejected() {
        let mut risk = RiskManager::new(limits(), 100_000.0);
        let order = Order::market("BTC-USD", OrderSide::Buy, 1_000.0, 0.0);

        // Neither a mark nor an order price: the notional gate cannot be evaluated
        assert!(matches!(
            risk.check_order(&order, 0.0),
            Err(RiskError::InvalidOrder(_))
        ));
        assert!(matches!(
            risk.check_order(&order, -5.0),
            Err(RiskError::InvalidOrder(_))
        ));

        // The order's own price is enough when there is no mark yet
        let priced = Order::market("BTC-USD", OrderSide::Buy, 1.0, 100.0);
        assert!(risk.check_order(&priced, 0.0).is_ok());
    }

    #[test]
    fn test_kill_switch_rejects_every_order() {
        let mut risk = RiskManager::new(limits(), 100_000.0);
        risk.activate_kill_switch();
        risk.activate_kill_switch();
        assert_eq!(risk.status(), RiskStatus::KillSwitchActive);

        for size in [0.001, 0.5, 1.0, 9.0, 50.0] {
            for side in [OrderSide::Buy, OrderSide::Sell] {
                for price in [0.0, 1.0, 100.0] {
                    let order = Order::market("BTC-USD", side, size, price);
                    assert_eq!(
                        risk.check_order(&order, 100.0),
                        Err(RiskError::KillSwitchActive)
                    );
                }
            }
        }
    }

    #[test]
    fn test_drawdown_on_fill_engages_kill_switch_until_deactivated() {
        let mut risk = RiskManager::new(limits(), 1_000.0);
        risk.update_fill(&fill(OrderSide::Buy, 10.0, 100.0));
        assert!(!risk.is_kill_switch_active());

        // Equity 1000 -> 880 after selling 10 @ 88: drawdown 12% >= 10%
        risk.update_fill(&fill(OrderSide::Sell, 10.0, 88.0));
        let state = risk.state();
        assert!((state.equity_current - 880.0).abs() < 1e-9);
        assert!(state.max_drawdown >= 0.10);
        assert!(state.kill_switch);

        // Recovery does not clear the switch
        risk.update_fill(&fill(OrderSide::Buy, 1.0, 50.0));
        risk.update_mark("BTC-USD", 500.0);
        assert!(risk.is_kill_switch_active());

        risk.deactivate_kill_switch();
        let state = risk.state();
        assert!(!state.kill_switch);
        assert_eq!(state.max_drawdown, 0.0);
        assert_eq!(state.equity_peak, state.equity_current);
    }

    #[test]
    fn test_mark_drawdown_trips_on_next_check() {
        let mut risk = RiskManager::new(limits(), 1_000.0);
        risk.update_fill(&fill(OrderSide::Buy, 5.0, 100.0));
        risk.update_mark("BTC-USD", 70.0);

        // Marks alone never trip the switch
        assert!(!risk.is_kill_switch_active());
        assert!(risk.current_drawdown() >= 0.10);

        let order = Order::market("BTC-USD", OrderSide::Sell, 1.0, 70.0);
        assert!(matches!(
            risk.check_order(&order, 70.0),
            Err(RiskError::DrawdownLimit { .. })
        ));
        assert!(risk.is_kill_switch_active());
    }

    #[test]
    fn test_peak_tracks_new_highs() {
        let mut risk = RiskManager::new(limits(), 1_000.0);
        risk.update_fill(&fill(OrderSide::Buy, 1.0, 100.0));
        risk.update_mark("BTC-USD", 150.0);
        let state = risk.state();
        assert!((state.equity_peak - 1_050.0).abs() < 1e-9);
        assert_eq!(state.max_drawdown, 0.0);
    }

    #[test]
    fn test_reset_day_keeps_limits_and_kill_switch() {
        let mut risk = RiskManager::new(limits(), 1_000.0);
        risk.update_fill(&fill(OrderSide::Buy, 5.0, 100.0));
        risk.update_fill(&fill(OrderSide::Sell, 5.0, 110.0));
        assert!((risk.session_realized_pnl() - 50.0).abs() < 1e-9);

        risk.activate_kill_switch();
        risk.reset_day();

        assert_eq!(risk.limits(), &limits());
        assert!(risk.is_kill_switch_active());
        assert_eq!(risk.session_realized_pnl(), 0.0);
        assert_eq!(risk.state().max_drawdown, 0.0);
    }

    #[test]
    fn test_set_limits_applies_to_next_check() {
        let mut risk = RiskManager::new(limits(), 100_000.0);
        let order = Order::market("BTC-USD", OrderSide::Buy, 5.0, 100.0);
        assert!(risk.check_order(&order, 100.0).is_ok());

        risk.set_limits(RiskLimits {
            max_position: 2.0,
            ..limits()
        });
        assert!(risk.check_order(&order, 100.0).is_err());
    }

    #[test]
    fn test_limits_validate() {
        assert!(limits().validate().is_ok());
        assert!(RiskLimits { max_position: 0.0, ..limits() }.validate().is_err());
        assert!(RiskLimits { max_notional: -1.0, ..limits() }.validate().is_err());
        assert!(RiskLimits { max_daily_drawdown: 1.0, ..limits() }.validate().is_err());
        assert!(RiskLimits { max_daily_drawdown: f64::NAN, ..limits() }.validate().is_err());
    }
}
