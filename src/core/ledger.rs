//! Cash, position and PnL accounting
//!
//! # Averaging rules
//! - Same-direction (or opening) fills re-average the entry price.
//! - Opposite-direction fills realize PnL on the closed portion
//!   (`direction * closed * (price - avg) - fee`) and keep the average price,
//!   unless the position flips (residual opens at the fill price) or lands
//!   exactly flat (average resets to 0).
//!
//! The same rules drive [`Position::projected`], which the risk manager uses
//! to evaluate an order before it exists.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::adapters::types::{Fill, OrderSide};

/// Sizes smaller than this are treated as flat
pub const SIZE_EPSILON: f64 = 1e-9;

/// What one execution did to a position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FillOutcome {
    /// PnL realized on the closed portion, net of fee
    pub realized: f64,
    /// Size taken off the existing position (0 for opens and adds)
    pub closed: f64,
}

impl FillOutcome {
    /// Whether the fill reduced, closed or flipped a position
    pub fn is_close(&self) -> bool {
        self.closed > SIZE_EPSILON
    }
}

/// Net signed holding in one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub symbol: String,
    /// Signed size: positive = long, negative = short
    pub size: f64,
    /// Volume-weighted average entry price (0 when flat)
    pub avg_price: f64,
    /// Realized PnL accumulated on this symbol
    pub realized_pnl: f64,
}

impl Position {
    /// A flat position
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.abs() < SIZE_EPSILON
    }

    /// Apply an execution and report what it realized and closed
    pub fn apply(&mut self, side: OrderSide, size: f64, price: f64, fee: f64) -> FillOutcome {
        let signed = side.sign() * size;
        let old = self.size;

        if old.abs() < SIZE_EPSILON {
            self.size = signed;
            self.avg_price = price;
            self.snap_flat();
            return FillOutcome::default();
        }

        if old.signum() == signed.signum() {
            let new_size = old + signed;
            self.avg_price = if new_size.abs() < SIZE_EPSILON {
                0.0
            } else {
                (self.avg_price * old + price * signed) / new_size
            };
            self.size = new_size;
            self.snap_flat();
            return FillOutcome::default();
        }

        // Opposite direction: reduce, close or flip.
        let direction = old.signum();
        let closed = old.abs().min(size);
        let realized = direction * closed * (price - self.avg_price) - fee;
        self.realized_pnl += realized;

        if size - old.abs() > SIZE_EPSILON {
            self.size = signed.signum() * (size - old.abs());
            self.avg_price = price;
        } else {
            self.size = old + signed;
            self.snap_flat();
        }
        FillOutcome { realized, closed }
    }

    /// The position this one would become after an execution, without mutating
    pub fn projected(&self, side: OrderSide, size: f64, price: f64) -> Position {
        let mut next = self.clone();
        next.apply(side, size, price, 0.0);
        next
    }

    /// Mark-to-market PnL of the open size
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        if self.is_flat() {
            0.0
        } else {
            (mark - self.avg_price) * self.size
        }
    }

    fn snap_flat(&mut self) {
        if self.size.abs() < SIZE_EPSILON {
            self.size = 0.0;
            self.avg_price = 0.0;
        }
    }
}

/// Cash plus one position per symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLedger {
    cash: f64,
    positions: HashMap<String, Position>,
    marks: HashMap<String, f64>,
    fees_paid: f64,
}

impl PositionLedger {
    pub fn new(starting_cash: f64) -> Self {
        Self {
            cash: starting_cash,
            positions: HashMap::new(),
            marks: HashMap::new(),
            fees_paid: 0.0,
        }
    }

    /// Book a fill: move cash, update the position, report the outcome
    ///
    /// Buys debit `notional + fee`, sells credit `notional - fee`.
    pub fn apply_fill(&mut self, fill: &Fill) -> FillOutcome {
        let notional = fill.notional();
        match fill.side {
            OrderSide::Buy => self.cash -= notional + fill.fee,
            OrderSide::Sell => self.cash += notional - fill.fee,
        }
        self.fees_paid += fill.fee;

        self.marks.entry(fill.symbol.clone()).or_insert(fill.price);
        self.positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(fill.symbol.clone()))
            .apply(fill.side, fill.size, fill.price, fill.fee)
    }

    /// Post-execution position for `symbol`, without mutating the ledger
    pub fn projected(&self, symbol: &str, side: OrderSide, size: f64, price: f64) -> Position {
        self.position(symbol).projected(side, size, price)
    }

    /// Record the latest mark price for `symbol`
    pub fn update_mark(&mut self, symbol: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.marks.insert(symbol.to_string(), price);
        }
    }

    /// Latest mark for `symbol`
    pub fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    fn mark_or_avg(&self, position: &Position) -> f64 {
        self.mark(&position.symbol).unwrap_or(position.avg_price)
    }

    /// Current position for `symbol` (flat if never traded)
    pub fn position(&self, symbol: &str) -> Position {
        self.positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol))
    }

    /// All positions ever opened, sorted by symbol
    pub fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    /// Realized PnL across all symbols
    pub fn realized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// `Σ (mark - avg) * size`
    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.unrealized_pnl(self.mark_or_avg(p)))
            .sum()
    }

    /// `cash + Σ size * mark`
    pub fn total_equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.size * self.mark_or_avg(p))
                .sum::<f64>()
    }

    /// Gross marked exposure `Σ |size * mark|`
    pub fn exposure(&self) -> f64 {
        self.positions
            .values()
            .map(|p| (p.size * self.mark_or_avg(p)).abs())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const EPS: f64 = 1e-9;

    fn fill(side: OrderSide, size: f64, price: f64, fee: f64) -> Fill {
        Fill {
            order_id: "test".to_string(),
            symbol: "BTC-USD".to_string(),
            side,
            size,
            price,
            fee,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_buy_mark_then_partial_sell_scenario() {
        let mut ledger = PositionLedger::new(10_000.0);

        ledger.apply_fill(&fill(OrderSide::Buy, 10.0, 100.0, 0.0));
        let pos = ledger.position("BTC-USD");
        assert_eq!(pos.size, 10.0);
        assert_eq!(pos.avg_price, 100.0);
        assert_eq!(ledger.cash(), 9_000.0);

        ledger.update_mark("BTC-USD", 110.0);
        assert!((ledger.unrealized_pnl() - 100.0).abs() < EPS);
        assert!((ledger.total_equity() - 10_100.0).abs() < EPS);

        let cash_before = ledger.cash();
        let outcome = ledger.apply_fill(&fill(OrderSide::Sell, 4.0, 110.0, 0.0));
        assert!((outcome.realized - 40.0).abs() < EPS);
        assert_eq!(outcome.closed, 4.0);

        let pos = ledger.position("BTC-USD");
        assert_eq!(pos.size, 6.0);
        assert_eq!(pos.avg_price, 100.0);
        assert!((pos.realized_pnl - 40.0).abs() < EPS);
        assert!((ledger.cash() - cash_before - 440.0).abs() < EPS);
    }

    #[test]
    fn test_same_direction_average_is_notional_weighted() {
        let mut ledger = PositionLedger::new(1_000_000.0);
        let fills = [(1.0, 100.0), (3.0, 110.0), (2.0, 95.0), (0.5, 120.0)];

        for (size, price) in fills {
            ledger.apply_fill(&fill(OrderSide::Buy, size, price, 0.0));
        }

        let total_size: f64 = fills.iter().map(|(s, _)| s).sum();
        let notional: f64 = fills.iter().map(|(s, p)| s * p).sum();
        let pos = ledger.position("BTC-USD");
        assert!((pos.size - total_size).abs() < EPS);
        assert!((pos.avg_price - notional / total_size).abs() < EPS);
    }

    #[test]
    fn test_short_average_is_notional_weighted() {
        let mut pos = Position::flat("ETH-USD");
        pos.apply(OrderSide::Sell, 2.0, 200.0, 0.0);
        pos.apply(OrderSide::Sell, 2.0, 220.0, 0.0);
        assert_eq!(pos.size, -4.0);
        assert!((pos.avg_price - 210.0).abs() < EPS);
    }

    #[test]
    fn test_reducing_fills_realize_with_fee_and_move_toward_zero() {
        let mut pos = Position::flat("BTC-USD");
        pos.apply(OrderSide::Buy, 10.0, 100.0, 0.0);

        let mut expected_realized = 0.0;
        let mut last_abs = pos.size.abs();
        for (size, price, fee) in [(3.0, 105.0, 0.5), (2.0, 98.0, 0.25), (5.0, 110.0, 1.0)] {
            let delta = pos.apply(OrderSide::Sell, size, price, fee).realized;
            let expected = size * (price - 100.0) - fee;
            assert!((delta - expected).abs() < EPS);
            expected_realized += expected;
            assert!(pos.size.abs() <= last_abs);
            last_abs = pos.size.abs();
        }

        assert!((pos.realized_pnl - expected_realized).abs() < EPS);
        assert_eq!(pos.size, 0.0);
        assert_eq!(pos.avg_price, 0.0);
    }

    #[test]
    fn test_short_cover_realizes_with_negative_direction() {
        let mut pos = Position::flat("BTC-USD");
        pos.apply(OrderSide::Sell, 4.0, 100.0, 0.0);
        let delta = pos.apply(OrderSide::Buy, 1.0, 90.0, 0.0).realized;
        // direction = -1, closed = 1, (90 - 100) * -1 = +10
        assert!((delta - 10.0).abs() < EPS);
        assert_eq!(pos.size, -3.0);
        assert_eq!(pos.avg_price, 100.0);
    }

    #[test]
    fn test_flip_opens_residual_at_fill_price() {
        let mut pos = Position::flat("BTC-USD");
        pos.apply(OrderSide::Buy, 2.0, 100.0, 0.0);
        let outcome = pos.apply(OrderSide::Sell, 5.0, 120.0, 1.0);

        assert!((outcome.realized - (2.0 * 20.0 - 1.0)).abs() < EPS);
        // Only the old size counts as closed
        assert_eq!(outcome.closed, 2.0);
        assert_eq!(pos.size, -3.0);
        assert_eq!(pos.avg_price, 120.0);
    }

    #[test]
    fn test_exact_close_resets_average() {
        let mut pos = Position::flat("BTC-USD");
        pos.apply(OrderSide::Buy, 0.3, 100.0, 0.0);
        pos.apply(OrderSide::Buy, 0.6, 100.0, 0.0);
        pos.apply(OrderSide::Sell, 0.9, 101.0, 0.0);
        assert!(pos.is_flat());
        assert_eq!(pos.size, 0.0);
        assert_eq!(pos.avg_price, 0.0);
        assert_eq!(pos.unrealized_pnl(500.0), 0.0);
    }

    #[test]
    fn test_breakeven_close_is_reported_as_close() {
        let mut pos = Position::flat("BTC-USD");
        let open = pos.apply(OrderSide::Buy, 1.0, 100.0, 0.0);
        assert!(!open.is_close());
        let add = pos.apply(OrderSide::Buy, 1.0, 100.0, 0.0);
        assert!(!add.is_close());

        let close = pos.apply(OrderSide::Sell, 2.0, 100.0, 0.0);
        assert_eq!(close.realized, 0.0);
        assert!(close.is_close());
        assert!(pos.is_flat());
    }

    #[test]
    fn test_projected_does_not_mutate() {
        let mut ledger = PositionLedger::new(10_000.0);
        ledger.apply_fill(&fill(OrderSide::Buy, 1.0, 100.0, 0.0));

        let projected = ledger.projected("BTC-USD", OrderSide::Buy, 1.0, 120.0);
        assert_eq!(projected.size, 2.0);
        assert!((projected.avg_price - 110.0).abs() < EPS);

        let current = ledger.position("BTC-USD");
        assert_eq!(current.size, 1.0);
        assert_eq!(current.avg_price, 100.0);
    }

    #[test]
    fn test_fees_move_cash() {
        let mut ledger = PositionLedger::new(1_000.0);
        ledger.apply_fill(&fill(OrderSide::Buy, 1.0, 100.0, 1.0));
        assert!((ledger.cash() - 899.0).abs() < EPS);
        ledger.apply_fill(&fill(OrderSide::Sell, 1.0, 100.0, 1.0));
        assert!((ledger.cash() - 998.0).abs() < EPS);
        assert!((ledger.fees_paid() - 2.0).abs() < EPS);
        assert!((ledger.total_equity() - 998.0).abs() < EPS);
    }

    #[test]
    fn test_exposure_and_unmarked_symbols() {
        let mut ledger = PositionLedger::new(10_000.0);
        ledger.apply_fill(&fill(OrderSide::Sell, 2.0, 50.0, 0.0));
        // First fill seeds the mark
        assert_eq!(ledger.mark("BTC-USD"), Some(50.0));
        assert!((ledger.exposure() - 100.0).abs() < EPS);

        ledger.update_mark("BTC-USD", 40.0);
        assert!((ledger.exposure() - 80.0).abs() < EPS);
        assert!((ledger.unrealized_pnl() - 20.0).abs() < EPS);

        ledger.update_mark("BTC-USD", f64::NAN);
        assert_eq!(ledger.mark("BTC-USD"), Some(40.0));
        assert_eq!(ledger.position("ETH-USD"), Position::flat("ETH-USD"));
    }
}
