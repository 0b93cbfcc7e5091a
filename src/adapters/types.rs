//! Core data types shared by feeds, brokers, strategies and the engine
//!
//! Ticks, orders and fills are ephemeral: they are created and consumed within
//! one pipeline cycle. They derive serde so they can travel over the event bus
//! and into the trade journal verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Market Data
// =============================================================================

/// A single normalized market-data update for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Trading symbol (e.g., "BTC-USD")
    pub symbol: String,
    /// Best bid price
    pub bid: f64,
    /// Best ask price
    pub ask: f64,
    /// Last traded price
    pub last: f64,
    /// Traded volume since the previous tick
    pub volume: f64,
    /// Exchange timestamp
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create a tick stamped with the current time
    pub fn new(symbol: impl Into<String>, bid: f64, ask: f64, last: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            last,
            volume,
            timestamp: Utc::now(),
        }
    }

    /// Mid price, falling back to `last` when one side of the book is missing
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last
        }
    }

    /// Quoted spread (ask - bid), zero when one side is missing
    pub fn spread(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            self.ask - self.bid
        } else {
            0.0
        }
    }
}

// =============================================================================
// Order Types
// =============================================================================

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1.0 for buys, -1.0 for sells
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    /// The opposite side
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type (Market or Limit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

/// Order created by a strategy, vetted by the risk manager, consumed by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Client order id (UUID v4)
    pub id: String,
    /// Trading symbol
    pub symbol: String,
    /// Buy or Sell
    pub side: OrderSide,
    /// Order size in base units, always positive
    pub size: f64,
    /// Limit price, or reference price for market orders (0 = none)
    pub price: f64,
    /// Market or Limit
    pub order_type: OrderType,
}

impl Order {
    /// Create a market order with a fresh id
    pub fn market(symbol: impl Into<String>, side: OrderSide, size: f64, reference_price: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            size,
            price: reference_price,
            order_type: OrderType::Market,
        }
    }

    /// Create a limit order with a fresh id
    pub fn limit(symbol: impl Into<String>, side: OrderSide, size: f64, price: f64) -> Self {
        Self {
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, size, price)
        }
    }

    /// Size with the side's sign applied
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }

    /// Check the structural order rules (size > 0, price >= 0, both finite)
    pub fn validate(&self) -> Result<(), String> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(format!("order size must be > 0, got {}", self.size));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(format!("order price must be >= 0, got {}", self.price));
        }
        if self.symbol.trim().is_empty() {
            return Err("order symbol cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Execution report returned by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Id of the order that produced this fill
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Executed size, always positive
    pub size: f64,
    /// Execution price
    pub price: f64,
    /// Fee charged in quote currency
    pub fee: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Size with the side's sign applied
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }

    /// Quote notional (size * price)
    pub fn notional(&self) -> f64 {
        self.size * self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_mid_uses_book() {
        let tick = Tick::new("BTC-USD", 99.0, 101.0, 100.5, 1.0);
        assert_eq!(tick.mid(), 100.0);
        assert_eq!(tick.spread(), 2.0);
    }

    #[test]
    fn test_tick_mid_falls_back_to_last() {
        let tick = Tick::new("BTC-USD", 0.0, 101.0, 100.5, 1.0);
        assert_eq!(tick.mid(), 100.5);
        assert_eq!(tick.spread(), 0.0);
    }

    #[test]
    fn test_order_side_sign() {
        assert_eq!(OrderSide::Buy.sign(), 1.0);
        assert_eq!(OrderSide::Sell.sign(), -1.0);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }

    #[test]
    fn test_market_order_has_unique_id() {
        let a = Order::market("ETH-USD", OrderSide::Buy, 1.0, 2000.0);
        let b = Order::market("ETH-USD", OrderSide::Buy, 1.0, 2000.0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.order_type, OrderType::Market);
        assert_eq!(a.signed_size(), 1.0);
    }

    #[test]
    fn test_limit_order() {
        let order = Order::limit("ETH-USD", OrderSide::Sell, 2.0, 2100.0);
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.signed_size(), -2.0);
    }

    #[test]
    fn test_order_validate() {
        assert!(Order::market("ETH-USD", OrderSide::Buy, 1.0, 0.0).validate().is_ok());
        assert!(Order::market("ETH-USD", OrderSide::Buy, 0.0, 10.0).validate().is_err());
        assert!(Order::market("ETH-USD", OrderSide::Buy, -1.0, 10.0).validate().is_err());
        assert!(Order::market("ETH-USD", OrderSide::Buy, 1.0, -10.0).validate().is_err());
        assert!(Order::market("ETH-USD", OrderSide::Buy, f64::NAN, 10.0).validate().is_err());
        assert!(Order::market(" ", OrderSide::Buy, 1.0, 10.0).validate().is_err());
    }

    #[test]
    fn test_order_side_serde() {
        let json = serde_json::to_string(&OrderSide::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        let side: OrderSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, OrderSide::Sell);
    }
}
