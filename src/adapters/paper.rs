//! Paper broker
//!
//! Fills every order immediately at its reference price, adjusted by a fixed
//! slippage, and charges a proportional fee. Used by the binary and tests in
//! place of a live venue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::adapters::errors::{TransportError, TransportResult};
use crate::adapters::traits::Broker;
use crate::adapters::types::{Fill, Order, OrderSide};

/// Simulated execution venue
#[derive(Debug)]
pub struct PaperBroker {
    /// Fee as a fraction of notional (e.g., 0.001 = 10 bps)
    fee_rate: f64,
    /// Adverse slippage in basis points applied to the reference price
    slippage_bps: f64,
    /// Simulated round-trip latency
    latency: Duration,
    submitted: AtomicU64,
}

impl PaperBroker {
    /// Create a paper broker with the given fee rate and no slippage or latency
    pub fn new(fee_rate: f64) -> Self {
        Self {
            fee_rate,
            slippage_bps: 0.0,
            latency: Duration::ZERO,
            submitted: AtomicU64::new(0),
        }
    }

    /// Apply adverse slippage in basis points
    pub fn with_slippage_bps(mut self, slippage_bps: f64) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }

    /// Delay every submission by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of orders filled so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit(&self, order: &Order) -> TransportResult<Fill> {
        if order.price <= 0.0 {
            return Err(TransportError::Rejected(format!(
                "order {} has no reference price",
                order.id
            )));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let slip = order.price * self.slippage_bps / 10_000.0;
        let price = match order.side {
            OrderSide::Buy => order.price + slip,
            OrderSide::Sell => order.price - slip,
        };
        let fee = order.size * price * self.fee_rate;

        self.submitted.fetch_add(1, Ordering::SeqCst);
        debug!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            size = order.size,
            price = price,
            fee = fee,
            "[PAPER] Order filled"
        );

        Ok(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.size,
            price,
            fee,
            timestamp: Utc::now(),
        })
    }

    async fn cancel_all(&self) -> TransportResult<()> {
        // Paper fills are immediate, nothing ever rests.
        Ok(())
    }

    fn broker_name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_fill_at_reference_price() {
        let broker = PaperBroker::new(0.001);
        let order = Order::market("BTC-USD", OrderSide::Buy, 2.0, 100.0);

        let fill = broker.submit(&order).await.unwrap();
        assert_eq!(fill.order_id, order.id);
        assert_eq!(fill.price, 100.0);
        assert!((fill.fee - 0.2).abs() < 1e-12);
        assert_eq!(broker.submitted(), 1);
    }

    #[tokio::test]
    async fn test_paper_slippage_is_adverse() {
        let broker = PaperBroker::new(0.0).with_slippage_bps(10.0);

        let buy = broker
            .submit(&Order::market("BTC-USD", OrderSide::Buy, 1.0, 100.0))
            .await
            .unwrap();
        let sell = broker
            .submit(&Order::market("BTC-USD", OrderSide::Sell, 1.0, 100.0))
            .await
            .unwrap();

        assert!((buy.price - 100.1).abs() < 1e-9);
        assert!((sell.price - 99.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_paper_rejects_missing_price() {
        let broker = PaperBroker::new(0.0);
        let result = broker
            .submit(&Order::market("BTC-USD", OrderSide::Buy, 1.0, 0.0))
            .await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert_eq!(broker.submitted(), 0);
    }
}
