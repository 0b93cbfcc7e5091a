//! Feed and broker trait definitions
//!
//! The engine is generic over these two seams. Concrete venue wire protocols
//! live behind them; the crate only ships the paper implementations in
//! `adapters::paper` and `adapters::replay`.

use async_trait::async_trait;

use crate::adapters::errors::TransportResult;
use crate::adapters::types::{Fill, Order, Tick};

/// Source of normalized market data
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
///
/// struct CsvFeed { rows: std::vec::IntoIter<Tick>, connected: bool }
///
/// #[async_trait]
/// impl Feed for CsvFeed {
///     async fn connect(&mut self) -> TransportResult<()> { self.connected = true; Ok(()) }
///     async fn disconnect(&mut self) -> TransportResult<()> { self.connected = false; Ok(()) }
///     async fn next_tick(&mut self) -> TransportResult<Option<Tick>> { Ok(self.rows.next()) }
///     fn feed_name(&self) -> &'static str { "csv" }
/// }
/// ```
#[async_trait]
pub trait Feed: Send + 'static {
    /// Establish the market-data connection
    async fn connect(&mut self) -> TransportResult<()>;

    /// Tear down the market-data connection
    async fn disconnect(&mut self) -> TransportResult<()>;

    /// Await the next tick
    ///
    /// Returns `Ok(None)` once the stream is exhausted. Errors are transient:
    /// the caller backs off, reconnects and keeps reading. Must be
    /// cancel-safe: a pending call is dropped when the engine stops.
    async fn next_tick(&mut self) -> TransportResult<Option<Tick>>;

    /// Feed identifier for logs
    fn feed_name(&self) -> &'static str;
}

/// Order execution venue
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Submit an order and await its fill
    async fn submit(&self, order: &Order) -> TransportResult<Fill>;

    /// Cancel every resting order
    async fn cancel_all(&self) -> TransportResult<()>;

    /// Broker identifier for logs
    fn broker_name(&self) -> &'static str;
}
