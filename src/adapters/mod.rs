//! Feed and broker adapters
//!
//! This module provides the collaborator seams the engine is generic over
//! (`Feed`, `Broker`), the market-data/order types they exchange, and the
//! paper implementations used by the binary and tests.

pub mod errors;
pub mod paper;
pub mod replay;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use errors::{TransportError, TransportResult};
pub use paper::PaperBroker;
pub use replay::{RandomWalkFeed, StreamFeed};
pub use traits::{Broker, Feed};
pub use types::{Fill, Order, OrderSide, OrderType, Tick};
