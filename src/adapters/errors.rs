//! Transport error types for feed and broker adapters
//!
//! All feed/broker failures are wrapped in `TransportError`. The engine treats
//! every variant as recoverable: the failure is alerted and the pipeline moves
//! on to the next tick.

use thiserror::Error;

/// Feed and broker transport failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection to the venue failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted while disconnected
    #[error("Not connected")]
    NotConnected,

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    Timeout(u64),

    /// Venue refused the order
    #[error("Order rejected by broker: {0}")]
    Rejected(String),

    /// Invalid or unexpected response from the venue
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
