//! Runtime knobs with environment-variable overrides
//!
//! These are process-level timings rather than strategy configuration, so
//! they live outside `config.yaml`. Unparseable values fall back to the
//! default.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Execution
// =============================================================================

/// Broker round-trip timeout in milliseconds (default: 2000ms)
///
/// Environment variable: `ORDER_TIMEOUT_MS`
pub fn order_timeout_ms() -> u64 {
    env_or("ORDER_TIMEOUT_MS", 2000)
}

pub fn order_timeout() -> Duration {
    Duration::from_millis(order_timeout_ms())
}

// =============================================================================
// Feed
// =============================================================================

/// Back-off before reconnecting after a feed error (default: 250ms)
///
/// Environment variable: `FEED_RETRY_DELAY_MS`
pub fn feed_retry_delay() -> Duration {
    Duration::from_millis(env_or("FEED_RETRY_DELAY_MS", 250))
}

// =============================================================================
// Registry
// =============================================================================

/// How long a registry writer waits for the lock (default: 5000ms)
///
/// Environment variable: `REGISTRY_LOCK_TIMEOUT_MS`
pub fn registry_lock_timeout() -> Duration {
    Duration::from_millis(env_or("REGISTRY_LOCK_TIMEOUT_MS", 5000))
}

// =============================================================================
// Metrics
// =============================================================================

/// Number of broker round-trips in the rolling latency average (default: 100)
///
/// Environment variable: `LATENCY_WINDOW`
pub fn latency_window() -> usize {
    env_or("LATENCY_WINDOW", 100)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Print all runtime knobs (startup logs)
pub fn log_configuration() {
    tracing::info!("=== Runtime Configuration ===");
    tracing::info!("Execution:");
    tracing::info!("  - Order timeout: {}ms", order_timeout_ms());
    tracing::info!("Feed:");
    tracing::info!("  - Retry delay: {:?}", feed_retry_delay());
    tracing::info!("Registry:");
    tracing::info!("  - Lock timeout: {:?}", registry_lock_timeout());
    tracing::info!("Metrics:");
    tracing::info!("  - Latency window: {}", latency_window());
    tracing::info!("=============================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(env)]
    fn test_default_values() {
        assert_eq!(order_timeout_ms(), 2000);
        assert_eq!(order_timeout(), Duration::from_millis(2000));
        assert_eq!(feed_retry_delay(), Duration::from_millis(250));
        assert_eq!(registry_lock_timeout(), Duration::from_millis(5000));
        assert_eq!(latency_window(), 100);
    }

    #[test]
    #[serial(env)]
    fn test_env_override() {
        std::env::set_var("LATENCY_WINDOW", "7");
        std::env::set_var("FEED_RETRY_DELAY_MS", "10");
        assert_eq!(latency_window(), 7);
        assert_eq!(feed_retry_delay(), Duration::from_millis(10));

        std::env::remove_var("LATENCY_WINDOW");
        std::env::remove_var("FEED_RETRY_DELAY_MS");
    }

    #[test]
    #[serial(env)]
    fn test_unparseable_value_uses_default() {
        std::env::set_var("ORDER_TIMEOUT_MS", "soon");
        assert_eq!(order_timeout_ms(), 2000);
        std::env::remove_var("ORDER_TIMEOUT_MS");
    }
}
