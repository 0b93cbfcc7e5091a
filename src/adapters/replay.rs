//! Reference market-data feeds
//!
//! - `StreamFeed`: adapts any `futures_util::Stream` of ticks (recorded data,
//!   a channel, a test fixture)
//! - `RandomWalkFeed`: synthetic random-walk quotes for paper runs

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::info;

use crate::adapters::errors::{TransportError, TransportResult};
use crate::adapters::traits::Feed;
use crate::adapters::types::Tick;

// =============================================================================
// StreamFeed
// =============================================================================

/// Feed backed by an arbitrary tick stream
pub struct StreamFeed {
    stream: BoxStream<'static, Tick>,
    connected: bool,
}

impl StreamFeed {
    /// Wrap a stream of ticks
    pub fn new(stream: BoxStream<'static, Tick>) -> Self {
        Self {
            stream,
            connected: false,
        }
    }

    /// Replay a fixed list of ticks, then end the stream
    pub fn from_ticks(ticks: Vec<Tick>) -> Self {
        Self::new(stream::iter(ticks).boxed())
    }

    /// Deliver ticks pushed into an mpsc channel; the stream ends when every
    /// sender is dropped
    pub fn from_receiver(rx: mpsc::Receiver<Tick>) -> Self {
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|tick| (tick, rx))
        });
        Self::new(stream.boxed())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl std::fmt::Debug for StreamFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFeed")
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Feed for StreamFeed {
    async fn connect(&mut self) -> TransportResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn next_tick(&mut self) -> TransportResult<Option<Tick>> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(self.stream.next().await)
    }

    fn feed_name(&self) -> &'static str {
        "stream"
    }
}

// =============================================================================
// RandomWalkFeed
// =============================================================================

/// Synthetic quotes following a multiplicative random walk
#[derive(Debug)]
pub struct RandomWalkFeed {
    symbol: String,
    price: f64,
    /// Maximum relative move per tick (e.g., 0.001 = 10 bps)
    step: f64,
    /// Quoted spread in basis points
    spread_bps: f64,
    interval: Duration,
    rng: StdRng,
    connected: bool,
}

impl RandomWalkFeed {
    /// Create a random walk starting at `start_price`
    pub fn new(symbol: impl Into<String>, start_price: f64, step: f64, interval: Duration) -> Self {
        Self {
            symbol: symbol.into(),
            price: start_price,
            step,
            spread_bps: 2.0,
            interval,
            rng: StdRng::from_entropy(),
            connected: false,
        }
    }

    /// Use a deterministic seed (reproducible paper runs)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn next_quote(&mut self) -> Tick {
        let shock: f64 = self.rng.gen_range(-1.0..=1.0);
        self.price = (self.price * (1.0 + self.step * shock)).max(f64::EPSILON);
        let half_spread = self.price * self.spread_bps / 20_000.0;
        let volume: f64 = self.rng.gen_range(0.1..5.0);

        Tick::new(
            self.symbol.clone(),
            self.price - half_spread,
            self.price + half_spread,
            self.price,
            volume,
        )
    }
}

#[async_trait]
impl Feed for RandomWalkFeed {
    async fn connect(&mut self) -> TransportResult<()> {
        info!(symbol = %self.symbol, start_price = self.price, "[FEED] Random walk connected");
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn next_tick(&mut self) -> TransportResult<Option<Tick>> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        Ok(Some(self.next_quote()))
    }

    fn feed_name(&self) -> &'static str {
        "random-walk"
    }
}
