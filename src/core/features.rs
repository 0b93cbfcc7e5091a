//! Rolling per-symbol feature window
//!
//! Each tick's mid price is pushed into a bounded per-symbol window. Once a
//! symbol has `min_history` samples the window yields a [`Features`] snapshot
//! that strategies consume.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::adapters::types::Tick;

/// Feature names understood by [`Features::get`]
pub const FEATURE_NAMES: [&str; 7] = [
    "mid",
    "spread",
    "ret_1",
    "mean_return",
    "volatility",
    "momentum",
    "volume",
];

/// Snapshot of the rolling window for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Features {
    pub mid: f64,
    pub spread: f64,
    /// Return of the latest mid over the previous one
    pub ret_1: f64,
    /// Mean one-step return across the window
    pub mean_return: f64,
    /// Population standard deviation of one-step returns
    pub volatility: f64,
    /// Relative change from the oldest to the latest mid in the window
    pub momentum: f64,
    pub volume: f64,
    /// Number of mids in the window
    pub samples: usize,
}

impl Features {
    /// Look a feature up by name (used by model weights)
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "mid" => Some(self.mid),
            "spread" => Some(self.spread),
            "ret_1" => Some(self.ret_1),
            "mean_return" => Some(self.mean_return),
            "volatility" => Some(self.volatility),
            "momentum" => Some(self.momentum),
            "volume" => Some(self.volume),
            _ => None,
        }
    }
}

/// Bounded rolling window of mid prices, keyed by symbol
#[derive(Debug, Clone)]
pub struct FeatureWindow {
    window: usize,
    min_history: usize,
    series: HashMap<String, VecDeque<f64>>,
}

impl FeatureWindow {
    /// `window` is clamped to at least 2, `min_history` to `[2, window]`
    pub fn new(window: usize, min_history: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            min_history: min_history.clamp(2, window),
            series: HashMap::new(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn min_history(&self) -> usize {
        self.min_history
    }

    /// Number of samples held for `symbol`
    pub fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map_or(0, VecDeque::len)
    }

    pub fn is_ready(&self, symbol: &str) -> bool {
        self.len(symbol) >= self.min_history
    }

    /// Push a tick and return features once the symbol has enough history
    ///
    /// Ticks without a usable mid (non-positive or non-finite) are ignored.
    pub fn update(&mut self, tick: &Tick) -> Option<Features> {
        let mid = tick.mid();
        if !mid.is_finite() || mid <= 0.0 {
            return None;
        }

        let series = self
            .series
            .entry(tick.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.window));
        if series.len() == self.window {
            series.pop_front();
        }
        series.push_back(mid);

        if series.len() < self.min_history {
            return None;
        }

        Some(compute(series, tick))
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}

fn compute(series: &VecDeque<f64>, tick: &Tick) -> Features {
    let returns: Vec<f64> = series
        .iter()
        .zip(series.iter().skip(1))
        .map(|(prev, next)| next / prev - 1.0)
        .collect();

    let n = returns.len() as f64;
    let mean_return = if returns.is_empty() {
        0.0
    } else {
        returns.iter().sum::<f64>() / n
    };
    let volatility = if returns.is_empty() {
        0.0
    } else {
        (returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / n).sqrt()
    };

    let first = series.front().copied().unwrap_or(0.0);
    let last = series.back().copied().unwrap_or(0.0);
    let momentum = if first > 0.0 { last / first - 1.0 } else { 0.0 };

    Features {
        mid: last,
        spread: tick.spread(),
        ret_1: returns.last().copied().unwrap_or(0.0),
        mean_return,
        volatility,
        momentum,
        volume: tick.volume,
        samples: series.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, mid: f64) -> Tick {
        Tick::new(symbol, mid - 0.5, mid + 0.5, mid, 2.0)
    }

    #[test]
    fn test_no_features_before_min_history() {
        let mut window = FeatureWindow::new(10, 3);
        assert!(window.update(&tick("BTC-USD", 100.0)).is_none());
        assert!(window.update(&tick("BTC-USD", 101.0)).is_none());
        assert!(!window.is_ready("BTC-USD"));

        let features = window.update(&tick("BTC-USD", 102.0)).unwrap();
        assert_eq!(features.samples, 3);
        assert_eq!(features.mid, 102.0);
        assert_eq!(features.spread, 1.0);
        assert_eq!(features.volume, 2.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut window = FeatureWindow::new(3, 2);
        for mid in [100.0, 110.0, 120.0, 130.0, 140.0] {
            window.update(&tick("ETH-USD", mid));
        }
        assert_eq!(window.len("ETH-USD"), 3);

        // Oldest retained mid is 120
        let features = window.update(&tick("ETH-USD", 150.0)).unwrap();
        assert!((features.momentum - (150.0 / 130.0 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_return_statistics() {
        let mut window = FeatureWindow::new(10, 2);
        window.update(&tick("BTC-USD", 100.0));
        window.update(&tick("BTC-USD", 110.0));
        let features = window.update(&tick("BTC-USD", 99.0)).unwrap();

        let r1: f64 = 0.10;
        let r2 = 99.0 / 110.0 - 1.0;
        let mean = (r1 + r2) / 2.0;
        let vol = (((r1 - mean).powi(2) + (r2 - mean).powi(2)) / 2.0).sqrt();

        assert!((features.ret_1 - r2).abs() < 1e-12);
        assert!((features.mean_return - mean).abs() < 1e-12);
        assert!((features.volatility - vol).abs() < 1e-12);
        assert!((features.momentum - (-0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut window = FeatureWindow::new(10, 2);
        window.update(&tick("BTC-USD", 100.0));
        assert!(window.update(&tick("ETH-USD", 10.0)).is_none());
        assert!(window.update(&tick("BTC-USD", 101.0)).is_some());
        assert_eq!(window.len("ETH-USD"), 1);
    }

    #[test]
    fn test_unusable_mid_is_ignored() {
        let mut window = FeatureWindow::new(10, 2);
        assert!(window.update(&Tick::new("BTC-USD", 0.0, 0.0, 0.0, 0.0)).is_none());
        assert_eq!(window.len("BTC-USD"), 0);
    }

    #[test]
    fn test_min_history_is_clamped() {
        let window = FeatureWindow::new(5, 50);
        assert_eq!(window.min_history(), 5);
        let window = FeatureWindow::new(1, 0);
        assert_eq!(window.window(), 2);
        assert_eq!(window.min_history(), 2);
    }

    #[test]
    fn test_get_by_name() {
        let features = Features {
            momentum: 0.5,
            ..Default::default()
        };
        assert_eq!(features.get("momentum"), Some(0.5));
        assert_eq!(features.get("unknown"), None);
        for name in FEATURE_NAMES {
            assert!(features.get(name).is_some());
        }
    }
}
