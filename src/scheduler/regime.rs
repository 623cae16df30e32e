//! Volatility regime tracker (spec §4.6 C8).
//!
//! Per symbol, a bounded ring of absolute percentage price changes feeds a
//! Welford rolling standard deviation, which is banded into a regime and
//! used to scale the base trigger thresholds. Grounded on the teacher's
//! `signals/quality.rs::RollingStats` Welford `count`/`mean`/`m2` update,
//! extended with the inverse update on eviction so the accumulator stays
//! windowed instead of all-time.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Thresholds as BaseThresholds;

const RING_CAPACITY: usize = 20;
const MIN_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Calm,
    Normal,
    Volatile,
    Extreme,
}

impl Regime {
    fn from_std_dev(sigma: f64) -> Self {
        if sigma < 0.5 {
            Regime::Calm
        } else if sigma < 1.5 {
            Regime::Normal
        } else if sigma < 3.0 {
            Regime::Volatile
        } else {
            Regime::Extreme
        }
    }

    fn multipliers(self) -> (f64, f64, f64, f64) {
        match self {
            Regime::Calm => (0.4, 0.5, 1.0, 0.6),
            Regime::Normal => (1.0, 1.0, 1.0, 1.0),
            Regime::Volatile => (1.5, 1.3, 1.3, 1.4),
            Regime::Extreme => (2.0, 1.5, 1.5, 2.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Regime::Calm => "CALM",
            Regime::Normal => "NORMAL",
            Regime::Volatile => "VOLATILE",
            Regime::Extreme => "EXTREME",
        }
    }
}

/// Dynamic, regime-scaled thresholds handed to the orchestrator's trigger
/// predicates (spec §4.6). Also the payload of `Event::RegimeChange`.
#[derive(Debug, Clone, Serialize)]
pub struct Thresholds {
    pub price_change_pct: f64,
    pub velocity_pct_per_sec: f64,
    pub spread_widening_ratio: f64,
    pub volume_surge_ratio: f64,
}

impl Thresholds {
    fn scale(base: &BaseThresholds, regime: Regime) -> Self {
        let (p, v, s, vol) = regime.multipliers();
        Self {
            price_change_pct: base.price_change_pct * p,
            velocity_pct_per_sec: base.velocity_pct_per_sec * v,
            spread_widening_ratio: base.spread_widening_ratio * s,
            volume_surge_ratio: base.volume_surge_ratio * vol,
        }
    }
}

#[derive(Default)]
struct RollingStdDev {
    window: VecDeque<f64>,
    count: u64,
    mean: f64,
    m2: f64,
}

impl RollingStdDev {
    fn push(&mut self, value: f64) {
        self.window.push_back(value);
        self.add(value);
        if self.window.len() > RING_CAPACITY {
            if let Some(evicted) = self.window.pop_front() {
                self.remove(evicted);
            }
        }
    }

    /// Welford's online update, same `count`/`mean`/`m2` recurrence as the
    /// teacher's `RollingStats::update`.
    fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Inverse of `add`, run on eviction so the accumulator tracks only the
    /// current window instead of accumulating since symbol start.
    fn remove(&mut self, value: f64) {
        if self.count <= 1 {
            self.count = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let new_count = self.count - 1;
        let new_mean = (self.mean * self.count as f64 - value) / new_count as f64;
        self.m2 -= (value - self.mean) * (value - new_mean);
        self.count = new_count;
        self.mean = new_mean;
    }

    fn std_dev(&self) -> Option<f64> {
        if self.window.len() < MIN_SAMPLES || self.count < 2 {
            return None;
        }
        Some((self.m2 / (self.count - 1) as f64).sqrt())
    }
}

struct SymbolState {
    stats: RollingStdDev,
    last_price: Option<f64>,
    regime: Regime,
}

impl Default for SymbolState {
    fn default() -> Self {
        Self {
            stats: RollingStdDev::default(),
            last_price: None,
            regime: Regime::Normal,
        }
    }
}

pub struct VolatilityRegimeTracker {
    base: BaseThresholds,
    state: RwLock<HashMap<String, SymbolState>>,
}

impl VolatilityRegimeTracker {
    pub fn new(base: BaseThresholds) -> Self {
        Self {
            base,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Pushes a new price for `symbol`, returning the current regime, the
    /// scaled thresholds, and `Some((from, to))` if the regime just
    /// transitioned.
    pub fn push(&self, symbol: &str, price: f64) -> (Regime, Thresholds, Option<(Regime, Regime)>) {
        let mut state = self.state.write();
        let entry = state.entry(symbol.to_string()).or_default();

        if let Some(prev) = entry.last_price {
            if prev > 0.0 {
                let pct_change = (price - prev).abs() / prev * 100.0;
                entry.stats.push(pct_change);
            }
        }
        entry.last_price = Some(price);

        let new_regime = entry
            .stats
            .std_dev()
            .map(Regime::from_std_dev)
            .unwrap_or(entry.regime);

        let transition = if new_regime != entry.regime {
            Some((entry.regime, new_regime))
        } else {
            None
        };
        entry.regime = new_regime;

        let thresholds = Thresholds::scale(&self.base, new_regime);
        (new_regime, thresholds, transition)
    }

    pub fn regime_for(&self, symbol: &str) -> Regime {
        self.state
            .read()
            .get(symbol)
            .map(|s| s.regime)
            .unwrap_or(Regime::Normal)
    }

    /// The windowed standard deviation (percent price change) currently
    /// backing `symbol`'s regime, or 0.0 if there aren't enough samples yet.
    pub fn volatility_for(&self, symbol: &str) -> f64 {
        self.state
            .read()
            .get(symbol)
            .and_then(|s| s.stats.std_dev())
            .unwrap_or(0.0)
    }
}
