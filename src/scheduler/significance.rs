//! Significance filter (spec §4.8 C10).
//!
//! Classifies raw trigger magnitudes against a per-asset volatility
//! category so that, e.g., a 1% stablecoin move is treated very
//! differently from a 1% major-asset move. Grounded on the teacher's
//! category-multiplier idiom in `signals/correlator.rs` (tiered thresholds
//! keyed by a coarse classification rather than one global cutoff).

use crate::models::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityCategory {
    UltraLow,
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityCategory {
    fn multiplier(self) -> f64 {
        match self {
            VolatilityCategory::UltraLow => 0.1,
            VolatilityCategory::Low => 0.5,
            VolatilityCategory::Medium => 1.0,
            VolatilityCategory::High => 1.5,
            VolatilityCategory::Extreme => 2.0,
        }
    }

    /// Classifies a canonical symbol by its typical volatility profile.
    /// Stablecoins are ultra-low; everything else defaults to medium
    /// unless explicitly known to run hotter.
    pub fn classify(symbol: &str) -> Self {
        const STABLE: &[&str] = &["usd-coin", "tether", "dai", "true-usd"];
        const HIGH: &[&str] = &["dogecoin", "sui", "sei", "arbitrum", "optimism"];
        const EXTREME: &[&str] = &["pepe", "shiba-inu", "bonk"];

        if STABLE.contains(&symbol) {
            VolatilityCategory::UltraLow
        } else if EXTREME.contains(&symbol) {
            VolatilityCategory::Extreme
        } else if HIGH.contains(&symbol) {
            VolatilityCategory::High
        } else {
            VolatilityCategory::Medium
        }
    }
}

struct BaseThresholds {
    price_change_pct: f64,
    velocity_pct_per_sec: f64,
    volume_spike_ratio: f64,
    spread_widening_ratio: f64,
    bid_ask_ratio_deviation: f64,
}

const BASE: BaseThresholds = BaseThresholds {
    price_change_pct: 1.0,
    velocity_pct_per_sec: 0.5,
    volume_spike_ratio: 1.5,
    spread_widening_ratio: 2.0,
    bid_ask_ratio_deviation: 0.3,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionVerdict {
    Noise,
    Low,
    Medium,
    High,
    Critical,
}

impl DimensionVerdict {
    fn is_significant(self) -> bool {
        self != DimensionVerdict::Noise
    }

    fn severity_rank(self) -> u8 {
        match self {
            DimensionVerdict::Noise => 0,
            DimensionVerdict::Low => 1,
            DimensionVerdict::Medium => 2,
            DimensionVerdict::High => 3,
            DimensionVerdict::Critical => 4,
        }
    }
}

/// One observed magnitude per dimension, expressed as a ratio to 1.0
/// (i.e. `observed / scaled_base_threshold`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMagnitudes {
    pub price_change_pct: f64,
    pub velocity_pct_per_sec: f64,
    pub volume_spike_ratio: f64,
    pub spread_widening_ratio: f64,
    pub bid_ask_ratio_deviation: f64,
}

#[derive(Debug, Clone)]
pub struct SignificanceVerdict {
    pub severity: DimensionVerdict,
    pub confidence: u8,
    pub significant_dimensions: u8,
}

pub struct SignificanceFilter;

impl SignificanceFilter {
    fn classify_dimension(observed: f64, base: f64, multiplier: f64) -> DimensionVerdict {
        let threshold = base * multiplier;
        if threshold <= 0.0 {
            return DimensionVerdict::Noise;
        }
        let ratio = observed / threshold;
        if ratio >= 3.0 {
            DimensionVerdict::Critical
        } else if ratio >= 2.0 {
            DimensionVerdict::High
        } else if ratio >= 1.5 {
            DimensionVerdict::Medium
        } else if ratio >= 1.0 {
            DimensionVerdict::Low
        } else {
            DimensionVerdict::Noise
        }
    }

    pub fn evaluate(category: VolatilityCategory, magnitudes: TriggerMagnitudes) -> SignificanceVerdict {
        let m = category.multiplier();
        let dims = [
            Self::classify_dimension(magnitudes.price_change_pct, BASE.price_change_pct, m),
            Self::classify_dimension(magnitudes.velocity_pct_per_sec, BASE.velocity_pct_per_sec, m),
            Self::classify_dimension(magnitudes.volume_spike_ratio, BASE.volume_spike_ratio, m),
            Self::classify_dimension(magnitudes.spread_widening_ratio, BASE.spread_widening_ratio, m),
            Self::classify_dimension(
                magnitudes.bid_ask_ratio_deviation,
                BASE.bid_ask_ratio_deviation,
                m,
            ),
        ];

        let significant_dimensions = dims.iter().filter(|d| d.is_significant()).count() as u8;
        let max_dim = dims
            .iter()
            .copied()
            .max_by_key(|d| d.severity_rank())
            .unwrap_or(DimensionVerdict::Noise);

        if !max_dim.is_significant() {
            return SignificanceVerdict {
                severity: DimensionVerdict::Noise,
                confidence: 0,
                significant_dimensions: 0,
            };
        }

        let base_confidence: u8 = match max_dim {
            DimensionVerdict::Critical => 90,
            DimensionVerdict::High => 75,
            DimensionVerdict::Medium => 60,
            DimensionVerdict::Low => 45,
            DimensionVerdict::Noise => 0,
        };
        let boost = if significant_dimensions >= 3 { 10 } else { 0 };

        SignificanceVerdict {
            severity: max_dim,
            confidence: (base_confidence + boost).min(100),
            significant_dimensions,
        }
    }
}

impl From<DimensionVerdict> for Severity {
    fn from(v: DimensionVerdict) -> Self {
        match v {
            DimensionVerdict::Noise => Severity::None,
            DimensionVerdict::Low => Severity::Low,
            DimensionVerdict::Medium => Severity::Medium,
            DimensionVerdict::High => Severity::High,
            DimensionVerdict::Critical => Severity::Critical,
        }
    }
}
