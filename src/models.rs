//! Canonical data model (spec §3).
//!
//! Plain, serializable structs — grounded on the teacher's `models.rs` and
//! `signals/detector.rs::MarketSignal`/`SignalDetails` shape: flat fields,
//! `serde` derives, no builder boilerplate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Data-quality tag assigned by the normalizer from the age of the source
/// timestamp (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    High,
    Medium,
    Low,
    Stale,
}

/// Unified tick record produced by all ingestion paths (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub source: String,
    pub last_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub quote_volume_24h: f64,
    pub change_24h_abs: f64,
    pub change_24h_pct: f64,
    pub change_1h_pct: Option<f64>,
    pub high_24h: f64,
    pub low_24h: f64,
    /// Source timestamp, milliseconds UTC.
    pub source_ts_ms: i64,
    pub received_at: DateTime<Utc>,
    pub quality: Quality,
}

impl Ticker {
    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }

    pub fn spread_pct(&self) -> f64 {
        if self.last_price > 0.0 {
            self.spread() / self.last_price * 100.0
        } else {
            0.0
        }
    }
}

/// OHLC candle, read-only external input (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_valid(&self) -> bool {
        self.volume >= 0.0
            && self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Calm = 1,
    Alert = 2,
    Opportunity = 3,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// A per-tick predicate crossing a dynamic threshold (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub symbol: String,
    pub reason: String,
    pub priority: Priority,
    pub ticker: Ticker,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

impl Strength {
    pub fn score_component(self) -> f64 {
        match self {
            Strength::Strong => 10.0,
            Strength::Moderate => 6.0,
            Strength::Weak => 3.0,
        }
    }
}

/// A strategy's signal output (one half of `Verdict`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCandidate {
    pub strategy: String,
    pub direction: Direction,
    pub confidence: f64,
    pub strength: Strength,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    pub targets: [f64; 3],
    pub risk_reward: f64,
    pub timeframe: String,
    pub reasoning: String,
    pub indicators: serde_json::Value,
}

/// A strategy's output: either a signal or a rejection (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Verdict {
    Signal(SignalCandidate),
    Rejected { strategy: String, reason: String },
}

impl Verdict {
    pub fn as_signal(&self) -> Option<&SignalCandidate> {
        match self {
            Verdict::Signal(s) => Some(s),
            Verdict::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

/// A persisted, selected signal (spec §3 and §6 persistence schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    /// Encoded `STRATEGY:timeframe` (spec §6 / §9 — placeholder for a
    /// dedicated strategy column in the downstream schema).
    pub timeframe: String,
    pub entry_min: f64,
    pub entry_max: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
    pub confidence: u8,
    pub strength: Strength,
    pub risk_level: RiskLevel,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub selection_reason: String,
}
