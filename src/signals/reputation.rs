//! Reputation tracker (spec §4.15 C17).
//!
//! Per-strategy and per-market-condition win/loss aggregates derived from
//! outcome callbacks reported by the external triple-barrier monitor
//! (§4.16). Grounded on the teacher's aggregate-and-clamp idiom in
//! `signals/quality.rs::RollingStats` — here the "statistic" is a win
//! rate rather than a mean, with the same clamp-and-decide shape.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::Direction;

/// `k` chosen so a 70% win rate maps to roughly +15% confidence boost:
/// `(0.70 - 0.50) * K == 0.15`.
const K: f64 = 0.75;
const FACTOR_MIN: f64 = 0.8;
const FACTOR_MAX: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    WinTp1,
    WinTp2,
    WinTp3,
    LossSl,
    LossPartial,
    TimeoutWin,
    TimeoutLoss,
    TimeoutNeutral,
}

impl Outcome {
    /// `TimeoutNeutral` counts toward total trades but not toward win rate
    /// either way — an open question the spec leaves to the outcome
    /// monitor's own labelling, resolved here as "neither".
    fn win_rate_bucket(self) -> Option<bool> {
        match self {
            Outcome::WinTp1 | Outcome::WinTp2 | Outcome::WinTp3 | Outcome::TimeoutWin => Some(true),
            Outcome::LossSl | Outcome::LossPartial | Outcome::TimeoutLoss => Some(false),
            Outcome::TimeoutNeutral => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub signal_id: String,
    pub strategy: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub market_condition: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
struct Aggregate {
    total: u64,
    wins: u64,
    losses: u64,
}

impl Aggregate {
    fn win_rate(&self) -> Option<f64> {
        let decided = self.wins + self.losses;
        if decided == 0 {
            None
        } else {
            Some(self.wins as f64 / decided as f64)
        }
    }
}

#[derive(Default)]
struct State {
    open: HashMap<String, OpenPosition>,
    by_strategy: HashMap<String, Aggregate>,
    by_condition: HashMap<String, Aggregate>,
}

pub struct ReputationTracker {
    state: RwLock<State>,
}

impl ReputationTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn record_emission(&self, position: OpenPosition) {
        self.state.write().open.insert(position.signal_id.clone(), position);
    }

    /// Applies an outcome callback from the external monitor.
    pub fn record_outcome(&self, signal_id: &str, outcome: Outcome) {
        let mut state = self.state.write();
        let Some(position) = state.open.remove(signal_id) else {
            return;
        };

        if let Some(won) = outcome.win_rate_bucket() {
            let strategy_agg = state.by_strategy.entry(position.strategy.clone()).or_default();
            strategy_agg.total += 1;
            if won {
                strategy_agg.wins += 1;
            } else {
                strategy_agg.losses += 1;
            }

            let condition_agg = state.by_condition.entry(position.market_condition.clone()).or_default();
            condition_agg.total += 1;
            if won {
                condition_agg.wins += 1;
            } else {
                condition_agg.losses += 1;
            }
        } else {
            state.by_strategy.entry(position.strategy.clone()).or_default().total += 1;
        }
    }

    /// `clamp(1 + (winRate - 0.5) * k, 0.8, 1.2)`. Unknown strategies (no
    /// decided outcomes yet) yield a neutral factor of 1.0.
    pub fn factor_for(&self, strategy: &str) -> f64 {
        let state = self.state.read();
        match state.by_strategy.get(strategy).and_then(Aggregate::win_rate) {
            Some(win_rate) => (1.0 + (win_rate - 0.5) * K).clamp(FACTOR_MIN, FACTOR_MAX),
            None => 1.0,
        }
    }

    /// Returns (adjusted confidence, boost percent, human-readable reason).
    pub fn adjust_confidence(&self, strategy: &str, confidence: f64, _condition: &str) -> (f64, f64, String) {
        let factor = self.factor_for(strategy);
        let adjusted = (confidence * factor).clamp(0.0, 100.0);
        let boost_pct = (factor - 1.0) * 100.0;

        let reason = if factor > 1.0 {
            format!("{strategy} reputation boosts confidence by {boost_pct:.1}%")
        } else if factor < 1.0 {
            format!("{strategy} reputation reduces confidence by {:.1}%", -boost_pct)
        } else {
            format!("{strategy} has no established reputation; confidence unchanged")
        };

        (adjusted, boost_pct, reason)
    }
}

impl Default for ReputationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(id: &str, strategy: &str) -> OpenPosition {
        OpenPosition {
            signal_id: id.into(),
            strategy: strategy.into(),
            symbol: "bitcoin".into(),
            direction: Direction::Long,
            entry: 100.0,
            market_condition: "trending".into(),
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn unknown_strategy_has_neutral_factor() {
        let tracker = ReputationTracker::new();
        assert_eq!(tracker.factor_for("nobody"), 1.0);
    }

    #[test]
    fn seventy_percent_win_rate_boosts_near_15_percent() {
        let tracker = ReputationTracker::new();
        for i in 0..7 {
            tracker.record_emission(position(&format!("w{i}"), "momentum"));
            tracker.record_outcome(&format!("w{i}"), Outcome::WinTp1);
        }
        for i in 0..3 {
            tracker.record_emission(position(&format!("l{i}"), "momentum"));
            tracker.record_outcome(&format!("l{i}"), Outcome::LossSl);
        }
        let factor = tracker.factor_for("momentum");
        assert!((factor - 1.15).abs() < 0.01);
    }

    #[test]
    fn factor_is_clamped_at_extremes() {
        let tracker = ReputationTracker::new();
        for i in 0..20 {
            tracker.record_emission(position(&format!("w{i}"), "always-wins"));
            tracker.record_outcome(&format!("w{i}"), Outcome::WinTp1);
        }
        assert_eq!(tracker.factor_for("always-wins"), 1.2);
    }

    #[test]
    fn timeout_neutral_counts_total_but_not_win_rate() {
        let tracker = ReputationTracker::new();
        tracker.record_emission(position("a", "momentum"));
        tracker.record_outcome("a", Outcome::TimeoutNeutral);
        assert_eq!(tracker.factor_for("momentum"), 1.0);
    }
}
