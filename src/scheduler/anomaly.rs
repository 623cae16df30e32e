//! Micro-anomaly detector (spec §4.5 C7).
//!
//! Per-tick, O(1)-ish scoring against the previous tick for the same
//! symbol. Budgeted at ≤1ms; a slow run logs a warning but still
//! completes — this never gates ingestion. Grounded on the teacher's
//! `signals/detector.rs` rule-pipeline shape (independent checks, severity
//! is the max over triggered rules).

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;

use crate::models::{Severity, Ticker};

const BUDGET_US: u128 = 1_000;
const ACCEL_WINDOW: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct AnomalyReport {
    pub severity: Severity,
    pub reasons: Vec<String>,
}

impl AnomalyReport {
    fn bump(&mut self, severity: Severity, reason: impl Into<String>) {
        if severity > self.severity {
            self.severity = severity;
        }
        self.reasons.push(reason.into());
    }
}

#[derive(Debug, Clone)]
struct PriceSample {
    price: f64,
    at_ms: i64,
}

#[derive(Default)]
struct SymbolState {
    previous: Option<Ticker>,
    window: VecDeque<PriceSample>,
}

/// Per-symbol state is isolated behind a single lock; critical sections are
/// short (a handful of float ops), matching the teacher's `parking_lot`
/// convention for hot per-symbol maps.
pub struct MicroAnomalyDetector {
    state: Mutex<HashMap<String, SymbolState>>,
}

impl MicroAnomalyDetector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Scores `current` against the previously seen tick for the same
    /// symbol, updating internal state as a side effect.
    pub fn check(&self, current: &Ticker) -> AnomalyReport {
        let started = Instant::now();
        let mut report = AnomalyReport::default();

        let mut state = self.state.lock();
        let entry = state.entry(current.symbol.clone()).or_default();

        entry.window.push_back(PriceSample {
            price: current.last_price,
            at_ms: current.source_ts_ms,
        });
        if entry.window.len() > ACCEL_WINDOW {
            entry.window.pop_front();
        }

        let Some(previous) = entry.previous.clone() else {
            entry.previous = Some(current.clone());
            return report;
        };

        let dt_seconds = (current.source_ts_ms - previous.source_ts_ms) as f64 / 1000.0;
        if dt_seconds <= 0.0 {
            entry.previous = Some(current.clone());
            return report;
        }

        let price_gap_pct = (current.last_price - previous.last_price).abs() / previous.last_price * 100.0;
        if price_gap_pct > 2.0 {
            report.bump(Severity::Critical, format!("price gap {price_gap_pct:.3}% > 2%"));
        } else if price_gap_pct > 1.0 {
            report.bump(Severity::High, format!("price gap {price_gap_pct:.3}% > 1%"));
        } else if price_gap_pct > 0.5 {
            report.bump(Severity::Medium, format!("price gap {price_gap_pct:.3}% > 0.5%"));
        }

        let velocity = price_gap_pct / dt_seconds;
        if velocity > 2.0 {
            report.bump(Severity::Critical, format!("velocity {velocity:.3}%/s > 2"));
        } else if velocity > 1.0 {
            report.bump(Severity::High, format!("velocity {velocity:.3}%/s > 1"));
        } else if velocity > 0.5 {
            report.bump(Severity::Medium, format!("velocity {velocity:.3}%/s > 0.5"));
        }

        let spread_delta = (current.spread_pct() - previous.spread_pct()).abs();
        if spread_delta > 1.0 {
            report.bump(Severity::High, format!("spread change {spread_delta:.3}% > 1%"));
        } else if spread_delta > 0.5 {
            report.bump(Severity::Medium, format!("spread change {spread_delta:.3}% > 0.5%"));
        }

        if entry.window.len() >= 2 {
            let samples: Vec<&PriceSample> = entry.window.iter().collect();
            let mut interval_velocities = Vec::with_capacity(samples.len() - 1);
            for pair in samples.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let dt = (b.at_ms - a.at_ms) as f64 / 1000.0;
                if dt > 0.0 && a.price > 0.0 {
                    let v = (b.price - a.price).abs() / a.price * 100.0 / dt;
                    interval_velocities.push(v);
                }
            }
            if let (Some(oldest), Some(latest)) = (interval_velocities.first(), interval_velocities.last())
            {
                if latest - oldest > 1.0 {
                    report.bump(
                        Severity::High,
                        format!("acceleration {latest:.3} vs {oldest:.3} pct-points"),
                    );
                }
            }
        }

        if previous.quote_volume_24h > 0.0 && dt_seconds < 5.0 {
            let vol_change_pct =
                (current.quote_volume_24h - previous.quote_volume_24h).abs() / previous.quote_volume_24h * 100.0;
            if vol_change_pct > 20.0 {
                report.bump(
                    Severity::Medium,
                    format!("volume surge {vol_change_pct:.1}% in {dt_seconds:.2}s"),
                );
            }
        }

        entry.previous = Some(current.clone());
        drop(state);

        let elapsed = started.elapsed();
        if elapsed.as_micros() > BUDGET_US {
            tracing::warn!(
                symbol = %current.symbol,
                elapsed_us = elapsed.as_micros(),
                "micro-anomaly detector exceeded its 1ms budget"
            );
        }

        report
    }
}

impl Default for MicroAnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quality;

    fn tick(symbol: &str, price: f64, ts: i64, volume: f64) -> Ticker {
        Ticker {
            symbol: symbol.into(),
            source: "binance".into(),
            last_price: price,
            best_bid: price - 0.1,
            best_ask: price + 0.1,
            quote_volume_24h: volume,
            change_24h_abs: 0.0,
            change_24h_pct: 0.0,
            change_1h_pct: None,
            high_24h: price + 1.0,
            low_24h: price - 1.0,
            source_ts_ms: ts,
            received_at: chrono::Utc::now(),
            quality: Quality::High,
        }
    }

    #[test]
    fn first_tick_for_symbol_is_never_anomalous() {
        let det = MicroAnomalyDetector::new();
        let report = det.check(&tick("bitcoin", 100.0, 1_000, 1.0));
        assert_eq!(report.severity, Severity::None);
    }

    #[test]
    fn large_price_gap_is_critical() {
        let det = MicroAnomalyDetector::new();
        det.check(&tick("bitcoin", 100.0, 1_000, 1000.0));
        let report = det.check(&tick("bitcoin", 103.0, 2_000, 1000.0));
        assert_eq!(report.severity, Severity::Critical);
    }

    #[test]
    fn non_monotonic_timestamp_is_ignored() {
        let det = MicroAnomalyDetector::new();
        det.check(&tick("bitcoin", 100.0, 2_000, 1.0));
        let report = det.check(&tick("bitcoin", 110.0, 1_000, 1.0));
        assert_eq!(report.severity, Severity::None);
    }

    #[test]
    fn volume_surge_within_window_is_medium() {
        let det = MicroAnomalyDetector::new();
        det.check(&tick("bitcoin", 100.0, 1_000, 1000.0));
        let report = det.check(&tick("bitcoin", 100.05, 3_000, 1300.0));
        assert_eq!(report.severity, Severity::Medium);
    }
}
