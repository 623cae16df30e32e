//! Ticker normalizer (spec §4.1 C3).
//!
//! Validates invariants, rounds fields to the magnitude-banded precision,
//! and assigns a freshness quality tag. Never raises — returns an
//! error/warning record, matching the §9 design note ("Normalizer returns a
//! `(valid? errors, warnings)` record; it never raises") and grounded on the
//! teacher's gate-shape from `signals/quality.rs`.

use chrono::{DateTime, Utc};

use crate::models::{Quality, Ticker};

#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl NormalizeReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Normalizer;

impl Normalizer {
    /// Validate and sanitise a candidate ticker. `previous` is the last
    /// accepted ticker for the same (symbol, source) pair, used to enforce
    /// timestamp monotonicity.
    pub fn normalize(
        mut candidate: Ticker,
        previous: Option<&Ticker>,
        now: DateTime<Utc>,
    ) -> (Option<Ticker>, NormalizeReport) {
        let mut report = NormalizeReport::default();

        if candidate.last_price <= 0.0 {
            report.errors.push("last_price must be > 0".into());
        }
        if candidate.best_bid > 0.0 && candidate.best_ask > 0.0 && candidate.best_bid > candidate.best_ask
        {
            report.errors.push("best_bid must be <= best_ask".into());
        }
        if candidate.low_24h > candidate.high_24h {
            report.errors.push("low_24h must be <= high_24h".into());
        }
        if let Some(prev) = previous {
            if candidate.source_ts_ms < prev.source_ts_ms {
                report
                    .errors
                    .push("source timestamp is non-monotonic for this (symbol, source)".into());
            }
        }

        if !report.is_valid() {
            return (None, report);
        }

        if candidate.best_bid <= 0.0 || candidate.best_ask <= 0.0 {
            report
                .warnings
                .push("bid/ask missing or non-positive; spread-derived fields are unreliable".into());
        }

        candidate.last_price = round_price(candidate.last_price);
        candidate.best_bid = round_price(candidate.best_bid);
        candidate.best_ask = round_price(candidate.best_ask);
        candidate.high_24h = round_price(candidate.high_24h);
        candidate.low_24h = round_price(candidate.low_24h);
        candidate.quote_volume_24h = round2(candidate.quote_volume_24h);
        candidate.change_24h_abs = round2(candidate.change_24h_abs);
        candidate.change_24h_pct = round2(candidate.change_24h_pct);
        candidate.change_1h_pct = candidate.change_1h_pct.map(round2);

        let age_ms = (now.timestamp_millis() - candidate.source_ts_ms).max(0);
        candidate.quality = if age_ms < 1_000 {
            Quality::High
        } else if age_ms < 10_000 {
            Quality::Medium
        } else if age_ms < 30_000 {
            Quality::Low
        } else {
            Quality::Stale
        };

        (Some(candidate), report)
    }
}

/// Round by magnitude band: >=1000 -> 2dp, >=1 -> 4dp, >=0.01 -> 6dp, else 8dp.
fn round_price(p: f64) -> f64 {
    let decimals = if p >= 1000.0 {
        2
    } else if p >= 1.0 {
        4
    } else if p >= 0.01 {
        6
    } else {
        8
    };
    round_to(p, decimals)
}

fn round2(v: f64) -> f64 {
    round_to(v, 2)
}

fn round_to(v: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(price: f64, ts_ms: i64) -> Ticker {
        Ticker {
            symbol: "bitcoin".into(),
            source: "binance".into(),
            last_price: price,
            best_bid: price - 0.5,
            best_ask: price + 0.5,
            quote_volume_24h: 123.456,
            change_24h_abs: 10.0,
            change_24h_pct: 1.2345,
            change_1h_pct: Some(0.5123),
            high_24h: price + 10.0,
            low_24h: price - 10.0,
            source_ts_ms: ts_ms,
            received_at: Utc::now(),
            quality: Quality::High,
        }
    }

    #[test]
    fn rejects_non_positive_price() {
        let (out, report) = Normalizer::normalize(sample(-1.0, 0), None, Utc::now());
        assert!(out.is_none());
        assert!(!report.is_valid());
    }

    #[test]
    fn rejects_out_of_order_timestamp() {
        let prev = sample(100.0, 2_000);
        let (out, report) = Normalizer::normalize(sample(101.0, 1_000), Some(&prev), Utc::now());
        assert!(out.is_none());
        assert!(!report.is_valid());
    }

    #[test]
    fn rounds_price_by_magnitude_band() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let (out, _) = Normalizer::normalize(sample(42123.456789, 1_700_000_000_000), None, now);
        assert_eq!(out.unwrap().last_price, 42123.46);
    }

    #[test]
    fn assigns_quality_from_age() {
        let ts = 1_700_000_000_000;
        let now = Utc.timestamp_millis_opt(ts + 500).unwrap();
        let (out, _) = Normalizer::normalize(sample(100.0, ts), None, now);
        assert_eq!(out.unwrap().quality, Quality::High);

        let now_stale = Utc.timestamp_millis_opt(ts + 31_000).unwrap();
        let (out2, _) = Normalizer::normalize(sample(100.0, ts), None, now_stale);
        assert_eq!(out2.unwrap().quality, Quality::Stale);
    }

    #[test]
    fn idempotent_on_already_normalized_ticker() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_500).unwrap();
        let (first, _) = Normalizer::normalize(sample(100.123456, 1_700_000_000_000), None, now);
        let first = first.unwrap();
        let (second, _) = Normalizer::normalize(first.clone(), None, now);
        let second = second.unwrap();
        assert_eq!(first.last_price, second.last_price);
        assert_eq!(first.quote_volume_24h, second.quote_volume_24h);
    }
}
