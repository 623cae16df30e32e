//! Read-only OHLC candle cache (spec §3 "external OHLC dataset", §6
//! "HTTP OHLC source... consumed as read-only snapshots").
//!
//! Grounded on the teacher's `scrapers/binance_price_feed.rs` per-symbol
//! `RwLock<HashMap<String, VecDeque<_>>>` history buffer, generalized from
//! mid-price points to full candles.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::indicators::pipeline::CandleSource;
use crate::models::Candle;

const MAX_HISTORY: usize = 300;

#[derive(Default)]
struct SymbolHistory {
    candles: VecDeque<Candle>,
}

/// An in-memory, bounded-length candle history per symbol. Populated by
/// whatever upstream OHLC feed the deployment wires in; read by enrichment
/// and the pre-computation pipeline.
pub struct CandleStore {
    inner: RwLock<HashMap<String, SymbolHistory>>,
}

impl CandleStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
        })
    }

    pub fn ingest(&self, symbol: &str, candle: Candle) {
        if !candle.is_valid() {
            return;
        }
        let mut inner = self.inner.write();
        let entry = inner.entry(symbol.to_string()).or_default();
        entry.candles.push_back(candle);
        if entry.candles.len() > MAX_HISTORY {
            entry.candles.pop_front();
        }
    }

    pub fn recent(&self, symbol: &str) -> Vec<Candle> {
        self.inner
            .read()
            .get(symbol)
            .map(|h| h.candles.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl CandleSource for CandleStore {
    fn recent(&self, symbol: &str) -> Option<(Vec<f64>, Vec<f64>)> {
        let candles = self.recent(symbol);
        if candles.is_empty() {
            return None;
        }
        Some((
            candles.iter().map(|c| c.close).collect(),
            candles.iter().map(|c| c.volume).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> Candle {
        Candle {
            open_ts_ms: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn bounds_history_to_max_length() {
        let store = CandleStore::new();
        for i in 0..(MAX_HISTORY + 50) {
            store.ingest("bitcoin", candle(i as f64));
        }
        assert_eq!(store.recent("bitcoin").len(), MAX_HISTORY);
    }

    #[test]
    fn invalid_candle_is_rejected() {
        let store = CandleStore::new();
        store.ingest(
            "bitcoin",
            Candle {
                open_ts_ms: 0,
                open: 10.0,
                high: 5.0,
                low: 20.0,
                close: 10.0,
                volume: -1.0,
            },
        );
        assert!(store.recent("bitcoin").is_empty());
    }
}
