//! Tick aggregator (spec §4.4 C6).
//!
//! Joins raw per-exchange ticks into canonical `Ticker`s via the
//! normalizer, tracks a primary/secondary source per symbol, deduplicates
//! near-simultaneous updates from multiple sources, and periodically emits
//! a data-health beat. Grounded on the teacher's `main.rs::parallel_data_collection`
//! fan-in loop and `signals/quality.rs`'s rolling-average idiom for latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::events::{Event, EventBus};
use crate::ingestion::http_fallback::Freshness;
use crate::ingestion::stream_source::{RawTick, SourceStatus};
use crate::models::{Quality, Ticker};
use crate::normalizer::Normalizer;

const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct SourceHealth {
    status: HashMap<String, SourceStatus>,
    ticks_total: u64,
    duplicates_dropped: u64,
    latency_ms: Vec<f64>,
}

impl SourceHealth {
    fn record_latency(&mut self, ms: f64) {
        self.latency_ms.push(ms);
        if self.latency_ms.len() > LATENCY_WINDOW {
            self.latency_ms.remove(0);
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.latency_ms.is_empty() {
            0.0
        } else {
            self.latency_ms.iter().sum::<f64>() / self.latency_ms.len() as f64
        }
    }

    fn is_healthy(&self, last_tick_at: Option<Instant>) -> bool {
        let any_connected = self.status.values().any(|s| *s == SourceStatus::Connected);
        let recent = last_tick_at.map(|t| t.elapsed() < Duration::from_secs(60)).unwrap_or(false);
        any_connected && recent
    }
}

/// Fans in raw ticks from every ingestion path, normalizes them, dedups
/// within a short window, and republishes canonical `Ticker`s.
pub struct Aggregator {
    last_by_symbol_source: RwLock<HashMap<(String, String), Ticker>>,
    last_seen_bucket: RwLock<HashMap<String, i64>>,
    last_tick_at: RwLock<Option<Instant>>,
    health: RwLock<SourceHealth>,
    freshness: Arc<Freshness>,
    dedup_window: Duration,
    out_tx: broadcast::Sender<Ticker>,
}

impl Aggregator {
    pub fn new(freshness: Arc<Freshness>, dedup_window: Duration, out_capacity: usize) -> Arc<Self> {
        let (out_tx, _) = broadcast::channel(out_capacity);
        Arc::new(Self {
            last_by_symbol_source: RwLock::new(HashMap::new()),
            last_seen_bucket: RwLock::new(HashMap::new()),
            last_tick_at: RwLock::new(None),
            health: RwLock::new(SourceHealth::default()),
            freshness,
            dedup_window,
            out_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Ticker> {
        self.out_tx.subscribe()
    }

    pub fn mark_status(&self, source: &str, status: SourceStatus) {
        self.health.write().status.insert(source.to_string(), status);
    }

    /// Snapshot of current source health, same shape as the periodic
    /// `Event::DataHealth` beat, for synchronous consumption by `/stats`.
    pub fn health_snapshot(&self) -> serde_json::Value {
        let health = self.health.read();
        let last_tick_at = *self.last_tick_at.read();
        serde_json::json!({
            "status": health.status,
            "ticks_total": health.ticks_total,
            "avg_latency_ms": health.avg_latency_ms(),
            "active_sources": health.status.values().filter(|s| **s == SourceStatus::Connected).count(),
            "duplicates_dropped": health.duplicates_dropped,
            "healthy": health.is_healthy(last_tick_at),
        })
    }

    pub fn latest(&self, symbol: &str, source: &str) -> Option<Ticker> {
        self.last_by_symbol_source
            .read()
            .get(&(symbol.to_string(), source.to_string()))
            .cloned()
    }

    /// Consumes raw ticks from a single ingestion source (stream or HTTP
    /// fallback) until the channel closes. Multiple sources run this
    /// concurrently against the same `Aggregator`.
    pub async fn consume(self: Arc<Self>, source: &'static str, mut rx: mpsc::Receiver<RawTick>) {
        while let Some(raw) = rx.recv().await {
            self.ingest(source, raw);
        }
    }

    fn ingest(&self, source: &str, raw: RawTick) {
        let received_at = Utc::now();
        let ingest_started = Instant::now();

        let candidate = Ticker {
            symbol: raw.canonical_symbol.clone(),
            source: source.to_string(),
            last_price: raw.last_price,
            best_bid: raw.best_bid,
            best_ask: raw.best_ask,
            quote_volume_24h: raw.quote_volume_24h,
            change_24h_abs: raw.change_24h_abs,
            change_24h_pct: raw.change_24h_pct,
            change_1h_pct: None,
            high_24h: raw.high_24h,
            low_24h: raw.low_24h,
            source_ts_ms: raw.event_ts_ms,
            received_at,
            quality: Quality::High,
        };

        let key = (raw.canonical_symbol.clone(), source.to_string());
        let previous = self.last_by_symbol_source.read().get(&key).cloned();

        let (normalized, report) = Normalizer::normalize(candidate, previous.as_ref(), received_at);
        if !report.is_valid() {
            debug!(symbol = %raw.canonical_symbol, source, errors = ?report.errors, "rejected tick");
            return;
        }
        let ticker = normalized.expect("validated ticker is Some");

        // Dedup key is (symbol, bucket) only, per-source is deliberately
        // excluded so a near-simultaneous tick from a second exchange for
        // the same symbol/window is recognized as a duplicate.
        let bucket = ticker.source_ts_ms / self.dedup_window.as_millis().max(1) as i64;
        let mut buckets = self.last_seen_bucket.write();
        if buckets.get(&ticker.symbol) == Some(&bucket) {
            self.health.write().duplicates_dropped += 1;
            return;
        }
        buckets.insert(ticker.symbol.clone(), bucket);
        drop(buckets);

        self.last_by_symbol_source
            .write()
            .insert(key, ticker.clone());
        *self.last_tick_at.write() = Some(Instant::now());
        self.freshness.mark(&ticker.symbol);

        {
            let mut health = self.health.write();
            health.ticks_total += 1;
            health.record_latency(ingest_started.elapsed().as_secs_f64() * 1000.0);
        }

        let _ = self.out_tx.send(ticker);
    }

    /// Emits a periodic data-health beat until `shutdown` fires (spec §4.4
    /// "every ~10s, emit per-source status, total ticks, avg latency,
    /// active sources, duplicates dropped").
    pub async fn run_health_beat(
        self: Arc<Self>,
        events: EventBus,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let health = self.health.read();
                    let last_tick_at = *self.last_tick_at.read();
                    let healthy = health.is_healthy(last_tick_at);
                    let sources = serde_json::json!({
                        "status": health.status,
                        "ticks_total": health.ticks_total,
                        "avg_latency_ms": health.avg_latency_ms(),
                        "active_sources": health.status.values().filter(|s| **s == SourceStatus::Connected).count(),
                        "duplicates_dropped": health.duplicates_dropped,
                        "healthy": healthy,
                    });
                    info!(healthy, ticks_total = health.ticks_total, "data health beat");
                    events.emit(Event::DataHealth {
                        timestamp: Utc::now(),
                        sources,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, price: f64, ts: i64) -> RawTick {
        RawTick {
            canonical_symbol: symbol.to_string(),
            last_price: price,
            best_bid: price - 0.1,
            best_ask: price + 0.1,
            quote_volume_24h: 1.0,
            change_24h_abs: 0.0,
            change_24h_pct: 0.0,
            high_24h: price + 1.0,
            low_24h: price - 1.0,
            event_ts_ms: ts,
        }
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let agg = Aggregator::new(Arc::new(Freshness::new()), Duration::from_millis(1000), 16);
        let mut rx = agg.subscribe();
        agg.ingest("binance", raw("bitcoin", 100.0, 1_700_000_000_000));
        agg.ingest("binance", raw("bitcoin", 100.5, 1_700_000_000_400));
        assert_eq!(agg.health.read().duplicates_dropped, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_across_sources_within_window_is_dropped() {
        let agg = Aggregator::new(Arc::new(Freshness::new()), Duration::from_millis(1000), 16);
        let mut rx = agg.subscribe();
        agg.ingest("binance", raw("bitcoin", 100.0, 1_700_000_000_000));
        agg.ingest("coinbase", raw("bitcoin", 100.1, 1_700_000_000_400));
        assert_eq!(agg.health.read().duplicates_dropped, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn distinct_buckets_both_emit() {
        let agg = Aggregator::new(Arc::new(Freshness::new()), Duration::from_millis(1000), 16);
        let mut rx = agg.subscribe();
        agg.ingest("binance", raw("bitcoin", 100.0, 1_700_000_000_000));
        agg.ingest("binance", raw("bitcoin", 101.0, 1_700_000_001_500));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn invalid_tick_does_not_update_latest() {
        let agg = Aggregator::new(Arc::new(Freshness::new()), Duration::from_millis(1000), 16);
        agg.ingest("binance", raw("bitcoin", -1.0, 1_700_000_000_000));
        assert!(agg.latest("bitcoin", "binance").is_none());
    }
}
