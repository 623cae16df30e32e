//! HTTP fallback poller (spec §4.3 C5).
//!
//! Periodically polls a REST endpoint for symbols that have gone stale on
//! every stream (or were never mapped to one), producing lower-quality
//! ticks rather than leaving a symbol dark. Grounded on the teacher's
//! `scrapers/binance_price_feed.rs` polling loop shape (interval timer +
//! per-symbol request, log-and-continue on failure).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::ingestion::stream_source::RawTick;
use crate::symbol_map::SymbolMap;

/// Tracks the last time each canonical symbol produced a tick from any
/// stream source, so the poller only covers symbols that actually need it.
#[derive(Debug, Default)]
pub struct Freshness {
    last_seen: RwLock<HashMap<String, Instant>>,
}

impl Freshness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, symbol: &str) {
        self.last_seen.write().insert(symbol.to_string(), Instant::now());
    }

    fn is_stale(&self, symbol: &str, staleness: Duration) -> bool {
        match self.last_seen.read().get(symbol) {
            Some(t) => t.elapsed() > staleness,
            None => true,
        }
    }
}

/// Minimal shape of the public ticker endpoint response this poller
/// consumes. A real deployment would hit a vendor REST API (e.g. the
/// exchange's `/ticker/24hr`); this struct documents the fields the
/// fallback path needs regardless of provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FallbackQuote {
    pub last_price: f64,
    #[serde(default)]
    pub best_bid: f64,
    #[serde(default)]
    pub best_ask: f64,
    #[serde(default)]
    pub quote_volume_24h: f64,
    #[serde(default)]
    pub change_24h_abs: f64,
    #[serde(default)]
    pub change_24h_pct: f64,
    #[serde(default)]
    pub high_24h: f64,
    #[serde(default)]
    pub low_24h: f64,
}

#[async_trait::async_trait]
pub trait FallbackProvider: Send + Sync {
    async fn fetch(&self, canonical_symbol: &str) -> anyhow::Result<FallbackQuote>;
}

/// Binance's unauthenticated REST ticker, used as the default fallback
/// provider for symbols whose stream mapping exists but is currently down.
pub struct BinanceRestProvider {
    client: reqwest::Client,
    symbol_map: Arc<SymbolMap>,
}

impl BinanceRestProvider {
    pub fn new(symbol_map: Arc<SymbolMap>) -> Self {
        Self {
            client: reqwest::Client::new(),
            symbol_map,
        }
    }
}

#[async_trait::async_trait]
impl FallbackProvider for BinanceRestProvider {
    async fn fetch(&self, canonical_symbol: &str) -> anyhow::Result<FallbackQuote> {
        let exchange = self
            .symbol_map
            .exchange_symbols(canonical_symbol)
            .and_then(|e| e.binance.clone())
            .ok_or_else(|| anyhow::anyhow!("no binance symbol for {canonical_symbol}"))?;

        let url = format!("https://api.binance.com/api/v3/ticker/24hr?symbol={exchange}");
        let resp: serde_json::Value = self.client.get(&url).send().await?.json().await?;

        let f = |k: &str| resp.get(k).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok());

        Ok(FallbackQuote {
            last_price: f("lastPrice").ok_or_else(|| anyhow::anyhow!("missing lastPrice"))?,
            best_bid: f("bidPrice").unwrap_or(0.0),
            best_ask: f("askPrice").unwrap_or(0.0),
            quote_volume_24h: f("quoteVolume").unwrap_or(0.0),
            change_24h_abs: f("priceChange").unwrap_or(0.0),
            change_24h_pct: f("priceChangePercent").unwrap_or(0.0),
            high_24h: f("highPrice").unwrap_or(0.0),
            low_24h: f("lowPrice").unwrap_or(0.0),
        })
    }
}

pub struct HttpFallbackPoller<P: FallbackProvider> {
    provider: P,
    freshness: Arc<Freshness>,
    symbols: Vec<String>,
    interval: Duration,
    staleness: Duration,
}

impl<P: FallbackProvider> HttpFallbackPoller<P> {
    pub fn new(
        provider: P,
        freshness: Arc<Freshness>,
        symbols: Vec<String>,
        interval: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            provider,
            freshness,
            symbols,
            interval,
            staleness,
        }
    }

    /// Runs until `shutdown` fires. Self rate-limits with a short sleep
    /// between individual requests so a full symbol sweep never bursts the
    /// upstream API; a single symbol's failure never stops the poller.
    pub async fn run(&self, tx: mpsc::Sender<RawTick>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    for symbol in &self.symbols {
                        if *shutdown.borrow() {
                            return;
                        }
                        if !self.freshness.is_stale(symbol, self.staleness) {
                            continue;
                        }

                        match self.provider.fetch(symbol).await {
                            Ok(q) => {
                                let raw = RawTick {
                                    canonical_symbol: symbol.clone(),
                                    last_price: q.last_price,
                                    best_bid: q.best_bid,
                                    best_ask: q.best_ask,
                                    quote_volume_24h: q.quote_volume_24h,
                                    change_24h_abs: q.change_24h_abs,
                                    change_24h_pct: q.change_24h_pct,
                                    high_24h: q.high_24h,
                                    low_24h: q.low_24h,
                                    event_ts_ms: chrono::Utc::now().timestamp_millis(),
                                };
                                if tx.send(raw).await.is_err() {
                                    return;
                                }
                                debug!(symbol, "fallback poll succeeded");
                            }
                            Err(e) => {
                                warn!(symbol, error = %e, "fallback poll failed");
                            }
                        }

                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        }
    }
}
