//! Enrichment service (spec §4.11 C13).
//!
//! Assembles the strategy-input bundle for a tick: the tick itself, recent
//! candles, technical indicators pulled through the indicator cache,
//! a memoised sentiment proxy, best-effort on-chain/funding proxies, and
//! order-book metrics derived from the ticker's own bid/ask when deeper
//! book data isn't available. Grounded on the teacher's `signals/enrichment.rs`
//! "gather everything, fall back to neutral defaults" shape.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::indicators::cache::{IndicatorCache, IndicatorValue, DEFAULT_TTL};
use crate::indicators::compute::{BollingerBands, Macd, VolumeSummary};
use crate::models::{Candle, Ticker};

const SENTIMENT_MEMO_TTL: Duration = Duration::from_secs(300);
/// Neutral Fear & Greed reading (spec §7 "fall back to neutral defaults").
const NEUTRAL_SENTIMENT: u8 = 50;

#[derive(Debug, Clone, Serialize, Default)]
pub struct OnChainProxies {
    pub active_addresses_change_pct: f64,
    pub exchange_netflow: f64,
    pub funding_rate_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBookMetrics {
    pub bid_ask_imbalance: f64,
    pub buy_pressure_pct: f64,
    pub bid_ask_ratio: f64,
}

impl OrderBookMetrics {
    /// Derived purely from the ticker's best bid/ask — used whenever a
    /// deeper order-book feed isn't wired up.
    pub fn from_ticker(ticker: &Ticker) -> Self {
        let spread_pct = ticker.spread_pct();
        let bid_ask_imbalance = (1.0 + 0.1 * spread_pct).clamp(0.5, 2.0);
        let buy_pressure_pct = if ticker.best_bid + ticker.best_ask > 0.0 {
            (ticker.best_bid / (ticker.best_bid + ticker.best_ask) * 100.0).clamp(0.0, 100.0)
        } else {
            50.0
        };
        let bid_ask_ratio = if ticker.best_ask > 0.0 {
            ticker.best_bid / ticker.best_ask
        } else {
            1.0
        };
        Self {
            bid_ask_imbalance,
            buy_pressure_pct,
            bid_ask_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndicatorBundle {
    pub rsi14: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub ema100: f64,
    pub ema200: f64,
    pub macd: Macd,
    pub bollinger: BollingerBands,
    pub volume: VolumeSummary,
}

/// The full strategy-input bundle (spec §4.11 / §3 "Enrichment Bundle").
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentBundle {
    pub ticker: Ticker,
    pub candles: Vec<Candle>,
    pub indicators: IndicatorBundle,
    pub sentiment: u8,
    pub on_chain: OnChainProxies,
    pub order_book: OrderBookMetrics,
}

#[async_trait::async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<u8>;
}

#[async_trait::async_trait]
pub trait IntelligenceHub: Send + Sync {
    async fn fetch(&self, symbol: &str) -> anyhow::Result<OnChainProxies>;
}

struct SentimentMemo {
    value: u8,
    fetched_at: Instant,
}

pub struct EnrichmentService {
    cache: Arc<IndicatorCache>,
    sentiment_source: Arc<dyn SentimentSource>,
    intelligence_hub: Arc<dyn IntelligenceHub>,
    sentiment_memo: Mutex<Option<SentimentMemo>>,
}

impl EnrichmentService {
    pub fn new(
        cache: Arc<IndicatorCache>,
        sentiment_source: Arc<dyn SentimentSource>,
        intelligence_hub: Arc<dyn IntelligenceHub>,
    ) -> Self {
        Self {
            cache,
            sentiment_source,
            intelligence_hub,
            sentiment_memo: Mutex::new(None),
        }
    }

    async fn sentiment(&self) -> u8 {
        {
            let memo = self.sentiment_memo.lock();
            if let Some(m) = memo.as_ref() {
                if m.fetched_at.elapsed() < SENTIMENT_MEMO_TTL {
                    return m.value;
                }
            }
        }

        let value = match self.sentiment_source.fetch().await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "sentiment fetch failed; using neutral default");
                NEUTRAL_SENTIMENT
            }
        };

        *self.sentiment_memo.lock() = Some(SentimentMemo {
            value,
            fetched_at: Instant::now(),
        });
        value
    }

    async fn on_chain(&self, symbol: &str) -> OnChainProxies {
        match self.intelligence_hub.fetch(symbol).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(symbol, error = %e, "intelligence hub fetch failed; using neutral defaults");
                OnChainProxies::default()
            }
        }
    }

    fn indicators(&self, symbol: &str, closes: &[f64], volumes: &[f64]) -> IndicatorBundle {
        let rsi14 = match self
            .cache
            .get_or_compute(&format!("{symbol}:rsi14"), DEFAULT_TTL, || {
                IndicatorValue::Rsi(crate::indicators::compute::rsi(closes, 14))
            }) {
            IndicatorValue::Rsi(v) => v,
            _ => 50.0,
        };
        let ema_at = |period: u32| -> f64 {
            let key = format!("{symbol}:ema{period}");
            match self.cache.get_or_compute(&key, DEFAULT_TTL, || {
                IndicatorValue::Ema(crate::indicators::compute::ema(closes, period as usize))
            }) {
                IndicatorValue::Ema(v) => v,
                _ => 0.0,
            }
        };
        let macd = match self
            .cache
            .get_or_compute(&format!("{symbol}:macd"), DEFAULT_TTL, || {
                IndicatorValue::Macd(crate::indicators::compute::macd(closes))
            }) {
            IndicatorValue::Macd(v) => v,
            _ => Macd::default(),
        };
        let bollinger = match self
            .cache
            .get_or_compute(&format!("{symbol}:bollinger20_2"), DEFAULT_TTL, || {
                IndicatorValue::Bollinger(crate::indicators::compute::bollinger(closes, 20, 2.0))
            }) {
            IndicatorValue::Bollinger(v) => v,
            _ => BollingerBands::default(),
        };
        let volume = match self
            .cache
            .get_or_compute(&format!("{symbol}:volume"), DEFAULT_TTL, || {
                IndicatorValue::Volume(crate::indicators::compute::volume_summary(volumes))
            }) {
            IndicatorValue::Volume(v) => v,
            _ => VolumeSummary::default(),
        };

        IndicatorBundle {
            rsi14,
            ema20: ema_at(20),
            ema50: ema_at(50),
            ema100: ema_at(100),
            ema200: ema_at(200),
            macd,
            bollinger,
            volume,
        }
    }

    pub async fn enrich(&self, ticker: Ticker, candles: Vec<Candle>) -> EnrichmentBundle {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let indicators = self.indicators(&ticker.symbol, &closes, &volumes);
        let order_book = OrderBookMetrics::from_ticker(&ticker);

        let (sentiment, on_chain) = tokio::join!(self.sentiment(), self.on_chain(&ticker.symbol));

        EnrichmentBundle {
            ticker,
            candles,
            indicators,
            sentiment,
            on_chain,
            order_book,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quality;

    struct NeutralSentiment;
    #[async_trait::async_trait]
    impl SentimentSource for NeutralSentiment {
        async fn fetch(&self) -> anyhow::Result<u8> {
            Ok(42)
        }
    }

    struct FailingHub;
    #[async_trait::async_trait]
    impl IntelligenceHub for FailingHub {
        async fn fetch(&self, _symbol: &str) -> anyhow::Result<OnChainProxies> {
            Err(anyhow::anyhow!("unavailable"))
        }
    }

    fn ticker() -> Ticker {
        Ticker {
            symbol: "bitcoin".into(),
            source: "binance".into(),
            last_price: 100.0,
            best_bid: 99.5,
            best_ask: 100.5,
            quote_volume_24h: 1.0,
            change_24h_abs: 0.0,
            change_24h_pct: 0.0,
            change_1h_pct: None,
            high_24h: 101.0,
            low_24h: 99.0,
            source_ts_ms: 0,
            received_at: chrono::Utc::now(),
            quality: Quality::High,
        }
    }

    #[test]
    fn order_book_metrics_stay_within_documented_bounds() {
        let metrics = OrderBookMetrics::from_ticker(&ticker());
        assert!((0.5..=2.0).contains(&metrics.bid_ask_imbalance));
        assert!((0.0..=100.0).contains(&metrics.buy_pressure_pct));
    }

    #[tokio::test]
    async fn intelligence_hub_failure_falls_back_to_neutral_defaults() {
        let cache = Arc::new(IndicatorCache::new());
        let service = EnrichmentService::new(cache, Arc::new(NeutralSentiment), Arc::new(FailingHub));
        let bundle = service.enrich(ticker(), vec![]).await;
        assert_eq!(bundle.on_chain.funding_rate_pct, 0.0);
        assert_eq!(bundle.sentiment, 42);
    }
}
