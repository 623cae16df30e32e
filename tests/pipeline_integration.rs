//! End-to-end smoke test: a raw tick stream through the aggregator-facing
//! `SignalEngine` entry point produces a persisted signal and a
//! `SignalGenerated` event, mirroring the teacher's
//! `tests/backtest_run_integration.rs` placement (crate-level `tests/`,
//! exercising the public API against a real SQLite sink rather than a
//! CLI binary).

use std::sync::Arc;
use std::time::Duration;

use marketpulse::config::Config;
use marketpulse::enrichment::{EnrichmentBundle, EnrichmentService, IntelligenceHub, OnChainProxies, SentimentSource};
use marketpulse::events::{Event, EventBus};
use marketpulse::indicators::IndicatorCache;
use marketpulse::market_data::CandleStore;
use marketpulse::models::{Direction, Quality, SignalCandidate, Strength, Ticker, Verdict};
use marketpulse::orchestrator::SignalEngine;
use marketpulse::persistence::{PersistenceSink, SqlitePersistence};
use marketpulse::scheduler::TierManager;
use marketpulse::signals::ReputationTracker;
use marketpulse::strategies::{Strategy, StrategyDispatcher};

struct NeutralSentiment;
#[async_trait::async_trait]
impl SentimentSource for NeutralSentiment {
    async fn fetch(&self) -> anyhow::Result<u8> {
        Ok(50)
    }
}

struct NeutralHub;
#[async_trait::async_trait]
impl IntelligenceHub for NeutralHub {
    async fn fetch(&self, _symbol: &str) -> anyhow::Result<OnChainProxies> {
        Ok(OnChainProxies::default())
    }
}

/// Deterministic strategy stub standing in for a real one. `trend_momentum`
/// is exercised against controlled bundles in its own unit tests; this test
/// is about the orchestrator's wiring, not a real strategy's math.
struct AlwaysLong;
#[async_trait::async_trait]
impl Strategy for AlwaysLong {
    fn name(&self) -> &'static str {
        "always_long"
    }

    async fn evaluate(&self, input: &EnrichmentBundle) -> Verdict {
        let price = input.ticker.last_price;
        Verdict::Signal(SignalCandidate {
            strategy: self.name().to_string(),
            direction: Direction::Long,
            confidence: 82.0,
            strength: Strength::Strong,
            entry_min: price * 0.999,
            entry_max: price * 1.001,
            stop_loss: price * 0.97,
            targets: [price * 1.02, price * 1.04, price * 1.06],
            risk_reward: 2.0,
            timeframe: "4h".to_string(),
            reasoning: "deterministic test signal".to_string(),
            indicators: serde_json::json!({}),
        })
    }
}

fn ticker(price: f64, ts_ms: i64) -> Ticker {
    Ticker {
        symbol: "bitcoin".to_string(),
        source: "binance".to_string(),
        last_price: price,
        best_bid: price - 0.5,
        best_ask: price + 0.5,
        quote_volume_24h: 1_000_000.0,
        change_24h_abs: 0.0,
        change_24h_pct: 0.0,
        change_1h_pct: None,
        high_24h: price + 10.0,
        low_24h: price - 10.0,
        source_ts_ms: ts_ms,
        received_at: chrono::Utc::now(),
        quality: Quality::High,
    }
}

#[tokio::test]
async fn large_price_jump_yields_persisted_signal_and_event() {
    let db_file = tempfile::NamedTempFile::new().expect("tempfile");
    let db_path = db_file.path().to_str().unwrap().to_string();

    let config = Config::default();
    let tiers = Arc::new(TierManager::new(config.tiers.clone()));
    let cache = Arc::new(IndicatorCache::new());
    let enrichment = Arc::new(EnrichmentService::new(
        cache,
        Arc::new(NeutralSentiment),
        Arc::new(NeutralHub),
    ));
    let candles = CandleStore::new();
    let dispatcher = Arc::new(StrategyDispatcher::new(vec![Arc::new(AlwaysLong)]));
    let reputation = Arc::new(ReputationTracker::new());
    let persistence: Arc<dyn PersistenceSink> =
        Arc::new(SqlitePersistence::open(&db_path).expect("open sqlite sink"));
    let events = EventBus::new(16);

    let engine = SignalEngine::new(
        config,
        tiers,
        enrichment,
        candles,
        dispatcher,
        reputation,
        persistence.clone(),
        events.clone(),
    );

    let mut event_rx = events.subscribe();
    let (tick_tx, tick_rx) = tokio::sync::broadcast::channel(16);
    tokio::spawn(engine.run(tick_rx));

    tick_tx.send(ticker(50_000.0, 1_700_000_000_000)).unwrap();
    // A >2% jump one second later trips the micro-anomaly detector
    // (critical) and the significance filter on the same tick.
    tick_tx.send(ticker(52_500.0, 1_700_000_001_000)).unwrap();

    let mut saw_signal = false;
    for _ in 0..20 {
        match tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await {
            Ok(Ok(Event::SignalGenerated { signal })) => {
                assert_eq!(signal.symbol, "bitcoin");
                assert_eq!(signal.direction, Direction::Long);
                saw_signal = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }

    assert!(saw_signal, "expected a SignalGenerated event for the price jump");
    assert_eq!(persistence.count_signals().await.unwrap(), 1);
}
