//! marketpulse composition root (spec §5 "process lifecycle", §6
//! "external interfaces").
//!
//! Builds every subsystem once, wires the tick/event plumbing between them,
//! spawns the long-lived tasks (stream sources, HTTP fallback, health beat,
//! pre-computation, the signal engine), and serves the HTTP surface on the
//! main task. Grounded on the teacher's `main.rs`: one flat `async fn main`
//! that constructs shared state, `tokio::spawn`s every background worker,
//! and blocks on the HTTP server last.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use marketpulse::config::Config;
use marketpulse::enrichment::{EnrichmentService, IntelligenceHub, OnChainProxies, SentimentSource};
use marketpulse::events::EventBus;
use marketpulse::http::AppState;
use marketpulse::indicators::{IndicatorCache, PrecomputePipeline};
use marketpulse::ingestion::stream_source::ExchangeAdapter;
use marketpulse::ingestion::{
    Aggregator, BinanceAdapter, BinanceRestProvider, CoinbaseAdapter, Freshness,
    HttpFallbackPoller, RawTick, SourceStatus, StreamSource, WsStreamSource,
};
use marketpulse::market_data::CandleStore;
use marketpulse::orchestrator::SignalEngine;
use marketpulse::persistence::{PersistenceSink, SqlitePersistence};
use marketpulse::scheduler::TierManager;
use marketpulse::signals::ReputationTracker;
use marketpulse::strategies::trend_momentum::TrendMomentumStrategy;
use marketpulse::strategies::StrategyDispatcher;
use marketpulse::symbol_map::SymbolMap;

/// Neutral Fear & Greed proxy. Real sentiment feeds are an external
/// concern this pipeline only consumes through the `SentimentSource` seam;
/// wiring an actual vendor in is a deployment decision, not a pipeline one.
struct NeutralSentiment;

#[async_trait::async_trait]
impl SentimentSource for NeutralSentiment {
    async fn fetch(&self) -> Result<u8> {
        Ok(50)
    }
}

/// Neutral on-chain/funding proxy, same rationale as `NeutralSentiment`.
struct NeutralIntelligenceHub;

#[async_trait::async_trait]
impl IntelligenceHub for NeutralIntelligenceHub {
    async fn fetch(&self, _symbol: &str) -> Result<OnChainProxies> {
        Ok(OnChainProxies::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("marketpulse starting");

    let config = Config::from_env();
    let symbol_map = Arc::new(
        SymbolMap::from_monitored(&config.monitored_symbols)
            .context("failed to build symbol map from configured symbols")?,
    );

    let events = EventBus::new(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let freshness = Arc::new(Freshness::new());
    let aggregator = Aggregator::new(
        freshness.clone(),
        config.aggregator_dedup_window,
        config.pending_tick_queue_bound.max(64),
    );

    let candles = CandleStore::new();
    let tiers = Arc::new(TierManager::new(config.tiers.clone()));
    let cache = Arc::new(IndicatorCache::new());
    let enrichment = Arc::new(EnrichmentService::new(
        cache.clone(),
        Arc::new(NeutralSentiment),
        Arc::new(NeutralIntelligenceHub),
    ));
    let dispatcher = Arc::new(StrategyDispatcher::new(vec![Arc::new(TrendMomentumStrategy)]));
    let reputation = Arc::new(ReputationTracker::new());

    let persistence: Arc<dyn PersistenceSink> = Arc::new(
        SqlitePersistence::open(&config.database_path)
            .context("failed to open persistence sink")?,
    );
    info!(path = %config.database_path, "persistence sink ready");

    let engine = SignalEngine::new(
        config.clone(),
        tiers.clone(),
        enrichment,
        candles.clone(),
        dispatcher,
        reputation,
        persistence.clone(),
        events.clone(),
    );

    // Streaming sources: one reconnecting task per exchange, fanning raw
    // ticks into the aggregator. Symbols with no mapping on a given
    // exchange are simply absent from that exchange's subscribe list.
    let binance_symbols: Vec<String> = symbol_map
        .canonical_ids()
        .filter_map(|id| symbol_map.exchange_symbols(id).and_then(|e| e.binance.clone()))
        .collect();
    let coinbase_symbols: Vec<String> = symbol_map
        .canonical_ids()
        .filter_map(|id| symbol_map.exchange_symbols(id).and_then(|e| e.coinbase.clone()))
        .collect();

    spawn_stream_source(
        WsStreamSource::new(BinanceAdapter, symbol_map.clone(), config.reconnect.clone()),
        "binance",
        binance_symbols,
        aggregator.clone(),
        shutdown_rx.clone(),
    );
    spawn_stream_source(
        WsStreamSource::new(CoinbaseAdapter, symbol_map.clone(), config.reconnect.clone()),
        "coinbase",
        coinbase_symbols,
        aggregator.clone(),
        shutdown_rx.clone(),
    );

    // HTTP fallback: covers every monitored symbol, but the poller itself
    // skips anything that isn't currently stale (spec §4.3). It feeds the
    // same aggregator as the streams, under its own source name.
    let (fallback_tx, fallback_rx) = tokio::sync::mpsc::channel::<RawTick>(64);
    tokio::spawn(aggregator.clone().consume("http_fallback", fallback_rx));

    let fallback_provider = BinanceRestProvider::new(symbol_map.clone());
    let fallback_poller = HttpFallbackPoller::new(
        fallback_provider,
        freshness,
        config.monitored_symbols.clone(),
        config.http_fallback_interval,
        config.http_fallback_staleness,
    );
    {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            fallback_poller.run(fallback_tx, shutdown_rx).await;
        });
    }

    tokio::spawn(aggregator.clone().run_health_beat(
        events.clone(),
        config.health_beat_interval,
        shutdown_rx.clone(),
    ));

    let pipeline = PrecomputePipeline::new(cache.clone(), tiers.clone());
    tokio::spawn(pipeline.run(candles.clone(), shutdown_rx.clone()));

    tokio::spawn(engine.clone().run(aggregator.subscribe()));

    let app_state = AppState {
        events,
        aggregator,
        cache,
        tiers,
        persistence,
        engine,
        started_at: Instant::now(),
        monitored_symbols: config.monitored_symbols.clone(),
    };

    let port = config.http_port;
    tokio::select! {
        res = marketpulse::http::serve(app_state, port) => {
            if let Err(e) = res {
                warn!(error = %e, "http server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    info!("marketpulse stopped");
    Ok(())
}

fn spawn_stream_source<A>(
    source: WsStreamSource<A>,
    name: &'static str,
    symbols: Vec<String>,
    aggregator: Arc<Aggregator>,
    shutdown_rx: watch::Receiver<bool>,
) where
    A: ExchangeAdapter,
{
    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let (status_tx, mut status_rx) = watch::channel(SourceStatus::Connecting);

    aggregator.mark_status(name, SourceStatus::Connecting);
    tokio::spawn(aggregator.clone().consume(name, rx));

    {
        let aggregator = aggregator.clone();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                aggregator.mark_status(name, *status_rx.borrow());
            }
        });
    }

    tokio::spawn(async move {
        source.run(symbols, tx, status_tx, shutdown_rx).await;
    });
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketpulse=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
