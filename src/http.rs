//! HTTP surface (spec §6 "Exposed interfaces").
//!
//! Three read-only endpoints: a liveness probe, a server-sent-events feed
//! of the internal event bus, and a rollup of the pipeline's own counters.
//! Grounded on the teacher's `api/routes.rs` handler shape (plain async fns
//! taking `State<AppState>`, `Router::new().route(...).with_state(...)`) and
//! `main.rs`'s `CorsLayer::permissive()` + `TcpListener::bind` + `axum::serve`
//! server startup.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::events::EventBus;
use crate::indicators::cache::IndicatorCache;
use crate::ingestion::Aggregator;
use crate::orchestrator::SignalEngine;
use crate::persistence::PersistenceSink;
use crate::scheduler::TierManager;

#[derive(Clone)]
pub struct AppState {
    pub events: EventBus,
    pub aggregator: Arc<Aggregator>,
    pub cache: Arc<IndicatorCache>,
    pub tiers: Arc<TierManager>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub engine: Arc<SignalEngine>,
    pub started_at: Instant,
    pub monitored_symbols: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "http server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(SseEvent::default().data(json))),
                Err(_) => None,
            },
            // A lagging subscriber just misses events; the stream itself stays alive.
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
struct StatsResponse {
    uptime_secs: u64,
    monitored_symbols: usize,
    data_health: serde_json::Value,
    indicator_cache_hit_rate: f64,
    indicator_cache_entries: usize,
    signals_rejected: u64,
    signals_persisted: i64,
    tiers: TierDistribution,
}

#[derive(Serialize, Default)]
struct TierDistribution {
    calm: usize,
    alert: usize,
    opportunity: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache_stats = state.cache.stats();
    let signals_persisted = state.persistence.count_signals().await.unwrap_or(-1);

    let mut tiers = TierDistribution::default();
    for symbol in &state.monitored_symbols {
        match state.tiers.tier_of(symbol) {
            crate::models::Tier::Calm => tiers.calm += 1,
            crate::models::Tier::Alert => tiers.alert += 1,
            crate::models::Tier::Opportunity => tiers.opportunity += 1,
        }
    }

    Json(StatsResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        monitored_symbols: state.monitored_symbols.len(),
        data_health: state.aggregator.health_snapshot(),
        indicator_cache_hit_rate: cache_stats.hit_rate(),
        indicator_cache_entries: state.cache.len(),
        signals_rejected: state.engine.signals_rejected(),
        signals_persisted,
        tiers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok_status() {
        let cache = Arc::new(IndicatorCache::new());
        let state = AppState {
            events: EventBus::new(4),
            aggregator: crate::ingestion::Aggregator::new(
                Arc::new(crate::ingestion::Freshness::new()),
                std::time::Duration::from_millis(1000),
                4,
            ),
            cache: cache.clone(),
            tiers: Arc::new(TierManager::new(crate::config::TierConfig::default())),
            persistence: Arc::new(NullPersistence),
            engine: test_engine(cache),
            started_at: Instant::now(),
            monitored_symbols: vec!["bitcoin".to_string()],
        };
        let Json(response) = health(State(state)).await;
        assert_eq!(response.status, "ok");
    }

    struct NullPersistence;
    #[async_trait::async_trait]
    impl PersistenceSink for NullPersistence {
        async fn insert_signal(&self, _signal: &crate::models::Signal) -> crate::Result<()> {
            Ok(())
        }
        async fn insert_trigger(&self, _trigger: crate::persistence::TriggerRecord) {}
        async fn count_signals(&self) -> crate::Result<i64> {
            Ok(0)
        }
    }

    struct NullSentiment;
    #[async_trait::async_trait]
    impl crate::enrichment::SentimentSource for NullSentiment {
        async fn fetch(&self) -> anyhow::Result<u8> {
            Ok(50)
        }
    }

    struct NullHub;
    #[async_trait::async_trait]
    impl crate::enrichment::IntelligenceHub for NullHub {
        async fn fetch(&self, _symbol: &str) -> anyhow::Result<crate::enrichment::OnChainProxies> {
            Ok(crate::enrichment::OnChainProxies::default())
        }
    }

    fn test_engine(cache: Arc<IndicatorCache>) -> Arc<SignalEngine> {
        let config = crate::config::Config::default();
        let tiers = Arc::new(TierManager::new(config.tiers.clone()));
        let enrichment = Arc::new(crate::enrichment::EnrichmentService::new(
            cache,
            Arc::new(NullSentiment),
            Arc::new(NullHub),
        ));
        let candles = crate::market_data::CandleStore::new();
        let dispatcher = Arc::new(crate::strategies::StrategyDispatcher::new(vec![]));
        let reputation = Arc::new(crate::signals::ReputationTracker::new());
        let persistence: Arc<dyn PersistenceSink> = Arc::new(NullPersistence);
        let events = EventBus::new(4);
        SignalEngine::new(config, tiers, enrichment, candles, dispatcher, reputation, persistence, events)
    }
}
