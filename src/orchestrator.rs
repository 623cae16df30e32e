//! Signal engine orchestrator (spec §4.12 C16).
//!
//! Wires the whole pipeline together and runs the exact 11-step sequence
//! per accepted tick. Grounded on the teacher's `main.rs` composition-root
//! shape (one struct owning every subsystem, a single entry point per
//! tick) though every subsystem here is specific to this pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::enrichment::EnrichmentService;
use crate::events::{Event, EventBus};
use crate::market_data::CandleStore;
use crate::models::{Priority, Severity, Signal, Ticker};
use crate::persistence::{derive_expiry, derive_risk_level, PersistenceSink, TriggerRecord};
use crate::scheduler::{
    MicroAnomalyDetector, SignificanceFilter, TierManager, TriggerMagnitudes, VolatilityCategory,
    VolatilityRegimeTracker,
};
use crate::signals::reputation::{OpenPosition, ReputationTracker};
use crate::signals::selector::SignalSelector;
use crate::strategies::StrategyDispatcher;

struct PreviousTick {
    ticker: Ticker,
}

struct SymbolState {
    previous: Option<PreviousTick>,
    last_trigger_at: Option<Instant>,
    last_signal_bucket: Option<i64>,
}

impl Default for SymbolState {
    fn default() -> Self {
        Self {
            previous: None,
            last_trigger_at: None,
            last_signal_bucket: None,
        }
    }
}

pub struct SignalEngine {
    config: Config,
    anomaly: MicroAnomalyDetector,
    regime: VolatilityRegimeTracker,
    tiers: Arc<TierManager>,
    enrichment: Arc<EnrichmentService>,
    candles: Arc<CandleStore>,
    dispatcher: Arc<StrategyDispatcher>,
    reputation: Arc<ReputationTracker>,
    persistence: Arc<dyn PersistenceSink>,
    events: EventBus,
    symbols: parking_lot::Mutex<HashMap<String, SymbolState>>,
    signals_rejected: std::sync::atomic::AtomicU64,
    last_noise_log: parking_lot::Mutex<HashMap<String, Instant>>,
}

impl SignalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        tiers: Arc<TierManager>,
        enrichment: Arc<EnrichmentService>,
        candles: Arc<CandleStore>,
        dispatcher: Arc<StrategyDispatcher>,
        reputation: Arc<ReputationTracker>,
        persistence: Arc<dyn PersistenceSink>,
        events: EventBus,
    ) -> Arc<Self> {
        let regime = VolatilityRegimeTracker::new(config.thresholds.clone());
        Arc::new(Self {
            config,
            anomaly: MicroAnomalyDetector::new(),
            regime,
            tiers,
            enrichment,
            candles,
            dispatcher,
            reputation,
            persistence,
            events,
            symbols: parking_lot::Mutex::new(HashMap::new()),
            signals_rejected: std::sync::atomic::AtomicU64::new(0),
            last_noise_log: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn signals_rejected(&self) -> u64 {
        self.signals_rejected.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Runs until the aggregator's channel closes (the aggregator closing
    /// is itself driven by the process `stop()` lifecycle).
    pub async fn run(self: Arc<Self>, mut ticks: broadcast::Receiver<Ticker>) {
        loop {
            match ticks.recv().await {
                Ok(ticker) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.on_tick(ticker).await;
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "orchestrator lagged behind aggregator output");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// The 11-step per-tick pipeline (spec §4.12). Step 1 (normalizer) has
    /// already run in the aggregator by the time a `Ticker` reaches here.
    async fn on_tick(self: Arc<Self>, ticker: Ticker) {
        let symbol = ticker.symbol.clone();

        // Step 2: micro-anomaly detector against the previous tick.
        let anomaly = self.anomaly.check(&ticker);

        // Step 3: push diff into the volatility tracker.
        let (regime, thresholds, transition) = self.regime.push(&symbol, ticker.last_price);
        if let Some((from, to)) = transition {
            self.events.emit(Event::RegimeChange {
                symbol: symbol.clone(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
                volatility: self.regime.volatility_for(&symbol),
                thresholds: thresholds.clone(),
            });
        }

        // Step 4: promote tier on severity >= MEDIUM and force evaluation;
        // otherwise defer to shouldCheck's cadence gate.
        let forced = anomaly.severity >= Severity::Medium;
        if let Some((from, to)) = self.tiers.record_anomaly(&symbol, anomaly.severity) {
            self.events.emit(Event::TierUpgrade {
                symbol: symbol.clone(),
                from_tier: from,
                to_tier: to,
                reason: format!("anomaly severity {:?}", anomaly.severity),
            });
        }

        let should_run = if forced {
            true
        } else {
            let (due, demotion) = self.tiers.should_check(&symbol);
            if let Some((from, to)) = demotion {
                self.events.emit(Event::TierDowngrade {
                    symbol: symbol.clone(),
                    from_tier: from,
                    to_tier: to,
                    reason: "idle timeout".to_string(),
                });
            }
            due
        };

        let previous = {
            let mut state = self.symbols.lock();
            let entry = state.entry(symbol.clone()).or_default();
            let previous = entry.previous.take();
            entry.previous = Some(PreviousTick { ticker: ticker.clone() });
            previous
        };

        if !should_run {
            return;
        }

        let Some(previous) = previous else {
            return;
        };

        // Step 5: trigger predicates against dynamic thresholds.
        let Some((magnitudes, reason, priority)) =
            self.trigger_predicates(&ticker, &previous.ticker, &thresholds)
        else {
            return;
        };

        // Step 6: significance filter.
        let category = VolatilityCategory::classify(&symbol);
        let verdict = SignificanceFilter::evaluate(category, magnitudes);
        if verdict.severity == crate::scheduler::significance::DimensionVerdict::Noise {
            self.log_noise_throttled(&symbol);
            return;
        }

        self.events.emit(Event::TriggerDetected {
            symbol: symbol.clone(),
            reason: reason.clone(),
            priority: format!("{priority:?}").to_uppercase(),
            price: ticker.last_price,
        });

        // Step 7: cooldown.
        {
            let mut state = self.symbols.lock();
            let entry = state.entry(symbol.clone()).or_default();
            if let Some(last) = entry.last_trigger_at {
                if last.elapsed() < self.config.cooldown {
                    debug!(symbol, "trigger dropped: within cooldown");
                    return;
                }
            }
            entry.last_trigger_at = Some(Instant::now());
        }

        // Step 8: enrich and fan out to strategies.
        let candles = self.candles.recent(&symbol);
        let bundle = Arc::new(self.enrichment.enrich(ticker.clone(), candles).await);
        let verdicts = self.dispatcher.run_all(bundle.clone()).await;

        let signal_candidates: Vec<_> = verdicts.iter().filter_map(|v| v.as_signal().cloned()).collect();
        let rejected_by_strategy: Vec<_> = verdicts
            .iter()
            .filter_map(|v| match v {
                crate::models::Verdict::Rejected { strategy, reason } => {
                    Some((strategy.clone(), reason.clone()))
                }
                _ => None,
            })
            .collect();

        self.persistence
            .insert_trigger(TriggerRecord {
                symbol: symbol.clone(),
                strategy: None,
                reason: reason.clone(),
                priority: format!("{priority:?}").to_uppercase(),
                market_price: ticker.last_price,
                change_1h_pct: ticker.change_1h_pct,
                volume_24h: ticker.quote_volume_24h,
                signal_generated: false,
                rejected: signal_candidates.is_empty(),
                rejection_reason: rejected_by_strategy.first().map(|(_, r)| r.clone()),
                reasoning: None,
                indicator_snapshot: Some(serde_json::json!({
                    "rsi14": bundle.indicators.rsi14,
                    "macd_histogram": bundle.indicators.macd.histogram,
                })),
            })
            .await;

        // Step 9: signal selector.
        let market_condition = Some(regime_to_condition(regime));
        let selection = SignalSelector::select(&symbol, signal_candidates, &self.reputation, market_condition);

        let Some(winner) = selection.winner else {
            self.signals_rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        };

        // Step 10: symbol-level 2h dedup bucket.
        let bucket = chrono::Utc::now().timestamp() / self.config.signal_dedup_window.as_secs().max(1) as i64;
        {
            let mut state = self.symbols.lock();
            let entry = state.entry(symbol.clone()).or_default();
            if entry.last_signal_bucket == Some(bucket) {
                debug!(symbol, "signal dropped: already emitted in this dedup bucket");
                return;
            }
            entry.last_signal_bucket = Some(bucket);
        }

        // Step 11: hand off to persistence, reputation, and the event bus.
        let candidate = winner.candidate;
        let created_at = chrono::Utc::now();
        let timeframe = format!("{}:{}", candidate.strategy, candidate.timeframe);
        let risk_level = derive_risk_level(candidate.stop_loss, ticker.last_price);
        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.clone(),
            direction: candidate.direction,
            timeframe: timeframe.clone(),
            entry_min: candidate.entry_min,
            entry_max: candidate.entry_max,
            current_price: ticker.last_price,
            stop_loss: candidate.stop_loss,
            target1: candidate.targets[0],
            target2: candidate.targets[1],
            target3: candidate.targets[2],
            confidence: winner.quality_score.round().clamp(0.0, 100.0) as u8,
            strength: candidate.strength,
            risk_level,
            status: "ACTIVE".to_string(),
            expires_at: derive_expiry(&candidate.timeframe, created_at),
            created_at,
            selection_reason: winner.selection_reason,
        };

        if let Err(e) = self.persistence.insert_signal(&signal).await {
            warn!(symbol, error = %e, "signal persisted as event only; sink write failed");
        }

        self.reputation.record_emission(OpenPosition {
            signal_id: signal.id.clone(),
            strategy: candidate.strategy,
            symbol: symbol.clone(),
            direction: signal.direction,
            entry: signal.entry_min,
            market_condition: market_condition.unwrap_or("unknown").to_string(),
            recorded_at: created_at,
        });

        info!(symbol, id = %signal.id, direction = ?signal.direction, "signal generated");
        self.events.emit(Event::SignalGenerated {
            signal: Box::new(signal),
        });
    }

    fn trigger_predicates(
        &self,
        current: &Ticker,
        previous: &Ticker,
        thresholds: &crate::scheduler::regime::Thresholds,
    ) -> Option<(TriggerMagnitudes, String, Priority)> {
        let dt = (current.source_ts_ms - previous.source_ts_ms) as f64 / 1000.0;
        if dt <= 0.0 {
            return None;
        }

        let price_change_pct = (current.last_price - previous.last_price).abs() / previous.last_price * 100.0;
        let velocity = price_change_pct / dt;
        let spread_widening_ratio = if previous.spread_pct() > 0.0 {
            current.spread_pct() / previous.spread_pct()
        } else {
            1.0
        };
        let volume_ratio = if previous.quote_volume_24h > 0.0 {
            current.quote_volume_24h / previous.quote_volume_24h
        } else {
            1.0
        };

        let mut reasons = Vec::new();
        if price_change_pct > thresholds.price_change_pct {
            reasons.push(format!("price change {price_change_pct:.3}% > {:.3}%", thresholds.price_change_pct));
        }
        if velocity > thresholds.velocity_pct_per_sec {
            reasons.push(format!("velocity {velocity:.3}%/s > {:.3}%/s", thresholds.velocity_pct_per_sec));
        }
        if spread_widening_ratio > thresholds.spread_widening_ratio {
            reasons.push(format!("spread widening {spread_widening_ratio:.2}x"));
        }
        if volume_ratio > thresholds.volume_surge_ratio {
            reasons.push(format!("volume surge {volume_ratio:.2}x"));
        }

        if reasons.is_empty() {
            return None;
        }

        let priority = if price_change_pct > thresholds.price_change_pct * 2.0 || velocity > thresholds.velocity_pct_per_sec * 2.0 {
            Priority::High
        } else {
            Priority::Medium
        };

        let magnitudes = TriggerMagnitudes {
            price_change_pct,
            velocity_pct_per_sec: velocity,
            volume_spike_ratio: volume_ratio,
            spread_widening_ratio,
            bid_ask_ratio_deviation: (current.spread_pct() - previous.spread_pct()).abs(),
        };

        Some((magnitudes, reasons.join("; "), priority))
    }

    fn log_noise_throttled(&self, symbol: &str) {
        let mut log = self.last_noise_log.lock();
        let now = Instant::now();
        let should_log = match log.get(symbol) {
            Some(last) => now.duration_since(*last) > Duration::from_secs(300),
            None => true,
        };
        if should_log {
            debug!(symbol, "trigger dropped: significance filter returned NOISE");
            log.insert(symbol.to_string(), now);
        }
    }
}

fn regime_to_condition(regime: crate::scheduler::regime::Regime) -> &'static str {
    use crate::scheduler::regime::Regime;
    match regime {
        Regime::Calm | Regime::Normal => "ranging",
        Regime::Volatile => "trending",
        Regime::Extreme => "volatile",
    }
}
