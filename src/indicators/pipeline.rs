//! Pre-computation pipeline (spec §4.10 C12).
//!
//! Tracks a bounded set of "hot" symbols ranked by a priority that decays
//! between cycles and is boosted by the symbol's current scan tier, and
//! warms the indicator cache for them in cooperative batches. Grounded on
//! the teacher's `main.rs` batched-task spawning convention (chunk, spawn,
//! cooperative yield) applied to indicator warmup instead of scraping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::indicators::cache::{IndicatorCache, DEFAULT_TTL};
use crate::models::Tier;
use crate::scheduler::TierManager;

const HOT_CAP: usize = 20;
const PRUNE_CAP_MULTIPLIER: f64 = 1.5;
const BATCH_SIZE: usize = 5;
const BATCH_YIELD: Duration = Duration::from_millis(100);
const DECAY: f64 = 0.9;
const MIN_CANDLES: usize = 50;
const MANUAL_PRIORITY: f64 = 90.0;

fn tier_boost(tier: Tier) -> f64 {
    match tier {
        Tier::Opportunity => 50.0,
        Tier::Alert => 25.0,
        Tier::Calm => 0.0,
    }
}

pub trait CandleSource: Send + Sync {
    /// Returns (closes, volumes) for the symbol's recent candle history.
    fn recent(&self, symbol: &str) -> Option<(Vec<f64>, Vec<f64>)>;
}

pub struct PrecomputePipeline {
    cache: Arc<IndicatorCache>,
    tiers: Arc<TierManager>,
    base_score: Mutex<HashMap<String, f64>>,
    hot_cap: usize,
}

impl PrecomputePipeline {
    pub fn new(cache: Arc<IndicatorCache>, tiers: Arc<TierManager>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            tiers,
            base_score: Mutex::new(HashMap::new()),
            hot_cap: HOT_CAP,
        })
    }

    /// Registers (or refreshes) interest in a symbol, e.g. on every
    /// accepted tick. Raises the base score so frequently-ticking symbols
    /// stay hot even without a tier promotion.
    pub fn touch(&self, symbol: &str) {
        let mut scores = self.base_score.lock();
        *scores.entry(symbol.to_string()).or_insert(0.0) += 1.0;
    }

    /// Promotes `symbol` to the manual priority and pre-computes
    /// immediately, bypassing the cycle cadence.
    pub fn compute_now(&self, symbol: &str, source: &dyn CandleSource) {
        self.base_score
            .lock()
            .insert(symbol.to_string(), MANUAL_PRIORITY);
        self.warm_one(symbol, source);
    }

    fn priorities(&self) -> Vec<(String, f64)> {
        let scores = self.base_score.lock();
        scores
            .iter()
            .map(|(symbol, base)| (symbol.clone(), base + tier_boost(self.tiers.tier_of(symbol))))
            .collect()
    }

    fn warm_one(&self, symbol: &str, source: &dyn CandleSource) {
        match source.recent(symbol) {
            Some((closes, volumes)) if closes.len() >= MIN_CANDLES => {
                self.cache.pre_compute(symbol, &closes, &volumes, DEFAULT_TTL);
            }
            _ => debug!(symbol, "skipped pre-compute: fewer than 50 candles"),
        }
    }

    /// One refresh + batch cycle: decays base scores, ranks by priority,
    /// keeps the top `hot_cap`, and warms them in cooperative batches of 5
    /// with a 100ms yield between batches.
    async fn run_cycle(&self, source: &dyn CandleSource) {
        {
            let mut scores = self.base_score.lock();
            for v in scores.values_mut() {
                *v *= DECAY;
            }
        }

        let mut ranked = self.priorities();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let hot: Vec<String> = ranked.into_iter().take(self.hot_cap).map(|(s, _)| s).collect();

        for batch in hot.chunks(BATCH_SIZE) {
            for symbol in batch {
                self.warm_one(symbol, source);
            }
            tokio::time::sleep(BATCH_YIELD).await;
        }

        self.prune();
    }

    /// Keeps at most `1.5 * hot_cap` tracked symbols, dropping the lowest
    /// priorities.
    fn prune(&self) {
        let cap = (self.hot_cap as f64 * PRUNE_CAP_MULTIPLIER) as usize;
        let mut scores = self.base_score.lock();
        if scores.len() <= cap {
            return;
        }
        let mut ranked: Vec<(String, f64)> = scores
            .iter()
            .map(|(s, base)| (s.clone(), base + tier_boost(self.tiers.tier_of(s))))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let keep: std::collections::HashSet<String> =
            ranked.into_iter().take(cap).map(|(s, _)| s).collect();
        scores.retain(|s, _| keep.contains(s));
    }

    pub async fn run(self: Arc<Self>, source: Arc<dyn CandleSource>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle(source.as_ref()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;

    struct FixedSource;
    impl CandleSource for FixedSource {
        fn recent(&self, _symbol: &str) -> Option<(Vec<f64>, Vec<f64>)> {
            let closes: Vec<f64> = (1..=60).map(|i| i as f64).collect();
            let volumes = vec![1.0; 60];
            Some((closes, volumes))
        }
    }

    struct ThinSource;
    impl CandleSource for ThinSource {
        fn recent(&self, _symbol: &str) -> Option<(Vec<f64>, Vec<f64>)> {
            Some((vec![1.0, 2.0], vec![1.0, 2.0]))
        }
    }

    #[test]
    fn compute_now_sets_manual_priority_and_warms() {
        let cache = Arc::new(IndicatorCache::new());
        let tiers = Arc::new(TierManager::new(TierConfig::default()));
        let pipeline = PrecomputePipeline::new(cache.clone(), tiers);
        pipeline.compute_now("bitcoin", &FixedSource);
        assert!(cache.len() > 0);
    }

    #[test]
    fn thin_history_is_skipped() {
        let cache = Arc::new(IndicatorCache::new());
        let tiers = Arc::new(TierManager::new(TierConfig::default()));
        let pipeline = PrecomputePipeline::new(cache.clone(), tiers);
        pipeline.compute_now("bitcoin", &ThinSource);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn cycle_prunes_to_1_5x_hot_cap() {
        let cache = Arc::new(IndicatorCache::new());
        let tiers = Arc::new(TierManager::new(TierConfig::default()));
        let pipeline = PrecomputePipeline::new(cache, tiers);
        for i in 0..50 {
            pipeline.touch(&format!("sym{i}"));
        }
        pipeline.run_cycle(&FixedSource).await;
        assert!(pipeline.base_score.lock().len() <= 30);
    }
}
