pub mod trend_momentum;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::enrichment::EnrichmentBundle;
use crate::models::Verdict;

const DEFAULT_MIN_CONFIDENCE: f64 = 65.0;
const STRATEGY_TIMEOUT: Duration = Duration::from_millis(300);

/// A pluggable market-intelligence strategy (spec §4.13 C14). Strategies
/// are pure given the bundle and must not mutate shared state.
#[async_trait::async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn min_confidence(&self) -> f64 {
        DEFAULT_MIN_CONFIDENCE
    }

    async fn evaluate(&self, input: &EnrichmentBundle) -> Verdict;
}

/// Runs every strategy concurrently with a per-call timeout, converting
/// both timeouts and panics into rejection verdicts so one bad strategy
/// never starves the others. Grounded on the teacher's `tokio::spawn` +
/// `JoinSet` fan-out convention in `main.rs::parallel_data_collection`.
pub struct StrategyDispatcher {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyDispatcher {
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    pub async fn run_all(&self, input: Arc<EnrichmentBundle>) -> Vec<Verdict> {
        let mut set = tokio::task::JoinSet::new();

        for strategy in &self.strategies {
            let strategy = strategy.clone();
            let input = input.clone();
            set.spawn(async move {
                let name = strategy.name();
                match tokio::time::timeout(STRATEGY_TIMEOUT, strategy.evaluate(&input)).await {
                    Ok(verdict) => verdict,
                    Err(_) => {
                        warn!(strategy = name, "strategy timed out");
                        Verdict::Rejected {
                            strategy: name.to_string(),
                            reason: "timed out".to_string(),
                        }
                    }
                }
            });
        }

        let mut verdicts = Vec::with_capacity(self.strategies.len());
        while let Some(result) = set.join_next().await {
            match result {
                Ok(verdict) => verdicts.push(verdict),
                Err(join_err) => {
                    warn!(error = %join_err, "strategy task panicked");
                    verdicts.push(Verdict::Rejected {
                        strategy: "unknown".to_string(),
                        reason: format!("panicked: {join_err}"),
                    });
                }
            }
        }

        verdicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, Direction, Quality, SignalCandidate, Strength, Ticker};

    struct AlwaysLong;
    #[async_trait::async_trait]
    impl Strategy for AlwaysLong {
        fn name(&self) -> &'static str {
            "always-long"
        }
        async fn evaluate(&self, _input: &EnrichmentBundle) -> Verdict {
            Verdict::Signal(SignalCandidate {
                strategy: self.name().to_string(),
                direction: Direction::Long,
                confidence: 70.0,
                strength: Strength::Moderate,
                entry_min: 100.0,
                entry_max: 101.0,
                stop_loss: 95.0,
                targets: [105.0, 110.0, 115.0],
                risk_reward: 2.0,
                timeframe: "4h".into(),
                reasoning: "always long".into(),
                indicators: serde_json::Value::Null,
            })
        }
    }

    struct NeverReturns;
    #[async_trait::async_trait]
    impl Strategy for NeverReturns {
        fn name(&self) -> &'static str {
            "stuck"
        }
        async fn evaluate(&self, _input: &EnrichmentBundle) -> Verdict {
            tokio::time::sleep(Duration::from_secs(10)).await;
            unreachable!()
        }
    }

    fn bundle() -> Arc<EnrichmentBundle> {
        let ticker = Ticker {
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
        };
        Arc::new(EnrichmentBundle {
            ticker,
            candles: Vec::<Candle>::new(),
            indicators: crate::enrichment::IndicatorBundle {
                rsi14: 50.0,
                ema20: 0.0,
                ema50: 0.0,
                ema100: 0.0,
                ema200: 0.0,
                macd: Default::default(),
                bollinger: Default::default(),
                volume: Default::default(),
            },
            sentiment: 50,
            on_chain: Default::default(),
            order_book: crate::enrichment::OrderBookMetrics {
                bid_ask_imbalance: 1.0,
                buy_pressure_pct: 50.0,
                bid_ask_ratio: 1.0,
            },
        })
    }

    #[tokio::test]
    async fn timed_out_strategy_becomes_rejection() {
        let dispatcher = StrategyDispatcher::new(vec![Arc::new(NeverReturns), Arc::new(AlwaysLong)]);
        let verdicts = dispatcher.run_all(bundle()).await;
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts.iter().any(|v| matches!(v, Verdict::Signal(_))));
        assert!(verdicts.iter().any(|v| matches!(v, Verdict::Rejected { reason, .. } if reason == "timed out")));
    }
}
