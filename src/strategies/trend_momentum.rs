//! Trend-momentum strategy: a reference implementation of the `Strategy`
//! trait combining EMA trend direction, RSI extremes, and the MACD
//! histogram into a single directional call.

use crate::enrichment::EnrichmentBundle;
use crate::models::{Direction, SignalCandidate, Strength, Verdict};
use crate::strategies::Strategy;

pub struct TrendMomentumStrategy;

#[async_trait::async_trait]
impl Strategy for TrendMomentumStrategy {
    fn name(&self) -> &'static str {
        "trend_momentum"
    }

    async fn evaluate(&self, input: &EnrichmentBundle) -> Verdict {
        let ind = &input.indicators;
        let price = input.ticker.last_price;

        let trend_up = ind.ema20 > ind.ema50 && ind.ema50 > ind.ema100;
        let trend_down = ind.ema20 < ind.ema50 && ind.ema50 < ind.ema100;
        let momentum_up = ind.macd.histogram > 0.0;
        let momentum_down = ind.macd.histogram < 0.0;

        let direction = if trend_up && momentum_up && ind.rsi14 < 75.0 {
            Direction::Long
        } else if trend_down && momentum_down && ind.rsi14 > 25.0 {
            Direction::Short
        } else {
            return Verdict::Rejected {
                strategy: self.name().to_string(),
                reason: "no aligned trend/momentum signal".to_string(),
            };
        };

        let rsi_room = match direction {
            Direction::Long => (75.0 - ind.rsi14).max(0.0),
            Direction::Short => (ind.rsi14 - 25.0).max(0.0),
        };
        let confidence = (55.0 + rsi_room.min(30.0)).clamp(0.0, 95.0);

        let strength = if confidence >= 80.0 {
            Strength::Strong
        } else if confidence >= 65.0 {
            Strength::Moderate
        } else {
            Strength::Weak
        };

        if confidence < self.min_confidence() {
            return Verdict::Rejected {
                strategy: self.name().to_string(),
                reason: format!("confidence {confidence:.1} below minimum {}", self.min_confidence()),
            };
        }

        let (stop_loss, targets) = match direction {
            Direction::Long => (
                price * 0.97,
                [price * 1.02, price * 1.04, price * 1.06],
            ),
            Direction::Short => (
                price * 1.03,
                [price * 0.98, price * 0.96, price * 0.94],
            ),
        };
        let risk = (price - stop_loss).abs();
        let reward = (targets[1] - price).abs();
        let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

        Verdict::Signal(SignalCandidate {
            strategy: self.name().to_string(),
            direction,
            confidence,
            strength,
            entry_min: price * 0.999,
            entry_max: price * 1.001,
            stop_loss,
            targets,
            risk_reward,
            timeframe: "4h".to_string(),
            reasoning: format!(
                "EMA stack {:?}, MACD histogram {:.4}, RSI {:.1}",
                direction, ind.macd.histogram, ind.rsi14
            ),
            indicators: serde_json::json!({
                "ema20": ind.ema20, "ema50": ind.ema50, "ema100": ind.ema100,
                "macd_histogram": ind.macd.histogram, "rsi14": ind.rsi14,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::{IndicatorBundle, OnChainProxies, OrderBookMetrics};
    use crate::indicators::compute::{BollingerBands, Macd, VolumeSummary};
    use crate::models::{Candle, Quality, Ticker};

    fn bundle(ema20: f64, ema50: f64, ema100: f64, macd_hist: f64, rsi: f64) -> EnrichmentBundle {
        EnrichmentBundle {
            ticker: Ticker {
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
            },
            candles: Vec::<Candle>::new(),
            indicators: IndicatorBundle {
                rsi14: rsi,
                ema20,
                ema50,
                ema100,
                ema200: ema100,
                macd: Macd {
                    macd: macd_hist,
                    signal: 0.0,
                    histogram: macd_hist,
                },
                bollinger: BollingerBands::default(),
                volume: VolumeSummary::default(),
            },
            sentiment: 50,
            on_chain: OnChainProxies::default(),
            order_book: OrderBookMetrics {
                bid_ask_imbalance: 1.0,
                buy_pressure_pct: 50.0,
                bid_ask_ratio: 1.0,
            },
        }
    }

    #[tokio::test]
    async fn aligned_uptrend_produces_long_signal() {
        let strategy = TrendMomentumStrategy;
        let verdict = strategy.evaluate(&bundle(105.0, 102.0, 100.0, 0.5, 55.0)).await;
        assert!(matches!(verdict, Verdict::Signal(s) if s.direction == Direction::Long));
    }

    #[tokio::test]
    async fn conflicting_trend_and_momentum_is_rejected() {
        let strategy = TrendMomentumStrategy;
        let verdict = strategy.evaluate(&bundle(105.0, 102.0, 100.0, -0.5, 55.0)).await;
        assert!(matches!(verdict, Verdict::Rejected { .. }));
    }

    #[tokio::test]
    async fn overbought_long_setup_is_rejected() {
        let strategy = TrendMomentumStrategy;
        let verdict = strategy.evaluate(&bundle(105.0, 102.0, 100.0, 0.5, 80.0)).await;
        assert!(matches!(verdict, Verdict::Rejected { .. }));
    }
}
