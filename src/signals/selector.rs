//! Signal selector (spec §4.14 C15).
//!
//! Picks the strongest consensus verdict across strategies for a symbol,
//! scoring survivors by a multi-factor quality score informed by the
//! reputation tracker (C17). Grounded on the teacher's `signals/correlator.rs`
//! cross-source consensus idiom (count agreeing sources, require a
//! majority, score the survivors).

use crate::models::{Direction, SignalCandidate, Strength};
use crate::signals::reputation::ReputationTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusStrength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone)]
pub struct Winner {
    pub candidate: SignalCandidate,
    pub quality_score: f64,
    pub consensus: ConsensusStrength,
    pub selection_reason: String,
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub strategy: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub winner: Option<Winner>,
    pub rejected: Vec<Rejection>,
}

pub struct SignalSelector;

impl SignalSelector {
    pub fn select(
        symbol: &str,
        candidates: Vec<SignalCandidate>,
        reputation: &ReputationTracker,
        market_condition: Option<&str>,
    ) -> SelectionResult {
        let _ = symbol;

        if candidates.is_empty() {
            return SelectionResult {
                winner: None,
                rejected: Vec::new(),
            };
        }

        if candidates.len() == 1 {
            let candidate = candidates.into_iter().next().unwrap();
            let reason = format!(
                "sole strategy {} proposed {:?} at {:.1}% confidence (WEAK consensus)",
                candidate.strategy, candidate.direction, candidate.confidence
            );
            return SelectionResult {
                winner: Some(Winner {
                    candidate,
                    quality_score: 0.0,
                    consensus: ConsensusStrength::Weak,
                    selection_reason: reason,
                }),
                rejected: Vec::new(),
            };
        }

        let total = candidates.len();
        let longs = candidates.iter().filter(|c| c.direction == Direction::Long).count();
        let shorts = total - longs;
        let majority = total.div_ceil(2);

        let dominant = if longs >= majority && longs > shorts {
            Direction::Long
        } else if shorts >= majority && shorts > longs {
            Direction::Short
        } else {
            return SelectionResult {
                winner: None,
                rejected: candidates
                    .into_iter()
                    .map(|c| Rejection {
                        strategy: c.strategy,
                        reason: "conflicted consensus: no majority direction".to_string(),
                    })
                    .collect(),
            };
        };

        let dominant_count = if dominant == Direction::Long { longs } else { shorts };
        let consensus_pct = dominant_count as f64 / total as f64;
        let consensus = if consensus_pct >= 0.8 {
            ConsensusStrength::Strong
        } else if consensus_pct >= 0.6 {
            ConsensusStrength::Moderate
        } else {
            ConsensusStrength::Weak
        };

        let (agreeing, disagreeing): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|c| c.direction == dominant);

        let mut rejected: Vec<Rejection> = disagreeing
            .into_iter()
            .map(|c| Rejection {
                strategy: c.strategy,
                reason: "wrong direction".to_string(),
            })
            .collect();

        let mut scored: Vec<(f64, SignalCandidate)> = agreeing
            .into_iter()
            .map(|c| {
                let score = quality_score(&c, dominant_count, total, reputation, market_condition);
                (score, c)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let (winner_score, winner_candidate) = scored.remove(0);
        rejected.extend(scored.into_iter().map(|(_, c)| Rejection {
            strategy: c.strategy,
            reason: "lower quality".to_string(),
        }));

        let consensus_label = match consensus {
            ConsensusStrength::Strong => "STRONG",
            ConsensusStrength::Moderate => "MODERATE",
            ConsensusStrength::Weak => "WEAK",
        };
        let selection_reason = format!(
            "{:?} consensus {:.0}% ({consensus_label}); winner {} at {:.1}% confidence, R/R {:.1}, {:?} strength",
            dominant,
            consensus_pct * 100.0,
            winner_candidate.strategy,
            winner_candidate.confidence,
            winner_candidate.risk_reward,
            winner_candidate.strength,
        );

        SelectionResult {
            winner: Some(Winner {
                candidate: winner_candidate,
                quality_score: winner_score,
                consensus,
                selection_reason,
            }),
            rejected,
        }
    }
}

fn risk_reward_component(rr: f64) -> f64 {
    if rr <= 1.0 {
        0.0
    } else if rr <= 2.0 {
        lerp(rr, 1.0, 2.0, 0.0, 10.0)
    } else if rr <= 3.0 {
        lerp(rr, 2.0, 3.0, 10.0, 15.0)
    } else if rr <= 4.0 {
        lerp(rr, 3.0, 4.0, 15.0, 20.0)
    } else {
        20.0
    }
}

fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    y0 + (x - x0) / (x1 - x0) * (y1 - y0)
}

fn quality_score(
    candidate: &SignalCandidate,
    dominant_count: usize,
    total: usize,
    reputation: &ReputationTracker,
    market_condition: Option<&str>,
) -> f64 {
    let (adjusted_confidence, _, _) = reputation.adjust_confidence(
        &candidate.strategy,
        candidate.confidence,
        market_condition.unwrap_or("unknown"),
    );
    let confidence_component = adjusted_confidence / 100.0 * 40.0;
    let consensus_component = dominant_count as f64 / total as f64 * 30.0;
    let rr_component = risk_reward_component(candidate.risk_reward);
    let strength_component = candidate.strength.score_component();

    (confidence_component + consensus_component + rr_component + strength_component).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(strategy: &str, direction: Direction, confidence: f64, rr: f64, strength: Strength) -> SignalCandidate {
        SignalCandidate {
            strategy: strategy.into(),
            direction,
            confidence,
            strength,
            entry_min: 100.0,
            entry_max: 101.0,
            stop_loss: 95.0,
            targets: [105.0, 110.0, 115.0],
            risk_reward: rr,
            timeframe: "4h".into(),
            reasoning: "test".into(),
            indicators: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_input_has_no_winner() {
        let reputation = ReputationTracker::new();
        let result = SignalSelector::select("bitcoin", vec![], &reputation, None);
        assert!(result.winner.is_none());
    }

    #[test]
    fn single_candidate_wins_with_weak_consensus() {
        let reputation = ReputationTracker::new();
        let result = SignalSelector::select(
            "bitcoin",
            vec![candidate("momentum", Direction::Long, 70.0, 2.0, Strength::Moderate)],
            &reputation,
            None,
        );
        let winner = result.winner.unwrap();
        assert_eq!(winner.consensus, ConsensusStrength::Weak);
    }

    #[test]
    fn conflicted_five_five_has_no_winner() {
        let reputation = ReputationTracker::new();
        let mut candidates = Vec::new();
        for i in 0..5 {
            candidates.push(candidate(&format!("long{i}"), Direction::Long, 70.0, 2.0, Strength::Moderate));
        }
        for i in 0..5 {
            candidates.push(candidate(&format!("short{i}"), Direction::Short, 70.0, 2.0, Strength::Moderate));
        }
        let result = SignalSelector::select("bitcoin", candidates, &reputation, None);
        assert!(result.winner.is_none());
        assert_eq!(result.rejected.len(), 10);
    }

    #[test]
    fn scenario_s3_matches_spec_worked_example() {
        let reputation = ReputationTracker::new();
        let candidates = vec![
            candidate("a", Direction::Long, 80.0, 3.0, Strength::Strong),
            candidate("b", Direction::Long, 75.0, 2.5, Strength::Moderate),
            candidate("c", Direction::Long, 70.0, 4.0, Strength::Strong),
            candidate("d", Direction::Long, 68.0, 2.0, Strength::Moderate),
            candidate("e", Direction::Long, 66.0, 3.0, Strength::Moderate),
            candidate("f", Direction::Long, 65.0, 2.0, Strength::Weak),
            candidate("g", Direction::Short, 70.0, 2.0, Strength::Moderate),
            candidate("h", Direction::Short, 70.0, 2.0, Strength::Moderate),
        ];
        let result = SignalSelector::select("bitcoin", candidates, &reputation, None);
        let winner = result.winner.unwrap();
        assert_eq!(winner.candidate.strategy, "c");
        assert!((winner.quality_score - 80.5).abs() < 0.01);
        assert_eq!(winner.consensus, ConsensusStrength::Moderate);
    }

    #[test]
    fn quality_score_is_bounded_0_to_100() {
        let reputation = ReputationTracker::new();
        let candidates = vec![
            candidate("a", Direction::Long, 100.0, 10.0, Strength::Strong),
            candidate("b", Direction::Long, 100.0, 10.0, Strength::Strong),
        ];
        let result = SignalSelector::select("bitcoin", candidates, &reputation, None);
        let winner = result.winner.unwrap();
        assert!(winner.quality_score <= 100.0);
    }
}
