//! Adaptive tier manager (spec §4.7 C9).
//!
//! Per-symbol scan-cadence state machine. Promotion is driven by anomaly
//! severity; demotion is driven by idle time and never happens eagerly —
//! `should_check` is the only place tiers move down. Grounded on the
//! teacher's per-symbol `RwLock<HashMap<..>>` state convention (see
//! `scheduler::regime`) applied to a state machine instead of a statistic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::TierConfig;
use crate::models::{Severity, Tier};

struct SymbolTierState {
    tier: Tier,
    last_anomaly_at: Instant,
    last_anomaly_severity: Severity,
    last_check_at: Instant,
    checks: u64,
}

impl SymbolTierState {
    fn new(now: Instant) -> Self {
        // Backdated so a symbol's very first `should_check` is always due,
        // instead of waiting a full interval after the first observed tick.
        let backdated = now.checked_sub(Duration::from_secs(3600)).unwrap_or(now);
        Self {
            tier: Tier::Calm,
            last_anomaly_at: now,
            last_anomaly_severity: Severity::None,
            last_check_at: backdated,
            checks: 0,
        }
    }
}

pub struct TierManager {
    config: TierConfig,
    state: Mutex<HashMap<String, SymbolTierState>>,
}

impl TierManager {
    pub fn new(config: TierConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn interval_for(&self, tier: Tier) -> Duration {
        Duration::from_millis(self.config.intervals_ms[tier.as_u8() as usize - 1])
    }

    fn timeout_for(&self, tier: Tier) -> Option<Duration> {
        match tier {
            Tier::Calm => None,
            Tier::Alert => Some(Duration::from_millis(self.config.timeouts_ms[0])),
            Tier::Opportunity => Some(Duration::from_millis(self.config.timeouts_ms[1])),
        }
    }

    /// Feeds an anomaly severity observation for `symbol`. Promotion is
    /// monotonic: CRITICAL/HIGH -> tier 3, MEDIUM -> max(current, tier 2),
    /// LOW/NONE only updates bookkeeping.
    pub fn record_anomaly(&self, symbol: &str, severity: Severity) -> Option<(Tier, Tier)> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolTierState::new(now));

        let before = entry.tier;
        if severity >= Severity::High {
            entry.tier = Tier::Opportunity;
        } else if severity == Severity::Medium && entry.tier < Tier::Alert {
            entry.tier = Tier::Alert;
        }
        entry.last_anomaly_at = now;
        entry.last_anomaly_severity = severity;

        if entry.tier != before {
            Some((before, entry.tier))
        } else {
            None
        }
    }

    /// Sole authority for "run trigger predicates now" outside of
    /// anomaly-forced paths. Applies idle demotion first, then compares the
    /// tier's scan interval against time since the last check.
    pub fn should_check(&self, symbol: &str) -> (bool, Option<(Tier, Tier)>) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolTierState::new(now));

        let mut demotion = None;
        if let Some(timeout) = self.timeout_for(entry.tier) {
            if now.duration_since(entry.last_anomaly_at) > timeout {
                let before = entry.tier;
                entry.tier = match entry.tier {
                    Tier::Opportunity => Tier::Alert,
                    Tier::Alert => Tier::Calm,
                    Tier::Calm => Tier::Calm,
                };
                entry.last_anomaly_at = now;
                demotion = Some((before, entry.tier));
            }
        }

        let interval = self.interval_for(entry.tier);
        let due = now.duration_since(entry.last_check_at) >= interval;
        if due {
            entry.last_check_at = now;
            entry.checks += 1;
        }

        (due, demotion)
    }

    pub fn tier_of(&self, symbol: &str) -> Tier {
        self.state
            .lock()
            .get(symbol)
            .map(|s| s.tier)
            .unwrap_or(Tier::Calm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_severity_promotes_straight_to_opportunity() {
        let mgr = TierManager::new(TierConfig::default());
        let t = mgr.record_anomaly("bitcoin", Severity::High);
        assert_eq!(t, Some((Tier::Calm, Tier::Opportunity)));
    }

    #[test]
    fn promotion_never_demotes_on_repeated_low_severity() {
        let mgr = TierManager::new(TierConfig::default());
        mgr.record_anomaly("bitcoin", Severity::High);
        mgr.record_anomaly("bitcoin", Severity::None);
        assert_eq!(mgr.tier_of("bitcoin"), Tier::Opportunity);
    }

    #[test]
    fn medium_severity_promotes_to_alert_not_past() {
        let mgr = TierManager::new(TierConfig::default());
        let t = mgr.record_anomaly("bitcoin", Severity::Medium);
        assert_eq!(t, Some((Tier::Calm, Tier::Alert)));
    }

    #[test]
    fn calm_tier_never_demotes_since_it_has_no_timeout() {
        let mgr = TierManager::new(TierConfig::default());
        let (_, demotion) = mgr.should_check("bitcoin");
        assert!(demotion.is_none());
    }

    #[test]
    fn should_check_is_false_before_interval_elapses() {
        let mgr = TierManager::new(TierConfig::default());
        let (first, _) = mgr.should_check("bitcoin");
        assert!(first);
        let (second, _) = mgr.should_check("bitcoin");
        assert!(!second);
    }
}
