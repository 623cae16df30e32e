//! Indicator cache (spec §4.9 C11).
//!
//! A TTL-keyed `getOrCompute` store plus a `rayon`-parallel bulk
//! pre-compute path. Grounded on the teacher's single-writer-per-key
//! convention for shared maps (`parking_lot::RwLock` over a `HashMap`,
//! same shape as `scheduler::regime`), with a soft-cap expiry sweep added
//! because the spec calls for bounded memory under many symbols.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use super::compute::{self, BollingerBands, Macd, VolumeSummary};

const SOFT_CAP: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum IndicatorValue {
    Rsi(f64),
    Ema(f64),
    Macd(Macd),
    Bollinger(BollingerBands),
    Volume(VolumeSummary),
}

struct Entry {
    value: IndicatorValue,
    stored_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct IndicatorCache {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn fresh(&self, key: &str, ttl: Duration) -> Option<IndicatorValue> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() < ttl {
            self.stats.write().hits += 1;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Returns the cached value if still within `ttl`; otherwise computes,
    /// stores, and returns the fresh value. Concurrent misses for the same
    /// key serialize on a per-key lock instead of all calling `compute`: the
    /// first caller in computes and stores, everyone else re-checks the
    /// cache once they acquire the key lock and finds it already fresh.
    pub fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        compute: impl FnOnce() -> IndicatorValue,
    ) -> IndicatorValue {
        if let Some(value) = self.fresh(key, ttl) {
            return value;
        }

        let key_lock = self
            .in_flight
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = key_lock.lock();

        if let Some(value) = self.fresh(key, ttl) {
            return value;
        }

        self.stats.write().misses += 1;
        let value = compute();
        self.store(key, value.clone());
        value
    }

    fn store(&self, key: &str, value: IndicatorValue) {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        if entries.len() > SOFT_CAP {
            let now = Instant::now();
            entries.retain(|_, e| now.duration_since(e.stored_at) < DEFAULT_TTL * 4);
        }
    }

    /// Evaluates the full indicator set for `symbol` in parallel and stores
    /// each result under its canonical key. Requires `prices.len() >= 50`
    /// per the pipeline's hot-symbol gate; the cache itself just computes
    /// whatever it's given.
    pub fn pre_compute(&self, symbol: &str, prices: &[f64], volumes: &[f64], ttl: Duration) {
        let results: Vec<(String, IndicatorValue)> = [
            "rsi14", "ema20", "ema50", "ema100", "ema200", "macd", "bollinger20_2", "volume",
        ]
        .par_iter()
        .map(|&kind| {
            let value = match kind {
                "rsi14" => IndicatorValue::Rsi(compute::rsi(prices, 14)),
                "ema20" => IndicatorValue::Ema(compute::ema(prices, 20)),
                "ema50" => IndicatorValue::Ema(compute::ema(prices, 50)),
                "ema100" => IndicatorValue::Ema(compute::ema(prices, 100)),
                "ema200" => IndicatorValue::Ema(compute::ema(prices, 200)),
                "macd" => IndicatorValue::Macd(compute::macd(prices)),
                "bollinger20_2" => IndicatorValue::Bollinger(compute::bollinger(prices, 20, 2.0)),
                "volume" => IndicatorValue::Volume(compute::volume_summary(volumes)),
                _ => unreachable!(),
            };
            (format!("{symbol}:{kind}"), value)
        })
        .collect();

        for (key, value) in results {
            self.store(&key, value);
        }
        let _ = ttl; // entries are stored with `Instant::now()`; ttl governs read-side validity via get_or_compute.
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IndicatorCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = IndicatorCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            cache.get_or_compute("k", Duration::from_secs(60), || {
                calls += 1;
                IndicatorValue::Rsi(50.0)
            });
        }
        assert_eq!(calls, 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entry_recomputes() {
        let cache = IndicatorCache::new();
        cache.get_or_compute("k", Duration::from_millis(1), || IndicatorValue::Rsi(1.0));
        std::thread::sleep(Duration::from_millis(5));
        let mut recomputed = false;
        cache.get_or_compute("k", Duration::from_millis(1), || {
            recomputed = true;
            IndicatorValue::Rsi(2.0)
        });
        assert!(recomputed);
    }

    #[test]
    fn concurrent_misses_on_same_key_compute_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Barrier;

        let cache = Arc::new(IndicatorCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    cache.get_or_compute("k", Duration::from_secs(60), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        IndicatorValue::Rsi(50.0)
                    });
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pre_compute_populates_canonical_keys() {
        let cache = IndicatorCache::new();
        let prices: Vec<f64> = (1..=60).map(|i| i as f64).collect();
        let volumes: Vec<f64> = vec![10.0; 60];
        cache.pre_compute("bitcoin", &prices, &volumes, DEFAULT_TTL);
        assert_eq!(cache.len(), 8);
    }
}
