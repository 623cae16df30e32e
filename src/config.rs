//! Process configuration (spec §6 "Configuration").
//!
//! Loaded from environment variables with typed defaults, mirroring the
//! teacher's `Config::from_env` shape: every key has a sane default so the
//! process boots with zero configuration for local development.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Thresholds {
    pub price_change_pct: f64,
    pub velocity_pct_per_sec: f64,
    pub spread_widening_ratio: f64,
    pub volume_surge_ratio: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            price_change_pct: 0.10,
            velocity_pct_per_sec: 0.35,
            spread_widening_ratio: 1.8,
            volume_surge_ratio: 1.8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierConfig {
    pub intervals_ms: [u64; 3],
    pub timeouts_ms: [u64; 2], // tier2, tier3 idle-demotion timeouts
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            intervals_ms: [5000, 1000, 500],
            timeouts_ms: [30_000, 10_000],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(3000),
            cap: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub http_port: u16,
    pub monitored_symbols: Vec<String>,

    pub thresholds: Thresholds,
    pub tiers: TierConfig,
    pub reconnect: ReconnectPolicy,

    pub cooldown: Duration,
    pub signal_dedup_window: Duration,

    pub indicator_cache_ttl: Duration,
    pub indicator_cache_soft_cap: usize,

    pub precompute_cycle: Duration,
    pub precompute_batch_size: usize,
    pub precompute_batch_yield: Duration,
    pub precompute_hot_cap: usize,

    pub aggregator_dedup_window: Duration,
    pub http_fallback_interval: Duration,
    pub http_fallback_staleness: Duration,

    pub health_beat_interval: Duration,
    pub pending_tick_queue_bound: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./marketpulse.db".to_string(),
            http_port: 8080,
            monitored_symbols: default_symbols(),
            thresholds: Thresholds::default(),
            tiers: TierConfig::default(),
            reconnect: ReconnectPolicy::default(),
            cooldown: Duration::from_millis(30_000),
            signal_dedup_window: Duration::from_millis(7_200_000),
            indicator_cache_ttl: Duration::from_millis(5_000),
            indicator_cache_soft_cap: 100,
            precompute_cycle: Duration::from_millis(30_000),
            precompute_batch_size: 5,
            precompute_batch_yield: Duration::from_millis(100),
            precompute_hot_cap: 20,
            aggregator_dedup_window: Duration::from_millis(1_000),
            http_fallback_interval: Duration::from_secs(5),
            http_fallback_staleness: Duration::from_secs(30),
            health_beat_interval: Duration::from_secs(10),
            pending_tick_queue_bound: 8,
        }
    }
}

fn default_symbols() -> Vec<String> {
    [
        "bitcoin", "ethereum", "solana", "ripple", "cardano", "dogecoin", "avalanche",
        "polkadot", "chainlink", "polygon", "litecoin", "bitcoin-cash", "tron", "stellar",
        "monero", "algorand", "cosmos", "near", "aptos", "arbitrum", "optimism", "filecoin",
        "hedera", "vechain", "internet-computer", "maker", "aave", "the-graph", "sui", "sei",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Ok(v) = env_parse::<u16>("PORT") {
            cfg.http_port = v;
        }
        if let Ok(v) = std::env::var("MONITORED_SYMBOLS") {
            cfg.monitored_symbols = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env_parse::<f64>("PRICE_CHANGE_PCT") {
            cfg.thresholds.price_change_pct = v;
        }
        if let Ok(v) = env_parse::<f64>("VELOCITY_PCT_PER_SEC") {
            cfg.thresholds.velocity_pct_per_sec = v;
        }
        if let Ok(v) = env_parse::<f64>("SPREAD_WIDENING_RATIO") {
            cfg.thresholds.spread_widening_ratio = v;
        }
        if let Ok(v) = env_parse::<f64>("VOLUME_SURGE_RATIO") {
            cfg.thresholds.volume_surge_ratio = v;
        }
        if let Ok(v) = env_parse::<u64>("COOLDOWN_MS") {
            cfg.cooldown = Duration::from_millis(v);
        }
        if let Ok(v) = env_parse::<u32>("MAX_RECONNECT_ATTEMPTS") {
            cfg.reconnect.max_attempts = v;
        }
        if let Ok(v) = env_parse::<u64>("RECONNECT_BASE_DELAY_MS") {
            cfg.reconnect.base_delay = Duration::from_millis(v);
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> std::result::Result<T, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}
