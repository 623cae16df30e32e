//! Error taxonomy (spec §7).
//!
//! Kinds, not exhaustive exception types: everything upstream-transient is
//! recoverable locally, everything data-quality is surfaced via counters and
//! events, and only startup configuration errors are fatal.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Stream close, HTTP failure. Recovered locally via reconnect/back-off
    /// or per-symbol fallback. Never fatal.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Normalizer rejected a tick. Counted, logged at warn, tick dropped.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// Non-monotonic or zero-delta-t tick. No signal from this pair.
    #[error("timing anomaly: {0}")]
    TimingAnomaly(String),

    /// A strategy panicked or timed out.
    #[error("strategy failure in {strategy}: {reason}")]
    StrategyFailure { strategy: String, reason: String },

    /// Insert into the downstream persistence sink failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Micro-anomaly detector exceeded its 1ms budget.
    #[error("budget breach: {component} took {elapsed_us}us (budget {budget_us}us)")]
    BudgetBreach {
        component: &'static str,
        elapsed_us: u128,
        budget_us: u128,
    },

    /// Malformed symbol mapping at startup. Fatal at `start`, never after.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this kind can ever abort `start()`. Everything else is
    /// recovered locally or surfaced via counters/events per the §7
    /// recovery matrix.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
