pub mod anomaly;
pub mod regime;
pub mod significance;
pub mod tier;

pub use anomaly::{AnomalyReport, MicroAnomalyDetector};
pub use regime::{Regime, VolatilityRegimeTracker};
pub use significance::{
    DimensionVerdict, SignificanceFilter, SignificanceVerdict, TriggerMagnitudes, VolatilityCategory,
};
pub use tier::TierManager;
