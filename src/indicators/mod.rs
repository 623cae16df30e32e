pub mod cache;
pub mod compute;
pub mod pipeline;

pub use cache::IndicatorCache;
pub use compute::{BollingerBands, Macd, VolumeSummary};
pub use pipeline::PrecomputePipeline;
