pub mod aggregator;
pub mod http_fallback;
pub mod stream_source;

pub use aggregator::Aggregator;
pub use http_fallback::{BinanceRestProvider, Freshness, HttpFallbackPoller};
pub use stream_source::{BinanceAdapter, CoinbaseAdapter, RawTick, SourceStatus, StreamSource, WsStreamSource};
