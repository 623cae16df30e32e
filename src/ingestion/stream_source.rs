//! Long-lived per-exchange streaming client (spec §4.2 C4).
//!
//! Grounded on the teacher's `scrapers/dome_websocket.rs` (`run()` /
//! `connect_and_stream()` split, linear-then-capped reconnect delay) and
//! `scrapers/binance_book_ticker.rs` (per-symbol decode). The reconnect
//! driver (`WsStreamSource`) is generic over an `ExchangeAdapter` so the two
//! concrete sources (Binance, Coinbase) share one reconnect/status/back-off
//! implementation instead of duplicating the loop per exchange — both
//! sources must obey the exact same contract (spec §4.2), so this
//! generalization follows the spec rather than inventing one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ReconnectPolicy;
use crate::symbol_map::SymbolMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

/// Exchange-agnostic decoded update, ready to be turned into a canonical
/// `Ticker` by the aggregator once joined with the symbol map.
#[derive(Debug, Clone)]
pub struct RawTick {
    pub canonical_symbol: String,
    pub last_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub quote_volume_24h: f64,
    pub change_24h_abs: f64,
    pub change_24h_pct: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub event_ts_ms: i64,
}

/// A long-lived, independently reconnecting streaming client for one
/// exchange. Exposed as a trait so the aggregator owns a `Vec<Arc<dyn
/// StreamSource>>` without caring which exchange each one talks to (spec
/// §9 "the stream-source components expose only start/stop/status/callbacks").
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is signalled. Never returns early on
    /// transient failure — reconnects internally per spec §4.2 — and
    /// never panics the process.
    async fn run(
        &self,
        symbols: Vec<String>,
        tx: mpsc::Sender<RawTick>,
        status_tx: watch::Sender<SourceStatus>,
        shutdown: watch::Receiver<bool>,
    );
}

/// Per-exchange wire protocol knowledge. Kept deliberately small: URL,
/// subscribe framing, decode, symbol resolution.
pub trait ExchangeAdapter: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn ws_url(&self, symbols: &[String]) -> String;
    fn subscribe_message(&self, symbols: &[String]) -> Option<Message>;
    /// Whether this protocol needs us to send periodic pings (spec §4.2
    /// "periodic liveness ping when protocol requires it").
    fn requires_ping(&self) -> bool {
        false
    }
    fn ping_interval(&self) -> Duration {
        Duration::from_secs(20)
    }
    fn decode(&self, text: &str, symbol_map: &SymbolMap) -> Option<RawTick>;
}

pub struct WsStreamSource<A: ExchangeAdapter> {
    adapter: A,
    symbol_map: Arc<SymbolMap>,
    reconnect: ReconnectPolicy,
}

impl<A: ExchangeAdapter> WsStreamSource<A> {
    pub fn new(adapter: A, symbol_map: Arc<SymbolMap>, reconnect: ReconnectPolicy) -> Self {
        Self {
            adapter,
            symbol_map,
            reconnect,
        }
    }

    async fn connect_and_stream(
        &self,
        symbols: &[String],
        tx: &mpsc::Sender<RawTick>,
        status_tx: &watch::Sender<SourceStatus>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let url = self.adapter.ws_url(symbols);
        let _ = status_tx.send(SourceStatus::Connecting);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
        let _ = status_tx.send(SourceStatus::Connected);
        info!(source = self.adapter.name(), "stream connected");

        let (mut write, mut read) = ws_stream.split();

        if let Some(sub) = self.adapter.subscribe_message(symbols) {
            write.send(sub).await?;
        }

        let mut ping_tick = tokio::time::interval(self.adapter.ping_interval());

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Intentional shutdown: idempotent, no reconnect.
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                _ = ping_tick.tick(), if self.adapter.requires_ping() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return Err(anyhow::anyhow!("ping send failed"));
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(raw) = self.adapter.decode(&text, &self.symbol_map) {
                                if tx.send(raw).await.is_err() {
                                    // Downstream gone; nothing more to do.
                                    return Ok(());
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            debug!(source = self.adapter.name(), ?frame, "closed by server");
                            return Err(anyhow::anyhow!("connection closed by server"));
                        }
                        Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow::anyhow!("stream ended")),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<A: ExchangeAdapter> StreamSource for WsStreamSource<A> {
    fn name(&self) -> &'static str {
        self.adapter.name()
    }

    async fn run(
        &self,
        symbols: Vec<String>,
        tx: mpsc::Sender<RawTick>,
        status_tx: watch::Sender<SourceStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match self
                .connect_and_stream(&symbols, &tx, &status_tx, &mut shutdown)
                .await
            {
                Ok(()) => {
                    // Either graceful shutdown (already returned inside) or
                    // a clean EOF we still want to treat as reconnect-worthy.
                    if *shutdown.borrow() {
                        let _ = status_tx.send(SourceStatus::Disconnected);
                        return;
                    }
                    attempt = 0;
                }
                Err(e) => {
                    warn!(source = self.adapter.name(), error = %e, "stream error");
                    let _ = status_tx.send(SourceStatus::Error);
                    attempt += 1;

                    if attempt > self.reconnect.max_attempts {
                        warn!(
                            source = self.adapter.name(),
                            "reconnect attempt cap reached; backing off to fallback"
                        );
                        let _ = status_tx.send(SourceStatus::Disconnected);
                        // Caller observes `Disconnected` via status_tx and
                        // engages the HTTP fallback poller (spec §4.2's
                        // "caller-supplied fallback hook").
                        attempt = 0;
                        tokio::time::sleep(self.reconnect.cap).await;
                        continue;
                    }
                }
            }

            if *shutdown.borrow() {
                return;
            }

            let _ = status_tx.send(SourceStatus::Reconnecting);
            let delay = (self.reconnect.base_delay * attempt.max(1)).min(self.reconnect.cap);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Binance `!ticker@arr`-style combined stream adapter (24hr rolling
/// ticker). Grounded on `scrapers/binance_book_ticker.rs`'s combined-stream
/// URL shape.
pub struct BinanceAdapter;

impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn ws_url(&self, symbols: &[String]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect();
        format!(
            "wss://stream.binance.com:9443/stream?streams={}",
            streams.join("/")
        )
    }

    fn subscribe_message(&self, _symbols: &[String]) -> Option<Message> {
        // Combined-stream URL already subscribes; no separate message.
        None
    }

    fn decode(&self, text: &str, symbol_map: &SymbolMap) -> Option<RawTick> {
        let envelope: serde_json::Value = serde_json::from_str(text).ok()?;
        let data = envelope.get("data")?;
        let exchange_symbol = data.get("s")?.as_str()?;
        let canonical = symbol_map.canonical_for_binance(exchange_symbol)?.to_string();

        let f = |k: &str| data.get(k).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok());

        Some(RawTick {
            canonical_symbol: canonical,
            last_price: f("c")?,
            best_bid: f("b").unwrap_or(0.0),
            best_ask: f("a").unwrap_or(0.0),
            quote_volume_24h: f("q").unwrap_or(0.0),
            change_24h_abs: f("p").unwrap_or(0.0),
            change_24h_pct: f("P").unwrap_or(0.0),
            high_24h: f("h").unwrap_or(0.0),
            low_24h: f("l").unwrap_or(0.0),
            event_ts_ms: data.get("E").and_then(|v| v.as_i64()).unwrap_or(0),
        })
    }
}

/// Coinbase Advanced Trade `ticker` channel adapter.
pub struct CoinbaseAdapter;

impl ExchangeAdapter for CoinbaseAdapter {
    fn name(&self) -> &'static str {
        "coinbase"
    }

    fn ws_url(&self, _symbols: &[String]) -> String {
        "wss://ws-feed.exchange.coinbase.com".to_string()
    }

    fn subscribe_message(&self, symbols: &[String]) -> Option<Message> {
        let sub = serde_json::json!({
            "type": "subscribe",
            "product_ids": symbols,
            "channels": ["ticker"],
        });
        Some(Message::Text(sub.to_string()))
    }

    fn requires_ping(&self) -> bool {
        true
    }

    fn decode(&self, text: &str, symbol_map: &SymbolMap) -> Option<RawTick> {
        let msg: serde_json::Value = serde_json::from_str(text).ok()?;
        if msg.get("type").and_then(|v| v.as_str()) != Some("ticker") {
            return None;
        }
        let exchange_symbol = msg.get("product_id")?.as_str()?;
        let canonical = symbol_map
            .canonical_for_coinbase(exchange_symbol)?
            .to_string();

        let f = |k: &str| msg.get(k).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok());
        let price = f("price")?;
        let open_24h = f("open_24h").unwrap_or(price);

        let event_ts_ms = msg
            .get("time")
            .and_then(|v| v.as_str())
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        Some(RawTick {
            canonical_symbol: canonical,
            last_price: price,
            best_bid: f("best_bid").unwrap_or(0.0),
            best_ask: f("best_ask").unwrap_or(0.0),
            quote_volume_24h: f("volume_24h").unwrap_or(0.0) * price,
            change_24h_abs: price - open_24h,
            change_24h_pct: if open_24h > 0.0 {
                (price - open_24h) / open_24h * 100.0
            } else {
                0.0
            },
            high_24h: f("high_24h").unwrap_or(price),
            low_24h: f("low_24h").unwrap_or(price),
            event_ts_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_decode_round_trip() {
        let map = SymbolMap::build(&[("bitcoin", Some("BTCUSDT"), None)]).unwrap();
        let adapter = BinanceAdapter;
        let text = r#"{"stream":"btcusdt@ticker","data":{"s":"BTCUSDT","c":"50000.00","b":"49999.00","a":"50001.00","q":"1000000","p":"100.0","P":"0.2","h":"51000","l":"49000","E":1700000000000}}"#;
        let tick = adapter.decode(text, &map).unwrap();
        assert_eq!(tick.canonical_symbol, "bitcoin");
        assert_eq!(tick.last_price, 50000.00);
    }

    #[test]
    fn coinbase_decode_round_trip() {
        let map = SymbolMap::build(&[("bitcoin", None, Some("BTC-USD"))]).unwrap();
        let adapter = CoinbaseAdapter;
        let text = r#"{"type":"ticker","product_id":"BTC-USD","price":"50000.00","open_24h":"49500.00","best_bid":"49999","best_ask":"50001","volume_24h":"20","high_24h":"51000","low_24h":"49000","time":"2023-11-14T22:13:20.000Z"}"#;
        let tick = adapter.decode(text, &map).unwrap();
        assert_eq!(tick.canonical_symbol, "bitcoin");
        assert_eq!(tick.last_price, 50000.00);
    }

    #[test]
    fn unrelated_message_types_decode_to_none() {
        let map = SymbolMap::build(&[("bitcoin", None, Some("BTC-USD"))]).unwrap();
        let adapter = CoinbaseAdapter;
        let text = r#"{"type":"subscriptions","channels":[]}"#;
        assert!(adapter.decode(text, &map).is_none());
    }
}
