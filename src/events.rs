//! Internal typed event bus (spec §6, replaces the source's DOM `window`
//! event bus per §9's "Browser event bus" design note).
//!
//! A small `tokio::sync::broadcast` fan-out, consumed by whichever adapter
//! the deployment chooses (here, the SSE handler in `http.rs`). Grounded on
//! the teacher's `models::WsServerEvent` + broadcast-sender usage in
//! `signals/enrichment.rs` and `main.rs`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Signal, Tier};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    TierUpgrade {
        symbol: String,
        from_tier: Tier,
        to_tier: Tier,
        reason: String,
    },
    TierDowngrade {
        symbol: String,
        from_tier: Tier,
        to_tier: Tier,
        reason: String,
    },
    RegimeChange {
        symbol: String,
        from: String,
        to: String,
        volatility: f64,
        thresholds: crate::scheduler::regime::Thresholds,
    },
    TriggerDetected {
        symbol: String,
        reason: String,
        priority: String,
        price: f64,
    },
    SignalGenerated {
        signal: Box<Signal>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
        status: String,
        counters: serde_json::Value,
    },
    DataHealth {
        timestamp: DateTime<Utc>,
        sources: serde_json::Value,
    },
}

/// Fire-and-forget broadcast dispatcher. Cloning is cheap (wraps an `Arc`
/// internally via `broadcast::Sender`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Best-effort: no receivers is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}
