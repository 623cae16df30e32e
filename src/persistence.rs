//! Persistence sink (spec §6 "Downstream (produced)").
//!
//! Two append-only tables — signals and triggers — behind a blocking
//! `rusqlite::Connection` wrapped for use from async callers via
//! `spawn_blocking`. Grounded on the teacher's `signals/db_storage.rs`
//! (`Arc<Mutex<Connection>>`, `execute_batch` schema init, `params!`).

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::models::{RiskLevel, Signal};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    direction TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    entry_min REAL NOT NULL,
    entry_max REAL NOT NULL,
    current_price REAL NOT NULL,
    stop_loss REAL NOT NULL,
    target1 REAL NOT NULL,
    target2 REAL NOT NULL,
    target3 REAL NOT NULL,
    confidence INTEGER NOT NULL,
    strength TEXT NOT NULL,
    risk_level TEXT NOT NULL,
    status TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    selection_reason TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS triggers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    strategy TEXT,
    reason TEXT NOT NULL,
    priority TEXT NOT NULL,
    market_price REAL NOT NULL,
    change_1h_pct REAL,
    volume_24h REAL NOT NULL,
    signal_generated INTEGER NOT NULL,
    rejected INTEGER NOT NULL,
    rejection_reason TEXT,
    reasoning TEXT,
    indicator_snapshot TEXT,
    created_at TEXT NOT NULL
);
"#;

/// A best-effort record of a trigger evaluation, persisted whether or not
/// it ultimately produced a signal (spec §6).
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub symbol: String,
    pub strategy: Option<String>,
    pub reason: String,
    pub priority: String,
    pub market_price: f64,
    pub change_1h_pct: Option<f64>,
    pub volume_24h: f64,
    pub signal_generated: bool,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
    pub reasoning: Option<String>,
    pub indicator_snapshot: Option<serde_json::Value>,
}

/// |stop_loss - price| / price: <3% LOW, 3-7% MODERATE, >7% HIGH.
pub fn derive_risk_level(stop_loss: f64, price: f64) -> RiskLevel {
    if price <= 0.0 {
        return RiskLevel::Moderate;
    }
    let pct = (stop_loss - price).abs() / price * 100.0;
    if pct < 3.0 {
        RiskLevel::Low
    } else if pct <= 7.0 {
        RiskLevel::Moderate
    } else {
        RiskLevel::High
    }
}

/// Expiry defaults to 24h; scalp timeframes (<1h) -> 2h; swing (>=24h) ->
/// 72h; weekly+ -> 168h. `timeframe` is the bare duration portion (the
/// part after the `STRATEGY:` prefix).
pub fn derive_expiry(timeframe: &str, created_at: DateTime<Utc>) -> DateTime<Utc> {
    let hours = parse_timeframe_hours(timeframe).unwrap_or(4.0);
    let expiry_hours = if hours < 1.0 {
        2.0
    } else if hours >= 168.0 {
        168.0
    } else if hours >= 24.0 {
        72.0
    } else {
        24.0
    };
    created_at + ChronoDuration::hours(expiry_hours as i64)
}

fn parse_timeframe_hours(tf: &str) -> Option<f64> {
    let tf = tf.trim();
    let (num, unit) = tf.split_at(tf.len().checked_sub(1)?);
    let n: f64 = num.parse().ok()?;
    match unit {
        "m" => Some(n / 60.0),
        "h" => Some(n),
        "d" => Some(n * 24.0),
        "w" => Some(n * 24.0 * 7.0),
        _ => None,
    }
}

#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn insert_signal(&self, signal: &Signal) -> Result<()>;
    /// Best-effort: failures are logged, never propagated (spec §9).
    async fn insert_trigger(&self, trigger: TriggerRecord);
    async fn count_signals(&self) -> Result<i64>;
}

pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| Error::PersistenceFailure(format!("failed to open {db_path}: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::PersistenceFailure(format!("failed to init schema: {e}")))?;

        info!(db_path, "persistence sink initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceSink for SqlitePersistence {
    async fn insert_signal(&self, signal: &Signal) -> Result<()> {
        let conn = self.conn.clone();
        let signal = signal.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO signals (id, symbol, direction, timeframe, entry_min, entry_max, \
                 current_price, stop_loss, target1, target2, target3, confidence, strength, \
                 risk_level, status, expires_at, created_at, selection_reason) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                params![
                    signal.id,
                    signal.symbol,
                    format!("{:?}", signal.direction).to_uppercase(),
                    signal.timeframe,
                    signal.entry_min,
                    signal.entry_max,
                    signal.current_price,
                    signal.stop_loss,
                    signal.target1,
                    signal.target2,
                    signal.target3,
                    signal.confidence as i64,
                    format!("{:?}", signal.strength).to_uppercase(),
                    format!("{:?}", signal.risk_level).to_uppercase(),
                    signal.status,
                    signal.expires_at.to_rfc3339(),
                    signal.created_at.to_rfc3339(),
                    signal.selection_reason,
                ],
            )
        })
        .await
        .map_err(|e| Error::PersistenceFailure(format!("task join error: {e}")))?
        .map_err(|e| Error::PersistenceFailure(format!("insert signal failed: {e}")))?;
        Ok(())
    }

    async fn insert_trigger(&self, trigger: TriggerRecord) {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO triggers (symbol, strategy, reason, priority, market_price, \
                 change_1h_pct, volume_24h, signal_generated, rejected, rejection_reason, \
                 reasoning, indicator_snapshot, created_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    trigger.symbol,
                    trigger.strategy,
                    trigger.reason,
                    trigger.priority,
                    trigger.market_price,
                    trigger.change_1h_pct,
                    trigger.volume_24h,
                    trigger.signal_generated as i64,
                    trigger.rejected as i64,
                    trigger.rejection_reason,
                    trigger.reasoning,
                    trigger.indicator_snapshot.map(|v| v.to_string()),
                    Utc::now().to_rfc3339(),
                ],
            )
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "trigger insert failed"),
            Err(e) => warn!(error = %e, "trigger persistence task failed"),
        }
    }

    async fn count_signals(&self) -> Result<i64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))
        })
        .await
        .map_err(|e| Error::PersistenceFailure(format!("task join error: {e}")))?
        .map_err(|e| Error::PersistenceFailure(format!("count query failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_bands() {
        assert_eq!(derive_risk_level(98.0, 100.0), RiskLevel::Low);
        assert_eq!(derive_risk_level(95.0, 100.0), RiskLevel::Moderate);
        assert_eq!(derive_risk_level(90.0, 100.0), RiskLevel::High);
    }

    #[test]
    fn expiry_buckets() {
        let now = Utc::now();
        assert_eq!((derive_expiry("30m", now) - now).num_hours(), 2);
        assert_eq!((derive_expiry("4h", now) - now).num_hours(), 24);
        assert_eq!((derive_expiry("24h", now) - now).num_hours(), 72);
        assert_eq!((derive_expiry("168h", now) - now).num_hours(), 168);
    }

    #[tokio::test]
    async fn insert_and_count_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let sink = SqlitePersistence::open(db_path.to_str().unwrap()).unwrap();

        let signal = Signal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: "bitcoin".into(),
            direction: crate::models::Direction::Long,
            timeframe: "trend_momentum:4h".into(),
            entry_min: 100.0,
            entry_max: 101.0,
            current_price: 100.5,
            stop_loss: 97.0,
            target1: 102.0,
            target2: 104.0,
            target3: 106.0,
            confidence: 80,
            strength: crate::models::Strength::Strong,
            risk_level: RiskLevel::Low,
            status: "ACTIVE".into(),
            expires_at: Utc::now() + ChronoDuration::hours(24),
            created_at: Utc::now(),
            selection_reason: "test".into(),
        };

        sink.insert_signal(&signal).await.unwrap();
        assert_eq!(sink.count_signals().await.unwrap(), 1);
    }
}
