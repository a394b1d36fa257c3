//! SQLite persistence
//!
//! The scanner is the only writer. The dashboard reads `events`,
//! `markets`, `outcomes` and `alerts`. Timestamps are stored as Unix
//! milliseconds.

use crate::dedup::AlertLedger;
use crate::error::{Result, ScanError};
use crate::normalize::Snapshot;
use crate::types::{AlertKey, AlertRecord, OddsBucket};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::info;


const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        sport TEXT NOT NULL,
        competition TEXT NOT NULL,
        start_time_ms INTEGER,
        participants TEXT NOT NULL,
        first_seen_ms INTEGER NOT NULL,
        last_seen_ms INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS markets (
        event_id TEXT NOT NULL,
        id TEXT NOT NULL,
        bookmaker TEXT NOT NULL,
        kind TEXT NOT NULL,
        line REAL,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (event_id, id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS outcomes (
        event_id TEXT NOT NULL,
        market_id TEXT NOT NULL,
        label TEXT NOT NULL,
        odds REAL NOT NULL,
        reference_odds REAL,
        last_seen_ms INTEGER NOT NULL,
        PRIMARY KEY (event_id, market_id, label)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL,
        market_id TEXT NOT NULL,
        outcome_label TEXT NOT NULL,
        odds_bucket TEXT NOT NULL,
        odds REAL NOT NULL,
        edge TEXT NOT NULL,
        sent_at_ms INTEGER NOT NULL,
        expires_at_ms INTEGER NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_alerts_key
        ON alerts (event_id, market_id, outcome_label, odds_bucket, expires_at_ms)"#,
];

#[derive(Debug, FromRow)]
struct AlertRow {
    event_id: String,
    market_id: String,
    outcome_label: String,
    odds_bucket: String,
    odds: f64,
    edge: String,
    sent_at_ms: i64,
    expires_at_ms: i64,
}

impl TryFrom<AlertRow> for AlertRecord {
    type Error = ScanError;

    fn try_from(row: AlertRow) -> Result<Self> {
        let decimal = |s: &str| {
            Decimal::from_str(s).map_err(|e| decode_error(format!("bad decimal {:?}: {}", s, e)))
        };
        Ok(AlertRecord {
            odds_bucket: OddsBucket(decimal(&row.odds_bucket)?),
            edge: decimal(&row.edge)?,
            sent_at: from_millis(row.sent_at_ms)?,
            expires_at: from_millis(row.expires_at_ms)?,
            event_id: row.event_id,
            market_id: row.market_id,
            outcome_label: row.outcome_label,
            odds: row.odds,
        })
    }
}

fn decode_error(msg: String) -> ScanError {
    ScanError::Database(sqlx::Error::Protocol(msg))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| decode_error(format!("bad timestamp {}", ms)))
}

/// Database handle
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `path`; `~` is expanded
    pub async fn connect(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).into_owned();
        if let Some(parent) = Path::new(&expanded).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&expanded)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!(path = %expanded, "Database ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for &statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Upsert the snapshot for the dashboard. Event rows keep their first
    /// observed fields; outcomes take the latest odds.
    pub async fn save_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<()> {
        let now_ms = now.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        for event in &snapshot.events {
            sqlx::query(
                r#"INSERT INTO events (id, sport, competition, start_time_ms, participants, first_seen_ms, last_seen_ms)
                   VALUES (?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(id) DO UPDATE SET last_seen_ms = excluded.last_seen_ms"#,
            )
            .bind(&event.id)
            .bind(&event.sport)
            .bind(&event.competition)
            .bind(event.start_time.map(|t| t.timestamp_millis()))
            .bind(serde_json::to_string(&event.participants)?)
            .bind(now_ms)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }

        for market in &snapshot.markets {
            sqlx::query(
                r#"INSERT INTO markets (event_id, id, bookmaker, kind, line, last_seen_ms)
                   VALUES (?, ?, ?, ?, ?, ?)
                   ON CONFLICT(event_id, id) DO UPDATE SET last_seen_ms = excluded.last_seen_ms"#,
            )
            .bind(&market.event_id)
            .bind(&market.id)
            .bind(&market.bookmaker)
            .bind(&market.kind)
            .bind(market.line)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;

            for outcome in &market.outcomes {
                sqlx::query(
                    r#"INSERT INTO outcomes (event_id, market_id, label, odds, reference_odds, last_seen_ms)
                       VALUES (?, ?, ?, ?, ?, ?)
                       ON CONFLICT(event_id, market_id, label) DO UPDATE SET
                           odds = excluded.odds,
                           reference_odds = excluded.reference_odds,
                           last_seen_ms = excluded.last_seen_ms"#,
                )
                .bind(&market.event_id)
                .bind(&market.id)
                .bind(&outcome.label)
                .bind(outcome.odds)
                .bind(outcome.reference_odds)
                .bind(outcome.last_seen.timestamp_millis())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Latest alerts, newest first
    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<AlertRecord>> {
        let rows: Vec<AlertRow> = sqlx::query_as(
            r#"SELECT event_id, market_id, outcome_label, odds_bucket, odds, edge, sent_at_ms, expires_at_ms
               FROM alerts ORDER BY sent_at_ms DESC, id DESC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertRecord::try_from).collect()
    }

    pub async fn outcome_odds(&self, event_id: &str, market_id: &str, label: &str) -> Result<Option<f64>> {
        let odds: Option<f64> = sqlx::query_scalar(
            "SELECT odds FROM outcomes WHERE event_id = ? AND market_id = ? AND label = ?",
        )
        .bind(event_id)
        .bind(market_id)
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;
        Ok(odds)
    }

    pub async fn event_participants(&self, event_id: &str) -> Result<Option<Vec<String>>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT participants FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        raw.map(|s| serde_json::from_str(&s).map_err(ScanError::from))
            .transpose()
    }
}

#[async_trait]
impl AlertLedger for Database {
    async fn active_alert(&self, key: &AlertKey, now: DateTime<Utc>) -> Result<Option<AlertRecord>> {
        let row: Option<AlertRow> = sqlx::query_as(
            r#"SELECT event_id, market_id, outcome_label, odds_bucket, odds, edge, sent_at_ms, expires_at_ms
               FROM alerts
               WHERE event_id = ? AND market_id = ? AND outcome_label = ? AND odds_bucket = ?
                 AND expires_at_ms > ?
               ORDER BY sent_at_ms DESC LIMIT 1"#,
        )
        .bind(&key.event_id)
        .bind(&key.market_id)
        .bind(&key.outcome_label)
        .bind(key.bucket.to_string())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlertRecord::try_from).transpose()
    }

    async fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO alerts (event_id, market_id, outcome_label, odds_bucket, odds, edge, sent_at_ms, expires_at_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.event_id)
        .bind(&record.market_id)
        .bind(&record.outcome_label)
        .bind(record.odds_bucket.to_string())
        .bind(record.odds)
        .bind(record.edge.to_string())
        .bind(record.sent_at.timestamp_millis())
        .bind(record.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM alerts WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
