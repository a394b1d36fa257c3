//! Alert deduplication
//!
//! An opportunity is identified by (event, market, outcome, odds bucket).
//! Once alerted it stays suppressed until its cool-down expires. The ledger
//! of sent alerts is the source of truth; an in-process in-flight set makes
//! check-and-record atomic for callers that might overlap.

use crate::config::DedupSettings;
use crate::error::Result;
use crate::types::{AlertKey, AlertRecord, OddsBucket, ValueSignal};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;


/// Persistent record of delivered alerts
#[async_trait]
pub trait AlertLedger: Send + Sync {
    /// Most recent unexpired record for `key`
    async fn active_alert(&self, key: &AlertKey, now: DateTime<Utc>) -> Result<Option<AlertRecord>>;

    async fn insert_alert(&self, record: &AlertRecord) -> Result<()>;

    /// Delete expired records, returning how many were removed
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Ledger kept in memory, for dry runs and tests
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<AlertRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AlertLedger for MemoryLedger {
    async fn active_alert(&self, key: &AlertKey, now: DateTime<Utc>) -> Result<Option<AlertRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.is_active(now) && r.key() == *key)
            .max_by_key(|r| r.sent_at)
            .cloned())
    }

    async fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.is_active(now));
        Ok((before - records.len()) as u64)
    }
}

/// How long an alerted key stays suppressed
#[derive(Debug, Clone, PartialEq)]
pub enum CooldownPolicy {
    Fixed(Duration),
    /// Until the event starts; `fallback` when the start is unknown or past
    UntilEventStart { fallback: Duration },
}

impl CooldownPolicy {
    pub fn from_settings(settings: &DedupSettings) -> Self {
        let hours = Duration::hours(settings.cooldown_hours as i64);
        if settings.cooldown_until_start {
            CooldownPolicy::UntilEventStart { fallback: hours }
        } else {
            CooldownPolicy::Fixed(hours)
        }
    }

    pub fn expires_at(&self, sent_at: DateTime<Utc>, event_start: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match self {
            CooldownPolicy::Fixed(d) => sent_at + *d,
            CooldownPolicy::UntilEventStart { fallback } => match event_start {
                Some(start) if start > sent_at => start,
                _ => sent_at + *fallback,
            },
        }
    }
}

pub struct DedupStore {
    ledger: Arc<dyn AlertLedger>,
    bucket_width: Decimal,
    cooldown: CooldownPolicy,
    in_flight: Mutex<HashSet<AlertKey>>,
}

impl DedupStore {
    pub fn new(ledger: Arc<dyn AlertLedger>, settings: &DedupSettings) -> Self {
        Self {
            ledger,
            bucket_width: settings.bucket_width,
            cooldown: CooldownPolicy::from_settings(settings),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn key_for(&self, signal: &ValueSignal) -> AlertKey {
        AlertKey {
            event_id: signal.event.id.clone(),
            market_id: signal.market_id.clone(),
            outcome_label: signal.outcome_label.clone(),
            bucket: OddsBucket::from_odds(signal.odds, self.bucket_width),
        }
    }

    /// Whether `key` may alert now
    pub async fn should_alert(&self, key: &AlertKey, now: DateTime<Utc>) -> Result<bool> {
        if self.in_flight.lock().contains(key) {
            return Ok(false);
        }
        Ok(self.ledger.active_alert(key, now).await?.is_none())
    }

    /// Reserve `key` for delivery. `None` when it is cooling down or another
    /// caller holds it. Dropping the claim without committing releases it.
    pub async fn claim(&self, key: &AlertKey, now: DateTime<Utc>) -> Result<Option<AlertClaim<'_>>> {
        if !self.in_flight.lock().insert(key.clone()) {
            debug!(key = %key, "Alert already in flight");
            return Ok(None);
        }
        let claim = AlertClaim {
            store: self,
            key: key.clone(),
        };

        if let Some(existing) = self.ledger.active_alert(key, now).await? {
            debug!(key = %key, expires_at = %existing.expires_at, "Alert cooling down");
            return Ok(None);
        }
        Ok(Some(claim))
    }

    /// Record a delivered alert
    pub async fn record_alert(
        &self,
        key: &AlertKey,
        signal: &ValueSignal,
        sent_at: DateTime<Utc>,
    ) -> Result<AlertRecord> {
        let record = AlertRecord {
            event_id: key.event_id.clone(),
            market_id: key.market_id.clone(),
            outcome_label: key.outcome_label.clone(),
            odds_bucket: key.bucket,
            odds: signal.odds,
            edge: signal.edge,
            sent_at,
            expires_at: self.cooldown.expires_at(sent_at, signal.event.start_time),
        };
        self.ledger.insert_alert(&record).await?;
        Ok(record)
    }

    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        self.ledger.prune_expired(now).await
    }
}

/// Exclusive right to alert one key
pub struct AlertClaim<'a> {
    store: &'a DedupStore,
    key: AlertKey,
}

impl AlertClaim<'_> {
    pub fn key(&self) -> &AlertKey {
        &self.key
    }

    /// Record the alert after a successful send, then release the key
    pub async fn commit(self, signal: &ValueSignal, sent_at: DateTime<Utc>) -> Result<AlertRecord> {
        self.store.record_alert(&self.key, signal, sent_at).await
    }
}

impl Drop for AlertClaim<'_> {
    fn drop(&mut self) {
        self.store.in_flight.lock().remove(&self.key);
    }
}
