//! Alert dispatch
//!
//! Signals pass through the dedup store before they reach the sink. A key is
//! claimed, sent, and recorded only once the sink reports success, so a
//! failed delivery leaves the key eligible for the next cycle.

use crate::dedup::DedupStore;
use crate::error::{DeliveryFailed, Result};
use crate::types::ValueSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

/// Messaging channel that delivers one alert
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, signal: &ValueSignal) -> std::result::Result<(), DeliveryFailed>;
}

/// Counts from one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    /// Cooling down or already in flight
    pub suppressed: usize,
    /// Over the per-bookmaker cap, eligible again next cycle
    pub deferred: usize,
    pub failed: usize,
}

pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    dedup: Arc<DedupStore>,
    max_per_bookmaker: Option<usize>,
    send_spacing: Duration,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, dedup: Arc<DedupStore>) -> Self {
        Self {
            sink,
            dedup,
            max_per_bookmaker: None,
            send_spacing: Duration::ZERO,
        }
    }

    pub fn with_max_per_bookmaker(mut self, max: Option<usize>) -> Self {
        self.max_per_bookmaker = max;
        self
    }

    pub fn with_send_spacing(mut self, spacing: Duration) -> Self {
        self.send_spacing = spacing;
        self
    }

    pub fn dedup(&self) -> &Arc<DedupStore> {
        &self.dedup
    }

    /// Deliver signals in the order given. Ledger read or write errors abort
    /// the pass; sink failures are counted and left for the next cycle.
    pub async fn dispatch(&self, signals: &[ValueSignal], now: DateTime<Utc>) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        let mut per_book: HashMap<&str, usize> = HashMap::new();

        for signal in signals {
            let key = self.dedup.key_for(signal);

            if let Some(max) = self.max_per_bookmaker {
                if per_book.get(signal.bookmaker.as_str()).copied().unwrap_or(0) >= max {
                    debug!(key = %key, bookmaker = %signal.bookmaker, "Bookmaker cap reached, deferring");
                    summary.deferred += 1;
                    continue;
                }
            }

            let Some(claim) = self.dedup.claim(&key, now).await? else {
                summary.suppressed += 1;
                continue;
            };

            if summary.sent + summary.failed > 0 && !self.send_spacing.is_zero() {
                tokio::time::sleep(self.send_spacing).await;
            }

            match self.sink.send_alert(signal).await {
                Ok(()) => {
                    *per_book.entry(signal.bookmaker.as_str()).or_default() += 1;
                    summary.sent += 1;
                    match claim.commit(signal, now).await {
                        Ok(record) => {
                            info!(
                                key = %key,
                                edge = %signal.edge,
                                odds = signal.odds,
                                expires_at = %record.expires_at,
                                "📨 Alert sent"
                            );
                        }
                        Err(e) => {
                            error!(key = %key, error = %e, sent = summary.sent, "Alert sent but not recorded, aborting dispatch");
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Alert delivery failed, will retry next cycle");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
