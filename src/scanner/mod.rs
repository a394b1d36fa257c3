//! Scan scheduler
//!
//! Drives one fetch → normalize → evaluate → alert cycle per poll interval.
//!
//! ```text
//! Idle ─▶ Fetching ─▶ Normalizing ─▶ Evaluating ─▶ Alerting ─▶ Idle
//!            │
//!            ├─ retryable ─▶ Backoff ─▶ Fetching
//!            └─ fatal ─────▶ Stopped
//! ```
//!
//! Cycles never overlap. Shutdown interrupts a fetch or the sleep between
//! cycles; once payloads are in hand the rest of the cycle runs to
//! completion.

mod context;

pub use context::{ScanState, ScannerContext};

use crate::client::{BackoffPolicy, OddsProvider};
use crate::config::ScannerSettings;
use crate::dispatch::{AlertDispatcher, DispatchSummary};
use crate::error::{ClientError, Result, ScanError};
use crate::evaluator::ValueEvaluator;
use crate::monitor::Liveness;
use crate::normalize::Normalizer;
use crate::storage::Database;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;


/// Counts from one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub cycle_id: Uuid,
    pub payloads: usize,
    pub schema_errors: usize,
    pub events: usize,
    pub markets: usize,
    pub outcomes: usize,
    pub dropped: usize,
    pub stale: usize,
    pub duplicates: usize,
    /// Outcomes whose odds changed since the previous cycle
    pub moved: usize,
    pub thin_markets: usize,
    /// Markets skipped for kickoff time
    pub out_of_window: usize,
    pub conflicts_dropped: usize,
    pub signals: usize,
    pub dispatch: DispatchSummary,
    pub pruned: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Nothing usable this cycle; wait for the next poll
    NoData(String),
    /// Retry after the given delay
    Retry(Duration),
    /// Stop the scheduler
    Fatal(String),
}

pub struct ScanScheduler {
    provider: Arc<dyn OddsProvider>,
    normalizer: Normalizer,
    evaluator: ValueEvaluator,
    dispatcher: AlertDispatcher,
    store: Option<Database>,
    settings: ScannerSettings,
    sports: Vec<String>,
    backoff: BackoffPolicy,
    ctx: ScannerContext,
}

impl ScanScheduler {
    pub fn new(
        provider: Arc<dyn OddsProvider>,
        normalizer: Normalizer,
        evaluator: ValueEvaluator,
        dispatcher: AlertDispatcher,
        settings: ScannerSettings,
        sports: Vec<String>,
    ) -> Self {
        Self {
            provider,
            normalizer,
            evaluator,
            dispatcher,
            store: None,
            settings,
            sports,
            backoff: BackoffPolicy::default(),
            ctx: ScannerContext::new(Liveness::default()),
        }
    }

    /// Persist each snapshot for the dashboard
    pub fn with_store(mut self, store: Database) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.ctx = ScannerContext::new(liveness);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn context(&self) -> &ScannerContext {
        &self.ctx
    }

    pub fn state(&self) -> &ScanState {
        &self.ctx.state
    }

    /// Run cycles until shutdown is signalled or a fatal error stops the
    /// scheduler
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            sports = ?self.sports,
            interval_secs = self.settings.poll_interval_secs,
            strategy = self.evaluator.strategy_name(),
            "🔍 Scan scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let ScanState::Stopped { reason } = &self.ctx.state {
                return Err(ScanError::Stopped(reason.clone()));
            }

            self.begin_cycle();
            let fetched = tokio::select! {
                fetched = self.fetch() => fetched,
                _ = shutdown.changed() => {
                    info!("Shutdown requested during fetch");
                    break;
                }
            };
            let outcome = self.complete_cycle(fetched, Utc::now()).await;

            let delay = match outcome {
                CycleOutcome::Completed(_) | CycleOutcome::NoData(_) => self.next_interval(),
                CycleOutcome::Retry(delay) => delay,
                CycleOutcome::Fatal(reason) => return Err(ScanError::Stopped(reason)),
            };

            debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if matches!(self.ctx.state, ScanState::Backoff { .. }) {
                        self.ctx.set_state(ScanState::Idle);
                    }
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.ctx.set_state(ScanState::Idle);
        info!(cycles = self.ctx.cycle, "Scan scheduler stopped");
        Ok(())
    }

    /// One full cycle stamped with `now`
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if let ScanState::Stopped { reason } = &self.ctx.state {
            return CycleOutcome::Fatal(reason.clone());
        }
        self.begin_cycle();
        let fetched = self.fetch().await;
        self.complete_cycle(fetched, now).await
    }

    /// Fetch raw payloads for every configured sport
    pub async fn fetch(&self) -> std::result::Result<Vec<Value>, ClientError> {
        self.provider.fetch_snapshot(&self.sports).await
    }

    fn begin_cycle(&mut self) {
        self.ctx.cycle += 1;
        self.ctx.cycle_id = Uuid::new_v4();
        self.ctx.cycle_started = Some(Instant::now());
        self.ctx.set_state(ScanState::Fetching);
    }

    async fn complete_cycle(
        &mut self,
        fetched: std::result::Result<Vec<Value>, ClientError>,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let outcome = match fetched {
            Ok(payloads) => {
                self.ctx.consecutive_transient = 0;
                self.ctx.consecutive_auth = 0;
                self.process(payloads, now).await
            }
            Err(e) => self.on_fetch_error(e),
        };
        self.settle(&outcome, now);
        outcome
    }

    fn on_fetch_error(&mut self, err: ClientError) -> CycleOutcome {
        let cycle = self.ctx.cycle;
        match err {
            ClientError::Unauthorized { status } => {
                self.ctx.consecutive_auth += 1;
                let failures = self.ctx.consecutive_auth;
                if failures >= self.settings.max_auth_failures {
                    error!(cycle, status, failures, "Provider keeps rejecting credentials");
                    return CycleOutcome::Fatal(format!(
                        "provider rejected credentials (HTTP {}) {} times in a row",
                        status, failures
                    ));
                }
                let delay = self.backoff.delay(failures - 1);
                warn!(cycle, status, failures, delay_ms = delay.as_millis() as u64, "Provider rejected credentials");
                CycleOutcome::Retry(delay)
            }
            e if e.is_retryable() => {
                self.ctx.consecutive_transient += 1;
                let failures = self.ctx.consecutive_transient;
                let mut delay = self.backoff.delay(failures - 1);
                if let ClientError::RateLimited {
                    retry_after_secs: Some(secs),
                } = &e
                {
                    delay = delay.max(Duration::from_secs(*secs));
                }
                warn!(cycle, error = %e, failures, delay_ms = delay.as_millis() as u64, "Fetch failed, backing off");
                CycleOutcome::Retry(delay)
            }
            e => {
                warn!(cycle, error = %e, "Fetch returned unusable data, skipping cycle");
                CycleOutcome::NoData(e.to_string())
            }
        }
    }

    /// Normalize, evaluate and dispatch one batch of payloads
    pub async fn process(&mut self, payloads: Vec<Value>, now: DateTime<Utc>) -> CycleOutcome {
        let cycle = self.ctx.cycle;
        self.ctx.set_state(ScanState::Normalizing);

        let (snapshot, schema_errors) = self.normalizer.normalize_all(&payloads, now);
        for e in &schema_errors {
            warn!(cycle, error = %e, "Payload skipped");
        }
        if !payloads.is_empty() && schema_errors.len() == payloads.len() {
            self.ctx.consecutive_schema += 1;
            let failures = self.ctx.consecutive_schema;
            if failures >= self.settings.max_schema_failures {
                error!(cycle, failures, "Provider payloads unrecognized for too many cycles");
                return CycleOutcome::Fatal(format!(
                    "provider schema unrecognized for {} consecutive cycles",
                    failures
                ));
            }
            return CycleOutcome::NoData(format!("{} payload(s) with unrecognized schema", schema_errors.len()));
        }
        self.ctx.consecutive_schema = 0;

        if self.settings.persist_snapshots {
            if let Some(store) = &self.store {
                if let Err(e) = store.save_snapshot(&snapshot, now).await {
                    warn!(cycle, error = %e, "Failed to persist snapshot");
                }
            }
        }
        let moved = self.ctx.observe(&snapshot);

        self.ctx.set_state(ScanState::Evaluating);
        let report = self.evaluator.evaluate_snapshot(&snapshot, now);

        self.ctx.set_state(ScanState::Alerting);
        let pruned = match self.dispatcher.dedup().prune(now).await {
            Ok(n) => n,
            Err(e) => {
                warn!(cycle, error = %e, "Failed to prune expired alerts");
                0
            }
        };
        let dispatch = match self.dispatcher.dispatch(&report.signals, now).await {
            Ok(summary) => summary,
            Err(e) => {
                self.ctx.consecutive_transient += 1;
                let delay = self.backoff.delay(self.ctx.consecutive_transient - 1);
                warn!(cycle, error = %e, "Alert ledger unavailable, retrying");
                return CycleOutcome::Retry(delay);
            }
        };

        let duration_ms = self
            .ctx
            .cycle_started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let summary = CycleSummary {
            cycle,
            cycle_id: self.ctx.cycle_id,
            payloads: payloads.len(),
            schema_errors: schema_errors.len(),
            events: snapshot.events.len(),
            markets: snapshot.markets.len(),
            outcomes: snapshot.outcome_count(),
            dropped: snapshot.dropped,
            stale: snapshot.stale,
            duplicates: snapshot.duplicates,
            moved,
            thin_markets: report.thin_markets,
            out_of_window: report.out_of_window,
            conflicts_dropped: report.conflicts_dropped,
            signals: report.signals.len(),
            dispatch,
            pruned,
            duration_ms,
        };

        info!(
            cycle,
            cycle_id = %summary.cycle_id,
            events = summary.events,
            markets = summary.markets,
            outcomes = summary.outcomes,
            dropped = summary.dropped,
            moved = summary.moved,
            signals = summary.signals,
            sent = summary.dispatch.sent,
            suppressed = summary.dispatch.suppressed,
            deferred = summary.dispatch.deferred,
            failed = summary.dispatch.failed,
            duration_ms,
            "✅ Cycle complete"
        );
        CycleOutcome::Completed(summary)
    }

    fn settle(&mut self, outcome: &CycleOutcome, now: DateTime<Utc>) {
        match outcome {
            CycleOutcome::Completed(summary) => {
                self.ctx.set_state(ScanState::Idle);
                self.ctx.liveness.record_success(now, summary.clone());
            }
            CycleOutcome::NoData(_) => {
                self.ctx.set_state(ScanState::Idle);
                self.ctx.liveness.record_failure(now);
            }
            CycleOutcome::Retry(delay) => {
                self.ctx.set_state(ScanState::Backoff { delay: *delay });
                self.ctx.liveness.record_failure(now);
            }
            CycleOutcome::Fatal(reason) => {
                self.ctx.set_state(ScanState::Stopped {
                    reason: reason.clone(),
                });
                self.ctx.liveness.record_failure(now);
            }
        }
    }

    /// Poll interval with ± jitter
    fn next_interval(&self) -> Duration {
        let base = self.settings.poll_interval();
        let jitter = self.settings.jitter_pct.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base;
        }
        let factor = rand::rng().random_range(-jitter..=jitter);
        base.mul_f64(1.0 + factor)
    }
}
