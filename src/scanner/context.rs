use crate::monitor::Liveness;
use crate::normalize::Snapshot;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Fetching,
    Normalizing,
    Evaluating,
    Alerting,
    Backoff { delay: Duration },
    Stopped { reason: String },
}

impl ScanState {
    pub fn label(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Fetching => "fetching",
            ScanState::Normalizing => "normalizing",
            ScanState::Evaluating => "evaluating",
            ScanState::Alerting => "alerting",
            ScanState::Backoff { .. } => "backoff",
            ScanState::Stopped { .. } => "stopped",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Backoff { delay } => write!(f, "backoff ({}ms)", delay.as_millis()),
            ScanState::Stopped { reason } => write!(f, "stopped: {}", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// Mutable scheduler state carried between cycles
pub struct ScannerContext {
    pub cycle: u64,
    pub cycle_id: Uuid,
    pub state: ScanState,
    pub consecutive_transient: u32,
    pub consecutive_auth: u32,
    pub consecutive_schema: u32,
    pub(crate) cycle_started: Option<Instant>,
    pub(crate) liveness: Liveness,
    /// (event, market, label) -> odds from the previous cycle
    last_seen: HashMap<(String, String, String), f64>,
}

impl ScannerContext {
    pub fn new(liveness: Liveness) -> Self {
        Self {
            cycle: 0,
            cycle_id: Uuid::nil(),
            state: ScanState::Idle,
            consecutive_transient: 0,
            consecutive_auth: 0,
            consecutive_schema: 0,
            cycle_started: None,
            liveness,
            last_seen: HashMap::new(),
        }
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn set_state(&mut self, state: ScanState) {
        match &state {
            ScanState::Stopped { reason } => self.liveness.stop(reason),
            other => self.liveness.set_state(other.label()),
        }
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn last_seen_odds(&self, event_id: &str, market_id: &str, label: &str) -> Option<f64> {
        self.last_seen
            .get(&(event_id.to_string(), market_id.to_string(), label.to_string()))
            .copied()
    }

    /// Replace the last-seen odds with this snapshot, returning how many
    /// previously seen outcomes changed price
    pub(crate) fn observe(&mut self, snapshot: &Snapshot) -> usize {
        let mut moved = 0;
        let mut current = HashMap::with_capacity(snapshot.outcome_count());
        for (event, market, outcome) in snapshot.triples() {
            let key = (event.id.clone(), market.id.clone(), outcome.label.clone());
            if let Some(previous) = self.last_seen.get(&key) {
                if (previous - outcome.odds).abs() > f64::EPSILON {
                    moved += 1;
                }
            }
            current.insert(key, outcome.odds);
        }
        self.last_seen = current;
        moved
    }
}
