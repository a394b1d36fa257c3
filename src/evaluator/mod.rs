//! Value evaluation
//!
//! For each outcome:
//!
//! ```text
//! implied   = 1 / offered_odds
//! reference = fair probability from the configured strategy
//! edge      = reference - implied        (rounded to `precision` dp)
//! ```
//!
//! An outcome becomes a [`ValueSignal`] when `edge >= min_edge`, the
//! market is deep enough to price and the odds sit inside the configured
//! range. Evaluation is a pure function of the snapshot and `now`.

pub mod devig;
pub mod strategy;

pub use strategy::{Consensus, FairValueStrategy, ReferencePrice, ReferenceSource};

use crate::config::EvaluatorSettings;
use crate::normalize::Snapshot;
use crate::types::{Event, Market, MarketGroupKey, Outcome, ValueSignal};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;


/// Everything the evaluator may look at for one market
pub struct MarketContext<'a> {
    pub event: &'a Event,
    pub market: &'a Market,
    /// The same event/kind/line quoted by other bookmakers
    pub peers: Vec<&'a Market>,
    pub now: DateTime<Utc>,
}

/// Result of evaluating a whole snapshot
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub signals: Vec<ValueSignal>,
    pub outcomes_evaluated: usize,
    /// Markets skipped for having too few outcomes
    pub thin_markets: usize,
    /// Signals dropped because a better side of the same market qualified
    pub conflicts_dropped: usize,
    /// Markets skipped because the event started or is too far away
    pub out_of_window: usize,
    /// Markets used only as consensus peers (bookmaker not bet with)
    pub reference_only: usize,
}

pub struct ValueEvaluator {
    settings: EvaluatorSettings,
    strategy: Box<dyn FairValueStrategy>,
}

impl ValueEvaluator {
    pub fn new(settings: EvaluatorSettings) -> Self {
        let strategy = strategy::from_settings(&settings);
        Self { settings, strategy }
    }

    pub fn with_strategy(settings: EvaluatorSettings, strategy: Box<dyn FairValueStrategy>) -> Self {
        Self { settings, strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Evaluate one outcome against its market
    pub fn evaluate(&self, outcome: &Outcome, ctx: &MarketContext<'_>) -> Option<ValueSignal> {
        let s = &self.settings;
        if ctx.market.outcomes.len() < s.min_outcomes {
            return None;
        }
        if outcome.odds < s.min_odds || outcome.odds > s.max_odds {
            return None;
        }

        let fair = self.strategy.fair_probability(outcome, ctx)?;
        if !(fair > 0.0 && fair < 1.0) {
            return None;
        }
        let implied = outcome.implied_probability();

        let edge = round(fair - implied, s.precision)?;
        if edge < s.min_edge {
            return None;
        }
        if let Some(max_edge) = s.max_edge {
            if edge > max_edge {
                debug!(
                    market_id = %ctx.market.id,
                    outcome = %outcome.label,
                    edge = %edge,
                    "Edge above outlier cap, ignoring"
                );
                return None;
            }
        }

        Some(ValueSignal {
            event: ctx.event.clone(),
            market_id: ctx.market.id.clone(),
            bookmaker: ctx.market.bookmaker.clone(),
            market_kind: ctx.market.kind.clone(),
            line: ctx.market.line,
            outcome_label: outcome.label.clone(),
            odds: outcome.odds,
            fair_odds: 1.0 / fair,
            reference_probability: round(fair, s.precision)?,
            implied_probability: round(implied, s.precision)?,
            edge,
            strategy: self.strategy.name().to_string(),
            detected_at: ctx.now,
        })
    }

    /// Evaluate every outcome in the snapshot
    pub fn evaluate_snapshot(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> EvaluationReport {
        let mut groups: BTreeMap<MarketGroupKey, Vec<&Market>> = BTreeMap::new();
        for market in &snapshot.markets {
            groups.entry(market.group_key()).or_default().push(market);
        }

        let mut report = EvaluationReport::default();
        for market in &snapshot.markets {
            if market.outcomes.len() < self.settings.min_outcomes {
                debug!(market_id = %market.id, outcomes = market.outcomes.len(), "Market too thin to price");
                report.thin_markets += 1;
                continue;
            }
            let Some(event) = snapshot.event(&market.event_id) else {
                continue;
            };
            if !self.in_window(event, now) {
                report.out_of_window += 1;
                continue;
            }
            if !self.settings.is_betting_bookmaker(&market.bookmaker) {
                report.reference_only += 1;
                continue;
            }
            debug!(market_id = %market.id, overround = market.overround(), "Evaluating market");

            let peers: Vec<&Market> = groups
                .get(&market.group_key())
                .map(|group| group.iter().copied().filter(|m| m.id != market.id).collect())
                .unwrap_or_default();
            let ctx = MarketContext {
                event,
                market,
                peers,
                now,
            };

            for outcome in &market.outcomes {
                report.outcomes_evaluated += 1;
                if let Some(signal) = self.evaluate(outcome, &ctx) {
                    report.signals.push(signal);
                }
            }
        }

        report.signals.sort_by(|a, b| {
            b.edge
                .cmp(&a.edge)
                .then_with(|| a.event.id.cmp(&b.event.id))
                .then_with(|| a.market_id.cmp(&b.market_id))
                .then_with(|| a.outcome_label.cmp(&b.outcome_label))
        });

        if self.settings.drop_conflicting_sides {
            let before = report.signals.len();
            report.signals = drop_conflicting_sides(std::mem::take(&mut report.signals));
            report.conflicts_dropped = before - report.signals.len();
        }

        report
    }

    /// Whether the event's kickoff falls inside the evaluation window.
    /// Events without a start time are always evaluated.
    fn in_window(&self, event: &Event, now: DateTime<Utc>) -> bool {
        if self.settings.exclude_started && event.has_started(now) {
            return false;
        }
        match (self.settings.max_hours_to_start, event.start_time) {
            (Some(hours), Some(start)) => start - now <= chrono::Duration::hours(hours as i64),
            _ => true,
        }
    }
}

/// Keep only the best-edge side of each event/market group. Expects
/// signals sorted by descending edge.
fn drop_conflicting_sides(signals: Vec<ValueSignal>) -> Vec<ValueSignal> {
    let mut best: HashMap<MarketGroupKey, String> = HashMap::new();

    signals
        .into_iter()
        .filter(|signal| {
            let key = MarketGroupKey {
                event_id: signal.event.id.clone(),
                kind: signal.market_kind.clone(),
                line_milli: signal.line.map(|l| (l * 1000.0).round() as i64),
            };
            let label = best
                .entry(key)
                .or_insert_with(|| signal.outcome_label.clone());
            *label == signal.outcome_label
        })
        .collect()
}

/// Round a probability to `dp` decimal places
pub fn round(value: f64, dp: u32) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(dp))
}
