//! Core types for the odds scanner

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format in which a provider quotes prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OddsFormat {
    #[default]
    Decimal,
    American,
    Fractional,
}

impl OddsFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decimal" | "eu" | "european" => Some(OddsFormat::Decimal),
            "american" | "us" | "moneyline" => Some(OddsFormat::American),
            "fractional" | "uk" => Some(OddsFormat::Fractional),
            _ => None,
        }
    }
}

/// A sporting event as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub sport: String,
    pub competition: String,
    pub start_time: Option<DateTime<Utc>>,
    /// Home side first when the provider distinguishes one
    pub participants: Vec<String>,
}

impl Event {
    pub fn display_name(&self) -> String {
        if self.participants.is_empty() {
            self.id.clone()
        } else {
            self.participants.join(" vs ")
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time.map(|t| t <= now).unwrap_or(false)
    }
}

/// One priced outcome of a market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub label: String,
    /// Decimal odds offered by the market's bookmaker
    pub odds: f64,
    /// Provider's fair (sharp) decimal odds for this outcome, if published
    pub reference_odds: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

impl Outcome {
    /// Implied probability of the offered odds (1 / odds)
    pub fn implied_probability(&self) -> f64 {
        implied_probability(self.odds)
    }
}

/// A bookmaker's market on an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Unique within the event: `{bookmaker}:{kind}` plus `@{line}` for lined markets
    pub id: String,
    pub event_id: String,
    pub bookmaker: String,
    /// Market type, e.g. `h2h`, `totals`, `spreads`
    pub kind: String,
    pub line: Option<f64>,
    pub outcomes: Vec<Outcome>,
}

impl Market {
    pub fn build_id(bookmaker: &str, kind: &str, line: Option<f64>) -> String {
        match line {
            Some(l) => format!("{}:{}@{}", bookmaker, kind, l),
            None => format!("{}:{}", bookmaker, kind),
        }
    }

    /// Key shared by every bookmaker quoting the same event, kind and line
    pub fn group_key(&self) -> MarketGroupKey {
        MarketGroupKey {
            event_id: self.event_id.clone(),
            kind: self.kind.clone(),
            line_milli: self.line.map(|l| (l * 1000.0).round() as i64),
        }
    }

    pub fn outcome(&self, label: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.label == label)
    }

    /// Sum of implied probabilities minus one (the bookmaker margin)
    pub fn overround(&self) -> f64 {
        self.outcomes.iter().map(|o| o.implied_probability()).sum::<f64>() - 1.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketGroupKey {
    pub event_id: String,
    pub kind: String,
    pub line_milli: Option<i64>,
}

/// An outcome whose odds look generous against the fair estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSignal {
    pub event: Event,
    pub market_id: String,
    pub bookmaker: String,
    pub market_kind: String,
    pub line: Option<f64>,
    pub outcome_label: String,
    pub odds: f64,
    pub fair_odds: f64,
    pub reference_probability: Decimal,
    pub implied_probability: Decimal,
    pub edge: Decimal,
    pub strategy: String,
    pub detected_at: DateTime<Utc>,
}

impl ValueSignal {
    /// Edge expressed in percentage points
    pub fn edge_pct(&self) -> Decimal {
        self.edge * Decimal::ONE_HUNDRED
    }
}

/// Odds quantized to a band so small drift does not re-alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OddsBucket(pub Decimal);

impl OddsBucket {
    /// Round odds to the nearest multiple of `width`
    pub fn from_odds(odds: f64, width: Decimal) -> Self {
        let value = Decimal::from_f64(odds).unwrap_or_default();
        if width <= Decimal::ZERO {
            return OddsBucket(value.round_dp(2));
        }
        let steps = (value / width).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        OddsBucket((steps * width).normalize())
    }
}

impl fmt::Display for OddsBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Identity of an alertable opportunity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub event_id: String,
    pub market_id: String,
    pub outcome_label: String,
    pub bucket: OddsBucket,
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.event_id, self.market_id, self.outcome_label, self.bucket
        )
    }
}

/// A delivered alert, written only after a successful send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub event_id: String,
    pub market_id: String,
    pub outcome_label: String,
    pub odds_bucket: OddsBucket,
    pub odds: f64,
    pub edge: Decimal,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AlertRecord {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            event_id: self.event_id.clone(),
            market_id: self.market_id.clone(),
            outcome_label: self.outcome_label.clone(),
            bucket: self.odds_bucket,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Implied probability of decimal odds; zero for impossible prices
pub fn implied_probability(odds: f64) -> f64 {
    if odds > 0.0 {
        1.0 / odds
    } else {
        0.0
    }
}

/// Convert American (moneyline) odds to decimal
pub fn american_to_decimal(american: f64) -> Option<f64> {
    if american >= 100.0 {
        Some(1.0 + american / 100.0)
    } else if american <= -100.0 {
        Some(1.0 + 100.0 / american.abs())
    } else {
        None
    }
}

/// Convert fractional odds such as `5/2` to decimal
pub fn fractional_to_decimal(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 && numerator > 0.0 {
        Some(1.0 + numerator / denominator)
    } else {
        None
    }
}
