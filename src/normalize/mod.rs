//! Normalizer
//!
//! Maps provider JSON onto canonical events, markets and outcomes:
//!
//! ```text
//! [ { id, sport_key, sport_title, commence_time, home_team, away_team,
//!     bookmakers: [ { key, markets: [ { key, outcomes: [ { name, price, point } ] } ] } ] } ]
//! ```
//!
//! Top-level arrays, `{ "data": [...] }` / `{ "events": [...] }` envelopes and
//! single event objects are accepted. Broken records are dropped one by one;
//! only an unrecognized top-level shape is an error.

use crate::error::SchemaError;
use crate::types::{
    american_to_decimal, fractional_to_decimal, Event, Market, OddsFormat, Outcome,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Canonical records from one or more payloads
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: Vec<Event>,
    pub markets: Vec<Market>,
    /// Records dropped for malformed fields
    pub dropped: usize,
    /// Quotes dropped for being older than the allowed age
    pub stale: usize,
    /// Retransmitted outcomes collapsed into one
    pub duplicates: usize,
    event_index: HashMap<String, usize>,
    market_index: HashMap<(String, String), usize>,
}

impl Snapshot {
    pub fn event(&self, id: &str) -> Option<&Event> {
        self.event_index.get(id).map(|&i| &self.events[i])
    }

    /// Every (event, market, outcome) in payload order
    pub fn triples(&self) -> impl Iterator<Item = (&Event, &Market, &Outcome)> + '_ {
        self.markets
            .iter()
            .filter_map(move |m| self.event(&m.event_id).map(|e| (e, m)))
            .flat_map(|(e, m)| m.outcomes.iter().map(move |o| (e, m, o)))
    }

    pub fn outcome_count(&self) -> usize {
        self.markets.iter().map(|m| m.outcomes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Combine with another snapshot; the freshest quote wins
    pub fn merge(&mut self, other: Snapshot) {
        self.dropped += other.dropped;
        self.stale += other.stale;
        self.duplicates += other.duplicates;
        for event in other.events {
            self.insert_event(event);
        }
        for market in other.markets {
            self.insert_market(market);
        }
    }

    /// First sighting of an event wins
    fn insert_event(&mut self, event: Event) {
        if !self.event_index.contains_key(&event.id) {
            self.event_index.insert(event.id.clone(), self.events.len());
            self.events.push(event);
        }
    }

    fn insert_market(&mut self, market: Market) {
        let key = (market.event_id.clone(), market.id.clone());
        match self.market_index.get(&key) {
            Some(&i) => {
                for outcome in market.outcomes {
                    self.duplicates += merge_outcome(&mut self.markets[i], outcome);
                }
            }
            None => {
                self.market_index.insert(key, self.markets.len());
                self.markets.push(market);
            }
        }
    }
}

/// Adds `outcome` to the market, returning 1 when it replaced or lost to an existing label
fn merge_outcome(market: &mut Market, outcome: Outcome) -> usize {
    match market.outcomes.iter_mut().find(|o| o.label == outcome.label) {
        Some(existing) => {
            if outcome.last_seen >= existing.last_seen {
                *existing = outcome;
            }
            1
        }
        None => {
            market.outcomes.push(outcome);
            0
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawName {
    Plain(String),
    Named { name: String },
}

impl RawName {
    fn into_string(self) -> String {
        match self {
            RawName::Plain(s) | RawName::Named { name: s } => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(alias = "eventId", alias = "event_id")]
    id: Value,
    #[serde(default, alias = "sport_key")]
    sport: Option<RawName>,
    #[serde(default, alias = "sport_title", alias = "competition")]
    league: Option<RawName>,
    #[serde(default, alias = "commence_time", alias = "startTime", alias = "start_date")]
    start_time: Option<String>,
    #[serde(default, alias = "home_team")]
    home: Option<String>,
    #[serde(default, alias = "away_team")]
    away: Option<String>,
    #[serde(default)]
    participants: Vec<RawName>,
    #[serde(default, alias = "oddsFormat")]
    odds_format: Option<String>,
    #[serde(default)]
    bookmakers: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawBookmaker {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    last_update: Option<String>,
    #[serde(default)]
    markets: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    line: Option<f64>,
    #[serde(default)]
    last_update: Option<String>,
    #[serde(default)]
    outcomes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawOutcome {
    #[serde(alias = "label")]
    name: String,
    price: Value,
    #[serde(default)]
    point: Option<f64>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default, alias = "fair_price", alias = "sharp_price")]
    reference_price: Option<Value>,
    #[serde(default)]
    last_update: Option<String>,
}

/// Converts raw provider payloads to canonical records
#[derive(Debug, Clone)]
pub struct Normalizer {
    default_format: OddsFormat,
    max_odds_age: Option<chrono::Duration>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(OddsFormat::Decimal, None)
    }
}

impl Normalizer {
    pub fn new(default_format: OddsFormat, max_odds_age: Option<chrono::Duration>) -> Self {
        Self {
            default_format,
            max_odds_age,
        }
    }

    /// Normalize one payload; `now` stamps quotes that carry no timestamp
    pub fn normalize(&self, raw: &Value, now: DateTime<Utc>) -> Result<Snapshot, SchemaError> {
        let (entries, payload_format) = top_level_entries(raw)?;
        let format = payload_format.unwrap_or(self.default_format);

        let mut snapshot = Snapshot::default();
        for entry in entries {
            match serde_json::from_value::<RawEvent>(entry.clone()) {
                Ok(raw_event) => self.add_event(raw_event, format, now, &mut snapshot),
                Err(e) => {
                    debug!("Dropping event record: {}", e);
                    snapshot.dropped += 1;
                }
            }
        }
        Ok(snapshot)
    }

    /// Normalize several payloads into one snapshot. Payloads with an
    /// unrecognized shape are returned as errors alongside the merged result.
    pub fn normalize_all(
        &self,
        payloads: &[Value],
        now: DateTime<Utc>,
    ) -> (Snapshot, Vec<SchemaError>) {
        let mut merged = Snapshot::default();
        let mut errors = Vec::new();
        for payload in payloads {
            match self.normalize(payload, now) {
                Ok(snapshot) => merged.merge(snapshot),
                Err(e) => errors.push(e),
            }
        }
        (merged, errors)
    }

    fn add_event(&self, raw: RawEvent, format: OddsFormat, now: DateTime<Utc>, snapshot: &mut Snapshot) {
        let Some(id) = value_to_id(&raw.id) else {
            debug!("Dropping event without usable id");
            snapshot.dropped += 1;
            return;
        };

        let format = raw
            .odds_format
            .as_deref()
            .and_then(OddsFormat::parse)
            .unwrap_or(format);

        let mut participants: Vec<String> = raw.participants.into_iter().map(RawName::into_string).collect();
        if participants.is_empty() {
            participants.extend(raw.home);
            participants.extend(raw.away);
        }

        snapshot.insert_event(Event {
            id: id.clone(),
            sport: raw.sport.map(RawName::into_string).unwrap_or_default(),
            competition: raw.league.map(RawName::into_string).unwrap_or_default(),
            start_time: raw.start_time.as_deref().and_then(parse_timestamp),
            participants,
        });

        for bookmaker in raw.bookmakers {
            match serde_json::from_value::<RawBookmaker>(bookmaker) {
                Ok(book) => self.add_bookmaker(&id, book, format, now, snapshot),
                Err(e) => {
                    debug!(event_id = %id, "Dropping bookmaker record: {}", e);
                    snapshot.dropped += 1;
                }
            }
        }
    }

    fn add_bookmaker(
        &self,
        event_id: &str,
        book: RawBookmaker,
        format: OddsFormat,
        now: DateTime<Utc>,
        snapshot: &mut Snapshot,
    ) {
        let Some(bookmaker) = book.key.or(book.name).or(book.title).filter(|b| !b.is_empty()) else {
            snapshot.dropped += 1;
            return;
        };
        let book_seen = book.last_update.as_deref().and_then(parse_timestamp);

        for raw_market in book.markets {
            let raw_market = match serde_json::from_value::<RawMarket>(raw_market) {
                Ok(m) => m,
                Err(e) => {
                    debug!(event_id, bookmaker = %bookmaker, "Dropping market record: {}", e);
                    snapshot.dropped += 1;
                    continue;
                }
            };
            let Some(kind) = raw_market.key.or(raw_market.name).filter(|k| !k.is_empty()) else {
                snapshot.dropped += 1;
                continue;
            };
            let market_seen = raw_market
                .last_update
                .as_deref()
                .and_then(parse_timestamp)
                .or(book_seen);

            // Alternate lines arrive as one market with many points; each
            // point becomes its own market. Spread sides (+1.5/-1.5) share a line.
            let mut lines: Vec<(Option<i64>, Option<f64>, Vec<Outcome>)> = Vec::new();
            let mut duplicates = 0;
            for raw_outcome in raw_market.outcomes {
                let Some((outcome, point)) = self.parse_outcome(raw_outcome, format, market_seen, now, snapshot) else {
                    continue;
                };
                let point = raw_market.line.or(point);
                let key = point.map(|p| (p.abs() * 1000.0).round() as i64);
                let i = match lines.iter().position(|(k, _, _)| *k == key) {
                    Some(i) => i,
                    None => {
                        lines.push((key, point, Vec::new()));
                        lines.len() - 1
                    }
                };
                let outcomes = &mut lines[i].2;
                match outcomes.iter_mut().find(|o| o.label == outcome.label) {
                    Some(existing) => {
                        duplicates += 1;
                        if outcome.last_seen >= existing.last_seen {
                            *existing = outcome;
                        }
                    }
                    None => outcomes.push(outcome),
                }
            }
            snapshot.duplicates += duplicates;

            for (_, line, outcomes) in lines {
                snapshot.insert_market(Market {
                    id: Market::build_id(&bookmaker, &kind, line),
                    event_id: event_id.to_string(),
                    bookmaker: bookmaker.clone(),
                    kind: kind.clone(),
                    line,
                    outcomes,
                });
            }
        }
    }

    fn parse_outcome(
        &self,
        raw: Value,
        format: OddsFormat,
        fallback_seen: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        snapshot: &mut Snapshot,
    ) -> Option<(Outcome, Option<f64>)> {
        let raw: RawOutcome = match serde_json::from_value(raw) {
            Ok(o) => o,
            Err(e) => {
                debug!("Dropping outcome record: {}", e);
                snapshot.dropped += 1;
                return None;
            }
        };

        let format = raw.format.as_deref().and_then(OddsFormat::parse).unwrap_or(format);
        let Some(odds) = parse_price(&raw.price, format) else {
            debug!(label = %raw.name, price = %raw.price, "Dropping outcome with unusable price");
            snapshot.dropped += 1;
            return None;
        };

        let last_seen = raw
            .last_update
            .as_deref()
            .and_then(parse_timestamp)
            .or(fallback_seen);
        if let (Some(seen), Some(max_age)) = (last_seen, self.max_odds_age) {
            if now - seen > max_age {
                snapshot.stale += 1;
                return None;
            }
        }

        let reference_odds = raw.reference_price.as_ref().and_then(|p| parse_price(p, format));
        Some((
            Outcome {
                label: raw.name,
                odds,
                reference_odds,
                last_seen: last_seen.unwrap_or(now),
            },
            raw.point,
        ))
    }
}

fn top_level_entries(raw: &Value) -> Result<(&[Value], Option<OddsFormat>), SchemaError> {
    let (entries, format) = match raw {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(obj) => {
            let format = obj
                .get("odds_format")
                .or_else(|| obj.get("oddsFormat"))
                .and_then(Value::as_str)
                .and_then(OddsFormat::parse);
            match obj.get("data").or_else(|| obj.get("events")) {
                Some(Value::Array(items)) => (items.as_slice(), format),
                Some(other) => {
                    return Err(SchemaError(format!(
                        "event list is {}, expected array",
                        json_type(other)
                    )))
                }
                None if obj.contains_key("id") && obj.contains_key("bookmakers") => {
                    (std::slice::from_ref(raw), format)
                }
                None => {
                    let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
                    return Err(SchemaError(format!(
                        "object without event list (keys: {})",
                        keys.join(", ")
                    )));
                }
            }
        }
        other => {
            return Err(SchemaError(format!("top-level {}", json_type(other))));
        }
    };

    if !entries.is_empty() && entries.iter().all(|e| !e.is_object()) {
        return Err(SchemaError("event list contains no objects".to_string()));
    }
    Ok((entries, format))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decimal odds from a provider price, `None` for impossible prices
fn parse_price(price: &Value, format: OddsFormat) -> Option<f64> {
    let decimal = match price {
        Value::String(s) if s.contains('/') => {
            let (num, den) = s.split_once('/')?;
            fractional_to_decimal(num.trim().parse().ok()?, den.trim().parse().ok()?)
        }
        Value::String(s) => number_to_decimal(s.trim().parse().ok()?, format),
        Value::Number(n) => number_to_decimal(n.as_f64()?, format),
        _ => None,
    }?;

    (decimal.is_finite() && decimal > 1.0).then_some(decimal)
}

fn number_to_decimal(value: f64, format: OddsFormat) -> Option<f64> {
    match format {
        OddsFormat::Decimal => Some(value),
        OddsFormat::American => american_to_decimal(value),
        OddsFormat::Fractional => fractional_to_decimal(value, 1.0),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}
