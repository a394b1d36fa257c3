use super::*;
use chrono::{Duration, TimeZone};
use serde_json::json;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn sample_payload() -> Value {
    json!([
        {
            "id": "evt-1",
            "sport_key": "soccer_epl",
            "sport_title": "EPL",
            "commence_time": "2024-05-01T19:00:00Z",
            "home_team": "Arsenal",
            "away_team": "Chelsea",
            "bookmakers": [
                {
                    "key": "pinnacle",
                    "title": "Pinnacle",
                    "last_update": "2024-05-01T11:59:00Z",
                    "markets": [
                        {
                            "key": "h2h",
                            "outcomes": [
                                {"name": "Arsenal", "price": 2.10},
                                {"name": "Chelsea", "price": 3.60},
                                {"name": "Draw", "price": 3.40}
                            ]
                        },
                        {
                            "key": "totals",
                            "outcomes": [
                                {"name": "Over", "price": 1.91, "point": 2.5},
                                {"name": "Under", "price": 1.95, "point": 2.5}
                            ]
                        }
                    ]
                }
            ]
        }
    ])
}

#[test]
fn test_normalizes_event_markets_and_outcomes() {
    let snapshot = Normalizer::default().normalize(&sample_payload(), now()).unwrap();

    assert_eq!(snapshot.events.len(), 1);
    let event = &snapshot.events[0];
    assert_eq!(event.id, "evt-1");
    assert_eq!(event.sport, "soccer_epl");
    assert_eq!(event.competition, "EPL");
    assert_eq!(event.participants, vec!["Arsenal", "Chelsea"]);
    assert_eq!(
        event.start_time,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap())
    );

    assert_eq!(snapshot.markets.len(), 2);
    assert_eq!(snapshot.markets[0].id, "pinnacle:h2h");
    assert_eq!(snapshot.markets[1].id, "pinnacle:totals@2.5");
    assert_eq!(snapshot.markets[1].line, Some(2.5));
    assert_eq!(snapshot.triples().count(), 5);
    assert_eq!(snapshot.outcome_count(), 5);

    let (_, _, first) = snapshot.triples().next().unwrap();
    assert_eq!(first.label, "Arsenal");
    assert_eq!(
        first.last_seen,
        Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 0).unwrap()
    );
}

#[test]
fn test_accepts_envelopes_and_single_events() {
    let normalizer = Normalizer::default();
    let wrapped = json!({ "data": sample_payload() });
    assert_eq!(normalizer.normalize(&wrapped, now()).unwrap().markets.len(), 2);

    let events = json!({ "events": sample_payload() });
    assert_eq!(normalizer.normalize(&events, now()).unwrap().markets.len(), 2);

    let single = sample_payload()[0].clone();
    assert_eq!(normalizer.normalize(&single, now()).unwrap().events.len(), 1);

    let empty = json!([]);
    assert!(normalizer.normalize(&empty, now()).unwrap().is_empty());
}

#[test]
fn test_unrecognized_top_level_is_schema_error() {
    let normalizer = Normalizer::default();
    for raw in [
        json!("maintenance"),
        json!(42),
        json!({"message": "upgrade your plan"}),
        json!({"data": "not a list"}),
        json!([1, 2, 3]),
    ] {
        assert!(normalizer.normalize(&raw, now()).is_err(), "accepted {}", raw);
    }
}

#[test]
fn test_bad_records_are_dropped_not_fatal() {
    let raw = json!([
        {"sport_key": "soccer", "bookmakers": []},
        "garbage",
        {
            "id": 77,
            "bookmakers": [
                {"markets": []},
                {
                    "key": "bet365",
                    "markets": [
                        {"outcomes": [{"name": "A", "price": 2.0}]},
                        {
                            "key": "h2h",
                            "outcomes": [
                                {"name": "A", "price": 0.8},
                                {"name": "B", "price": "n/a"},
                                {"price": 2.0},
                                {"name": "C", "price": 2.5}
                            ]
                        }
                    ]
                }
            ]
        }
    ]);

    let snapshot = Normalizer::default().normalize(&raw, now()).unwrap();
    assert_eq!(snapshot.events.len(), 1);
    assert_eq!(snapshot.events[0].id, "77");
    assert_eq!(snapshot.markets.len(), 1);
    assert_eq!(snapshot.markets[0].outcomes.len(), 1);
    assert_eq!(snapshot.markets[0].outcomes[0].label, "C");
    // missing id, non-object, keyless bookmaker, keyless market, 3 bad outcomes
    assert_eq!(snapshot.dropped, 7);
}

#[test]
fn test_converts_american_and_fractional_odds() {
    let raw = json!({
        "odds_format": "american",
        "data": [{
            "id": "e1",
            "bookmakers": [{
                "key": "dk",
                "markets": [{
                    "key": "h2h",
                    "outcomes": [
                        {"name": "Fav", "price": -200},
                        {"name": "Dog", "price": 150},
                        {"name": "Draw", "price": "5/2"},
                        {"name": "Other", "price": 3.25, "format": "decimal"}
                    ]
                }]
            }]
        }]
    });

    let snapshot = Normalizer::default().normalize(&raw, now()).unwrap();
    let odds: Vec<f64> = snapshot.markets[0].outcomes.iter().map(|o| o.odds).collect();
    assert_eq!(odds, vec![1.5, 2.5, 3.5, 3.25]);
}

#[test]
fn test_retransmitted_outcome_keeps_latest() {
    let raw = json!([{
        "id": "e1",
        "bookmakers": [{
            "key": "pinnacle",
            "markets": [{
                "key": "h2h",
                "outcomes": [
                    {"name": "A", "price": 2.10, "last_update": "2024-05-01T11:58:00Z"},
                    {"name": "B", "price": 1.80, "last_update": "2024-05-01T11:58:00Z"},
                    {"name": "A", "price": 2.20, "last_update": "2024-05-01T11:59:30Z"},
                    {"name": "B", "price": 1.70, "last_update": "2024-05-01T11:50:00Z"}
                ]
            }]
        }]
    }]);

    let snapshot = Normalizer::default().normalize(&raw, now()).unwrap();
    let market = &snapshot.markets[0];
    assert_eq!(market.outcomes.len(), 2);
    assert_eq!(market.outcome("A").unwrap().odds, 2.20);
    assert_eq!(market.outcome("B").unwrap().odds, 1.80);
    assert_eq!(snapshot.duplicates, 2);
}

#[test]
fn test_stale_quotes_are_dropped() {
    let raw = json!([{
        "id": "e1",
        "bookmakers": [{
            "key": "pinnacle",
            "markets": [{
                "key": "h2h",
                "outcomes": [
                    {"name": "A", "price": 2.1, "last_update": "2024-05-01T11:50:00Z"},
                    {"name": "B", "price": 1.8, "last_update": "2024-05-01T11:59:00Z"},
                    {"name": "C", "price": 4.0}
                ]
            }]
        }]
    }]);

    let normalizer = Normalizer::new(OddsFormat::Decimal, Some(Duration::minutes(5)));
    let snapshot = normalizer.normalize(&raw, now()).unwrap();
    let labels: Vec<&str> = snapshot.markets[0].outcomes.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["B", "C"]);
    assert_eq!(snapshot.stale, 1);
    assert_eq!(snapshot.markets[0].outcome("C").unwrap().last_seen, now());
}

#[test]
fn test_reference_prices() {
    let raw = json!([{
        "id": "e1",
        "bookmakers": [{
            "key": "softbook",
            "markets": [{
                "key": "h2h",
                "outcomes": [
                    {"name": "A", "price": 2.15, "fair_price": 1.95},
                    {"name": "B", "price": 1.80}
                ]
            }]
        }]
    }]);

    let snapshot = Normalizer::default().normalize(&raw, now()).unwrap();
    assert_eq!(snapshot.markets[0].outcomes[0].reference_odds, Some(1.95));
    assert_eq!(snapshot.markets[0].outcomes[1].reference_odds, None);
}

#[test]
fn test_normalize_all_merges_and_reports_schema_errors() {
    let normalizer = Normalizer::default();
    let mut later = sample_payload();
    later[0]["bookmakers"][0]["last_update"] = json!("2024-05-01T11:59:50Z");
    later[0]["bookmakers"][0]["markets"][0]["outcomes"][0]["price"] = json!(2.25);

    let payloads = vec![sample_payload(), json!({"error": "quota"}), later];
    let (snapshot, errors) = normalizer.normalize_all(&payloads, now());

    assert_eq!(errors.len(), 1);
    assert_eq!(snapshot.events.len(), 1);
    assert_eq!(snapshot.markets.len(), 2);
    assert_eq!(snapshot.markets[0].outcome("Arsenal").unwrap().odds, 2.25);
}

#[test]
fn test_parse_price_rejects_impossible_values() {
    assert_eq!(parse_price(&json!(1.0), OddsFormat::Decimal), None);
    assert_eq!(parse_price(&json!(-110), OddsFormat::Decimal), None);
    assert_eq!(parse_price(&json!(50), OddsFormat::American), None);
    assert_eq!(parse_price(&json!("0/1"), OddsFormat::Decimal), None);
    assert_eq!(parse_price(&json!(null), OddsFormat::Decimal), None);
    assert_eq!(parse_price(&json!("2.5"), OddsFormat::Decimal), Some(2.5));
}

#[test]
fn test_alternate_lines_become_separate_markets() {
    let raw = json!([{
        "id": "e1",
        "bookmakers": [{
            "key": "softbook",
            "markets": [
                {
                    "key": "alternate_totals",
                    "outcomes": [
                        {"name": "Over", "price": 1.80, "point": 2.5},
                        {"name": "Under", "price": 2.00, "point": 2.5},
                        {"name": "Over", "price": 2.60, "point": 3.5},
                        {"name": "Under", "price": 1.45, "point": 3.5}
                    ]
                },
                {
                    "key": "spreads",
                    "outcomes": [
                        {"name": "Arsenal", "price": 1.95, "point": -1.5},
                        {"name": "Chelsea", "price": 1.87, "point": 1.5}
                    ]
                }
            ]
        }]
    }]);

    let snapshot = Normalizer::default().normalize(&raw, now()).unwrap();
    assert_eq!(snapshot.duplicates, 0);
    assert_eq!(snapshot.markets.len(), 3);

    let low = &snapshot.markets[0];
    assert_eq!(low.id, "softbook:alternate_totals@2.5");
    assert_eq!(low.outcome("Over").unwrap().odds, 1.80);
    assert_eq!(low.outcome("Under").unwrap().odds, 2.00);

    let high = &snapshot.markets[1];
    assert_eq!(high.id, "softbook:alternate_totals@3.5");
    assert_eq!(high.line, Some(3.5));
    assert_eq!(high.outcome("Over").unwrap().odds, 2.60);
    assert_eq!(high.outcome("Under").unwrap().odds, 1.45);

    // both sides of a handicap stay in one market
    let spread = &snapshot.markets[2];
    assert_eq!(spread.id, "softbook:spreads@-1.5");
    assert_eq!(spread.outcomes.len(), 2);
}
