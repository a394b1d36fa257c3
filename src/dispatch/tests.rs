use super::*;
use crate::config::DedupSettings;
use crate::dedup::{AlertLedger, MemoryLedger};
use crate::error::ScanError;
use crate::types::{AlertKey, AlertRecord, Event};
use chrono::TimeZone;
use mockall::Sequence;
use rust_decimal_macros::dec;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn signal(bookmaker: &str, label: &str, odds: f64) -> ValueSignal {
    ValueSignal {
        event: Event {
            id: "evt-1".into(),
            sport: "soccer".into(),
            competition: "EPL".into(),
            start_time: None,
            participants: vec!["Home".into(), "Away".into()],
        },
        market_id: format!("{}:h2h", bookmaker),
        bookmaker: bookmaker.into(),
        market_kind: "h2h".into(),
        line: None,
        outcome_label: label.into(),
        odds,
        fair_odds: 1.95,
        reference_probability: dec!(0.5128),
        implied_probability: dec!(0.4651),
        edge: dec!(0.0477),
        strategy: "reference".into(),
        detected_at: t0(),
    }
}

fn dispatcher(sink: MockAlertSink) -> (AlertDispatcher, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let dedup = Arc::new(DedupStore::new(ledger.clone(), &DedupSettings::default()));
    (AlertDispatcher::new(Arc::new(sink), dedup), ledger)
}

#[tokio::test]
async fn test_sends_and_records_new_signal() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert()
        .withf(|s: &ValueSignal| s.outcome_label == "Home")
        .times(1)
        .returning(|_| Ok(()));
    let (dispatcher, ledger) = dispatcher(sink);

    let summary = dispatcher.dispatch(&[signal("soft", "Home", 2.15)], t0()).await.unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(ledger.records().len(), 1);
    assert_eq!(ledger.records()[0].sent_at, t0());
}

#[tokio::test]
async fn test_repeat_signal_is_suppressed() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert().times(1).returning(|_| Ok(()));
    let (dispatcher, ledger) = dispatcher(sink);
    let sig = signal("soft", "Home", 2.15);

    dispatcher.dispatch(&[sig.clone()], t0()).await.unwrap();
    let summary = dispatcher
        .dispatch(&[sig], t0() + chrono::Duration::minutes(5))
        .await
        .unwrap();

    assert_eq!(summary, DispatchSummary { suppressed: 1, ..Default::default() });
    assert_eq!(ledger.records().len(), 1);
}

#[tokio::test]
async fn test_failed_send_is_retried_and_recorded_once() {
    let mut seq = Sequence::new();
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(DeliveryFailed("timeout".into())));
    sink.expect_send_alert()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    let (dispatcher, ledger) = dispatcher(sink);
    let sig = signal("soft", "Home", 2.15);

    let first = dispatcher.dispatch(&[sig.clone()], t0()).await.unwrap();
    assert_eq!(first.failed, 1);
    assert!(ledger.records().is_empty());

    let second = dispatcher
        .dispatch(&[sig.clone()], t0() + chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(second.sent, 1);

    let third = dispatcher
        .dispatch(&[sig], t0() + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(third.suppressed, 1);
    assert_eq!(ledger.records().len(), 1);
}

#[tokio::test]
async fn test_one_failure_does_not_block_others() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert()
        .withf(|s: &ValueSignal| s.outcome_label == "Draw")
        .returning(|_| Err(DeliveryFailed("chat not found".into())));
    sink.expect_send_alert()
        .withf(|s: &ValueSignal| s.outcome_label != "Draw")
        .times(2)
        .returning(|_| Ok(()));
    let (dispatcher, ledger) = dispatcher(sink);

    let summary = dispatcher
        .dispatch(
            &[
                signal("soft", "Home", 2.15),
                signal("soft", "Draw", 3.60),
                signal("soft", "Away", 4.20),
            ],
            t0(),
        )
        .await
        .unwrap();

    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 1);
    let labels: Vec<String> = ledger.records().into_iter().map(|r| r.outcome_label).collect();
    assert_eq!(labels, vec!["Home".to_string(), "Away".to_string()]);
}

#[tokio::test]
async fn test_bookmaker_cap_defers_extra_signals() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert().times(3).returning(|_| Ok(()));
    let (dispatcher, ledger) = dispatcher(sink);
    let dispatcher = dispatcher.with_max_per_bookmaker(Some(2));

    let summary = dispatcher
        .dispatch(
            &[
                signal("soft", "Home", 2.15),
                signal("soft", "Draw", 3.60),
                signal("soft", "Away", 4.20),
                signal("other", "Home", 2.30),
            ],
            t0(),
        )
        .await
        .unwrap();

    assert_eq!(summary.sent, 3);
    assert_eq!(summary.deferred, 1);
    assert!(ledger.records().iter().all(|r| r.outcome_label != "Away"));
}

#[tokio::test(start_paused = true)]
async fn test_send_spacing() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert().times(3).returning(|_| Ok(()));
    let (dispatcher, _) = dispatcher(sink);
    let dispatcher = dispatcher.with_send_spacing(Duration::from_secs(1));

    let start = tokio::time::Instant::now();
    dispatcher
        .dispatch(
            &[
                signal("soft", "Home", 2.15),
                signal("soft", "Draw", 3.60),
                signal("soft", "Away", 4.20),
            ],
            t0(),
        )
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
}

struct BrokenLedger;

#[async_trait]
impl AlertLedger for BrokenLedger {
    async fn active_alert(&self, _key: &AlertKey, _now: DateTime<Utc>) -> Result<Option<AlertRecord>> {
        Err(ScanError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn insert_alert(&self, _record: &AlertRecord) -> Result<()> {
        Err(ScanError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn prune_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_ledger_read_failure_aborts_before_sending() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert().times(0);
    let dedup = Arc::new(DedupStore::new(Arc::new(BrokenLedger), &DedupSettings::default()));
    let dispatcher = AlertDispatcher::new(Arc::new(sink), dedup);

    let err = dispatcher
        .dispatch(&[signal("soft", "Home", 2.15)], t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Database(_)));
}

/// Reads work, writes fail
struct ReadOnlyLedger;

#[async_trait]
impl AlertLedger for ReadOnlyLedger {
    async fn active_alert(&self, _key: &AlertKey, _now: DateTime<Utc>) -> Result<Option<AlertRecord>> {
        Ok(None)
    }

    async fn insert_alert(&self, _record: &AlertRecord) -> Result<()> {
        Err(ScanError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn prune_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_ledger_write_failure_stops_further_sends() {
    let mut sink = MockAlertSink::new();
    sink.expect_send_alert()
        .withf(|s: &ValueSignal| s.outcome_label == "Home")
        .times(1)
        .returning(|_| Ok(()));
    let dedup = Arc::new(DedupStore::new(Arc::new(ReadOnlyLedger), &DedupSettings::default()));
    let dispatcher = AlertDispatcher::new(Arc::new(sink), dedup.clone());

    let signals = [signal("soft", "Home", 2.15), signal("other", "Away", 2.40)];
    let err = dispatcher.dispatch(&signals, t0()).await.unwrap_err();
    assert!(matches!(err, ScanError::Database(_)));

    // the claim is released so a later pass can try again
    let key = dedup.key_for(&signals[0]);
    assert!(dedup.claim(&key, t0()).await.unwrap().is_some());
}
