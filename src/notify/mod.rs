//! Telegram notifications
//!
//! Alerts are sent through the Bot API `sendMessage` method with HTML
//! formatting. Message text depends only on the signal, so the same
//! signal always renders the same message.

use crate::dispatch::AlertSink;
use crate::error::DeliveryFailed;
use crate::types::ValueSignal;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram notifier
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    enabled: bool,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: TELEGRAM_API.to_string(),
            bot_token,
            chat_id,
            enabled: true,
        }
    }

    /// Notifier that drops operational messages and refuses alerts
    pub fn disabled() -> Self {
        Self {
            http: Client::new(),
            api_base: TELEGRAM_API.to_string(),
            bot_token: String::new(),
            chat_id: String::new(),
            enabled: false,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send a raw HTML message
    pub async fn send(&self, text: &str) -> Result<(), DeliveryFailed> {
        if !self.enabled {
            debug!("Telegram disabled, message dropped");
            return Ok(());
        }
        self.post(text).await
    }

    async fn post(&self, text: &str) -> Result<(), DeliveryFailed> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let resp = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryFailed(format!("transport: {}", e)))?;

        let status = resp.status();
        let body: Option<TelegramResponse> = resp.json().await.ok();
        match body {
            Some(TelegramResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Some(TelegramResponse { description, .. }) => Err(DeliveryFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                description.unwrap_or_else(|| "no description".to_string())
            ))),
            None => Err(DeliveryFailed(format!("HTTP {}: unreadable response", status.as_u16()))),
        }
    }

    pub async fn startup(&self, dry_run: bool) -> Result<(), DeliveryFailed> {
        let mode = if dry_run { "DRY RUN" } else { "LIVE" };
        self.send(&format!("🚀 <b>Odds scanner started</b> ({})", mode)).await
    }

    pub async fn error(&self, context: &str, message: &str) -> Result<(), DeliveryFailed> {
        self.send(&format!(
            "⚠️ <b>{}</b>\n{}",
            escape_html(context),
            escape_html(message)
        ))
        .await
    }
}

#[async_trait]
impl AlertSink for Notifier {
    async fn send_alert(&self, signal: &ValueSignal) -> Result<(), DeliveryFailed> {
        if !self.enabled {
            return Err(DeliveryFailed("telegram is not configured".to_string()));
        }
        self.post(&format_alert(signal)).await
    }
}

/// Sink for dry runs: logs the alert and reports success
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send_alert(&self, signal: &ValueSignal) -> Result<(), DeliveryFailed> {
        info!(
            event = %signal.event.display_name(),
            market = %signal.market_id,
            outcome = %signal.outcome_label,
            odds = signal.odds,
            edge = %signal.edge,
            "[DRY RUN] value alert"
        );
        Ok(())
    }
}

/// Render the alert message for a signal
pub fn format_alert(signal: &ValueSignal) -> String {
    let kickoff = signal
        .event
        .start_time
        .map(|t| t.format("%d %b %H:%M UTC").to_string())
        .unwrap_or_else(|| "TBD".to_string());
    let competition = if signal.event.competition.is_empty() {
        signal.event.sport.as_str()
    } else {
        signal.event.competition.as_str()
    };
    let market = match signal.line {
        Some(line) => format!("{} {}", signal.market_kind, line),
        None => signal.market_kind.clone(),
    };

    format!(
        "🎯 <b>VALUE BET</b> · +{:.1}% edge\n\n\
         ⚽ <b>{}</b>\n\
         🏆 {} · {}\n\
         📚 {}\n\n\
         Market: <b>{}</b>\n\
         Pick: <b>{}</b>\n\
         Odds: <b>{:.2}</b> (fair {:.2})\n\
         Implied {:.1}% · Fair {:.1}%",
        one_dp(signal.edge_pct()),
        escape_html(&signal.event.display_name()),
        escape_html(competition),
        kickoff,
        escape_html(&signal.bookmaker),
        escape_html(&market),
        escape_html(&signal.outcome_label),
        signal.odds,
        signal.fair_odds,
        percent(signal.implied_probability),
        percent(signal.reference_probability),
    )
}

fn percent(p: Decimal) -> Decimal {
    one_dp(p * Decimal::ONE_HUNDRED)
}

/// Decimal's `{:.1}` formatting truncates, so round half up first
fn one_dp(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn signal() -> ValueSignal {
        ValueSignal {
            event: Event {
                id: "evt-1".into(),
                sport: "soccer_epl".into(),
                competition: "EPL".into(),
                start_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap()),
                participants: vec!["Brighton & Hove".into(), "Chelsea".into()],
            },
            market_id: "softbook:totals@2.5".into(),
            bookmaker: "softbook".into(),
            market_kind: "totals".into(),
            line: Some(2.5),
            outcome_label: "Over".into(),
            odds: 2.15,
            fair_odds: 1.95,
            reference_probability: dec!(0.5128),
            implied_probability: dec!(0.4651),
            edge: dec!(0.0477),
            strategy: "reference".into(),
            detected_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_format_alert() {
        let text = format_alert(&signal());
        assert!(text.starts_with("🎯 <b>VALUE BET</b> · +4.8% edge"));
        assert!(text.contains("⚽ <b>Brighton &amp; Hove vs Chelsea</b>"));
        assert!(text.contains("🏆 EPL · 01 May 19:00 UTC"));
        assert!(text.contains("Market: <b>totals 2.5</b>"));
        assert!(text.contains("Odds: <b>2.15</b> (fair 1.95)"));
        assert!(text.contains("Implied 46.5% · Fair 51.3%"));
    }

    #[test]
    fn test_percentages_are_rounded() {
        let mut sig = signal();
        sig.edge = dec!(0.0475);
        sig.implied_probability = dec!(0.46549);
        sig.reference_probability = dec!(0.51249);
        let text = format_alert(&sig);
        assert!(text.contains("+4.8% edge"));
        assert!(text.contains("Implied 46.5% · Fair 51.2%"));

        sig.edge = dec!(0.0465);
        assert!(format_alert(&sig).contains("+4.7% edge"));

        sig.edge = dec!(0.05);
        assert!(format_alert(&sig).contains("+5.0% edge"));
        assert_eq!(percent(dec!(0.5128)), dec!(51.3));
    }

    #[test]
    fn test_format_alert_is_deterministic() {
        let mut later = signal();
        later.detected_at = later.detected_at + chrono::Duration::minutes(30);
        assert_eq!(format_alert(&signal()), format_alert(&later));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>A & B</b>"), "&lt;b&gt;A &amp; B&lt;/b&gt;");
    }

    type Inbox = Arc<Mutex<Vec<Value>>>;

    async fn send_message(
        State(inbox): State<Inbox>,
        Path(token): Path<String>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if token != "bot123:abc" {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "description": "Unauthorized"})),
            );
        }
        inbox.lock().await.push(body);
        (StatusCode::OK, Json(json!({"ok": true, "result": {}})))
    }

    async fn spawn_telegram() -> (String, Inbox) {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/{token}/sendMessage", post(send_message))
            .with_state(inbox.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), inbox)
    }

    #[tokio::test]
    async fn test_send_alert_posts_html_message() {
        let (url, inbox) = spawn_telegram().await;
        let notifier = Notifier::new("123:abc".into(), "42".into()).with_api_base(&url);

        notifier.send_alert(&signal()).await.unwrap();

        let sent = inbox.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["chat_id"], "42");
        assert_eq!(sent[0]["parse_mode"], "HTML");
        assert_eq!(sent[0]["text"], format_alert(&signal()));
    }

    #[tokio::test]
    async fn test_rejected_send_is_delivery_failure() {
        let (url, inbox) = spawn_telegram().await;
        let notifier = Notifier::new("wrong".into(), "42".into()).with_api_base(&url);

        let err = notifier.send_alert(&signal()).await.unwrap_err();
        assert!(err.0.contains("401"));
        assert!(err.0.contains("Unauthorized"));
        assert!(inbox.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_delivery_failure() {
        let notifier = Notifier::new("123:abc".into(), "42".into()).with_api_base("http://127.0.0.1:1");
        assert!(notifier.send_alert(&signal()).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_notifier() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        assert!(notifier.send("hello").await.is_ok());
        assert!(notifier.send_alert(&signal()).await.is_err());
    }
}
