//! Configuration management
//!
//! Values are layered: TOML file, then `ODDS_SCANNER__SECTION__KEY`
//! environment variables, then the plain credential variables
//! (`ODDS_API_KEY`, `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`).

use crate::error::{Result, ScanError};
use crate::types::OddsFormat;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub scanner: ScannerSettings,
    #[serde(default)]
    pub evaluator: EvaluatorSettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    /// Load configuration from a TOML file plus environment overrides
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(path)).required(false))
            .add_source(
                config::Environment::with_prefix("ODDS_SCANNER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ODDS_API_KEY") {
            self.provider.api_key = key;
        }

        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok();
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok();
        if let Some(tg) = self.telegram.as_mut() {
            if let Some(token) = token {
                tg.bot_token = token;
            }
            if let Some(chat_id) = chat_id {
                tg.chat_id = chat_id;
            }
        } else if let (Some(bot_token), Some(chat_id)) = (token, chat_id) {
            self.telegram = Some(TelegramConfig {
                bot_token,
                chat_id,
                ..TelegramConfig::default()
            });
        }
    }

    /// Reject settings the scanner cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ScanError::Config(
                "provider.api_key is empty (set ODDS_API_KEY)".into(),
            ));
        }
        if self.provider.sports.is_empty() {
            return Err(ScanError::Config("provider.sports must not be empty".into()));
        }
        if self.scanner.poll_interval_secs == 0 {
            return Err(ScanError::Config("scanner.poll_interval_secs must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.scanner.jitter_pct) {
            return Err(ScanError::Config("scanner.jitter_pct must be in [0, 1)".into()));
        }
        if self.evaluator.min_outcomes < 2 {
            return Err(ScanError::Config("evaluator.min_outcomes must be >= 2".into()));
        }
        if self.evaluator.min_odds >= self.evaluator.max_odds {
            return Err(ScanError::Config("evaluator.min_odds must be below max_odds".into()));
        }
        if self.evaluator.max_hours_to_start == Some(0) {
            return Err(ScanError::Config("evaluator.max_hours_to_start must be positive".into()));
        }
        if self.dedup.bucket_width <= Decimal::ZERO {
            return Err(ScanError::Config("dedup.bucket_width must be positive".into()));
        }
        if let Some(tg) = &self.telegram {
            if tg.bot_token.is_empty() || tg.chat_id.is_empty() {
                return Err(ScanError::Config(
                    "telegram.bot_token and telegram.chat_id are both required".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Send the key in this header instead of the `apiKey` query parameter
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default = "default_sports")]
    pub sports: Vec<String>,
    /// Extra query parameters sent with every odds request (regions, markets, ...)
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub odds_format: OddsFormat,
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_provider_url() -> String {
    "https://api.the-odds-api.com/v4".to_string()
}
fn default_sports() -> Vec<String> {
    vec!["soccer_epl".to_string()]
}
fn default_min_request_interval_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_max_pages() -> u32 {
    10
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    4
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: String::new(),
            api_key_header: None,
            sports: default_sports(),
            query: BTreeMap::new(),
            odds_format: OddsFormat::Decimal,
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_pages: default_max_pages(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    /// Pause between consecutive alert messages
    #[serde(default = "default_send_spacing_ms")]
    pub send_spacing_ms: u64,
    /// Alerts per bookmaker per cycle, unlimited when absent
    #[serde(default = "default_max_per_bookmaker")]
    pub max_per_bookmaker: Option<usize>,
}

fn default_send_spacing_ms() -> u64 {
    1000
}
fn default_max_per_bookmaker() -> Option<usize> {
    Some(3)
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            send_spacing_ms: default_send_spacing_ms(),
            max_per_bookmaker: default_max_per_bookmaker(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScannerSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Fraction of the poll interval added or removed at random
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,
    #[serde(default = "default_max_schema_failures")]
    pub max_schema_failures: u32,
    /// Drop quotes whose provider timestamp is older than this
    #[serde(default = "default_max_odds_age_secs")]
    pub max_odds_age_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub persist_snapshots: bool,
}

fn default_poll_interval_secs() -> u64 {
    300
}
fn default_jitter_pct() -> f64 {
    0.1
}
fn default_max_auth_failures() -> u32 {
    3
}
fn default_max_schema_failures() -> u32 {
    5
}
fn default_max_odds_age_secs() -> Option<u64> {
    Some(300)
}
fn default_true() -> bool {
    true
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            jitter_pct: default_jitter_pct(),
            max_auth_failures: default_max_auth_failures(),
            max_schema_failures: default_max_schema_failures(),
            max_odds_age_secs: default_max_odds_age_secs(),
            persist_snapshots: true,
        }
    }
}

impl ScannerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Which fair-value estimate the evaluator compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FairValueKind {
    /// Provider-published fair odds per outcome
    #[default]
    Reference,
    /// De-vigged average across bookmakers
    Consensus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevigMethod {
    #[default]
    Multiplicative,
    Additive,
    Power,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluatorSettings {
    /// Minimum edge (probability points) for a signal
    #[serde(default = "default_min_edge")]
    pub min_edge: Decimal,
    /// Edges above this are treated as bad data
    #[serde(default = "default_max_edge")]
    pub max_edge: Option<Decimal>,
    #[serde(default = "default_min_outcomes")]
    pub min_outcomes: usize,
    #[serde(default = "default_min_odds")]
    pub min_odds: f64,
    #[serde(default = "default_max_odds")]
    pub max_odds: f64,
    /// Decimal places kept before threshold comparison
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub fair_value: FairValueKind,
    #[serde(default)]
    pub devig_method: DevigMethod,
    /// De-vig reference prices before use (reference strategy)
    #[serde(default)]
    pub devig_reference: bool,
    /// Take reference prices from this bookmaker instead of the provider's fair odds
    #[serde(default)]
    pub reference_bookmaker: Option<String>,
    /// Quotes per outcome required by the consensus strategy
    #[serde(default = "default_min_bookmakers")]
    pub min_bookmakers: usize,
    #[serde(default = "default_true")]
    pub drop_conflicting_sides: bool,
    /// Skip events whose kickoff has passed
    #[serde(default = "default_true")]
    pub exclude_started: bool,
    /// Only evaluate events starting within this many hours
    #[serde(default)]
    pub max_hours_to_start: Option<u64>,
    /// Bookmakers that may produce signals. Others still count as
    /// consensus peers. Empty or unset means every bookmaker.
    #[serde(default)]
    pub betting_bookmakers: Option<Vec<String>>,
}

impl EvaluatorSettings {
    /// Whether signals may be raised on this bookmaker's prices
    pub fn is_betting_bookmaker(&self, bookmaker: &str) -> bool {
        match &self.betting_bookmakers {
            Some(books) if !books.is_empty() => books.iter().any(|b| b.eq_ignore_ascii_case(bookmaker)),
            _ => true,
        }
    }
}

fn default_min_edge() -> Decimal {
    dec!(0.03)
}
fn default_max_edge() -> Option<Decimal> {
    Some(dec!(0.25))
}
fn default_min_outcomes() -> usize {
    2
}
fn default_min_odds() -> f64 {
    1.3
}
fn default_max_odds() -> f64 {
    15.0
}
fn default_precision() -> u32 {
    4
}
fn default_min_bookmakers() -> usize {
    2
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            min_edge: default_min_edge(),
            max_edge: default_max_edge(),
            min_outcomes: default_min_outcomes(),
            min_odds: default_min_odds(),
            max_odds: default_max_odds(),
            precision: default_precision(),
            fair_value: FairValueKind::Reference,
            devig_method: DevigMethod::Multiplicative,
            devig_reference: false,
            reference_bookmaker: None,
            min_bookmakers: default_min_bookmakers(),
            drop_conflicting_sides: true,
            exclude_started: true,
            max_hours_to_start: None,
            betting_bookmakers: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DedupSettings {
    #[serde(default = "default_bucket_width")]
    pub bucket_width: Decimal,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u64,
    /// Suppress until the event starts, falling back to `cooldown_hours`
    #[serde(default)]
    pub cooldown_until_start: bool,
}

fn default_bucket_width() -> Decimal {
    dec!(0.05)
}
fn default_cooldown_hours() -> u64 {
    24
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            bucket_width: default_bucket_width(),
            cooldown_hours: default_cooldown_hours(),
            cooldown_until_start: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.odds-scanner/scanner.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
    /// `/health` reports unhealthy when the last good cycle is older than this
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_health_port() -> u16 {
    8000
}
fn default_stale_after_secs() -> u64 {
    900
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_health_port(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}
