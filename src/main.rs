//! Odds Value Scanner
//!
//! Finds value odds and sends deduplicated Telegram alerts.

use anyhow::Context;
use clap::{Parser, Subcommand};
use odds_scanner::{
    client::{BackoffPolicy, OddsApiClient},
    config::Config,
    dedup::{AlertLedger, DedupStore, MemoryLedger},
    dispatch::{AlertDispatcher, AlertSink},
    evaluator::ValueEvaluator,
    monitor::{start_health_server, Liveness},
    normalize::Normalizer,
    notify::{LogSink, Notifier},
    scanner::{CycleOutcome, ScanScheduler},
    storage::Database,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "odds-scanner")]
#[command(about = "Scan bookmaker odds for value and alert on Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner until interrupted
    Run {
        /// Log alerts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a single scan cycle
    ScanOnce {
        /// Send alerts to Telegram (logged only by default)
        #[arg(long)]
        send: bool,
    },
    /// Show recently sent alerts
    Alerts {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Delete expired alert records
    Prune,
    /// Test Telegram notification
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { dry_run } => run_scanner(config, dry_run).await,
        Commands::ScanOnce { send } => scan_once(config, send).await,
        Commands::Alerts { limit } => show_alerts(config, limit).await,
        Commands::Prune => prune(config).await,
        Commands::TestNotify => test_notify(config).await,
    }
}

fn notifier(config: &Config) -> Notifier {
    match &config.telegram {
        Some(tg) => Notifier::new(tg.bot_token.clone(), tg.chat_id.clone()),
        None => Notifier::disabled(),
    }
}

/// Wire the pipeline. Live mode records alerts in SQLite; otherwise
/// alerts are logged and remembered only in memory.
fn build_scheduler(config: &Config, db: &Database, live: bool, liveness: Liveness) -> anyhow::Result<ScanScheduler> {
    let (sink, ledger): (Arc<dyn AlertSink>, Arc<dyn AlertLedger>) = if live {
        (Arc::new(notifier(config)), Arc::new(db.clone()))
    } else {
        (Arc::new(LogSink), Arc::new(MemoryLedger::new()))
    };

    let dedup = Arc::new(DedupStore::new(ledger, &config.dedup));
    let mut dispatcher = AlertDispatcher::new(sink, dedup);
    if let Some(tg) = &config.telegram {
        dispatcher = dispatcher
            .with_max_per_bookmaker(tg.max_per_bookmaker)
            .with_send_spacing(Duration::from_millis(tg.send_spacing_ms));
    }

    let provider = Arc::new(OddsApiClient::new(&config.provider).context("building odds client")?);
    let normalizer = Normalizer::new(
        config.provider.odds_format,
        config
            .scanner
            .max_odds_age_secs
            .map(|secs| chrono::Duration::seconds(secs as i64)),
    );

    Ok(ScanScheduler::new(
        provider,
        normalizer,
        ValueEvaluator::new(config.evaluator.clone()),
        dispatcher,
        config.scanner.clone(),
        config.provider.sports.clone(),
    )
    .with_store(db.clone())
    .with_liveness(liveness)
    .with_backoff(BackoffPolicy::from_config(&config.provider)))
}

async fn run_scanner(config: Config, dry_run: bool) -> anyhow::Result<()> {
    tracing::info!("Starting odds scanner");

    let notifier = notifier(&config);
    if dry_run {
        tracing::warn!("Running in DRY RUN mode - alerts are logged, not sent");
    } else if !notifier.is_enabled() {
        anyhow::bail!("Telegram is not configured; set [telegram] or use --dry-run");
    }

    let db = Database::connect(&config.database.path).await?;
    let liveness = Liveness::default();
    let mut scheduler = build_scheduler(&config, &db, !dry_run, liveness.clone())?;

    if config.health.enabled {
        let port = config.health.port;
        let stale_after = chrono::Duration::seconds(config.health.stale_after_secs as i64);
        let liveness = liveness.clone();
        tokio::spawn(async move {
            if let Err(e) = start_health_server(liveness, port, stale_after).await {
                tracing::error!("Health server error: {}", e);
            }
        });
    }

    if let Err(e) = notifier.startup(dry_run).await {
        tracing::warn!("Failed to send startup notification: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = scheduler.run(shutdown_rx).await {
        tracing::error!("Scanner stopped: {}", e);
        if let Err(notify_err) = notifier.error("Scanner stopped", &e.to_string()).await {
            tracing::warn!("Failed to send stop notification: {}", notify_err);
        }
        return Err(e.into());
    }
    Ok(())
}

async fn scan_once(config: Config, send: bool) -> anyhow::Result<()> {
    if send && config.telegram.is_none() {
        anyhow::bail!("Telegram is not configured; cannot --send");
    }
    let db = Database::connect(&config.database.path).await?;
    let mut scheduler = build_scheduler(&config, &db, send, Liveness::default())?;

    match scheduler.run_cycle(chrono::Utc::now()).await {
        CycleOutcome::Completed(summary) => {
            println!("\n📊 Cycle {}\n", summary.cycle_id);
            println!("  Events:     {}", summary.events);
            println!("  Markets:    {}", summary.markets);
            println!("  Outcomes:   {}", summary.outcomes);
            println!("  Dropped:    {}", summary.dropped);
            println!("  Off window: {}", summary.out_of_window);
            println!("  Signals:    {}", summary.signals);
            println!("  Sent:       {}", summary.dispatch.sent);
            println!("  Suppressed: {}", summary.dispatch.suppressed);
            println!("  Deferred:   {}", summary.dispatch.deferred);
            println!("  Failed:     {}", summary.dispatch.failed);
            Ok(())
        }
        CycleOutcome::NoData(reason) => {
            println!("No usable data: {}", reason);
            Ok(())
        }
        CycleOutcome::Retry(delay) => {
            anyhow::bail!("provider unavailable, retry in {:?}", delay)
        }
        CycleOutcome::Fatal(reason) => anyhow::bail!(reason),
    }
}

async fn show_alerts(config: Config, limit: i64) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let alerts = db.recent_alerts(limit).await?;

    if alerts.is_empty() {
        println!("No alerts recorded");
        return Ok(());
    }

    println!("\n📨 Recent Alerts\n");
    let now = chrono::Utc::now();
    for alert in alerts {
        let status = if alert.is_active(now) { "cooling" } else { "expired" };
        let event = match db.event_participants(&alert.event_id).await? {
            Some(names) if !names.is_empty() => names.join(" vs "),
            _ => alert.event_id.clone(),
        };
        println!(
            "{}  {:<32}  {:<40}  odds {:>6.2}  edge {:>7}  [{}]",
            alert.sent_at.format("%Y-%m-%d %H:%M"),
            event,
            alert.key().to_string(),
            alert.odds,
            alert.edge,
            status
        );
    }
    Ok(())
}

async fn prune(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let removed = db.prune_expired(chrono::Utc::now()).await?;
    println!("Removed {} expired alert(s)", removed);
    Ok(())
}

async fn test_notify(config: Config) -> anyhow::Result<()> {
    let notifier = notifier(&config);
    if !notifier.is_enabled() {
        anyhow::bail!("Telegram is not configured");
    }
    notifier
        .send("🧪 <b>Test notification</b>\nOdds scanner is connected.")
        .await?;
    println!("✅ Test notification sent");
    Ok(())
}
