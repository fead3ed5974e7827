use anyhow::Result;
use chrono::Utc;
use oxalert_alert::{AlertEvaluator, AlertScheduler};
use oxalert_notify::{ChannelRegistry, NotificationDispatcher};
use oxalert_server::config::ServerConfig;
use oxalert_server::metrics_provider::HttpMetricsProvider;
use oxalert_server::seed::{self, ChannelSeedFile, RuleSeedFile};
use oxalert_storage::{AlertHistoryStore, NotificationLog, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config/oxalert.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // lettre and reqwest both link rustls; pick the provider explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    oxalert_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oxalert=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-channels") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing config path")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing seed file path")
            })?;
            run_init_channels(config_path, seed_path).await
        }
        Some("init-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing config path")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing seed file path")
            })?;
            run_init_rules(config_path, seed_path).await
        }
        Some("ack") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing config path")
            })?;
            let instance_id = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing instance id")
            })?;
            let user = args.get(4).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("Missing user")
            })?;
            let note = args.get(5).map(|s| s.as_str());
            run_ack(config_path, instance_id, user, note).await
        }
        Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some(config_path) => run_server(config_path).await,
        None => run_server(DEFAULT_CONFIG_PATH).await,
    }
}

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxalert-server [config.toml]                              Run the alert engine");
    eprintln!("  oxalert-server init-channels <config.toml> <seed.json>    Import notification channels");
    eprintln!("  oxalert-server init-rules <config.toml> <seed.json>       Import alert rules and channel links");
    eprintln!("  oxalert-server ack <config.toml> <instance-id> <user> [note]");
    eprintln!("                                                            Acknowledge an alert instance");
}

fn open_store(config: &ServerConfig) -> Result<Arc<SqliteStore>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .map_err(|e| anyhow::anyhow!("Failed to open database '{}': {}", path.display(), e))?;
    Ok(Arc::new(store))
}

async fn run_init_channels(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config)?;
    let seed: ChannelSeedFile = seed::read_seed_file(seed_path)?;
    seed::init_channels(&*store, &seed).await?;
    Ok(())
}

async fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config)?;
    let seed: RuleSeedFile = seed::read_seed_file(seed_path)?;
    seed::init_rules(&*store, &*store, &seed).await?;
    Ok(())
}

async fn run_ack(config_path: &str, instance_id: &str, user: &str, note: Option<&str>) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config)?;
    let instance = store
        .acknowledge_instance(instance_id, user, note, Utc::now())
        .await?;
    tracing::info!(
        instance_id = %instance.id,
        rule_id = %instance.rule_id,
        user = %user,
        resolved = instance.resolved,
        "Alert instance acknowledged"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(config = %config_path, "Loading configuration");

    let store = open_store(&config)?;
    let metrics = Arc::new(HttpMetricsProvider::new(&config.metrics)?);

    let registry = Arc::new(ChannelRegistry::new());
    let loaded = registry.refresh(&*store).await?;
    tracing::info!(channels = loaded, "Notification channels loaded");

    let dispatcher = Arc::new(NotificationDispatcher::new(
        registry.clone(),
        store.clone(),
        config.notification.send_timeout(),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(
        store.clone(),
        store.clone(),
        metrics,
        dispatcher,
        config.evaluation.evaluator_config(),
    ));
    let scheduler = AlertScheduler::new(evaluator, config.evaluation.interval());

    // Picks up channels imported while the engine runs.
    let refresh_store = store.clone();
    let refresh_registry = registry.clone();
    let refresh_every = config.notification.refresh_interval();
    let refresh_handle = tokio::spawn(async move {
        let mut tick = interval(refresh_every);
        tick.tick().await;
        loop {
            tick.tick().await;
            match refresh_registry.refresh(&*refresh_store).await {
                Ok(count) => tracing::debug!(channels = count, "Channel registry refreshed"),
                Err(e) => tracing::error!(error = %e, "Channel registry refresh failed"),
            }
        }
    });

    let retention_days = config.notification.attempt_retention_days;
    let cleanup_store = store.clone();
    let cleanup_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600)); // Every hour
        loop {
            tick.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
            match cleanup_store.cleanup_attempts(cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up expired notification attempts")
                }
                Err(e) => tracing::error!(error = %e, "Notification attempt cleanup failed"),
                _ => {}
            }
        }
    });

    scheduler.start();
    tracing::info!(
        interval_secs = config.evaluation.interval_secs,
        database = %config.database_path().display(),
        "Alert engine started"
    );

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    scheduler.shutdown().await;
    refresh_handle.abort();
    cleanup_handle.abort();
    tracing::info!("Alert engine stopped");

    Ok(())
}
