use anyhow::Result;
use std::ffi::OsStr;
use std::path::Path;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use whale_watch::alert::AlertDispatcher;
use whale_watch::classifier::Classifier;
use whale_watch::config::Config;
use whale_watch::monitor::Monitor;
use whale_watch::price::PriceOracle;
use whale_watch::rpc::ChainClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let _log_guard = init_logging(&config.log_file);

    info!("Starting whale transaction monitor");
    info!("Minimum alert value: ${}", config.min_value_usd);
    info!("Check interval: {}s", config.check_interval.as_secs());
    info!("Watched tokens: {}", config.watched_tokens.len());
    info!(
        "Webhook delivery: {}",
        if config.webhook_url.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let client = ChainClient::new(&config.eth_rpc_url)?;
    info!("RPC client connected");

    let oracle = PriceOracle::new();
    let classifier = Classifier::new(&config);
    let dispatcher = AlertDispatcher::new(
        config.webhook_url.clone(),
        config.alert_thresholds.clone(),
    );
    let mut monitor = Monitor::new(client, oracle, classifier, dispatcher, config.check_interval);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested; finishing the current cycle");
            let _ = stop_tx.send(true);
        }
    });

    if let Err(e) = monitor.run(stop_rx).await {
        error!("Monitor error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Console plus file logging, the file layer matching the configured log
/// destination. The returned guard must live for the whole process so the
/// non-blocking writer flushes on exit.
fn init_logging(log_file: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let log_path = Path::new(log_file);
    let log_dir = log_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let log_name = log_path
        .file_name()
        .unwrap_or_else(|| OsStr::new("whale_alerts.log"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    guard
}
