use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MIN_VALUE_USD: f64 = 100_000.0;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
const DEFAULT_LOG_FILE: &str = "whale_alerts.log";
const DEFAULT_ALERT_THRESHOLDS: &str = "50000,100000,500000,1000000";

#[derive(Debug, Clone)]
pub struct Config {
    pub eth_rpc_url: String,
    pub min_value_usd: f64,
    pub check_interval: Duration,
    pub log_file: String,
    pub webhook_url: Option<String>,
    pub watched_tokens: HashSet<Address>,
    pub alert_thresholds: Vec<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let eth_rpc_url = std::env::var("ETH_RPC_URL")
            .context("ETH_RPC_URL must be set in .env")?;

        let min_value_usd = match std::env::var("MIN_TRANSACTION_VALUE_USD") {
            Ok(raw) => raw
                .parse()
                .context("Invalid MIN_TRANSACTION_VALUE_USD value")?,
            Err(_) => DEFAULT_MIN_VALUE_USD,
        };

        let check_interval_secs = match std::env::var("CHECK_INTERVAL_SECONDS") {
            Ok(raw) => raw.parse().context("Invalid CHECK_INTERVAL_SECONDS value")?,
            Err(_) => DEFAULT_CHECK_INTERVAL_SECS,
        };

        let log_file =
            std::env::var("LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());

        let webhook_url = std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let watched_tokens =
            parse_token_list(&std::env::var("WATCHED_TOKENS").unwrap_or_default())?;

        let alert_thresholds = parse_thresholds(
            &std::env::var("ALERT_THRESHOLDS")
                .unwrap_or_else(|_| DEFAULT_ALERT_THRESHOLDS.to_string()),
        )?;

        Ok(Config {
            eth_rpc_url,
            min_value_usd,
            check_interval: Duration::from_secs(check_interval_secs),
            log_file,
            webhook_url,
            watched_tokens,
            alert_thresholds,
        })
    }
}

/// Parses a comma-separated list of ERC-20 contract addresses. Matching is
/// case-insensitive because entries are decoded into `Address` values.
pub fn parse_token_list(raw: &str) -> Result<HashSet<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            Address::from_str(entry)
                .with_context(|| format!("Invalid token address in WATCHED_TOKENS: {}", entry))
        })
        .collect()
}

/// Parses the comma-separated alert threshold ladder. Values must be in
/// ascending order; severity derivation depends on it.
pub fn parse_thresholds(raw: &str) -> Result<Vec<u64>> {
    let thresholds: Vec<u64> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse()
                .with_context(|| format!("Invalid amount in ALERT_THRESHOLDS: {}", entry))
        })
        .collect::<Result<_>>()?;

    if thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
        anyhow::bail!("ALERT_THRESHOLDS must be strictly ascending");
    }

    Ok(thresholds)
}
