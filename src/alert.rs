use crate::classifier::WhaleEvent;
use alloy_primitives::{Address, B256, U256};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const WEBHOOK_USERNAME: &str = "🐋 Whale Alert Bot";

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    username: &'a str,
}

/// Formats whale events, writes the audit log line, and performs one
/// best-effort webhook delivery per event. Delivery failures are logged and
/// discarded; dispatch never propagates an error into the monitor loop.
pub struct AlertDispatcher {
    client: reqwest::Client,
    webhook_url: Option<String>,
    thresholds: Vec<u64>,
}

impl AlertDispatcher {
    pub fn new(webhook_url: Option<String>, thresholds: Vec<u64>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(
                    "Webhook client build failed ({}); using default client",
                    err
                );
                reqwest::Client::new()
            });
        AlertDispatcher {
            client,
            webhook_url,
            thresholds,
        }
    }

    pub async fn dispatch(&self, event: &WhaleEvent) {
        // Audit trail with full, untruncated values, written regardless of
        // whether delivery is configured or succeeds.
        match event {
            WhaleEvent::NativeTransfer {
                amount_eth,
                value_usd,
                from,
                to,
                hash,
                block,
            } => info!(
                kind = "native",
                amount_eth,
                value_usd,
                tier = severity_tier(&self.thresholds, *value_usd),
                %from,
                %to,
                %hash,
                block,
                "Whale transaction detected"
            ),
            WhaleEvent::TokenTransfer {
                token,
                raw_amount,
                from,
                to,
                hash,
                block,
            } => info!(
                kind = "token",
                %token,
                raw_amount = %raw_amount,
                %from,
                %to,
                %hash,
                block,
                "Whale transaction detected"
            ),
        }

        if let Some(url) = &self.webhook_url {
            let message = self.format_message(event);
            self.deliver(url, &message).await;
        }
    }

    async fn deliver(&self, url: &str, content: &str) {
        let payload = WebhookPayload {
            content,
            username: WEBHOOK_USERNAME,
        };
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                info!("Webhook alert delivered");
            }
            Ok(response) => {
                warn!("Webhook delivery failed: status {}", response.status());
            }
            Err(e) => {
                warn!("Webhook delivery failed: {}", e);
            }
        }
    }

    fn format_message(&self, event: &WhaleEvent) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        match event {
            WhaleEvent::NativeTransfer {
                amount_eth,
                value_usd,
                from,
                to,
                hash,
                block,
            } => {
                let marker = severity_marker(&self.thresholds, Some(*value_usd));
                format!(
                    "{marker} **ETH WHALE ALERT** {marker}\n\
                     💰 Value: ${} ({:.4} ETH)\n\
                     📤 From: `{}`\n\
                     📥 To: `{}`\n\
                     🔗 Hash: `{}`\n\
                     📦 Block: {block}\n\
                     ⏰ {timestamp}",
                    format_usd(*value_usd),
                    amount_eth,
                    short_address(from),
                    short_address(to),
                    short_hash(hash),
                )
            }
            WhaleEvent::TokenTransfer {
                token,
                raw_amount,
                from,
                to,
                hash,
                block,
            } => {
                let marker = severity_marker(&self.thresholds, None);
                format!(
                    "{marker} **TOKEN WHALE ALERT** {marker}\n\
                     🪙 Token: `{}`\n\
                     💰 Amount: {} raw units (token decimals unresolved)\n\
                     📤 From: `{}`\n\
                     📥 To: `{}`\n\
                     🔗 Hash: `{}`\n\
                     📦 Block: {block}\n\
                     ⏰ {timestamp}",
                    short_prefix(&token.to_string(), 10),
                    format_token_amount(*raw_amount),
                    short_address(from),
                    short_address(to),
                    short_hash(hash),
                )
            }
        }
    }
}

/// Index into the ascending threshold ladder: the highest threshold not
/// exceeding the value, or the lowest tier when none match.
fn severity_index(thresholds: &[u64], value_usd: f64) -> usize {
    thresholds
        .iter()
        .rposition(|threshold| value_usd >= *threshold as f64)
        .unwrap_or(0)
}

/// The threshold amount the event's display severity maps to.
pub fn severity_tier(thresholds: &[u64], value_usd: f64) -> u64 {
    thresholds
        .get(severity_index(thresholds, value_usd))
        .copied()
        .unwrap_or(0)
}

/// Red for the top tier, orange for the one below it, yellow otherwise.
/// Events without a fiat value (token transfers) take the lowest tier.
fn severity_marker(thresholds: &[u64], value_usd: Option<f64>) -> &'static str {
    let index = match value_usd {
        Some(value) => severity_index(thresholds, value),
        None => 0,
    };
    if !thresholds.is_empty() && index == thresholds.len() - 1 {
        "🔴"
    } else if thresholds.len() >= 2 && index == thresholds.len() - 2 {
        "🟠"
    } else {
        "🟡"
    }
}

/// First 10 and last 6 characters of the checksummed address.
fn short_address(address: &Address) -> String {
    let full = address.to_string();
    format!("{}...{}", &full[..10], &full[full.len() - 6..])
}

fn short_hash(hash: &B256) -> String {
    short_prefix(&hash.to_string(), 20)
}

fn short_prefix(value: &str, len: usize) -> String {
    format!("{}...", &value[..len.min(value.len())])
}

fn format_usd(value: f64) -> String {
    let fixed = format!("{:.2}", value);
    match fixed.split_once('.') {
        Some((int_part, frac_part)) => format!("{}.{}", group_thousands(int_part), frac_part),
        None => group_thousands(&fixed),
    }
}

fn format_token_amount(amount: U256) -> String {
    group_thousands(&amount.to_string())
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    const LADDER: [u64; 4] = [50_000, 100_000, 500_000, 1_000_000];

    fn dispatcher() -> AlertDispatcher {
        AlertDispatcher::new(None, LADDER.to_vec())
    }

    fn native_event(value_usd: f64) -> WhaleEvent {
        WhaleEvent::NativeTransfer {
            amount_eth: value_usd / 2000.0,
            value_usd,
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            hash: B256::repeat_byte(0x11),
            block: 18_000_000,
        }
    }

    fn token_event() -> WhaleEvent {
        WhaleEvent::TokenTransfer {
            token: Address::repeat_byte(0xdd),
            raw_amount: U256::from(1_234_567u64),
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xdd),
            hash: B256::repeat_byte(0x22),
            block: 18_000_001,
        }
    }

    #[test]
    fn severity_maps_to_highest_threshold_not_exceeding_value() {
        assert_eq!(severity_tier(&LADDER, 750_000.0), 500_000);
        assert_eq!(severity_tier(&LADDER, 100_000.0), 100_000);
        assert_eq!(severity_tier(&LADDER, 2_000_000.0), 1_000_000);
    }

    #[test]
    fn severity_defaults_to_lowest_tier_below_ladder() {
        assert_eq!(severity_tier(&LADDER, 10_000.0), 50_000);
    }

    #[test]
    fn markers_follow_tier_position() {
        assert_eq!(severity_marker(&LADDER, Some(2_000_000.0)), "🔴");
        assert_eq!(severity_marker(&LADDER, Some(750_000.0)), "🟠");
        assert_eq!(severity_marker(&LADDER, Some(120_000.0)), "🟡");
        assert_eq!(severity_marker(&LADDER, Some(10_000.0)), "🟡");
    }

    #[test]
    fn token_events_take_lowest_tier_marker() {
        assert_eq!(severity_marker(&LADDER, None), "🟡");
    }

    #[test]
    fn usd_values_are_thousands_grouped() {
        assert_eq!(format_usd(1_234_567.891), "1,234,567.89");
        assert_eq!(format_usd(999.0), "999.00");
        assert_eq!(format_usd(100_000.0), "100,000.00");
    }

    #[test]
    fn token_amounts_are_thousands_grouped() {
        assert_eq!(format_token_amount(U256::from(1_234_567u64)), "1,234,567");
        assert_eq!(format_token_amount(U256::from(7u64)), "7");
    }

    #[test]
    fn addresses_truncate_to_ten_plus_six() {
        let short = short_address(&Address::repeat_byte(0xaa));
        assert_eq!(short.len(), 10 + 3 + 6);
        assert!(short.starts_with("0x"));
        assert!(short.contains("..."));
    }

    #[test]
    fn hashes_truncate_to_twenty() {
        let short = short_hash(&B256::repeat_byte(0x11));
        assert_eq!(short.len(), 20 + 3);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn native_message_carries_value_and_truncated_parties() {
        let message = dispatcher().format_message(&native_event(1_500_000.0));
        assert!(message.starts_with("🔴"));
        assert!(message.contains("$1,500,000.00"));
        assert!(message.contains("750.0000 ETH"));
        assert!(message.contains("..."));
        assert!(message.contains("Block: 18000000"));
    }

    #[test]
    fn token_message_documents_unresolved_decimals() {
        let message = dispatcher().format_message(&token_event());
        assert!(message.starts_with("🟡"));
        assert!(message.contains("1,234,567 raw units"));
        assert!(message.contains("decimals unresolved"));
    }
}
