use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PRICE_ENDPOINT: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PRICE_TTL: Duration = Duration::from_secs(30);

/// Price used when the oracle is unreachable or returns garbage. Alerts
/// computed against it are approximate; the next successful fetch corrects
/// the conversion.
pub const DEFAULT_ETH_PRICE_USD: f64 = 2000.0;

/// Spot price of one ETH in USD at the time of the lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSnapshot {
    pub usd: f64,
}

#[derive(Deserialize)]
struct PriceResponse {
    ethereum: EthereumPrice,
}

#[derive(Deserialize)]
struct EthereumPrice {
    usd: f64,
}

struct CachedPrice {
    usd: f64,
    fetched_at: Instant,
}

/// Fetches the ETH/USD spot price. Never fails outwardly: any error yields
/// the documented default price, and a short TTL cache keeps one fetch per
/// poll window instead of one per transaction.
pub struct PriceOracle {
    client: reqwest::Client,
    endpoint: String,
    cached: Mutex<Option<CachedPrice>>,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self::with_endpoint(PRICE_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!("Price client build failed ({}); using default client", err);
                reqwest::Client::new()
            });
        PriceOracle {
            client,
            endpoint: endpoint.to_string(),
            cached: Mutex::new(None),
        }
    }

    pub async fn current_price(&self) -> PriceSnapshot {
        if let Some(usd) = self.cached_usd() {
            return PriceSnapshot { usd };
        }

        match self.fetch_usd().await {
            Ok(usd) => {
                debug!("ETH price refreshed: ${}", usd);
                self.store(usd);
                PriceSnapshot { usd }
            }
            Err(e) => {
                warn!(
                    "ETH price lookup failed ({}); using default ${}",
                    e, DEFAULT_ETH_PRICE_USD
                );
                PriceSnapshot {
                    usd: DEFAULT_ETH_PRICE_USD,
                }
            }
        }
    }

    async fn fetch_usd(&self) -> Result<f64, reqwest::Error> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?;
        let body: PriceResponse = response.json().await?;
        Ok(body.ethereum.usd)
    }

    fn cached_usd(&self) -> Option<f64> {
        let cached = self.cached.lock().expect("price cache poisoned");
        cached
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < PRICE_TTL)
            .map(|entry| entry.usd)
    }

    fn store(&self, usd: f64) {
        let mut cached = self.cached.lock().expect("price cache poisoned");
        *cached = Some(CachedPrice {
            usd,
            fetched_at: Instant::now(),
        });
    }
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_oracle_falls_back_to_default_price() {
        // Nothing listens on port 1; the connection is refused immediately.
        let oracle = PriceOracle::with_endpoint("http://127.0.0.1:1/price");
        let snapshot = oracle.current_price().await;
        assert_eq!(snapshot.usd, DEFAULT_ETH_PRICE_USD);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_populate_cache() {
        let oracle = PriceOracle::with_endpoint("http://127.0.0.1:1/price");
        oracle.current_price().await;
        assert!(oracle.cached_usd().is_none());
    }

    #[test]
    fn cache_serves_within_ttl() {
        let oracle = PriceOracle::with_endpoint("http://127.0.0.1:1/price");
        oracle.store(2500.0);
        assert_eq!(oracle.cached_usd(), Some(2500.0));
    }
}
