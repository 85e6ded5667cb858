//! Price oracle - periodic CoinGecko refresh of the engine's price table
//!
//! A failed refresh keeps the last-known snapshot: ingestion never blocks on
//! stale prices.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::AggregationEngine;
use crate::scanners::http_client;
use crate::utils::MetricsService;

/// `{"ethereum": {"usd": 3200.0}, ...}`
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

#[derive(Clone)]
pub struct PriceOracle {
    config: Config,
    engine: AggregationEngine,
    metrics: Arc<MetricsService>,
    client: reqwest::Client,
}

impl PriceOracle {
    pub fn new(
        config: Config,
        engine: AggregationEngine,
        metrics: Arc<MetricsService>,
    ) -> Result<Self> {
        let client = http_client(config.http_timeout_secs)?;
        Ok(Self {
            config,
            engine,
            metrics,
            client,
        })
    }

    /// Fetch quotes once and replace the engine's price table. Chains missing
    /// from the response keep their previous quote.
    pub async fn refresh_once(&self) -> Result<()> {
        let ids: Vec<&str> = self.config.coin_ids.iter().map(|(id, _)| id.as_str()).collect();
        let url = format!("{}/simple/price", self.config.coingecko_url);

        let response: SimplePriceResponse = self
            .client
            .get(&url)
            .query(&[("ids", ids.join(",").as_str()), ("vs_currencies", "usd")])
            .send()
            .await?
            .json()
            .await?;

        let mut prices = self.engine.prices();
        for (coin_id, chain) in &self.config.coin_ids {
            if let Some(quote) = response.get(coin_id).and_then(|m| m.get("usd")) {
                prices.insert(chain.clone(), *quote);
                self.metrics.set_price(chain, *quote);
            }
        }

        info!(
            target: "PRICES",
            "Prices updated: {}",
            prices
                .iter()
                .map(|(c, p)| format!("{} ${:.0}", c, p))
                .collect::<Vec<_>>()
                .join(" | ")
        );
        self.engine.update_prices(prices);

        Ok(())
    }

    /// Start the periodic refresh loop
    pub fn start(&self) {
        let oracle = self.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(oracle.config.price_refresh_secs);

            while oracle.engine.is_running() {
                sleep(interval).await;
                if let Err(e) = oracle.refresh_once().await {
                    // Last-known snapshot stays in effect
                    warn!(target: "PRICES", "Price refresh failed: {}", e);
                    oracle.engine.record_error();
                }
            }

            info!(target: "PRICES", "Price oracle stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_price_payload() {
        let raw = r#"{"ethereum": {"usd": 3187.42}, "bitcoin": {"usd": 97650.0}}"#;
        let parsed: SimplePriceResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed["ethereum"]["usd"], 3187.42);
        assert_eq!(parsed["bitcoin"]["usd"], 97650.0);
    }
}
