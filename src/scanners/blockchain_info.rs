//! blockchain.info scanner - second, independent BTC unconfirmed feed
//!
//! Reports the same chain as the Blockstream scanner on purpose: the engine's
//! (chain, hash) dedup is what keeps the two sources from double counting.

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{AggregationEngine, BlockRef, TxRecord};
use crate::utils::MetricsService;

use super::{http_client, sats_to_btc, Backoff, ScanError};

const SOURCE: &str = "blockchain_info";
const CHAIN: &str = "BTC";
const MAX_TXS_PER_POLL: usize = 30;

#[derive(Debug, Deserialize)]
struct UnconfirmedResponse {
    #[serde(default)]
    txs: Vec<UnconfirmedTx>,
}

#[derive(Debug, Deserialize)]
struct UnconfirmedTx {
    hash: String,
    #[serde(default)]
    out: Vec<UnconfirmedOut>,
}

#[derive(Debug, Deserialize)]
struct UnconfirmedOut {
    #[serde(default)]
    value: u64,
}

#[derive(Clone)]
pub struct BlockchainInfoScanner {
    config: Config,
    engine: AggregationEngine,
    metrics: Arc<MetricsService>,
    client: reqwest::Client,
}

impl BlockchainInfoScanner {
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

    pub fn start(&self) {
        info!(target: "BLOCKCHAIN_INFO", "Starting blockchain.info scanner...");
        self.metrics.set_module_status(SOURCE, true);

        let scanner = self.clone();
        tokio::spawn(async move {
            let poll = Duration::from_secs(scanner.config.btc_unconfirmed_poll_secs);
            let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));

            while scanner.engine.is_running() {
                match scanner.scan_once().await {
                    Ok(accepted) => {
                        backoff.reset();
                        scanner.metrics.record_poll(SOURCE);
                        debug!(target: "BLOCKCHAIN_INFO", "Poll done, {} new records", accepted);
                        sleep(poll).await;
                    }
                    Err(e) => {
                        warn!(target: "BLOCKCHAIN_INFO", "Scan failed: {}", e);
                        scanner.engine.record_error();
                        scanner.metrics.record_scan_error(SOURCE);
                        sleep(backoff.next_delay()).await;
                    }
                }
            }

            scanner.metrics.set_module_status(SOURCE, false);
            info!(target: "BLOCKCHAIN_INFO", "blockchain.info scanner stopped");
        });
    }

    async fn scan_once(&self) -> Result<usize, ScanError> {
        let url = format!(
            "{}/unconfirmed-transactions?format=json",
            self.config.blockchain_info_url
        );
        let response: UnconfirmedResponse = self.client.get(&url).send().await?.json().await?;
        debug!(target: "BLOCKCHAIN_INFO", "{} unconfirmed transactions fetched", response.txs.len());

        let price = self.engine.price_of(CHAIN).unwrap_or(0.0);
        let mut accepted = 0;

        for tx in response.txs.into_iter().take(MAX_TXS_PER_POLL) {
            let value = sats_to_btc(tx.out.iter().map(|o| o.value).sum());
            if value < self.config.min_btc_value {
                continue;
            }

            let record = TxRecord::new(
                CHAIN,
                tx.hash,
                "Multiple",
                "Multiple",
                value,
                value * price,
                BlockRef::Unconfirmed,
            );

            let outcome = self.engine.submit(record);
            self.metrics.record_submit(CHAIN, value, &outcome);
            if outcome.is_accepted() {
                accepted += 1;
            }
        }

        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unconfirmed_payload() {
        let raw = r#"{
            "txs": [
                {"hash": "aa11", "out": [{"value": 100000}, {"value": 250000}]},
                {"hash": "bb22"}
            ]
        }"#;
        let parsed: UnconfirmedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.txs.len(), 2);
        let total: u64 = parsed.txs[0].out.iter().map(|o| o.value).sum();
        assert_eq!(sats_to_btc(total), 0.0035);
        assert!(parsed.txs[1].out.is_empty());
    }

    #[test]
    fn empty_body_yields_no_txs() {
        let parsed: UnconfirmedResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.txs.is_empty());
    }
}
