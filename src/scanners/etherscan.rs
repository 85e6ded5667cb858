//! Etherscan block scanner - polls the latest ETH block for transactions

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{AggregationEngine, BlockRef, TxRecord};
use crate::utils::MetricsService;

use super::{clean_address, hex_to_u64, http_client, wei_hex_to_eth, Backoff, ScanError};

const SOURCE: &str = "etherscan";
const CHAIN: &str = "ETH";
const ADDRESS_LEN: usize = 42;

#[derive(Debug, Deserialize)]
struct ProxyResponse<T> {
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct EthBlock {
    #[serde(default)]
    transactions: Vec<EthBlockTx>,
}

#[derive(Debug, Deserialize)]
struct EthBlockTx {
    hash: String,
    #[serde(default)]
    from: String,
    to: Option<String>,
    #[serde(default)]
    value: String,
}

/// Polls the Etherscan proxy API for the current block and submits every
/// transaction above the configured ETH floor.
#[derive(Clone)]
pub struct EtherscanScanner {
    config: Config,
    engine: AggregationEngine,
    metrics: Arc<MetricsService>,
    client: reqwest::Client,
}

impl EtherscanScanner {
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

    /// Start the polling loop. Without an API key the scanner stays idle so
    /// the BTC feeds keep running.
    pub fn start(&self) {
        if self.config.etherscan_api_key.is_none() {
            warn!(target: "ETHERSCAN", "No ETHERSCAN_API_KEY set - ETH scanning disabled");
            self.metrics.set_module_status(SOURCE, false);
            return;
        }

        info!(target: "ETHERSCAN", "Starting Etherscan block scanner...");
        self.metrics.set_module_status(SOURCE, true);

        let scanner = self.clone();
        tokio::spawn(async move {
            let poll = Duration::from_secs(scanner.config.eth_poll_secs);
            let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));

            while scanner.engine.is_running() {
                match scanner.scan_once().await {
                    Ok(accepted) => {
                        backoff.reset();
                        scanner.metrics.record_poll(SOURCE);
                        debug!(target: "ETHERSCAN", "Poll done, {} new records", accepted);
                        sleep(poll).await;
                    }
                    Err(e) => {
                        warn!(target: "ETHERSCAN", "Scan failed: {}", e);
                        scanner.engine.record_error();
                        scanner.metrics.record_scan_error(SOURCE);
                        sleep(backoff.next_delay()).await;
                    }
                }
            }

            scanner.metrics.set_module_status(SOURCE, false);
            info!(target: "ETHERSCAN", "Etherscan scanner stopped");
        });
    }

    async fn scan_once(&self) -> Result<usize, ScanError> {
        let block_num = self.fetch_block_number().await?;
        let block = self.fetch_block(block_num).await?;
        debug!(
            target: "ETHERSCAN",
            "Block {} has {} transactions",
            block_num,
            block.transactions.len()
        );

        let price = self.engine.price_of(CHAIN).unwrap_or(0.0);
        let mut accepted = 0;

        for tx in block.transactions {
            let Some(value) = wei_hex_to_eth(&tx.value) else {
                continue;
            };
            if value < self.config.min_eth_value {
                continue;
            }

            let to = match tx.to {
                Some(ref addr) if !addr.is_empty() => clean_address(addr, ADDRESS_LEN),
                _ => "Contract".to_string(),
            };
            let record = TxRecord::new(
                CHAIN,
                tx.hash,
                clean_address(&tx.from, ADDRESS_LEN),
                to,
                value,
                value * price,
                BlockRef::Height(block_num),
            );

            let outcome = self.engine.submit(record);
            self.metrics.record_submit(CHAIN, value, &outcome);
            if outcome.is_accepted() {
                accepted += 1;
            }
        }

        Ok(accepted)
    }

    async fn fetch_block_number(&self) -> Result<u64, ScanError> {
        let api_key = self.config.etherscan_api_key.as_deref().unwrap_or("");
        let response: ProxyResponse<String> = self
            .client
            .get(&self.config.etherscan_url)
            .query(&[
                ("module", "proxy"),
                ("action", "eth_blockNumber"),
                ("apikey", api_key),
            ])
            .send()
            .await?
            .json()
            .await?;

        response
            .result
            .as_deref()
            .and_then(hex_to_u64)
            .ok_or_else(|| ScanError::Payload("eth_blockNumber returned no result".to_string()))
    }

    async fn fetch_block(&self, block_num: u64) -> Result<EthBlock, ScanError> {
        let api_key = self.config.etherscan_api_key.as_deref().unwrap_or("");
        let tag = format!("{:#x}", block_num);
        let response: ProxyResponse<EthBlock> = self
            .client
            .get(&self.config.etherscan_url)
            .query(&[
                ("module", "proxy"),
                ("action", "eth_getBlockByNumber"),
                ("tag", tag.as_str()),
                ("boolean", "true"),
                ("apikey", api_key),
            ])
            .send()
            .await?
            .json()
            .await?;

        response
            .result
            .ok_or_else(|| ScanError::Payload(format!("block {} missing from response", block_num)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proxy_block_payload() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "number": "0x14d4f3d",
                "transactions": [
                    {"hash": "0xaaa", "from": "0xf1", "to": "0xf2", "value": "0x14d1120d7b160000"},
                    {"hash": "0xbbb", "from": "0xf3", "to": null, "value": "0x0"}
                ]
            }
        }"#;
        let parsed: ProxyResponse<EthBlock> = serde_json::from_str(raw).unwrap();
        let block = parsed.result.unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(wei_hex_to_eth(&block.transactions[0].value), Some(1.5));
        assert!(block.transactions[1].to.is_none());
    }

    #[test]
    fn missing_result_is_none() {
        let parsed: ProxyResponse<String> =
            serde_json::from_str(r#"{"status":"0","message":"NOTOK"}"#).unwrap();
        assert!(parsed.result.is_none());
    }
}
