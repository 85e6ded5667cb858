//! Blockstream mempool scanner - recent unconfirmed BTC transactions

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

const SOURCE: &str = "blockstream";
const CHAIN: &str = "BTC";
const MAX_TXS_PER_POLL: usize = 50;

#[derive(Debug, Deserialize)]
struct MempoolTx {
    txid: String,
    #[serde(default)]
    vin: Vec<TxInput>,
    #[serde(default)]
    vout: Vec<TxOutput>,
}

#[derive(Debug, Deserialize)]
struct TxInput {}

#[derive(Debug, Deserialize)]
struct TxOutput {
    #[serde(default)]
    value: u64,
}

/// Polls the Blockstream mempool feed. Counterparties are not individually
/// resolvable here, so they are summarized as input/output counts.
#[derive(Clone)]
pub struct BlockstreamScanner {
    config: Config,
    engine: AggregationEngine,
    metrics: Arc<MetricsService>,
    client: reqwest::Client,
}

impl BlockstreamScanner {
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
        info!(target: "BLOCKSTREAM", "Starting Bitcoin mempool scanner...");
        self.metrics.set_module_status(SOURCE, true);

        let scanner = self.clone();
        tokio::spawn(async move {
            let poll = Duration::from_secs(scanner.config.btc_mempool_poll_secs);
            let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));

            while scanner.engine.is_running() {
                match scanner.scan_once().await {
                    Ok(accepted) => {
                        backoff.reset();
                        scanner.metrics.record_poll(SOURCE);
                        debug!(target: "BLOCKSTREAM", "Poll done, {} new records", accepted);
                        sleep(poll).await;
                    }
                    Err(e) => {
                        warn!(target: "BLOCKSTREAM", "Scan failed: {}", e);
                        scanner.engine.record_error();
                        scanner.metrics.record_scan_error(SOURCE);
                        sleep(backoff.next_delay()).await;
                    }
                }
            }

            scanner.metrics.set_module_status(SOURCE, false);
            info!(target: "BLOCKSTREAM", "Blockstream scanner stopped");
        });
    }

    async fn scan_once(&self) -> Result<usize, ScanError> {
        let url = format!("{}/mempool/recent", self.config.blockstream_url);
        let txs: Vec<MempoolTx> = self.client.get(&url).send().await?.json().await?;
        debug!(target: "BLOCKSTREAM", "{} mempool transactions fetched", txs.len());

        let price = self.engine.price_of(CHAIN).unwrap_or(0.0);
        let mut accepted = 0;

        for tx in txs.into_iter().take(MAX_TXS_PER_POLL) {
            let value = total_output_btc(&tx);
            if value < self.config.min_btc_value {
                continue;
            }

            let record = TxRecord::new(
                CHAIN,
                tx.txid,
                format!("{} inputs", tx.vin.len()),
                format!("{} outputs", tx.vout.len()),
                value,
                value * price,
                BlockRef::Mempool,
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

fn total_output_btc(tx: &MempoolTx) -> f64 {
    sats_to_btc(tx.vout.iter().map(|o| o.value).sum())
}
