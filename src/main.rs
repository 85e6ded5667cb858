//! WhaleWatch - Multi-Chain Whale Transaction Tracker
//!
//! Polls several independent feeds (Etherscan blocks for ETH, Blockstream
//! mempool and blockchain.info unconfirmed transactions for BTC), dedups and
//! classifies every transaction against per-chain whale thresholds, and
//! serves live histories, stats and alerts over HTTP/WebSocket.
//!
//! This is a **monitoring-only** tool - no wallet or trading functionality.

mod config;
mod dashboard;
mod engine;
mod scanners;
mod utils;

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use config::Config;
use dashboard::DashboardServer;
use engine::AggregationEngine;
use scanners::{BlockchainInfoScanner, BlockstreamScanner, EtherscanScanner};
use utils::{init_logger, AlertService, MetricsService, PriceOracle};

const BANNER: &str = r#"
    ╔══════════════════════════════════════════════════════╗
    ║              🐋  W H A L E W A T C H  🐋             ║
    ║     Multi-Chain Whale Transaction Tracker - LIVE     ║
    ║       ETH Blocks | BTC Mempool | BTC Unconfirmed     ║
    ╚══════════════════════════════════════════════════════╝
"#;

/// WhaleWatch application
pub struct WhaleWatch {
    config: Config,
    engine: AggregationEngine,
    alerts: Arc<AlertService>,
    metrics: Arc<MetricsService>,
    oracle: PriceOracle,
    etherscan: EtherscanScanner,
    blockstream: BlockstreamScanner,
    blockchain_info: BlockchainInfoScanner,
}

impl WhaleWatch {
    /// Create a new WhaleWatch instance
    pub fn new() -> Result<Self> {
        let config = Config::from_env();

        // Initialize services
        let engine = AggregationEngine::from_config(&config);
        let alerts = Arc::new(AlertService::new(config.clone()));
        let metrics = Arc::new(MetricsService::new());

        // Initialize the oracle and one scanner per feed
        let oracle = PriceOracle::new(config.clone(), engine.clone(), Arc::clone(&metrics))?;
        let etherscan = EtherscanScanner::new(config.clone(), engine.clone(), Arc::clone(&metrics))?;
        let blockstream =
            BlockstreamScanner::new(config.clone(), engine.clone(), Arc::clone(&metrics))?;
        let blockchain_info =
            BlockchainInfoScanner::new(config.clone(), engine.clone(), Arc::clone(&metrics))?;

        Ok(Self {
            config,
            engine,
            alerts,
            metrics,
            oracle,
            etherscan,
            blockstream,
            blockchain_info,
        })
    }

    /// Start WhaleWatch
    pub async fn start(&self) -> Result<()> {
        println!("{}", BANNER);

        info!(target: "WHALEWATCH", "Initializing WhaleWatch...");
        info!(
            target: "WHALEWATCH",
            "Whale thresholds: {:?}",
            self.config.whale_thresholds
        );

        // Link the whale event stream FIRST so no early whale goes unalerted
        self.link_whale_alerts();

        // Initial quotes before any record is valued; defaults stay on failure
        if let Err(e) = self.oracle.refresh_once().await {
            warn!(target: "WHALEWATCH", "Initial price fetch failed, using defaults: {}", e);
            self.engine.record_error();
        }
        self.oracle.start();

        // Start all scanners
        info!(target: "WHALEWATCH", "Starting scanners...");
        self.etherscan.start();
        self.blockstream.start();
        self.blockchain_info.start();

        info!(target: "WHALEWATCH", "✅ All scanners started!");
        info!(target: "WHALEWATCH", "Dashboard: http://localhost:{}", self.config.dashboard_port);

        // Serve the dashboard (blocks until shutdown)
        let dashboard = DashboardServer::new(
            self.config.clone(),
            self.engine.clone(),
            Arc::clone(&self.alerts),
            Arc::clone(&self.metrics),
        );

        dashboard.start().await?;

        Ok(())
    }

    /// Fan whale events out to the alert service and metrics
    fn link_whale_alerts(&self) {
        let mut whale_rx = self.engine.subscribe_whales();
        let alerts = Arc::clone(&self.alerts);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            info!(target: "WHALEWATCH", "Whale alert link active");

            loop {
                match whale_rx.recv().await {
                    Ok(tx) => {
                        info!(
                            target: "WHALE",
                            "🚨 WHALE {}: {:.4} = ${:.0} 🚨",
                            tx.chain, tx.value, tx.usd
                        );
                        metrics.record_whale_alert();
                        if let Err(e) = alerts.alert_whale(&tx).await {
                            error!(target: "WHALE", "Failed to send whale alert: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "WHALE", "Whale link lagged {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(target: "WHALE", "Whale channel closed");
                        break;
                    }
                }
            }
        });
    }

    /// Graceful shutdown
    pub fn shutdown(&self) {
        info!(target: "WHALEWATCH", "Shutting down...");

        self.engine.stop();

        let stats = self.engine.stats();
        info!(
            target: "WHALEWATCH",
            "✅ Final: {} TX | {} whales | {} errors",
            stats.total_tx, stats.whales, stats.errors
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logger();

    // Create and start WhaleWatch
    let whalewatch = match WhaleWatch::new() {
        Ok(ww) => ww,
        Err(e) => {
            error!(target: "WHALEWATCH", "Failed to initialize: {}", e);
            return Err(e);
        }
    };

    // Setup shutdown signal handler
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    // Run the application
    tokio::select! {
        result = whalewatch.start() => {
            if let Err(e) = result {
                error!(target: "WHALEWATCH", "Fatal error: {}", e);
            }
        }
        _ = shutdown_signal => {
            whalewatch.shutdown();
        }
    }

    Ok(())
}
