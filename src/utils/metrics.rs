//! Prometheus metrics service for WhaleWatch

use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::time::Instant;
use tracing::info;

use crate::engine::SubmitOutcome;

/// Metrics service for Prometheus
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Ingestion metrics
    pub transactions: CounterVec,
    pub duplicates: Counter,
    pub rejected: CounterVec,
    pub chain_volume: CounterVec,
    pub whale_alerts: Counter,

    // Scanner metrics
    pub scan_polls: CounterVec,
    pub scan_errors: CounterVec,

    // System metrics
    pub prices: GaugeVec,
    pub history_len: GaugeVec,
    pub module_status: GaugeVec,
    pub uptime: Gauge,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Self {
        let registry = Registry::new();

        let transactions = CounterVec::new(
            Opts::new("whalewatch_transactions_total", "Accepted transactions"),
            &["chain", "class"],
        )
        .unwrap();
        let duplicates = Counter::new(
            "whalewatch_duplicates_total",
            "Submissions dropped by dedup",
        )
        .unwrap();
        let rejected = CounterVec::new(
            Opts::new("whalewatch_rejected_total", "Malformed submissions"),
            &["reason"],
        )
        .unwrap();
        let chain_volume = CounterVec::new(
            Opts::new("whalewatch_volume_total", "Native-unit volume per chain"),
            &["chain"],
        )
        .unwrap();
        let whale_alerts = Counter::new("whalewatch_whale_alerts_total", "Whale alerts sent")
            .unwrap();

        let scan_polls = CounterVec::new(
            Opts::new("whalewatch_scan_polls_total", "Successful source polls"),
            &["source"],
        )
        .unwrap();
        let scan_errors = CounterVec::new(
            Opts::new("whalewatch_scan_errors_total", "Recovered source failures"),
            &["source"],
        )
        .unwrap();

        let prices = GaugeVec::new(
            Opts::new("whalewatch_price_usd", "Latest USD quote per chain"),
            &["chain"],
        )
        .unwrap();
        let history_len = GaugeVec::new(
            Opts::new("whalewatch_history_len", "Bounded history fill level"),
            &["history"],
        )
        .unwrap();
        let module_status = GaugeVec::new(
            Opts::new("whalewatch_module_running", "Module status"),
            &["module"],
        )
        .unwrap();
        let uptime = Gauge::new("whalewatch_uptime_seconds", "Application uptime").unwrap();

        registry.register(Box::new(transactions.clone())).unwrap();
        registry.register(Box::new(duplicates.clone())).unwrap();
        registry.register(Box::new(rejected.clone())).unwrap();
        registry.register(Box::new(chain_volume.clone())).unwrap();
        registry.register(Box::new(whale_alerts.clone())).unwrap();
        registry.register(Box::new(scan_polls.clone())).unwrap();
        registry.register(Box::new(scan_errors.clone())).unwrap();
        registry.register(Box::new(prices.clone())).unwrap();
        registry.register(Box::new(history_len.clone())).unwrap();
        registry.register(Box::new(module_status.clone())).unwrap();
        registry.register(Box::new(uptime.clone())).unwrap();

        info!(target: "METRICS", "Prometheus metrics initialized");

        Self {
            registry,
            start_time: Instant::now(),
            transactions,
            duplicates,
            rejected,
            chain_volume,
            whale_alerts,
            scan_polls,
            scan_errors,
            prices,
            history_len,
            module_status,
            uptime,
        }
    }

    /// Record one submit outcome as reported by a scanner
    pub fn record_submit(&self, chain: &str, value: f64, outcome: &SubmitOutcome) {
        match outcome {
            SubmitOutcome::Accepted(class) => {
                self.transactions
                    .with_label_values(&[chain, class.label()])
                    .inc();
                self.chain_volume.with_label_values(&[chain]).inc_by(value);
            }
            SubmitOutcome::Duplicate => self.duplicates.inc(),
            SubmitOutcome::Rejected(reason) => {
                self.rejected.with_label_values(&[reason.label()]).inc()
            }
        }
    }

    pub fn record_poll(&self, source: &str) {
        self.scan_polls.with_label_values(&[source]).inc();
    }

    pub fn record_scan_error(&self, source: &str) {
        self.scan_errors.with_label_values(&[source]).inc();
    }

    pub fn record_whale_alert(&self) {
        self.whale_alerts.inc();
    }

    pub fn set_price(&self, chain: &str, price: f64) {
        self.prices.with_label_values(&[chain]).set(price);
    }

    pub fn set_history_lens(&self, all: usize, whales: usize, normal: usize) {
        self.history_len.with_label_values(&["all"]).set(all as f64);
        self.history_len
            .with_label_values(&["whale"])
            .set(whales as f64);
        self.history_len
            .with_label_values(&["normal"])
            .set(normal as f64);
    }

    /// Set module status
    pub fn set_module_status(&self, module: &str, running: bool) {
        self.module_status
            .with_label_values(&[module])
            .set(if running { 1.0 } else { 0.0 });
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics(&self) -> String {
        self.uptime.set(self.start_time.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RejectReason, TxClass};

    #[test]
    fn submit_outcomes_land_in_the_right_series() {
        let metrics = MetricsService::new();
        metrics.record_submit("ETH", 2.0, &SubmitOutcome::Accepted(TxClass::Whale));
        metrics.record_submit("ETH", 0.5, &SubmitOutcome::Duplicate);
        metrics.record_submit("BTC", -1.0, &SubmitOutcome::Rejected(RejectReason::InvalidValue));

        let text = metrics.get_metrics();
        assert!(text.contains("whalewatch_transactions_total{chain=\"ETH\",class=\"whale\"} 1"));
        assert!(text.contains("whalewatch_duplicates_total 1"));
        assert!(text.contains("whalewatch_rejected_total{reason=\"invalid_value\"} 1"));
        assert!(text.contains("whalewatch_volume_total{chain=\"ETH\"} 2"));
    }
}
