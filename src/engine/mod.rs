//! Aggregation engine - the shared store behind every source adapter
//!
//! All mutable state (dedup set, bounded histories, counters, price table)
//! lives behind one mutex. Each submit or snapshot runs as a single critical
//! section doing O(small constant) work and no I/O, so coarse locking keeps
//! every caller consistent without contention worth optimizing away.

pub mod history;
pub mod record;

pub use record::{BlockRef, TxClass, TxRecord};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use history::BoundedHistory;

/// Why a submission was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyHash,
    InvalidValue,
}

impl RejectReason {
    pub fn label(self) -> &'static str {
        match self {
            RejectReason::EmptyHash => "empty_hash",
            RejectReason::InvalidValue => "invalid_value",
        }
    }
}

/// Outcome of a single submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(TxClass),
    /// The (chain, hash) key was already seen. Not an error.
    Duplicate,
    /// Malformed input, no state was mutated.
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

/// Running counters, derived solely from accepted submissions
/// (except `errors`, which adapters report advisorily)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub total_tx: u64,
    pub whales: u64,
    pub normal: u64,
    pub errors: u64,
    /// Cumulative native-unit volume per chain
    pub volume: HashMap<String, f64>,
}

/// Point-in-time copy of engine state, safe to read without synchronization
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub prices: HashMap<String, f64>,
    pub stats: TrackerStats,
    pub taken_at: DateTime<Utc>,
    /// Seconds since the last accepted record, if any
    pub last_accepted_secs: Option<f64>,
    pub recent: Vec<TxRecord>,
    pub whales: Vec<TxRecord>,
}

struct EngineState {
    seen: HashSet<(String, String)>,
    all: BoundedHistory<TxRecord>,
    whales: BoundedHistory<TxRecord>,
    normals: BoundedHistory<TxRecord>,
    stats: TrackerStats,
    prices: HashMap<String, f64>,
    last_accepted: Option<Instant>,
}

/// Aggregation engine shared by all scanners, the price oracle and the dashboard
pub struct AggregationEngine {
    inner: Arc<Mutex<EngineState>>,
    thresholds: Arc<HashMap<String, f64>>,
    whale_sender: broadcast::Sender<TxRecord>,
    is_running: Arc<AtomicBool>,
}

impl AggregationEngine {
    pub fn new(
        thresholds: HashMap<String, f64>,
        initial_prices: HashMap<String, f64>,
        all_cap: usize,
        whale_cap: usize,
        normal_cap: usize,
    ) -> Self {
        let (whale_sender, _) = broadcast::channel(1000);

        info!(
            target: "ENGINE",
            "Engine ready: thresholds={:?}, caps all={}/whale={}/normal={}",
            thresholds, all_cap, whale_cap, normal_cap
        );

        Self {
            inner: Arc::new(Mutex::new(EngineState {
                seen: HashSet::new(),
                all: BoundedHistory::new(all_cap),
                whales: BoundedHistory::new(whale_cap),
                normals: BoundedHistory::new(normal_cap),
                stats: TrackerStats::default(),
                prices: initial_prices,
                last_accepted: None,
            })),
            thresholds: Arc::new(thresholds),
            whale_sender,
            is_running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.whale_thresholds.clone(),
            config.initial_prices.clone(),
            config.all_history_cap,
            config.whale_history_cap,
            config.normal_history_cap,
        )
    }

    /// Subscribe to whale-classified records. Fire-and-forget: an unconsumed
    /// or lagging receiver never blocks or fails ingestion.
    pub fn subscribe_whales(&self) -> broadcast::Receiver<TxRecord> {
        self.whale_sender.subscribe()
    }

    /// Ingest one normalized record. The whole mutation is atomic: no caller
    /// ever observes counters and histories out of step.
    pub fn submit(&self, mut record: TxRecord) -> SubmitOutcome {
        if record.hash.is_empty() {
            return SubmitOutcome::Rejected(RejectReason::EmptyHash);
        }
        if !record.value.is_finite() || record.value < 0.0 {
            return SubmitOutcome::Rejected(RejectReason::InvalidValue);
        }

        let class = self.classify(&record.chain, record.value);
        record.class = class;

        {
            let mut state = self.inner.lock();

            if !state.seen.insert(record.dedup_key()) {
                return SubmitOutcome::Duplicate;
            }

            state.all.push(record.clone());
            match class {
                TxClass::Whale => {
                    state.whales.push(record.clone());
                    state.stats.whales += 1;
                }
                TxClass::Normal => {
                    state.normals.push(record.clone());
                    state.stats.normal += 1;
                }
            }
            state.stats.total_tx += 1;
            *state.stats.volume.entry(record.chain.clone()).or_insert(0.0) += record.value;
            state.last_accepted = Some(Instant::now());
        }

        // Emitted outside the lock so slow consumers cannot stall ingestion
        if class.is_whale() {
            let _ = self.whale_sender.send(record);
        }

        SubmitOutcome::Accepted(class)
    }

    /// Inclusive boundary: value == threshold is a whale.
    /// Unconfigured chains never classify as whale.
    fn classify(&self, chain: &str, value: f64) -> TxClass {
        match self.thresholds.get(chain) {
            Some(threshold) if value >= *threshold => TxClass::Whale,
            _ => TxClass::Normal,
        }
    }

    /// Replace the price table. Already-stored records keep the USD value
    /// fixed at their ingestion time.
    pub fn update_prices(&self, prices: HashMap<String, f64>) {
        let mut state = self.inner.lock();
        state.prices = prices;
    }

    /// Current quote for one chain, used by adapters to value records
    pub fn price_of(&self, chain: &str) -> Option<f64> {
        self.inner.lock().prices.get(chain).copied()
    }

    pub fn prices(&self) -> HashMap<String, f64> {
        self.inner.lock().prices.clone()
    }

    /// Advisory: adapters and the price oracle report recovered failures here
    pub fn record_error(&self) {
        self.inner.lock().stats.errors += 1;
    }

    pub fn stats(&self) -> TrackerStats {
        self.inner.lock().stats.clone()
    }

    /// Seconds since the last accepted record
    pub fn last_accepted_secs(&self) -> Option<f64> {
        self.inner
            .lock()
            .last_accepted
            .map(|t| t.elapsed().as_secs_f64())
    }

    /// Consistent copy of everything a consumer needs for one render
    pub fn snapshot(&self, recent_limit: usize, whale_limit: usize) -> EngineSnapshot {
        let state = self.inner.lock();
        EngineSnapshot {
            prices: state.prices.clone(),
            stats: state.stats.clone(),
            taken_at: Utc::now(),
            last_accepted_secs: state.last_accepted.map(|t| t.elapsed().as_secs_f64()),
            recent: state.all.recent(recent_limit),
            whales: state.whales.recent(whale_limit),
        }
    }

    /// Current history lengths (all, whale, normal), for gauges
    pub fn history_lens(&self) -> (usize, usize, usize) {
        let state = self.inner.lock();
        (state.all.len(), state.whales.len(), state.normals.len())
    }

    /// Request cooperative shutdown of every loop sharing this engine.
    /// In-flight fetches finish or time out before their loop observes it.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!(target: "ENGINE", "Shutdown requested");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Clone for AggregationEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            thresholds: Arc::clone(&self.thresholds),
            whale_sender: self.whale_sender.clone(),
            is_running: Arc::clone(&self.is_running),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine(all_cap: usize, whale_cap: usize, normal_cap: usize) -> AggregationEngine {
        AggregationEngine::new(
            HashMap::from([("ETH".to_string(), 0.1), ("BTC".to_string(), 0.5)]),
            HashMap::from([("ETH".to_string(), 3200.0), ("BTC".to_string(), 98000.0)]),
            all_cap,
            whale_cap,
            normal_cap,
        )
    }

    fn eth_tx(hash: &str, value: f64) -> TxRecord {
        let usd = value * 3200.0;
        TxRecord::new("ETH", hash, "0xfrom", "0xto", value, usd, BlockRef::Height(100))
    }

    #[test]
    fn accepts_distinct_keys_and_counts_them() {
        let engine = test_engine(500, 100, 100);
        for i in 0..10 {
            let outcome = engine.submit(eth_tx(&format!("0x{i}"), 0.05));
            assert!(outcome.is_accepted());
        }
        let stats = engine.stats();
        assert_eq!(stats.total_tx, 10);
        assert_eq!(stats.normal, 10);
        assert_eq!(stats.whales, 0);
        assert!((stats.volume["ETH"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn resubmission_is_an_idempotent_noop() {
        let engine = test_engine(500, 100, 100);
        assert!(engine.submit(eth_tx("0xaa", 1.0)).is_accepted());

        let before = engine.stats();
        assert_eq!(engine.submit(eth_tx("0xaa", 1.0)), SubmitOutcome::Duplicate);
        // a duplicate with a different value is still the same key
        assert_eq!(engine.submit(eth_tx("0xaa", 42.0)), SubmitOutcome::Duplicate);

        let after = engine.stats();
        assert_eq!(before.total_tx, after.total_tx);
        assert_eq!(before.whales, after.whales);
        assert_eq!(before.errors, after.errors);
        assert_eq!(engine.snapshot(500, 100).recent.len(), 1);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let engine = test_engine(500, 100, 100);
        assert_eq!(
            engine.submit(eth_tx("a", 0.1)),
            SubmitOutcome::Accepted(TxClass::Whale)
        );
        assert_eq!(
            engine.submit(eth_tx("b", 0.0999)),
            SubmitOutcome::Accepted(TxClass::Normal)
        );
    }

    #[test]
    fn unconfigured_chain_is_never_whale() {
        let engine = test_engine(500, 100, 100);
        let tx = TxRecord::new("DOGE", "d1", "a", "b", 1_000_000.0, 0.0, BlockRef::Unconfirmed);
        assert_eq!(engine.submit(tx), SubmitOutcome::Accepted(TxClass::Normal));
    }

    #[test]
    fn same_hash_on_different_chains_is_not_conflated() {
        let engine = test_engine(500, 100, 100);
        let btc = TxRecord::new("BTC", "deadbeef", "in", "out", 0.01, 980.0, BlockRef::Mempool);
        let eth = TxRecord::new("ETH", "deadbeef", "a", "b", 0.02, 64.0, BlockRef::Height(5));
        assert!(engine.submit(btc).is_accepted());
        assert!(engine.submit(eth).is_accepted());
        assert_eq!(engine.stats().total_tx, 2);
    }

    #[test]
    fn all_history_evicts_oldest_in_order() {
        let engine = test_engine(3, 100, 100);
        for i in 1..=5 {
            engine.submit(eth_tx(&format!("0x{i}"), 0.01));
        }
        let snapshot = engine.snapshot(10, 10);
        let hashes: Vec<_> = snapshot.recent.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0x3", "0x4", "0x5"]);
    }

    #[test]
    fn whale_and_normal_histories_are_disjoint() {
        let engine = test_engine(500, 100, 100);
        engine.submit(eth_tx("w1", 5.0));
        engine.submit(eth_tx("n1", 0.02));
        engine.submit(eth_tx("w2", 0.1));

        let snapshot = engine.snapshot(10, 10);
        let whales: Vec<_> = snapshot.whales.iter().map(|t| t.hash.as_str()).collect();
        assert_eq!(whales, vec!["w1", "w2"]);
        assert!(snapshot.whales.iter().all(|t| t.class.is_whale()));
        let (all, whale, normal) = engine.history_lens();
        assert_eq!((all, whale, normal), (3, 2, 1));
    }

    #[test]
    fn empty_hash_is_rejected_without_mutation() {
        let engine = test_engine(500, 100, 100);
        let outcome = engine.submit(eth_tx("", 10.0));
        assert_eq!(outcome, SubmitOutcome::Rejected(RejectReason::EmptyHash));
        assert_eq!(engine.stats().total_tx, 0);
        assert!(engine.snapshot(10, 10).recent.is_empty());
        assert!(engine.last_accepted_secs().is_none());
    }

    #[test]
    fn negative_and_non_finite_values_are_rejected() {
        let engine = test_engine(500, 100, 100);
        assert_eq!(
            engine.submit(eth_tx("neg", -1.0)),
            SubmitOutcome::Rejected(RejectReason::InvalidValue)
        );
        assert_eq!(
            engine.submit(eth_tx("nan", f64::NAN)),
            SubmitOutcome::Rejected(RejectReason::InvalidValue)
        );
        assert_eq!(engine.stats().total_tx, 0);
        // a rejected hash was never admitted to the dedup set
        assert!(engine.submit(eth_tx("neg", 1.0)).is_accepted());
    }

    #[test]
    fn price_updates_do_not_revalue_stored_records() {
        let engine = test_engine(500, 100, 100);
        engine.submit(eth_tx("0xfixed", 2.0)); // usd = 6400 at P1

        engine.update_prices(HashMap::from([("ETH".to_string(), 9999.0)]));

        let snapshot = engine.snapshot(10, 10);
        assert_eq!(snapshot.prices["ETH"], 9999.0);
        assert!((snapshot.recent[0].usd - 6400.0).abs() < 1e-9);
    }

    #[test]
    fn price_of_reads_latest_table() {
        let engine = test_engine(500, 100, 100);
        assert_eq!(engine.price_of("ETH"), Some(3200.0));
        assert_eq!(engine.price_of("SOL"), None);
        engine.update_prices(HashMap::from([("ETH".to_string(), 3300.0)]));
        assert_eq!(engine.price_of("ETH"), Some(3300.0));
    }

    #[test]
    fn error_counter_is_advisory_only() {
        let engine = test_engine(500, 100, 100);
        engine.record_error();
        engine.record_error();
        let stats = engine.stats();
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.total_tx, 0);
    }

    #[test]
    fn snapshot_clamps_to_requested_limits() {
        let engine = test_engine(500, 100, 100);
        for i in 0..20 {
            engine.submit(eth_tx(&format!("0x{i}"), 5.0));
        }
        let snapshot = engine.snapshot(7, 4);
        assert_eq!(snapshot.recent.len(), 7);
        assert_eq!(snapshot.whales.len(), 4);
        assert_eq!(snapshot.recent.last().unwrap().hash, "0x19");
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let engine = test_engine(2000, 2000, 2000);
        let mut handles = Vec::new();
        for producer in 0..8 {
            let engine = engine.clone();
            handles.push(std::thread::spawn(move || {
                let mut accepted = 0;
                for i in 0..125 {
                    let tx = eth_tx(&format!("0x{producer}-{i}"), 0.2);
                    if engine.submit(tx).is_accepted() {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 1000);

        let stats = engine.stats();
        assert_eq!(stats.total_tx, 1000);
        assert_eq!(stats.whales, 1000);
        assert_eq!(engine.snapshot(2000, 2000).recent.len(), 1000);
    }

    #[test]
    fn racing_duplicates_are_accepted_exactly_once() {
        let engine = test_engine(2000, 2000, 2000);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(std::thread::spawn(move || {
                let mut accepted = 0;
                for i in 0..100 {
                    if engine.submit(eth_tx(&format!("0x{i}"), 0.01)).is_accepted() {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 100);
        assert_eq!(engine.stats().total_tx, 100);
    }

    #[tokio::test]
    async fn whale_events_are_broadcast_on_acceptance() {
        let engine = test_engine(500, 100, 100);
        let mut rx = engine.subscribe_whales();

        engine.submit(eth_tx("0xsmall", 0.01));
        engine.submit(eth_tx("0xbig", 3.0));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.hash, "0xbig");
        assert!(event.class.is_whale());
        assert!(rx.try_recv().is_err()); // normal records never emit
    }

    #[test]
    fn whale_events_without_subscribers_do_not_fail_ingestion() {
        let engine = test_engine(500, 100, 100);
        assert!(engine.submit(eth_tx("0xbig", 3.0)).is_accepted());
    }

    #[test]
    fn stop_flips_the_running_flag_once() {
        let engine = test_engine(500, 100, 100);
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
        // submissions still work: stop is a request to loops, not a teardown
        assert!(engine.submit(eth_tx("0xlate", 0.01)).is_accepted());
    }
}
