//! Normalized transaction records shared by every source adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a transaction was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "height", rename_all = "lowercase")]
pub enum BlockRef {
    /// Confirmed in a block at this height
    Height(u64),
    /// Seen in a node mempool
    Mempool,
    /// Reported as unconfirmed by an explorer feed
    Unconfirmed,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Height(n) => write!(f, "{}", n),
            BlockRef::Mempool => write!(f, "Mempool"),
            BlockRef::Unconfirmed => write!(f, "Unconfirmed"),
        }
    }
}

/// Classification derived at ingestion time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxClass {
    Whale,
    Normal,
}

impl TxClass {
    pub fn is_whale(self) -> bool {
        matches!(self, TxClass::Whale)
    }

    pub fn label(self) -> &'static str {
        match self {
            TxClass::Whale => "whale",
            TxClass::Normal => "normal",
        }
    }
}

/// Normalized transaction record produced by a source adapter.
///
/// `class` is owned by the engine: adapters construct records via
/// [`TxRecord::new`] and the engine overwrites the classification when the
/// record is accepted. `usd` is fixed at ingestion time and never re-valued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    pub chain: String,
    pub time: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub value: f64,
    pub usd: f64,
    pub block: BlockRef,
    pub class: TxClass,
}

impl TxRecord {
    pub fn new(
        chain: impl Into<String>,
        hash: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        value: f64,
        usd: f64,
        block: BlockRef,
    ) -> Self {
        Self {
            hash: hash.into(),
            chain: chain.into(),
            time: Utc::now(),
            from: from.into(),
            to: to.into(),
            value,
            usd,
            block,
            class: TxClass::Normal,
        }
    }

    /// Dedup key: hashes are only unique within a chain
    pub fn dedup_key(&self) -> (String, String) {
        (self.chain.clone(), self.hash.clone())
    }
}
