//! Source adapters - one polling loop per upstream feed
//!
//! Every scanner follows the same discipline: fetch with a bounded timeout,
//! normalize, submit each record individually, sleep its own cadence. A
//! transient failure never kills the loop; it is counted and retried after a
//! capped backoff. Value floors are applied before submission to bound
//! throughput, independently of whale classification.

pub mod blockchain_info;
pub mod blockstream;
pub mod etherscan;

pub use blockchain_info::BlockchainInfoScanner;
pub use blockstream::BlockstreamScanner;
pub use etherscan::EtherscanScanner;

use std::time::Duration;
use thiserror::Error;

/// Adapter-side failure. Always recovered locally by the retry loop.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected payload: {0}")]
    Payload(String),
}

/// Capped exponential backoff, reset after every successful poll
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to sleep before the next retry; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// HTTP client shared per scanner, with the configured request timeout
pub fn http_client(timeout_secs: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent("whalewatch/1.0")
        .build()
}

/// Truncate a free-form counterparty address to `max` chars
pub fn clean_address(raw: &str, max: usize) -> String {
    let trimmed = raw.trim();
    trimmed.chars().take(max).collect()
}

/// Parse a 0x-prefixed hex quantity
pub fn hex_to_u64(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

/// Convert a 0x-prefixed wei quantity to ETH
pub fn wei_hex_to_eth(raw: &str) -> Option<f64> {
    let wei = u128::from_str_radix(raw.trim_start_matches("0x"), 16).ok()?;
    Some(wei as f64 / 1e18)
}

/// Convert satoshis to BTC
pub fn sats_to_btc(sats: u64) -> f64 {
    sats as f64 / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(hex_to_u64("0x14d4f3d"), Some(21843773));
        assert_eq!(hex_to_u64("not hex"), None);
        // 1.5 ETH in wei
        assert_eq!(wei_hex_to_eth("0x14d1120d7b160000"), Some(1.5));
        assert_eq!(wei_hex_to_eth("0x0"), Some(0.0));
        assert_eq!(wei_hex_to_eth("zz"), None);
    }

    #[test]
    fn sats_conversion() {
        assert_eq!(sats_to_btc(100_000_000), 1.0);
        assert_eq!(sats_to_btc(123_456), 0.00123456);
    }

    #[test]
    fn clean_address_truncates() {
        let long = "0x".to_string() + &"a".repeat(100);
        assert_eq!(clean_address(&long, 42).len(), 42);
        assert_eq!(clean_address("  0xabc  ", 42), "0xabc");
    }
}
