//! Configuration module for WhaleWatch

use std::collections::HashMap;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Source endpoints
    pub etherscan_url: String,
    pub etherscan_api_key: Option<String>,
    pub blockstream_url: String,
    pub blockchain_info_url: String,
    pub coingecko_url: String,

    // Classification
    pub whale_thresholds: HashMap<String, f64>,
    pub initial_prices: HashMap<String, f64>,
    /// CoinGecko coin id -> chain symbol, e.g. "ethereum" -> "ETH"
    pub coin_ids: Vec<(String, String)>,

    // Pre-submission floors (throughput bound, not whale classification)
    pub min_eth_value: f64,
    pub min_btc_value: f64,

    // Bounded histories
    pub all_history_cap: usize,
    pub whale_history_cap: usize,
    pub normal_history_cap: usize,

    // Polling cadence
    pub eth_poll_secs: u64,
    pub btc_mempool_poll_secs: u64,
    pub btc_unconfirmed_poll_secs: u64,
    pub price_refresh_secs: u64,
    pub http_timeout_secs: u64,

    // Telegram Alerts
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,

    // Dashboard
    pub dashboard_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            etherscan_url: env::var("ETHERSCAN_URL")
                .unwrap_or_else(|_| "https://api.etherscan.io/api".to_string()),
            etherscan_api_key: env::var("ETHERSCAN_API_KEY").ok(),
            blockstream_url: env::var("BLOCKSTREAM_URL")
                .unwrap_or_else(|_| "https://blockstream.info/api".to_string()),
            blockchain_info_url: env::var("BLOCKCHAIN_INFO_URL")
                .unwrap_or_else(|_| "https://blockchain.info".to_string()),
            coingecko_url: env::var("COINGECKO_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),

            whale_thresholds: env::var("WHALE_THRESHOLDS")
                .map(|v| parse_chain_table(&v))
                .unwrap_or_else(|_| default_thresholds()),
            initial_prices: env::var("INITIAL_PRICES")
                .map(|v| parse_chain_table(&v))
                .unwrap_or_else(|_| default_prices()),
            coin_ids: vec![
                ("ethereum".to_string(), "ETH".to_string()),
                ("bitcoin".to_string(), "BTC".to_string()),
            ],

            min_eth_value: env_f64("MIN_ETH_VALUE", 0.01),
            min_btc_value: env_f64("MIN_BTC_VALUE", 0.001),

            all_history_cap: env_usize("ALL_HISTORY_CAP", 500),
            whale_history_cap: env_usize("WHALE_HISTORY_CAP", 100),
            normal_history_cap: env_usize("NORMAL_HISTORY_CAP", 100),

            eth_poll_secs: env_u64("ETH_POLL_SECS", 10),
            btc_mempool_poll_secs: env_u64("BTC_MEMPOOL_POLL_SECS", 5),
            btc_unconfirmed_poll_secs: env_u64("BTC_UNCONFIRMED_POLL_SECS", 8),
            price_refresh_secs: env_u64("PRICE_REFRESH_SECS", 30),
            http_timeout_secs: env_u64("HTTP_TIMEOUT_SECS", 5),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),

            dashboard_port: env::var("DASHBOARD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_thresholds() -> HashMap<String, f64> {
    HashMap::from([("ETH".to_string(), 0.1), ("BTC".to_string(), 0.5)])
}

fn default_prices() -> HashMap<String, f64> {
    HashMap::from([("ETH".to_string(), 3200.0), ("BTC".to_string(), 98000.0)])
}

/// Parse a "CHAIN=value,CHAIN=value" table. Malformed entries are skipped.
pub fn parse_chain_table(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|pair| {
            let (chain, value) = pair.split_once('=')?;
            let value: f64 = value.trim().parse().ok()?;
            Some((chain.trim().to_uppercase(), value))
        })
        .collect()
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_table() {
        let table = parse_chain_table("ETH=0.1,BTC=0.5");
        assert_eq!(table.get("ETH"), Some(&0.1));
        assert_eq!(table.get("BTC"), Some(&0.5));
    }

    #[test]
    fn chain_table_normalizes_and_skips_garbage() {
        let table = parse_chain_table(" eth = 2.5 ,BTC,SOL=abc,doge=100");
        assert_eq!(table.get("ETH"), Some(&2.5));
        assert_eq!(table.get("DOGE"), Some(&100.0));
        assert_eq!(table.len(), 2);
    }
}
