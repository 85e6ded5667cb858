//! Alert service for Telegram and WebSocket notifications

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::TxRecord;

/// Alert data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: String,
}

/// Alert service for sending notifications
pub struct AlertService {
    config: Config,
    telegram_client: Option<reqwest::Client>,
    alert_history: Arc<RwLock<VecDeque<Alert>>>,
    alert_sender: broadcast::Sender<Alert>,
    next_id: Arc<RwLock<i64>>,
}

impl AlertService {
    /// Create a new alert service
    pub fn new(config: Config) -> Self {
        let telegram_client = if config.telegram_bot_token.is_some() {
            Some(reqwest::Client::new())
        } else {
            None
        };

        if telegram_client.is_some() {
            info!(target: "ALERTS", "Telegram bot initialized");
        }

        let (alert_sender, _) = broadcast::channel(1000);

        Self {
            config,
            telegram_client,
            alert_history: Arc::new(RwLock::new(VecDeque::with_capacity(1000))),
            alert_sender,
            next_id: Arc::new(RwLock::new(1)),
        }
    }

    /// Subscribe to alerts
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alert_sender.subscribe()
    }

    /// Send an alert
    pub async fn send_alert(
        &self,
        alert_type: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Result<Alert> {
        let id = {
            let mut next_id = self.next_id.write();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let alert = Alert {
            id,
            alert_type: alert_type.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };

        // Add to history
        {
            let mut history = self.alert_history.write();
            history.push_front(alert.clone());
            if history.len() > 1000 {
                history.truncate(500);
            }
        }

        // Broadcast to subscribers
        let _ = self.alert_sender.send(alert.clone());

        // Send to Telegram
        if let (Some(client), Some(token), Some(chat_id)) = (
            &self.telegram_client,
            &self.config.telegram_bot_token,
            &self.config.telegram_chat_id,
        ) {
            let emoji = self.get_emoji(alert_type);
            let telegram_message = format!("{} *{}*\n\n{}", emoji, title, message);

            let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
            let params = serde_json::json!({
                "chat_id": chat_id,
                "text": telegram_message,
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
            });

            if let Err(e) = client.post(&url).json(&params).send().await {
                error!(target: "ALERTS", "Telegram send failed: {}", e);
            }
        }

        Ok(alert)
    }

    fn get_emoji(&self, alert_type: &str) -> &'static str {
        match alert_type {
            "whale" => "🐋",
            "price" => "💰",
            "error" => "❌",
            _ => "📢",
        }
    }

    /// Get recent alerts
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.alert_history.read();
        history.iter().take(limit).cloned().collect()
    }

    /// Alert for a whale-classified transaction
    pub async fn alert_whale(&self, tx: &TxRecord) -> Result<Alert> {
        let message = format!(
            "Chain: {}\nAmount: {:.6} = ${:.0}\nFrom: {}\nTo: {}\nHash: `{}`\nBlock: {}",
            tx.chain,
            tx.value,
            tx.usd,
            tx.from,
            tx.to,
            shorten_hash(&tx.hash, 8),
            tx.block,
        );

        self.send_alert(
            "whale",
            &format!("WHALE {} DETECTED", tx.chain),
            &message,
            serde_json::to_value(tx)?,
        )
        .await
    }
}

impl Clone for AlertService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            telegram_client: self.telegram_client.clone(),
            alert_history: Arc::clone(&self.alert_history),
            alert_sender: self.alert_sender.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

/// Shorten a transaction hash for display
pub fn shorten_hash(hash: &str, chars: usize) -> String {
    if hash.len() <= chars * 2 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..chars], &hash[hash.len() - chars..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BlockRef;
    use std::collections::HashMap;

    fn test_config() -> Config {
        Config {
            etherscan_url: String::new(),
            etherscan_api_key: None,
            blockstream_url: String::new(),
            blockchain_info_url: String::new(),
            coingecko_url: String::new(),
            whale_thresholds: HashMap::new(),
            initial_prices: HashMap::new(),
            coin_ids: vec![],
            min_eth_value: 0.01,
            min_btc_value: 0.001,
            all_history_cap: 500,
            whale_history_cap: 100,
            normal_history_cap: 100,
            eth_poll_secs: 10,
            btc_mempool_poll_secs: 5,
            btc_unconfirmed_poll_secs: 8,
            price_refresh_secs: 30,
            http_timeout_secs: 5,
            telegram_bot_token: None,
            telegram_chat_id: None,
            dashboard_port: 3000,
        }
    }

    #[test]
    fn shortens_long_hashes_only() {
        assert_eq!(
            shorten_hash("0xabcdef0123456789aabbccdd", 4),
            "0xab...ccdd"
        );
        assert_eq!(shorten_hash("0xab", 4), "0xab");
    }

    #[tokio::test]
    async fn whale_alerts_reach_subscribers_and_history() {
        let alerts = AlertService::new(test_config());
        let mut rx = alerts.subscribe();

        let tx = TxRecord::new("ETH", "0xfeed", "0xa", "0xb", 12.0, 38400.0, BlockRef::Height(9));
        let sent = alerts.alert_whale(&tx).await.unwrap();
        assert_eq!(sent.alert_type, "whale");

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, sent.id);
        assert_eq!(alerts.get_recent_alerts(10).len(), 1);
    }

    #[tokio::test]
    async fn alert_ids_are_sequential() {
        let alerts = AlertService::new(test_config());
        let a = alerts
            .send_alert("price", "P", "m", serde_json::Value::Null)
            .await
            .unwrap();
        let b = alerts
            .send_alert("price", "P", "m", serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(b.id, a.id + 1);
    }
}
