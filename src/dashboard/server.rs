//! HTTP API and WebSocket dashboard server
//!
//! Read-only view over the aggregation engine: every handler works from a
//! snapshot or accessor and never mutates engine state.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::engine::{AggregationEngine, EngineSnapshot, TrackerStats, TxRecord};
use crate::utils::alerts::Alert;
use crate::utils::{AlertService, MetricsService};

const DEFAULT_RECENT_LIMIT: usize = 40;
const DEFAULT_WHALE_LIMIT: usize = 20;

/// Query params for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
}

/// Query params for the snapshot endpoint
#[derive(Debug, Deserialize)]
pub struct SnapshotParams {
    limit: Option<usize>,
    whales: Option<usize>,
}

/// Stats response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    stats: TrackerStats,
    last_accepted_secs: Option<f64>,
    running: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    uptime: f64,
    running: bool,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "init")]
    Init {
        snapshot: EngineSnapshot,
        recent_alerts: Vec<Alert>,
    },
    #[serde(rename = "alert")]
    Alert(Alert),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: AggregationEngine,
    pub alerts: Arc<AlertService>,
    pub metrics: Arc<MetricsService>,
    pub start_time: std::time::Instant,
}

/// Dashboard server
pub struct DashboardServer {
    config: Config,
    state: AppState,
}

impl DashboardServer {
    /// Create a new dashboard server
    pub fn new(
        config: Config,
        engine: AggregationEngine,
        alerts: Arc<AlertService>,
        metrics: Arc<MetricsService>,
    ) -> Self {
        let state = AppState {
            config: config.clone(),
            engine,
            alerts,
            metrics,
            start_time: std::time::Instant::now(),
        };

        Self { config, state }
    }

    /// Start the dashboard server
    pub async fn start(&self) -> anyhow::Result<()> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/stats", get(get_stats))
            .route("/api/snapshot", get(get_snapshot))
            .route("/api/transactions/recent", get(get_recent_transactions))
            .route("/api/whales/recent", get(get_recent_whales))
            .route("/api/prices", get(get_prices))
            .route("/api/alerts", get(get_alerts))
            // Prometheus metrics
            .route("/metrics", get(get_metrics))
            // Health checks
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            // WebSocket
            .route("/ws", get(ws_handler))
            .layer(cors)
            .with_state(self.state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.dashboard_port));
        info!(target: "DASHBOARD", "✅ Dashboard running at http://localhost:{}", self.config.dashboard_port);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

// ============================================
// HANDLERS
// ============================================

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.engine.stats(),
        last_accepted_secs: state.engine.last_accepted_secs(),
        running: state.engine.is_running(),
    })
}

async fn get_snapshot(
    State(state): State<AppState>,
    Query(params): Query<SnapshotParams>,
) -> Json<EngineSnapshot> {
    let recent = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let whales = params.whales.unwrap_or(DEFAULT_WHALE_LIMIT);
    Json(state.engine.snapshot(recent, whales))
}

async fn get_recent_transactions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<TxRecord>> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Json(state.engine.snapshot(limit, 0).recent)
}

async fn get_recent_whales(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<TxRecord>> {
    let limit = params.limit.unwrap_or(DEFAULT_WHALE_LIMIT);
    Json(state.engine.snapshot(0, limit).whales)
}

async fn get_prices(State(state): State<AppState>) -> Json<HashMap<String, f64>> {
    Json(state.engine.prices())
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Alert>> {
    let limit = params.limit.unwrap_or(50);
    Json(state.alerts.get_recent_alerts(limit))
}

// Metrics handler
async fn get_metrics(State(state): State<AppState>) -> Response {
    // Refresh gauges from the engine before encoding
    let (all, whales, normal) = state.engine.history_lens();
    state.metrics.set_history_lens(all, whales, normal);
    for (chain, price) in state.engine.prices() {
        state.metrics.set_price(&chain, price);
    }

    let metrics = state.metrics.get_metrics();
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metrics,
    )
        .into_response()
}

// Health check handlers
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: state.start_time.elapsed().as_secs_f64(),
        running: state.engine.is_running(),
    })
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    if state.engine.is_running() {
        Json(serde_json::json!({"ready": true})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ready": false})),
        )
            .into_response()
    }
}

// WebSocket handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    info!(target: "DASHBOARD", "WebSocket client connected");

    // Send initial state
    let init_msg = WsMessage::Init {
        snapshot: state
            .engine
            .snapshot(DEFAULT_RECENT_LIMIT, DEFAULT_WHALE_LIMIT),
        recent_alerts: state.alerts.get_recent_alerts(20),
    };

    if let Ok(json) = serde_json::to_string(&init_msg) {
        let _ = sender.send(Message::Text(json)).await;
    }

    // Subscribe to alerts
    let mut alert_rx = state.alerts.subscribe();

    // Forward alerts to websocket
    let send_task = tokio::spawn(async move {
        while let Ok(alert) = alert_rx.recv().await {
            let msg = WsMessage::Alert(alert);
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming messages (mainly for keeping connection alive)
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by axum
                }
                Err(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(target: "DASHBOARD", "WebSocket client disconnected");
}
