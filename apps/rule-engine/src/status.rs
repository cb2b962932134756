//! 状态端点。
//!
//! - GET /health
//! - GET /metrics

use axum::{Json, Router, extract::State, routing::get};
use iot_broker::BrokerConnection;
use iot_telemetry::{MetricsSnapshot, metrics};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone)]
pub struct StatusState {
    pub broker: BrokerConnection,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub broker: &'static str,
    pub reconnect_exhausted: bool,
    pub consumer_bound: bool,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_snapshot))
        .with_state(state)
}

pub async fn health(State(state): State<StatusState>) -> Json<HealthResponse> {
    let broker = &state.broker;
    Json(HealthResponse {
        ok: !broker.is_exhausted(),
        broker: broker.state().as_str(),
        reconnect_exhausted: broker.is_exhausted(),
        consumer_bound: broker.is_consumer_bound(),
    })
}

pub async fn metrics_snapshot() -> Json<MetricsSnapshot> {
    Json(metrics().snapshot())
}

/// 启动状态端点；绑定失败只记录日志，不影响引擎运行。
pub async fn spawn(addr: &str, state: StatusState) -> Option<tokio::task::JoinHandle<()>> {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!(target: "iot.rule_engine", addr = %addr, error = %err, "status_server_bind_failed");
            return None;
        }
    };
    info!(target: "iot.rule_engine", addr = %addr, "status_server_started");
    let app = router(state);
    Some(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!(target: "iot.rule_engine", error = %err, "status_server_failed");
        }
    }))
}
