//! Scout HTTP 服务
//!
//! 启动: cargo run --bin scout-web
//! - POST /api/v1/predict           {"question": "..."} -> {"answer": "..."}
//! - POST /api/v1/predict/detailed  -> {answer, confidence, reasoning, success, errors[, trace]}
//! - GET  /health                   -> {status, agent_status, timestamp, metrics}
//!
//! 状态码：200 成功 / 400 输入无效 / 504 总超时 / 500 内部错误。

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use scout::config::{load_config, AppConfig};
use scout::core::{Orchestrator, TaskReport};
use scout::llm::{LlmClient, MockLlm, OpenAiLlm};

struct AppState {
    orchestrator: Orchestrator,
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    question: String,
}

fn create_llm(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let has_key =
        std::env::var("SCOUT_API_KEY").is_ok() || std::env::var("OPENAI_API_KEY").is_ok();
    if cfg.llm.provider == "mock" || !has_key {
        tracing::warn!("no API key set or provider=mock, using Mock LLM");
        Arc::new(MockLlm::default())
    } else {
        Arc::new(OpenAiLlm::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None))
    }
}

fn status_for(report: &TaskReport) -> StatusCode {
    if report.success {
        return StatusCode::OK;
    }
    match report.error_kind {
        Some("input") => StatusCode::BAD_REQUEST,
        Some("deadline") => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let report = state.orchestrator.process_task(&req.question, None).await;
    (status_for(&report), Json(json!({"answer": report.answer})))
}

async fn predict_detailed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let report = state.orchestrator.process_task(&req.question, None).await;
    let status = status_for(&report);
    let body = serde_json::to_value(&report).unwrap_or_else(|_| json!({"answer": report.answer}));
    (status, Json(body))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "agent_status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "metrics": state.orchestrator.metrics().to_json(),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scout::observability::init();

    let cfg = load_config(None)?;
    let port = cfg.web.port;
    let llm = create_llm(&cfg);
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(cfg, llm),
    });

    let app = Router::new()
        .route("/api/v1/predict", post(predict))
        .route("/api/v1/predict/detailed", post(predict_detailed))
        .route("/health", get(health))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!(addr = %addr, "scout-web listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
