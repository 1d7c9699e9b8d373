use crate::audit_store::LedgerRecord;
use crate::errors::{AssureError, AssureResult};
use crate::risk_engine::{HealthReport, RiskEngine};
use crate::risk_types::{ActionRequest, EvaluationResult};
use axum::{
    extract::{Extension, Query},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_AUDIT_LIMIT: usize = 20;
const MAX_AUDIT_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub features: Vec<String>,
    pub verdict_correct: bool,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    status: &'static str,
    new_weights: BTreeMap<String, f64>,
    total_evaluations: u64,
    persisted: bool,
}

#[derive(Debug, Serialize)]
pub struct WeightsResponse {
    feature_bias: BTreeMap<String, f64>,
    total_evaluations: u64,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    limit: Option<usize>,
}

/// Router exposing evaluation, feedback, health and audit endpoints
pub fn build_router(engine: Arc<RiskEngine>) -> Router {
    Router::new()
        .route("/evaluate", post(evaluate))
        .route("/feedback/learn", post(learn))
        .route("/weights", get(weights))
        .route("/audit/recent", get(recent_audit))
        // health endpoints
        .route("/health", get(health))
        .route("/healthz", get(health))
        .layer(Extension(engine))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn evaluate(
    Extension(engine): Extension<Arc<RiskEngine>>,
    Json(req): Json<ActionRequest>,
) -> AssureResult<Json<EvaluationResult>> {
    if let Some(threshold) = req.threshold {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(AssureError::validation("threshold", "must be a positive number"));
        }
    }
    Ok(Json(engine.evaluate(&req).await))
}

async fn learn(
    Extension(engine): Extension<Arc<RiskEngine>>,
    Json(req): Json<FeedbackRequest>,
) -> AssureResult<Json<FeedbackResponse>> {
    // file I/O happens under the learning lock
    let outcome = tokio::task::spawn_blocking(move || engine.reinforce(&req.features, req.verdict_correct))
        .await
        .map_err(|e| AssureError::internal(format!("feedback task failed: {e}")))??;

    Ok(Json(FeedbackResponse {
        status: if outcome.persisted {
            "updated"
        } else {
            "updated_unpersisted"
        },
        new_weights: outcome.new_weights,
        total_evaluations: outcome.total_evaluations,
        persisted: outcome.persisted,
    }))
}

async fn weights(Extension(engine): Extension<Arc<RiskEngine>>) -> AssureResult<Json<WeightsResponse>> {
    let table = engine.weights()?;
    Ok(Json(WeightsResponse {
        feature_bias: table.feature_bias,
        total_evaluations: table.total_evaluations,
    }))
}

async fn recent_audit(
    Extension(engine): Extension<Arc<RiskEngine>>,
    Query(query): Query<AuditQuery>,
) -> AssureResult<Json<Vec<LedgerRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    Ok(Json(engine.recent_evaluations(limit)?))
}

async fn health(Extension(engine): Extension<Arc<RiskEngine>>) -> Json<HealthReport> {
    Json(engine.health())
}
