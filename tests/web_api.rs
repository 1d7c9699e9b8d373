// tests/web_api.rs
use assure_engine::config_loader::{EngineConfig, PredictorMode};
use assure_engine::jitter::NoJitter;
use assure_engine::risk_engine::RiskEngine;
use assure_engine::riskweb::build_router;
use assure_engine::signals::FixedClock;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for .oneshot()

fn app_with(dir: &TempDir, configure: impl FnOnce(&mut EngineConfig)) -> Router {
    let mut config = EngineConfig::default();
    config.storage.bias_path = dir.path().join("feature_bias.json").display().to_string();
    config.storage.audit_path = dir.path().join("evaluations").display().to_string();
    configure(&mut config);

    let wednesday = NaiveDate::from_ymd_opt(2026, 10, 14)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap();
    let engine = RiskEngine::from_config(&config)
        .expect("engine should build")
        .with_clock(Arc::new(FixedClock(wednesday)))
        .with_jitter(Box::new(NoJitter));
    build_router(Arc::new(engine))
}

fn app(dir: &TempDir) -> Router {
    app_with(dir, |_| {})
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().uri(uri).method(method);
    let req = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn evaluate_blocks_risky_production_delete() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(
        &app,
        "POST",
        "/evaluate",
        Some(json!({
            "action_type": "FORCE_DELETE",
            "environment": "production",
            "payload": { "command": "--force" },
            "operator_id": "ops-1",
            "threshold": 70
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "BLOCK");
    assert!(body["risk_score"].as_f64().unwrap() > 70.0);
    assert!(body["evaluation_id"].as_str().is_some());
    assert_eq!(body["signals"]["environment"], 20.0);
    assert!(body["breakdown"]["final_score"].is_number());
    assert_eq!(body["forensics"]["model_id"], "assure_linear_v1");
    assert!(body["forensics"]["attribution"].is_object());
    assert_eq!(body["reasoning"][0], "Targeting PRODUCTION environment");
}

#[tokio::test]
async fn evaluate_allows_staging_reads() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(
        &app,
        "POST",
        "/evaluate",
        Some(json!({ "action_type": "READ_LOGS", "environment": "staging", "payload": {} })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "ALLOW");
    assert_eq!(body["reasoning"], json!([]));
}

#[tokio::test]
async fn malformed_evaluation_is_rejected_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, _) = send(&app, "POST", "/evaluate", Some(json!({ "environment": "production" }))).await;
    assert!(status.is_client_error());

    let (status, body) = send(
        &app,
        "POST",
        "/evaluate",
        Some(json!({ "action_type": "READ_LOGS", "environment": "staging", "threshold": -3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("threshold"));
}

#[tokio::test]
async fn feedback_updates_and_persists_weights() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(
        &app,
        "POST",
        "/feedback/learn",
        Some(json!({ "features": ["env", "not_a_feature"], "verdict_correct": false })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");
    assert_eq!(body["persisted"], true);
    assert_eq!(body["total_evaluations"], 1);
    assert!((body["new_weights"]["env"].as_f64().unwrap() - 0.92).abs() < 1e-12);
    assert_eq!(body["new_weights"]["payload"], 1.0);

    let on_disk: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("feature_bias.json")).unwrap()).unwrap();
    assert_eq!(on_disk["total_evaluations"], 1);

    let (_, weights) = send(&app, "GET", "/weights", None).await;
    assert!((weights["feature_bias"]["env"].as_f64().unwrap() - 0.92).abs() < 1e-12);
}

#[tokio::test]
async fn health_reports_mode_and_has_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["mode"], "ML_ACTIVE");
    assert_eq!(body["persistence"], "ok");
    assert_eq!(body["total_evaluations"], 0);

    let (_, again) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(again, body);
    assert!(!dir.path().join("feature_bias.json").exists());
}

#[tokio::test]
async fn disabled_predictor_reports_heuristic_only() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(&dir, |config| config.predictor.mode = PredictorMode::Disabled);

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["mode"], "HEURISTIC_ONLY");
    assert!(health["model_id"].is_null());

    let (_, body) = send(
        &app,
        "POST",
        "/evaluate",
        Some(json!({ "action_type": "FORCE_DELETE", "environment": "production", "payload": { "flags": "--force" } })),
    )
    .await;
    assert_eq!(body["verdict"], "BLOCK");
    assert_eq!(body["ml_confidence"], 0.0);
    assert!(body["forensics"]["semantic_signal"].is_null());
}

#[tokio::test]
async fn audit_trail_lists_recent_evaluations() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    for env in ["staging", "production", "dev"] {
        send(
            &app,
            "POST",
            "/evaluate",
            Some(json!({ "action_type": "DATABASE_MIGRATION", "environment": env })),
        )
        .await;
    }

    let (status, body) = send(&app, "GET", "/audit/recent?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["entry"]["environment"], "dev");
    assert_eq!(records[0]["prev_hash"], records[1]["hash"]);

    let (_, all) = send(&app, "GET", "/audit/recent", None).await;
    assert_eq!(all.as_array().unwrap().len(), 3);
}
