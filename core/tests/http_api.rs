use std::sync::Arc;

use attrition_serving::config::{ServingConfig, ServingMode};
use attrition_serving::ml::{BuiltinArtifacts, ModelRegistry};
use attrition_serving::storage::{Ledger, MemoryLedger};
use attrition_serving::Services;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

fn services(mode: ServingMode) -> (Services, Arc<dyn Ledger>) {
    let mut config = ServingConfig::for_tests();
    config.mode = mode;
    let registry = Arc::new(ModelRegistry::new(
        Arc::new(BuiltinArtifacts),
        config.default_model.clone(),
    ));
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let services = Services::assemble(config, registry, Arc::clone(&ledger));
    (services, ledger)
}

fn employee(travel: &str) -> Value {
    json!({
        "age": 30,
        "revenu_mensuel": 5000,
        "annees_dans_l_entreprise": 5,
        "frequence_deplacement": travel
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    )
    .await
}

async fn post(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
    )
    .await
}

#[tokio::test]
async fn submit_then_poll_until_completed() {
    let (services, _ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, body) = post(&app, "/predictions/request", &employee("frequent")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert!(body["prediction"].is_null());
    assert!(body["probability"].is_null());
    let request_id = body["request_id"].as_str().expect("request id").to_string();

    let (status, body) = get(&app, &format!("/predictions/{request_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let worker = services.worker.as_ref().expect("deferred mode runs a worker");
    assert_eq!(worker.run_cycle().await.expect("cycle").completed, 1);

    let (status, body) = get(&app, &format!("/predictions/{request_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    let probability = body["probability"].as_f64().expect("probability");
    assert!((0.0..=1.0).contains(&probability));
    let prediction = body["prediction"].as_u64().expect("prediction");
    assert_eq!(prediction == 1, probability >= 0.5);
    assert_eq!(body["model_name"], "random_forest_e04");
    assert_eq!(body["model_version"], "e04-rf-v1");
    assert!(body["error_message"].is_null());
}

#[tokio::test]
async fn unknown_travel_frequency_is_rejected_without_writing() {
    let (services, ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, body) = post(&app, "/predictions/request", &employee("Rarement")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string());
    assert!(ledger.fetch_pending(10).await.expect("pending").is_empty());
}

#[tokio::test]
async fn out_of_range_fields_are_rejected() {
    let (services, ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let mut too_young = employee("aucun");
    too_young["age"] = json!(17);
    let (status, body) = post(&app, "/predictions/request", &too_young).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().expect("detail").contains("age"));

    let mut missing = employee("aucun");
    missing
        .as_object_mut()
        .expect("object")
        .remove("revenu_mensuel");
    let (status, _) = post(&app, "/predictions/request", &missing).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert!(ledger.fetch_pending(10).await.expect("pending").is_empty());
}

#[tokio::test]
async fn unknown_model_is_a_client_error() {
    let (services, ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, body) = post(
        &app,
        "/predictions/request?model=unknown_model_name",
        &employee("frequent"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"]
        .as_str()
        .expect("detail")
        .contains("Unknown model"));
    assert!(ledger.fetch_pending(10).await.expect("pending").is_empty());
}

#[tokio::test]
async fn explicit_model_is_recorded_on_the_request() {
    let (services, ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, _) = post(
        &app,
        "/predictions/request?model_name=logistic&source=batch",
        &employee("occasionnel"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let pending = ledger.fetch_pending(10).await.expect("pending");
    assert_eq!(pending[0].model_name, "logistic");
    assert_eq!(pending[0].source, "batch");
}

#[tokio::test]
async fn missing_and_malformed_ids() {
    let (services, _ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, body) = get(&app, "/predictions/00000000-0000-0000-0000-000000000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Prediction request not found");

    let (status, body) = get(&app, "/predictions/not-a-uuid").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], "request_id must be a valid UUID");
}

#[tokio::test]
async fn history_returns_latest_completed_first() {
    let (services, _ledger) = services(ServingMode::Deferred);
    let app = services.router();
    let worker = services.worker.as_ref().expect("worker");

    let mut ids = Vec::new();
    for travel in ["aucun", "frequent"] {
        let (_, body) = post(&app, "/predictions/request", &employee(travel)).await;
        ids.push(body["request_id"].as_str().expect("id").to_string());
        worker.run_cycle().await.expect("cycle");
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
    }
    // Still pending, so not part of the history.
    post(&app, "/predictions/request", &employee("aucun")).await;

    let (status, body) = get(&app, "/predictions/history?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().expect("list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["request_id"], ids[1].as_str());
    assert_eq!(entries[0]["status"], "completed");

    let (_, body) = get(&app, "/predictions/history").await;
    assert_eq!(body.as_array().expect("list").len(), 2);

    for uri in [
        "/predictions/history?limit=0",
        "/predictions/history?limit=501",
        "/predictions/history?limit=abc",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn inline_mode_scores_on_the_request_path() {
    let (services, ledger) = services(ServingMode::Inline);
    assert!(services.worker.is_none());
    let app = services.router();

    let (status, body) = post(
        &app,
        "/predictions/request?model=random_forest",
        &employee("frequent"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["probability"], 0.65);
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["model_version"], "e03-rf-v1");

    assert!(ledger.fetch_pending(10).await.expect("pending").is_empty());
    let (_, history) = get(&app, "/predictions/history").await;
    assert_eq!(history[0]["request_id"], body["request_id"]);

    let (_, health) = get(&app, "/").await;
    assert_eq!(health["mode"], "inline");
}

#[tokio::test]
async fn catalog_endpoints() {
    let (services, _ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, health) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["mode"], "deferred");

    for uri in ["/models", "/models/"] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["default_model"], "random_forest_e04");
        assert_eq!(
            body["available_models"],
            json!(["dummy", "logistic", "random_forest", "random_forest_e04"])
        );
    }

    let (status, metadata) = get(&app, "/metadata/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metadata["model_name"], "random_forest_e04");
    assert_eq!(metadata["models"]["logistic"]["version"], "e03-logreg-v1");
}

#[tokio::test]
async fn metrics_endpoints() {
    let (services, _ledger) = services(ServingMode::Deferred);
    let app = services.router();

    let (status, body) = get(&app, "/metrics/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["metrics"],
        json!(["cv_metrics_e03.json", "cv_metrics_e04.json"])
    );

    let (status, file) = get(&app, "/metrics/cv_metrics_e04.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["file"], "cv_metrics_e04.json");
    assert_eq!(file["rows"], 3);

    let (status, summary) = get(&app, "/metrics/summary").await;
    assert_eq!(status, StatusCode::OK);
    let summary = summary.as_array().expect("list");
    assert_eq!(summary.len(), 4);
    assert_eq!(summary[0]["model"], "random_forest_e04");
    assert!(summary[0]["metrics"]["roc_auc"]["mean"].is_number());

    let (status, body) = get(&app, "/metrics/nope.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Metric file not found");
}
