//! End-to-end tests of the REST surface.
//!
//! Drives `build_router` with `tower::ServiceExt::oneshot` against an
//! orchestrator backed by the in-memory controller and an in-memory store.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use launchpad_api::build_router;
use launchpad_core::{MemoryArtifactRegistry, ModelArtifact, sha256_hex};
use launchpad_release::{Orchestrator, OrchestratorSettings, RecordingAlertSink};
use launchpad_smoke::{ScriptedSmokeTester, SmokeTester};
use launchpad_state::{ExecutionState, StateStore};
use launchpad_traffic::InMemoryTrafficController;

fn test_orchestrator(smoke: Arc<dyn SmokeTester>) -> (Orchestrator, Arc<InMemoryTrafficController>) {
    let controller = Arc::new(InMemoryTrafficController::new());
    controller.seed_version("prod", "clf-1", 100);
    let registry = Arc::new(MemoryArtifactRegistry::new());
    let payload = b"weights-v2".to_vec();
    registry.insert(
        ModelArtifact {
            id: "clf-2".to_string(),
            version: "2".to_string(),
            accuracy: Some(0.92),
            f1: Some(0.9),
            latency_p95_ms: Some(120.0),
            size_bytes: payload.len() as u64,
            checksum: sha256_hex(&payload),
            created_at: 1_700_000_000,
        },
        payload,
    );
    let orchestrator = Orchestrator::new(
        StateStore::open_in_memory().unwrap(),
        registry,
        controller.clone(),
        smoke,
        Arc::new(RecordingAlertSink::new()),
        OrchestratorSettings::default(),
    );
    (orchestrator, controller)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn rolling_release_end_to_end() {
    let (orchestrator, controller) = test_orchestrator(Arc::new(ScriptedSmokeTester::passing()));
    let router = build_router(orchestrator.clone());

    let (status, body) = json_body(
        &router,
        post_json(
            "/api/v1/releases",
            serde_json::json!({
                "artifact_id": "clf-2",
                "strategy": "rolling",
                "target_namespace": "prod"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["result"], "accepted");
    let id = body["data"]["execution_id"].as_str().unwrap().to_string();

    let done = orchestrator.wait_for_terminal(&id).await.unwrap();
    assert_eq!(done.state, ExecutionState::Completed);

    let (status, body) = json_body(&router, get(&format!("/api/v1/releases/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "completed");
    assert!(body["data"]["history"].as_array().unwrap().len() >= 5);

    let (status, body) = json_body(&router, get("/api/v1/namespaces/prod/live")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"]["artifact_id"], "clf-2");
    assert_eq!(controller.versions_of("clf-1").len(), 0);

    let (status, body) = json_body(&router, get(&format!("/api/v1/releases/{id}/smoke"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["data"].as_array().unwrap().is_empty());

    let resp = router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("launchpad_executions{namespace=\"prod\",state=\"completed\"} 1"));
}

#[tokio::test]
async fn rejected_release_lists_reasons() {
    let (orchestrator, controller) = test_orchestrator(Arc::new(ScriptedSmokeTester::passing()));
    let router = build_router(orchestrator);

    let (status, body) = json_body(
        &router,
        post_json(
            "/api/v1/releases",
            serde_json::json!({
                "artifact_id": "clf-2",
                "strategy": "canary",
                "target_namespace": "prod",
                "policy_override": { "version": "strict", "min_accuracy": 0.95 }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["result"], "rejected");
    assert!(body["error"].as_str().unwrap().contains("accuracy"));
    assert!(controller.mutations().is_empty());

    let (status, body) = json_body(&router, get("/api/v1/artifacts/clf-2/reports")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["failed_checks"][0], "accuracy");
}

#[tokio::test]
async fn malformed_plan_is_rejected_without_execution() {
    let (orchestrator, _) = test_orchestrator(Arc::new(ScriptedSmokeTester::passing()));
    let router = build_router(orchestrator.clone());

    let (status, body) = json_body(
        &router,
        post_json(
            "/api/v1/releases",
            serde_json::json!({
                "artifact_id": "clf-2",
                "strategy": "canary",
                "target_namespace": "prod",
                "steps": [
                    { "weight_percent": 50, "min_observe_secs": 10 },
                    { "weight_percent": 10, "min_observe_secs": 10 }
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["data"]["execution_id"].is_null());
    assert!(orchestrator.list(None).unwrap().is_empty());
}

#[tokio::test]
async fn abort_stops_a_running_release() {
    let (orchestrator, controller) = test_orchestrator(Arc::new(ScriptedSmokeTester::stalling()));
    let router = build_router(orchestrator.clone());
    let mut events = orchestrator.subscribe();

    let (status, body) = json_body(
        &router,
        post_json(
            "/api/v1/releases",
            serde_json::json!({
                "artifact_id": "clf-2",
                "strategy": "rolling",
                "target_namespace": "prod"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["data"]["execution_id"].as_str().unwrap().to_string();

    loop {
        let event = events.recv().await.unwrap();
        if event.execution_id == id && event.to == ExecutionState::SmokeTesting {
            break;
        }
    }

    let (status, body) = json_body(
        &router,
        post_json(&format!("/api/v1/releases/{id}/abort"), serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["abort_requested"], true);

    let done = orchestrator.wait_for_terminal(&id).await.unwrap();
    assert_eq!(done.state, ExecutionState::RolledBack);
    assert_eq!(controller.weight_of("prod", &controller.versions_of("clf-1")[0].id), Some(100));

    let (status, _) = json_body(
        &router,
        post_json(&format!("/api/v1/releases/{id}/abort"), serde_json::json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn list_filters_by_namespace() {
    let (orchestrator, _) = test_orchestrator(Arc::new(ScriptedSmokeTester::passing()));
    let router = build_router(orchestrator.clone());

    let (status, _) = json_body(
        &router,
        post_json(
            "/api/v1/releases",
            serde_json::json!({
                "artifact_id": "missing",
                "strategy": "rolling",
                "target_namespace": "staging"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = json_body(&router, get("/api/v1/releases?namespace=staging")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    let (_, body) = json_body(&router, get("/api/v1/releases?namespace=prod")).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}
