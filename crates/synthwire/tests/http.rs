mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{offer, Harness};
use serde_json::Value;
use std::fs;
use synthconf::Environment;
use synthwire::synth::SynthCatalog;
use synthwire::web::{self, WebState};
use tower::ServiceExt;

fn app(h: &Harness, catalog: SynthCatalog) -> Router {
    web::router(WebState {
        registry: h.registry.clone(),
        orchestrator: h.orchestrator.clone(),
        catalog,
        environment: Environment::Development,
    })
}

fn empty_catalog() -> SynthCatalog {
    SynthCatalog::new("/nonexistent/synthdefs", "/nonexistent/src")
}

fn post(uri: &str, session: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = session {
        builder = builder.header("X-Session-ID", id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(id) = session {
        builder = builder.header("X-Session-ID", id);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn offer_body() -> Value {
    serde_json::to_value(offer()).unwrap()
}

#[tokio::test]
async fn test_offer_requires_session_header() {
    let h = Harness::new();
    let response = app(&h, empty_catalog())
        .oneshot(post("/offer", None, offer_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert!(body["error"].as_str().unwrap().contains("X-Session-ID"));
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_offer_returns_answer() {
    let h = Harness::new();
    let response = app(&h, empty_catalog())
        .oneshot(post("/offer", Some("abc123"), offer_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["type"], "answer");
    assert!(body["sdp"].as_str().unwrap().starts_with("v=0"));
    assert_eq!(h.registry.len(), 1);
}

#[tokio::test]
async fn test_hostile_session_header_is_rejected() {
    let h = Harness::new();
    let router = app(&h, empty_catalog());
    let hostile = "x ! filesink location=/tmp/pwned ! fakesrc name=y";

    let response = router
        .clone()
        .oneshot(post("/offer", Some(hostile), offer_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert!(body["error"].as_str().unwrap().contains("invalid session id"));

    let stopped = router
        .oneshot(post("/stop", Some("../etc"), Value::Null))
        .await
        .unwrap();
    assert_eq!(stopped.status(), StatusCode::BAD_REQUEST);

    assert!(h.registry.is_empty());
    assert_eq!(h.connector.count(), 0);
    assert!(h.pipelines.sources.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_offer_without_stun_is_bad_request() {
    let h = Harness::new();
    let body = serde_json::json!({
        "sdp": common::OFFER_SDP,
        "type": "offer",
        "iceServers": [{"urls": "turn:turn.example:3478"}],
    });
    let response = app(&h, empty_catalog())
        .oneshot(post("/offer", Some("abc123"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop() {
    let h = Harness::new();
    let router = app(&h, empty_catalog());

    let missing = router
        .clone()
        .oneshot(post("/stop", None, Value::Null))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    router
        .clone()
        .oneshot(post("/offer", Some("abc123"), offer_body()))
        .await
        .unwrap();
    let stopped = router
        .clone()
        .oneshot(post("/stop", Some("abc123"), Value::Null))
        .await
        .unwrap();
    assert_eq!(stopped.status(), StatusCode::OK);
    assert_eq!(json(stopped).await, serde_json::json!({"status": "stopped"}));
    assert_eq!(h.connector.link(0).closes(), 1);

    // Unknown sessions still stop cleanly.
    let unknown = router
        .oneshot(post("/stop", Some("never-seen"), Value::Null))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ice_candidate() {
    let h = Harness::new();
    let router = app(&h, empty_catalog());
    let candidate = serde_json::json!({
        "candidate": "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0,
    });

    let unknown = router
        .clone()
        .oneshot(post("/ice-candidate", Some("abc123"), candidate.clone()))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    router
        .clone()
        .oneshot(post("/offer", Some("abc123"), offer_body()))
        .await
        .unwrap();
    let added = router
        .oneshot(post("/ice-candidate", Some("abc123"), candidate))
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::OK);
    assert_eq!(h.connector.link(0).candidates.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_config_exposes_ice_servers_and_port_range() {
    let h = Harness::new();
    let response = app(&h, empty_catalog())
        .oneshot(get("/config", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["portRange"], serde_json::json!({"min": 49152, "max": 49252}));
    assert_eq!(body["bundlePolicy"], "max-bundle");
    assert_eq!(body["environment"], "development");
    assert!(body["iceServers"][0]["urls"][0]
        .as_str()
        .unwrap()
        .starts_with("stun:"));
}

#[tokio::test]
async fn test_synth_code() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("romero")).unwrap();
    fs::write(src.join("romero/romero_1.scd"), "SynthDef(\\romero_1, {}).add;").unwrap();

    let h = Harness::new();
    let router = app(&h, SynthCatalog::new(dir.path().join("synthdefs"), &src));

    let nothing = router
        .clone()
        .oneshot(get("/synth-code", Some("abc123")))
        .await
        .unwrap();
    assert_eq!(nothing.status(), StatusCode::NOT_FOUND);

    router
        .clone()
        .oneshot(post("/offer", Some("abc123"), offer_body()))
        .await
        .unwrap();
    let response = router
        .oneshot(get("/synth-code", Some("abc123")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["synthId"], "romero_1");
    assert!(body["code"].as_str().unwrap().contains("SynthDef"));
}

#[tokio::test]
async fn test_client_log_and_health() {
    let h = Harness::new();
    let router = app(&h, empty_catalog());

    let logged = router
        .clone()
        .oneshot(post(
            "/client-log",
            None,
            serde_json::json!({"level": "warn", "message": "ice failed", "sessionId": "abc123"}),
        ))
        .await
        .unwrap();
    assert_eq!(logged.status(), StatusCode::OK);

    h.registry.get_or_create(Some("abc123")).unwrap();
    let health = router.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(
        json(health).await,
        serde_json::json!({"status": "ok", "sessions": 1})
    );
}
