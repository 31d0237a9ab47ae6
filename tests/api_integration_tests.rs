//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use shardcache::{api::create_router, AppState, Config};
use tempfile::TempDir;
use tower::ServiceExt;

// == Helper Functions ==

fn test_config(dir: &TempDir) -> Config {
    Config {
        num_shards: 4,
        ttl_seconds: 300,
        wal_path: dir.path().join("wal"),
        wal_flush_interval_ms: 0,
        ..Config::default()
    }
}

fn create_test_app(dir: &TempDir) -> (Router, AppState) {
    let state = AppState::from_config(&test_config(dir)).unwrap();
    (create_router(state.clone()), state)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// == SET / GET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app
        .oneshot(put_json("/set", r#"{"key":"test_key","value":"test_value"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("test_key"));
}

#[tokio::test]
async fn test_get_endpoint_success() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app
        .clone()
        .oneshot(put_json("/set", r#"{"key":"emb:7","value":"[0.5,0.25]","ttl":60}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("GET", "/get/emb:7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], "emb:7");
    assert_eq!(json["value"], "[0.5,0.25]");
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app.oneshot(request("GET", "/get/nonexistent")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("nonexistent"));
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir);
    state.cache.set("doomed", b"v".to_vec(), None).unwrap();

    let response = app.clone().oneshot(request("DELETE", "/del/doomed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(request("DELETE", "/del/doomed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// == CLEAR / SIZE Endpoint Tests ==

#[tokio::test]
async fn test_clear_and_size_endpoints() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir);
    for i in 0..5 {
        state.cache.set(&format!("k{i}"), b"v".to_vec(), None).unwrap();
    }

    let response = app.clone().oneshot(request("GET", "/size")).await.unwrap();
    assert_eq!(body_to_json(response.into_body()).await["size"], 5);

    let response = app.clone().oneshot(request("POST", "/clear")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["removed"], 5);

    let response = app.oneshot(request("GET", "/size")).await.unwrap();
    assert_eq!(body_to_json(response.into_body()).await["size"], 0);
}

// == SNAPSHOT Endpoint Tests ==

#[tokio::test]
async fn test_snapshot_endpoint() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir);
    state.cache.set("a", b"1".to_vec(), None).unwrap();
    state.cache.set("b", b"2".to_vec(), None).unwrap();

    let response = app.oneshot(request("POST", "/snapshot")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["wal_sequence"], 2);
    assert!(dir.path().join("snapshots").exists());
}

// == METRICS Endpoint Tests ==

#[tokio::test]
async fn test_metrics_endpoint() {
    let dir = TempDir::new().unwrap();
    let (app, state) = create_test_app(&dir);
    state.cache.set("a", b"1".to_vec(), None).unwrap();
    state.cache.get("a").unwrap();
    state.cache.get("missing").unwrap();

    let response = app.oneshot(request("GET", "/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["sets"], 1);
    assert_eq!(json["total_entries"], 1);
    assert_eq!(json["shards"].as_array().unwrap().len(), 4);
    assert_eq!(json["degraded"], false);
    assert!(json["sweep_interval_secs"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_hot_shards_endpoint() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app.oneshot(request("GET", "/hot-shards")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert!(json["hot_shards"].as_array().unwrap().is_empty());
}

// == HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app.oneshot(request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["degraded"], false);
    assert!(json.get("timestamp").is_some());
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app.oneshot(put_json("/set", "{not json")).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_control_character_key_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);

    let response = app
        .oneshot(put_json("/set", r#"{"key":"bad\u0007key","value":"v"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cache_full_maps_to_503() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        max_memory_mb: 1,
        ..test_config(&dir)
    };
    let app = create_router(AppState::from_config(&config).unwrap());
    // Over the 1 MB cache bound, under axum's 2 MB body limit
    let big = "x".repeat(1536 * 1024);

    let response = app
        .oneshot(put_json("/set", &format!(r#"{{"key":"big","value":"{big}"}}"#)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// == Live Server Tests ==

#[tokio::test]
async fn test_live_server_round_trip() {
    let dir = TempDir::new().unwrap();
    let (app, _) = create_test_app(&dir);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let response = client
        .put(format!("{base}/set"))
        .json(&serde_json::json!({"key": "live", "value": "over the wire"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let json: Value = client
        .get(format!("{base}/get/live"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["value"], "over the wire");

    server.abort();
}
