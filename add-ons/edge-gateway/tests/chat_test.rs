//! `/api/chat` against a mock upstream.
//!
//! Run with: `cargo test -p edge-gateway --test chat_test`

use axum::body::Body;
use axum::http::{Request, StatusCode};
use edge_gateway::{router, AppState, GatewayConfig};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(upstream: &MockServer) -> GatewayConfig {
    GatewayConfig {
        api_base: upstream.uri(),
        model: "test/model".to_string(),
        token: Some("hf_test".to_string()),
        system_prompt: "Be brief.".to_string(),
        base_delay_ms: 5,
        jitter_ms: 0,
        ..GatewayConfig::default()
    }
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call(config: GatewayConfig, req: Request<Body>) -> (StatusCode, Value) {
    let app = router(AppState::new(config).expect("state"));
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_v1_reply_with_system_turn_and_window() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer hf_test"))
        .and(body_partial_json(json!({ "model": "test/model", "max_tokens": 300 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "  Hi there! How can I help?  " } }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let messages: Vec<Value> = (0..15)
        .map(|i| json!({ "role": if i % 2 == 0 { "user" } else { "assistant" }, "content": format!("m{}", i) }))
        .collect();
    let (status, body) = call(config_for(&upstream), chat_request(json!({ "messages": messages }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "reply": "Hi there! How can I help?", "mode": "v1" }));

    let sent: Value = serde_json::from_slice(&upstream.received_requests().await.unwrap()[0].body).unwrap();
    let sent = sent["messages"].as_array().unwrap();
    assert_eq!(sent.len(), 13);
    assert_eq!(sent[0], json!({ "role": "system", "content": "Be brief." }));
    assert_eq!(sent[1]["content"], "m3");
    assert_eq!(sent[12]["content"], "m14");
}

#[tokio::test]
async fn test_falls_back_to_legacy_generation() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/test/model"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": " legacy says hi " }])))
        .expect(1)
        .mount(&upstream)
        .await;

    let (status, body) = call(
        config_for(&upstream),
        chat_request(json!({ "messages": [{ "role": "user", "content": "Hello" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "reply": "legacy says hi", "mode": "legacy" }));
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway_with_detail() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/test/model"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Model test/model does not exist"))
        .mount(&upstream)
        .await;

    let (status, body) = call(
        config_for(&upstream),
        chat_request(json!({ "messages": [{ "role": "user", "content": "Hello" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream error 400");
    assert_eq!(body["detail"], "Model test/model does not exist");
}

#[tokio::test]
async fn test_rejects_other_methods() {
    let upstream = MockServer::start().await;
    let req = Request::builder()
        .method("GET")
        .uri("/api/chat")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(config_for(&upstream), req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "Method Not Allowed");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let upstream = MockServer::start().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = call(config_for(&upstream), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid request body");
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_token_is_server_error() {
    let upstream = MockServer::start().await;
    let config = GatewayConfig {
        token: None,
        ..config_for(&upstream)
    };
    let (status, body) = call(config, chat_request(json!({ "messages": [] }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "HF_TOKEN is not set");
}
