//! RemoteCompletionClient against a mock HTTP server.
//!
//! Run with: `cargo test -p edge-voice --test completion_test`

use edge_voice::{
    ChatCompletions, CompletionError, ConversationTurn, EdgeEndpoint, RemoteCompletionClient,
    RetryPolicy, TextGeneration,
};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Real-time retries, kept short.
fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_jitter: Duration::ZERO,
        seed: Some(7),
    }
}

fn http() -> reqwest::Client {
    reqwest::Client::new()
}

fn hello() -> Vec<ConversationTurn> {
    vec![ConversationTurn::user("Hello")]
}

#[tokio::test]
async fn test_rate_limited_request_makes_exactly_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(3)
        .mount(&server)
        .await;

    let endpoint = EdgeEndpoint::new(http(), format!("{}/api/chat", server.uri()), None);
    let client = RemoteCompletionClient::new(Box::new(endpoint), fast_policy());

    let err = client.send(&hello()).await.unwrap_err();
    match err {
        CompletionError::RateLimited { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "slow down");
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = EdgeEndpoint::new(http(), server.uri(), None);
    let client = RemoteCompletionClient::new(Box::new(endpoint), fast_policy());

    let err = client.send(&hello()).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_edge_endpoint_sends_system_turn_and_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "reply": "  Hi there!  ", "mode": "v1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = EdgeEndpoint::new(
        http(),
        format!("{}/api/chat", server.uri()),
        Some("tiny-model".to_string()),
    );
    let client = RemoteCompletionClient::new(Box::new(endpoint), fast_policy())
        .with_system_prompt("Be brief.")
        .with_window(2);

    let history = vec![
        ConversationTurn::user("one"),
        ConversationTurn::assistant("two"),
        ConversationTurn::user("three"),
    ];
    let reply = client.send(&history).await.unwrap();
    assert_eq!(reply.text, "Hi there!");
    assert_eq!(reply.mode, "edge");

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "tiny-model");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], json!({ "role": "system", "content": "Be brief." }));
    assert_eq!(messages[1]["content"], "two");
    assert_eq!(messages[2]["content"], "three");
}

#[tokio::test]
async fn test_reply_is_capped_to_word_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reply": "a b c d e f" })))
        .mount(&server)
        .await;

    let endpoint = EdgeEndpoint::new(http(), server.uri(), None);
    let client = RemoteCompletionClient::new(Box::new(endpoint), fast_policy()).with_max_words(Some(4));

    let reply = client.send(&hello()).await.unwrap();
    assert_eq!(reply.text, "a b c d…");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = EdgeEndpoint::new(http(), server.uri(), None);
    let client = RemoteCompletionClient::new(Box::new(endpoint), fast_policy());

    let err = client.send(&hello()).await.unwrap_err();
    assert!(matches!(err, CompletionError::InvalidResponse(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_chat_completions_reads_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer hf_test"))
        .and(body_partial_json(json!({ "model": "google/gemma-2-2b-it", "max_tokens": 300 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello from v1" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let v1 = ChatCompletions::new(http(), server.uri(), "hf_test", "google/gemma-2-2b-it");
    let client = RemoteCompletionClient::new(Box::new(v1), fast_policy());

    let reply = client.send(&hello()).await.unwrap();
    assert_eq!(reply.text, "Hello from v1");
    assert_eq!(reply.mode, "v1");
}

#[tokio::test]
async fn test_falls_back_to_text_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no chat route"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/google/gemma-2-2b-it"))
        .and(body_partial_json(json!({
            "parameters": { "max_new_tokens": 256, "return_full_text": false },
            "options": { "wait_for_model": true }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "generated_text": "Hello from legacy" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let v1 = ChatCompletions::new(http(), server.uri(), "hf_test", "google/gemma-2-2b-it");
    let legacy = TextGeneration::new(http(), server.uri(), "hf_test", "google/gemma-2-2b-it");
    let client = RemoteCompletionClient::new(Box::new(v1), fast_policy()).with_fallback(Box::new(legacy));

    let reply = client.send(&hello()).await.unwrap();
    assert_eq!(reply.text, "Hello from legacy");
    assert_eq!(reply.mode, "legacy");

    let requests = server.received_requests().await.unwrap();
    let legacy_body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let prompt = legacy_body["inputs"].as_str().unwrap();
    assert!(prompt.contains("<|user|>\nHello</s>\n"));
    assert!(prompt.ends_with("<|assistant|>\n"));
}

#[tokio::test]
async fn test_fallback_failure_reports_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/m"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model is loading"))
        .expect(3)
        .mount(&server)
        .await;

    let v1 = ChatCompletions::new(http(), server.uri(), "t", "m");
    let legacy = TextGeneration::new(http(), server.uri(), "t", "m");
    let client = RemoteCompletionClient::new(Box::new(v1), fast_policy()).with_fallback(Box::new(legacy));

    let err = client.send(&hello()).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("model is loading"));
}
