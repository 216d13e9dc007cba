//! Chat-completions client tests against a wiremock endpoint.
//!
//! Every failure mode must surface as a `GenerationFailure`, never a panic
//! or a different error type.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use arena::{ChatCompletionsClient, ChatMessage, EngineConfig, GenerationRequest, ModelClient};

fn config_for(server: &MockServer) -> EngineConfig {
    EngineConfig {
        base_url: server.uri(),
        request_timeout_ms: 2_000,
        ..Default::default()
    }
}

fn request(model: &str) -> GenerationRequest {
    GenerationRequest::new(
        "You are Alice.",
        vec![ChatMessage::user("Opening statement, please.")],
        model,
        128,
    )
}

fn completion(text: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": text }, "finish_reason": "stop" }
        ]
    })
}

#[tokio::test]
async fn test_successful_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/chat/completions"))
        .and(body_partial_json(json!({
            "model": "m1",
            "max_tokens": 128,
            "temperature": 0.0,
            "stream": false,
            "messages": [
                { "role": "system", "content": "You are Alice." },
                { "role": "user", "content": "Opening statement, please." }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Regulate it.")))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::new(&config_for(&server)).unwrap();
    let text = client.generate(request("m1")).await.unwrap();
    assert_eq!(text, "Regulate it.");
}

#[tokio::test]
async fn test_max_tokens_clamped_to_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "max_tokens": 512 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let config = EngineConfig {
        max_tokens_ceiling: 512,
        ..config_for(&server)
    };
    let client = ChatCompletionsClient::new(&config).unwrap();
    let mut req = request("m1");
    req.max_tokens = 100_000;
    assert_eq!(client.generate(req).await.unwrap(), "ok");
}

#[tokio::test]
async fn test_non_success_status_is_generation_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::new(&config_for(&server)).unwrap();
    let err = client.generate(request("m1")).await.unwrap_err();
    assert!(err.reason.contains("HTTP 500"), "{}", err.reason);
    assert!(err.reason.contains("model crashed"));
}

#[tokio::test]
async fn test_malformed_body_is_generation_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::new(&config_for(&server)).unwrap();
    let err = client.generate(request("m1")).await.unwrap_err();
    assert!(err.reason.contains("malformed"), "{}", err.reason);
}

#[tokio::test]
async fn test_missing_content_is_generation_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::new(&config_for(&server)).unwrap();
    let err = client.generate(request("m1")).await.unwrap_err();
    assert!(err.reason.contains("no message content"));
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("too late"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = EngineConfig {
        request_timeout_ms: 50,
        ..config_for(&server)
    };
    let client = ChatCompletionsClient::new(&config).unwrap();
    let err = client.generate(request("m1")).await.unwrap_err();
    assert!(err.reason.contains("timed out"), "{}", err.reason);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_generation_failure() {
    let config = EngineConfig {
        base_url: "http://127.0.0.1:1".into(),
        ..Default::default()
    };
    let client = ChatCompletionsClient::new(&config).unwrap();
    let err = client.generate(request("m1")).await.unwrap_err();
    assert!(err.reason.contains("request failed"), "{}", err.reason);
}

#[tokio::test]
async fn test_empty_model_rejected_without_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("x")))
        .expect(0)
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::new(&config_for(&server)).unwrap();
    let err = client.generate(request("  ")).await.unwrap_err();
    assert!(err.reason.contains("model id"));
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("authed")))
        .expect(1)
        .mount(&server)
        .await;

    let config = EngineConfig {
        api_key: Some("sk-test".into()),
        ..config_for(&server)
    };
    let client = ChatCompletionsClient::new(&config).unwrap();
    assert_eq!(client.generate(request("m1")).await.unwrap(), "authed");
}

#[tokio::test]
async fn test_probe_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "m1": {} })))
        .mount(&server)
        .await;

    let client = ChatCompletionsClient::new(&config_for(&server)).unwrap();
    assert_eq!(client.probe().await.unwrap(), 200);
}

#[tokio::test]
async fn test_probe_unreachable() {
    let config = EngineConfig {
        base_url: "http://127.0.0.1:1".into(),
        ..Default::default()
    };
    let client = ChatCompletionsClient::new(&config).unwrap();
    assert!(client.probe().await.is_err());
}
