//! OpenAI-compatible client behavior against a mock provider.

use std::time::Duration;

use chartmind::config::LlmSettings;
use chartmind::core::llm::{ChatCompletion, ChatMessage, CompletionConfig, OpenAiClient};
use chartmind::error::CompletionError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer) -> LlmSettings {
    LlmSettings {
        base_url: format!("{}/v1", server.uri()),
        ..LlmSettings::default()
    }
}

fn config() -> CompletionConfig {
    CompletionConfig {
        model: "gpt-4-1106-preview".to_string(),
        temperature: 0.0,
        max_tokens: 256,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn successful_completion_returns_text_and_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "EMEA leads."}}],
            "usage": {"prompt_tokens": 1000, "completion_tokens": 2000}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let llm = settings_for(&server);
    let client = OpenAiClient::new("test-key".to_string(), &llm);
    let completion = client
        .complete(&[ChatMessage::user("Which region leads?")], &config())
        .await
        .unwrap();

    assert_eq!(completion.text, "EMEA leads.");
    // 1k prompt tokens at 0.01 + 2k completion tokens at 0.03.
    assert!((completion.cost - 0.07).abs() < 1e-9);
}

#[tokio::test]
async fn provider_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let llm = settings_for(&server);
    let client = OpenAiClient::new("test-key".to_string(), &llm);
    let err = client
        .complete(&[ChatMessage::user("hi")], &config())
        .await
        .unwrap_err();

    match err {
        CompletionError::Provider { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("upstream exploded"));
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let llm = settings_for(&server);
    let client = OpenAiClient::new("test-key".to_string(), &llm);
    let err = client
        .complete(&[ChatMessage::user("hi")], &config())
        .await
        .unwrap_err();
    assert!(matches!(err, CompletionError::Malformed(_)));
}

#[tokio::test]
async fn empty_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
        )
        .mount(&server)
        .await;

    let llm = settings_for(&server);
    let client = OpenAiClient::new("test-key".to_string(), &llm);
    let err = client
        .complete(&[ChatMessage::user("hi")], &config())
        .await
        .unwrap_err();
    assert!(matches!(err, CompletionError::Malformed(_)));
}
