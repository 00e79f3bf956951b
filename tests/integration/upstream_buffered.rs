//! Buffered (non-streaming) backend against a mock upstream.

use crate::helpers::llm_config;
use serde_json::json;
use voice_relay::config::{ApiFlavor, BackendKind};
use voice_relay::llm::{
    APOLOGY_TEXT, ConversationMessage, EMPTY_REPLY_TEXT, Role, StreamAdapter, build_backend,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn history() -> Vec<ConversationMessage> {
    ConversationMessage::new(Role::User, "What are your hours?")
        .into_iter()
        .collect()
}

#[tokio::test]
async fn chat_completion_reply_becomes_one_fragment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "We open at nine."},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Buffered, ApiFlavor::ChatCompletions);
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    assert_eq!(adapter.backend_name(), "buffered");

    let (fragments, full) = adapter.stream(&history(), "Be brief.").collect_all().await;
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].text, "We open at nine.");
    assert!(!fragments[0].is_final);
    assert!(fragments[1].is_final && fragments[1].text.is_empty());
    assert_eq!(full, "We open at nine.");
}

#[tokio::test]
async fn messages_reply_reads_first_text_block() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Nine to five, weekdays."}],
            "stop_reason": "end_turn"
        })))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Buffered, ApiFlavor::Messages);
    let backend = build_backend(&config).expect("backend");
    let text = backend
        .generate_response(&history(), "Be brief.")
        .await
        .expect("reply");
    assert_eq!(text, "Nine to five, weekdays.");
}

#[tokio::test]
async fn empty_reply_is_substituted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": ""}}]
        })))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Buffered, ApiFlavor::ChatCompletions);
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    let (fragments, full) = adapter.stream(&history(), "").collect_all().await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].text, EMPTY_REPLY_TEXT);
    assert_eq!(full, EMPTY_REPLY_TEXT);
}

#[tokio::test]
async fn unusable_body_is_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Buffered, ApiFlavor::ChatCompletions);
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    let (fragments, full) = adapter.stream(&history(), "").collect_all().await;
    assert_eq!(fragments.len(), 1);
    assert!(fragments[0].is_final);
    assert_eq!(full, APOLOGY_TEXT);
}

#[tokio::test]
async fn rate_limit_is_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Buffered, ApiFlavor::ChatCompletions);
    let backend = build_backend(&config).expect("backend");
    let err = backend
        .generate_response(&history(), "")
        .await
        .expect_err("429 should fail");
    assert_eq!(err.code(), "REQUEST_FAILED");

    let adapter = StreamAdapter::new(backend);
    let (fragments, _) = adapter.stream(&history(), "").collect_all().await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].text, APOLOGY_TEXT);
}
