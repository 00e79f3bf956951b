//! Streaming backend against a mock upstream over real HTTP.

use crate::helpers::{chat_completion_stream, llm_config, sse_body};
use futures_util::StreamExt;
use serde_json::json;
use voice_relay::config::{ApiFlavor, BackendKind};
use voice_relay::llm::{
    APOLOGY_TEXT, ConversationMessage, Role, StreamAdapter, TextFragment, build_backend,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn history() -> Vec<ConversationMessage> {
    [
        ConversationMessage::new(Role::Assistant, "Hi, this is the front desk."),
        ConversationMessage::new(Role::User, "Do you have rooms tonight?"),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn chat_completions_stream_yields_deltas() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "max_tokens": 300,
            "messages": [{"role": "system", "content": "Be brief."}]
        })))
        .respond_with(event_stream(chat_completion_stream(&["We do", " have rooms."])))
        .expect(1)
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Streaming, ApiFlavor::ChatCompletions);
    let backend = build_backend(&config).expect("backend");
    let deltas: Vec<String> = backend
        .stream_response(&history(), "Be brief.")
        .await
        .expect("stream opens")
        .map(|d| d.expect("delta"))
        .collect()
        .await;
    assert_eq!(deltas, vec!["We do".to_string(), " have rooms.".to_string()]);
}

#[tokio::test]
async fn messages_flavor_reads_content_block_deltas() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        (
            Some("message_start"),
            json!({"type": "message_start", "message": {"id": "msg_1"}}).to_string(),
        ),
        (
            Some("content_block_delta"),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": "Yes, "}})
            .to_string(),
        ),
        (Some("ping"), json!({"type": "ping"}).to_string()),
        (
            Some("content_block_delta"),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": "two left."}})
            .to_string(),
        ),
        (Some("message_stop"), json!({"type": "message_stop"}).to_string()),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"system": "Be brief.", "stream": true})))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Streaming, ApiFlavor::Messages);
    let backend = build_backend(&config).expect("backend");
    let text = backend
        .generate_response(&history(), "Be brief.")
        .await
        .expect("reply");
    assert_eq!(text, "Yes, two left.");
}

#[tokio::test]
async fn flat_delta_events_are_understood() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        (
            Some("response.output_text.delta"),
            json!({"type": "response.output_text.delta", "delta": "Flat "}).to_string(),
        ),
        (
            Some("response.output_text.delta"),
            json!({"type": "response.output_text.delta", "delta": "deltas."}).to_string(),
        ),
        (
            Some("response.completed"),
            json!({"type": "response.completed", "response": {}}).to_string(),
        ),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Streaming, ApiFlavor::ChatCompletions);
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    let (fragments, full) = adapter.stream(&history(), "").collect_all().await;
    assert_eq!(full, "Flat deltas.");
    assert_eq!(fragments.last().map(|f| f.is_final), Some(true));
}

#[tokio::test]
async fn server_error_becomes_single_apology_fragment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "upstream down"}})),
        )
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Streaming, ApiFlavor::ChatCompletions);
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    let (fragments, full) = adapter.stream(&history(), "x").collect_all().await;
    assert_eq!(
        fragments,
        vec![TextFragment {
            text: APOLOGY_TEXT.to_string(),
            is_final: true
        }]
    );
    assert_eq!(full, APOLOGY_TEXT);
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "invalid api key"}})),
        )
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Streaming, ApiFlavor::ChatCompletions);
    let backend = build_backend(&config).expect("backend");
    let err = match backend.stream_response(&history(), "x").await {
        Ok(_) => panic!("401 should fail"),
        Err(e) => e,
    };
    assert_eq!(err.code(), "AUTH_FAILED");
    assert!(err.message().contains("invalid api key"));
}

#[tokio::test]
async fn error_event_mid_stream_ends_with_apology() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        (
            None,
            json!({"choices": [{"delta": {"content": "Let me check"}}]}).to_string(),
        ),
        (
            Some("error"),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})
                .to_string(),
        ),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let config = llm_config(&server, BackendKind::Streaming, ApiFlavor::ChatCompletions);
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    let (fragments, full) = adapter.stream(&history(), "x").collect_all().await;
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].text, "Let me check");
    assert_eq!(fragments[1].text, APOLOGY_TEXT);
    assert_eq!(full, APOLOGY_TEXT);
}

#[tokio::test]
async fn unreachable_upstream_still_answers() {
    // nothing listens on this port once the server is dropped
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };
    let config = voice_relay::config::LlmConfig {
        base_url: uri,
        request_timeout_secs: 2,
        ..Default::default()
    };
    let adapter = StreamAdapter::new(build_backend(&config).expect("backend"));
    let (fragments, _) = adapter.stream(&history(), "x").collect_all().await;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].text, APOLOGY_TEXT);
}
