//! Configuration files driving a live call.

use crate::helpers::{frames_until_complete, response_required, spoken};
use serde_json::json;
use tokio::sync::mpsc;
use voice_relay::config::{ApiFlavor, BackendKind};
use voice_relay::{RelayConfig, RelayError, SessionRegistry};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn toml_file_selects_buffered_messages_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "file-key"))
        .and(body_partial_json(json!({
            "model": "file-model",
            "max_tokens": 120,
            "system": "Be terse.",
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "Your order ships on Monday."}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("relay.toml");
    std::fs::write(
        &file,
        format!(
            r#"
[llm]
backend = "buffered"
api_flavor = "messages"
base_url = "{}/"
api_key = "file-key"
model = "file-model"
max_tokens = 120

[session]
instructions = "Be terse."
farewell = "Talk soon."
"#,
            server.uri()
        ),
    )
    .unwrap();

    let config = RelayConfig::from_file(&file).unwrap();
    config.validate().unwrap();
    assert_eq!(config.llm.backend, BackendKind::Buffered);
    assert_eq!(config.llm.api_flavor, ApiFlavor::Messages);
    assert_eq!(config.server.port, 8080);

    let registry = SessionRegistry::from_config(config.session.clone(), config.llm.clone());
    let (tx, mut rx) = mpsc::channel(16);
    let mut session = registry.open("from-file", tx).unwrap();
    session
        .handle_text(&response_required(&[("user", "When does it ship?")]))
        .await;

    let frames = frames_until_complete(&mut rx).await;
    assert_eq!(spoken(&frames).trim(), "Your order ships on Monday.");

    assert!(session.end_call().await);
    let goodbye = rx.recv().await.unwrap();
    assert_eq!(spoken(&[goodbye]), "Talk soon.");
}

#[test]
fn saved_file_reloads_with_env_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("conf").join("relay.toml");

    let mut config = RelayConfig::default();
    config.llm.base_url = "http://gateway.local".into();
    config.session.chunk_threshold = 40;
    config.save_to_file(&file).unwrap();

    let mut reloaded = RelayConfig::from_file(&file).unwrap();
    assert_eq!(reloaded.session.chunk_threshold, 40);

    reloaded
        .apply_env(|key| match key {
            "PORT" => Some("9443".into()),
            "LLM_MODEL" => Some("night-shift".into()),
            "SYSTEM_PROMPT" => Some("   ".into()),
            _ => None,
        })
        .unwrap();
    assert_eq!(reloaded.server.port, 9443);
    assert_eq!(reloaded.llm.model, "night-shift");
    assert_eq!(reloaded.session.instructions, config.session.instructions);
    assert!(reloaded.validate().is_ok());
}

#[test]
fn malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("broken.toml");
    std::fs::write(&file, "[llm\nbase_url = ").unwrap();

    let err = RelayConfig::from_file(&file).unwrap_err();
    assert!(matches!(err, RelayError::Config(_)));
}
