//! Call sessions driven end to end against a mock upstream.

use crate::helpers::{
    chat_completion_stream, frames_until_complete, llm_config, response_required, spoken,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use voice_relay::SessionRegistry;
use voice_relay::config::{ApiFlavor, BackendKind, SessionConfig};
use voice_relay::llm::APOLOGY_TEXT;
use voice_relay::protocol::OutboundFrame;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn streaming_server(deltas: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(chat_completion_stream(deltas), "text/event-stream"),
        )
        .mount(&server)
        .await;
    server
}

fn registry_for(server: &MockServer) -> SessionRegistry {
    SessionRegistry::from_config(
        SessionConfig::default(),
        llm_config(server, BackendKind::Streaming, ApiFlavor::ChatCompletions),
    )
}

#[tokio::test]
async fn markdown_reply_is_streamed_as_speakable_chunks() {
    let server = streaming_server(&[
        "Here are ",
        "**two** options:\n\n",
        "1. Call back later\n",
        "2. Visit [our site](https://example.com)",
        " today.",
    ])
    .await;
    let registry = registry_for(&server);
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = registry.open("call-md", tx).expect("open");

    session
        .handle_text(&response_required(&[("user", "What can I do?")]))
        .await;
    let frames = frames_until_complete(&mut rx).await;

    let ids: Vec<u64> = frames
        .iter()
        .map(|f| match f {
            OutboundFrame::Response { response_id, .. } => *response_id,
            OutboundFrame::Pong { .. } => panic!("no pong expected"),
        })
        .collect();
    assert!(ids.iter().all(|id| *id == 1));
    assert_eq!(frames.iter().filter(|f| f.is_complete()).count(), 1);

    let text = spoken(&frames);
    assert!(!text.contains("**"));
    assert!(!text.contains("https://"));
    assert!(!text.contains('\n'));
    assert!(text.contains("two options"));
    assert!(text.contains("Call back later"));
    assert!(text.contains("our site"));
    assert!(text.trim_end().ends_with("today."));

    // raw text is what the conversation remembers
    let last = session.conversation().messages().last().cloned().expect("assistant turn");
    assert!(last.content.contains("**two**"));
    assert_eq!(registry.snapshot()[0].message_count, 2);
}

#[tokio::test]
async fn upstream_failure_is_one_complete_apology_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "busy"}})))
        .mount(&server)
        .await;
    let registry = registry_for(&server);
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = registry.open("call-fail", tx).expect("open");

    session
        .handle_text(&response_required(&[("user", "Hello?")]))
        .await;
    let frames = frames_until_complete(&mut rx).await;
    assert_eq!(frames, vec![OutboundFrame::complete(1, APOLOGY_TEXT)]);
}

#[tokio::test]
async fn full_call_over_run_loop() {
    let server = streaming_server(&["Sure thing, ", "I booked it for you."]).await;
    let registry = registry_for(&server);
    let (out_tx, mut out_rx) = mpsc::channel(64);
    let session = registry.open("call-run", out_tx).expect("open");
    let (in_tx, in_rx) = mpsc::channel::<String>(16);
    let task = tokio::spawn(session.run(ReceiverStream::new(in_rx)));

    in_tx
        .send(r#"{"interaction_type":"ping_pong","response_id":11}"#.into())
        .await
        .expect("send ping");
    assert_eq!(out_rx.recv().await, Some(OutboundFrame::pong(Some(11))));

    in_tx
        .send(
            json!({"interaction_type": "update_only",
                   "transcript": [{"role": "agent", "content": "Hi!"},
                                  {"role": "user", "content": "Book a table"}]})
            .to_string(),
        )
        .await
        .expect("send update");
    in_tx.send("garbage".into()).await.expect("send garbage");
    in_tx
        .send(response_required(&[
            ("agent", "Hi!"),
            ("user", "Book a table for two at eight."),
        ]))
        .await
        .expect("send turn");

    let frames = frames_until_complete(&mut out_rx).await;
    assert_eq!(
        spoken(&frames).split_whitespace().collect::<Vec<_>>().join(" "),
        "Sure thing, I booked it for you."
    );

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].message_count, 3);

    registry.shutdown_all().await;
    assert_eq!(out_rx.recv().await, Some(OutboundFrame::end_call(1, "Goodbye!")));
    assert_eq!(registry.count(), 0);

    drop(in_tx);
    task.await.expect("session task");
}
