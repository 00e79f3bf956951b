//! WebSocket transport for the relay.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/` | WebSocket upgrade; call id from `?call_id=`, generated when absent |
//! | GET | `/ws/{call_id}` | WebSocket upgrade for an explicit call id |
//! | GET | `/health` | `{status, active_calls}` |
//! | GET | `/calls` | Snapshot of live calls |
//!
//! Each connection gets one [`CallSession`](crate::session::CallSession).
//! Outbound frames go through an `mpsc` channel drained by a writer task;
//! inbound text messages feed the session until the socket closes.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::protocol::OutboundFrame;
use crate::registry::SessionRegistry;

/// Outbound frames buffered per connection before senders wait.
const OUTBOUND_BUFFER: usize = 64;

#[derive(Clone)]
struct RelayState {
    registry: Arc<SessionRegistry>,
}

#[derive(Debug, Default, Deserialize)]
struct CallQuery {
    call_id: Option<String>,
}

/// Build the relay router over a shared registry.
pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/", get(ws_with_query))
        .route("/ws/{call_id}", get(ws_with_path))
        .route("/health", get(health))
        .route("/calls", get(calls))
        .with_state(RelayState { registry })
}

/// Serve until `shutdown` resolves, then end every live call.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read or the server
/// fails.
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    let app = router(Arc::clone(&registry));

    info!("voice relay listening on ws://{local_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!(active = registry.count(), "shutdown requested, ending calls");
            registry.shutdown_all().await;
        })
        .await?;
    info!("voice relay stopped");
    Ok(())
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_calls": state.registry.count(),
    }))
}

async fn calls(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.registry.snapshot())
}

async fn ws_with_query(
    ws: WebSocketUpgrade,
    Query(query): Query<CallQuery>,
    State(state): State<RelayState>,
) -> Response {
    let call_id = query.call_id.filter(|id| !id.trim().is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, call_id))
}

async fn ws_with_path(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, Some(call_id)))
}

async fn handle_socket(socket: WebSocket, registry: Arc<SessionRegistry>, call_id: Option<String>) {
    let (mut sink, stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_BUFFER);

    let opened = match call_id {
        Some(id) => registry.open(&id, outbound_tx),
        None => registry.open_generated(outbound_tx),
    };
    let session = match opened {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "cannot open call session, closing connection");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    let call_id = session.call_id().to_owned();
    info!(call_id = %call_id, "call connected");

    let writer_call_id = call_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closes_call = matches!(frame, OutboundFrame::Response { end_call: true, .. });
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(call_id = %writer_call_id, error = %e, "cannot encode outbound frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                warn!(call_id = %writer_call_id, error = %e, "websocket write failed");
                break;
            }
            if closes_call {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let reader_call_id = call_id.clone();
    let inbound = Box::pin(futures_util::stream::unfold(stream, move |mut stream| {
        let call_id = reader_call_id.clone();
        async move {
            loop {
                match stream.next().await? {
                    Ok(Message::Text(text)) => return Some((text.as_str().to_owned(), stream)),
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => debug!(call_id = %call_id, "ignoring non-text websocket message"),
                    Err(e) => {
                        warn!(call_id = %call_id, error = %e, "websocket read failed");
                        return None;
                    }
                }
            }
        }
    }));

    session.run(inbound).await;
    registry.close(&call_id);
    if let Err(e) = writer.await {
        warn!(call_id = %call_id, error = %e, "websocket writer task failed");
    }
    info!(call_id = %call_id, "call disconnected");
}
