//! Per-call protocol state machine.
//!
//! A [`CallSession`] consumes inbound frames for one call, keeps the
//! [`Conversation`] in step with the provider's transcript, and answers
//! `response_required` / `reminder_required` frames by streaming a reply
//! from the [`StreamAdapter`] in speakable chunks:
//!
//! ```text
//! Idle -> AwaitingMessage -> { Ponging | SyncingOnly | Responding } -> AwaitingMessage
//!                  \-------------------- any state --------------------> Closed
//! ```
//!
//! Every chunk of one generation carries the same `response_id`, and exactly
//! one of them has `content_complete` set. The shareable half of the session
//! lives in [`SessionHandle`], which the registry keeps for snapshots and
//! shutdown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::conversation::Conversation;
use crate::error::RelayError;
use crate::llm::StreamAdapter;
use crate::protocol::{InboundFrame, InteractionType, OutboundFrame};
use crate::voice_text;

/// Characters of the caller's latest turn included in logs.
const LOGGED_TURN_CHARS: usize = 100;

/// How long a farewell may wait for room in a stalled transport.
pub const FAREWELL_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Where a session is in its protocol cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet reading frames.
    Idle,
    /// Waiting for the next inbound frame.
    AwaitingMessage,
    /// Answering a keepalive.
    Ponging,
    /// Applying a transcript update.
    SyncingOnly,
    /// Streaming a reply.
    Responding,
    /// Transport gone or call ended; terminal.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingMessage => "awaiting_message",
            Self::Ponging => "ponging",
            Self::SyncingOnly => "syncing_only",
            Self::Responding => "responding",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Observability record for one live call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    /// Call identifier.
    pub call_id: String,
    /// When the session was opened.
    pub start_time: DateTime<Utc>,
    /// Current conversation length.
    pub message_count: usize,
}

/// The part of a session shared with the registry.
#[derive(Debug)]
pub struct SessionHandle {
    call_id: String,
    start_time: DateTime<Utc>,
    farewell: String,
    outbound: mpsc::Sender<OutboundFrame>,
    last_response_id: AtomicU64,
    message_count: AtomicUsize,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    fn new(call_id: String, farewell: String, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            call_id,
            start_time: Utc::now(),
            farewell,
            outbound,
            last_response_id: AtomicU64::new(0),
            message_count: AtomicUsize::new(0),
            state: Mutex::new(SessionState::Idle),
        }
    }

    /// Call identifier.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// When the session was opened.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Correlation id of the most recent generation; 0 before the first.
    pub fn last_response_id(&self) -> u64 {
        self.last_response_id.load(Ordering::SeqCst)
    }

    /// Current conversation length.
    pub fn message_count(&self) -> usize {
        self.message_count.load(Ordering::SeqCst)
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the session has reached [`SessionState::Closed`].
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Snapshot for observability.
    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id.clone(),
            start_time: self.start_time,
            message_count: self.message_count(),
        }
    }

    /// Say the farewell and close the session.
    ///
    /// Uses the last correlation id without incrementing it and bypasses
    /// generation entirely. The farewell is the last frame the session
    /// emits; a second call sends nothing. Waits at most
    /// [`FAREWELL_SEND_TIMEOUT`] for the transport. Returns whether the
    /// frame was handed to the transport.
    pub async fn end_call(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == SessionState::Closed {
                debug!(call_id = %self.call_id, "call already ended");
                return false;
            }
            *state = SessionState::Closed;
        }

        let response_id = self.last_response_id();
        info!(call_id = %self.call_id, response_id, "ending call");
        let frame = OutboundFrame::end_call(response_id, self.farewell.clone());
        match self.outbound.send_timeout(frame, FAREWELL_SEND_TIMEOUT).await {
            Ok(()) => true,
            Err(e) => {
                let err = RelayError::Send(e.to_string());
                warn!(call_id = %self.call_id, error = %err, "farewell not delivered");
                false
            }
        }
    }

    /// Move to `next` unless the session is already closed.
    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != SessionState::Closed {
            *state = next;
        }
    }

    /// Hand a frame to the transport. Failures are logged, never fatal.
    /// Nothing follows the farewell: frames of a closed session are dropped.
    async fn send(&self, frame: OutboundFrame) -> bool {
        if self.is_closed() {
            debug!(call_id = %self.call_id, "call ended; dropping outbound frame");
            return false;
        }
        match self.outbound.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                let err = RelayError::Send(e.to_string());
                warn!(call_id = %self.call_id, error = %err, "dropping outbound frame");
                false
            }
        }
    }
}

/// One call's protocol engine.
pub struct CallSession {
    handle: Arc<SessionHandle>,
    conversation: Conversation,
    adapter: StreamAdapter,
    config: SessionConfig,
    response_counter: u64,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.handle.call_id)
            .field("state", &self.handle.state())
            .field("response_counter", &self.response_counter)
            .field("messages", &self.conversation.len())
            .finish()
    }
}

impl CallSession {
    /// Create a session writing its frames to `outbound`.
    pub fn new(
        call_id: impl Into<String>,
        adapter: StreamAdapter,
        config: SessionConfig,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        let call_id = call_id.into();
        let handle = Arc::new(SessionHandle::new(
            call_id.clone(),
            config.farewell.clone(),
            outbound,
        ));
        Self {
            handle,
            conversation: Conversation::new(),
            adapter,
            config,
            response_counter: 0,
        }
    }

    /// Shared handle for the registry.
    pub fn handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }

    /// Call identifier.
    pub fn call_id(&self) -> &str {
        self.handle.call_id()
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    /// The conversation log.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Number of generations started so far.
    pub fn response_counter(&self) -> u64 {
        self.response_counter
    }

    /// Drive the session until `inbound` ends or the call is closed.
    ///
    /// While a reply is streaming, keepalives are still answered; any other
    /// frame waits until the reply's final chunk is out. If the transport
    /// closes mid-reply the reply runs to completion and its sends fail
    /// quietly.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        let handle = Arc::clone(&self.handle);
        let mut pending: VecDeque<InboundFrame> = VecDeque::new();
        let mut inbound_open = true;

        handle.transition(SessionState::AwaitingMessage);
        info!(call_id = %handle.call_id, backend = self.adapter.backend_name(), "call session started");

        loop {
            if handle.is_closed() {
                break;
            }
            let frame = match pending.pop_front() {
                Some(frame) => frame,
                None if !inbound_open => break,
                None => match inbound.next().await {
                    Some(raw) => match decode(&handle.call_id, &raw) {
                        Some(frame) => frame,
                        None => continue,
                    },
                    None => {
                        inbound_open = false;
                        continue;
                    }
                },
            };

            if !needs_reply(frame.interaction_type) {
                self.handle_message(frame).await;
                continue;
            }

            self.prepare_reply(&frame);
            let generation = self.respond();
            tokio::pin!(generation);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut generation => break,
                    raw = inbound.next(), if inbound_open => match raw {
                        Some(raw) => {
                            let Some(frame) = decode(&handle.call_id, &raw) else {
                                continue;
                            };
                            if frame.interaction_type == InteractionType::PingPong {
                                handle.send(OutboundFrame::pong(frame.response_id)).await;
                            } else {
                                debug!(
                                    call_id = %handle.call_id,
                                    interaction = ?frame.interaction_type,
                                    "queueing frame behind active reply"
                                );
                                pending.push_back(frame);
                            }
                        }
                        None => {
                            debug!(call_id = %handle.call_id, "transport closed mid-reply; finishing");
                            inbound_open = false;
                        }
                    },
                }
            }
            handle.transition(SessionState::AwaitingMessage);
        }

        handle.transition(SessionState::Closed);
        info!(
            call_id = %handle.call_id,
            responses = self.response_counter,
            messages = self.conversation.len(),
            "call session finished"
        );
    }

    /// Decode and handle one raw text frame. Undecodable frames are logged
    /// and dropped.
    pub async fn handle_text(&mut self, raw: &str) {
        if let Some(frame) = decode(&self.handle.call_id, raw) {
            self.handle_message(frame).await;
        }
    }

    /// Handle one decoded frame to completion.
    pub async fn handle_message(&mut self, frame: InboundFrame) {
        if self.handle.is_closed() {
            debug!(call_id = %self.handle.call_id, "ignoring frame for closed session");
            return;
        }
        debug!(call_id = %self.handle.call_id, interaction = ?frame.interaction_type, "received frame");

        match frame.interaction_type {
            InteractionType::PingPong => {
                self.handle.transition(SessionState::Ponging);
                self.handle.send(OutboundFrame::pong(frame.response_id)).await;
            }
            InteractionType::UpdateOnly => {
                self.handle.transition(SessionState::SyncingOnly);
                if let Some(transcript) = &frame.transcript {
                    self.conversation.sync_from_transcript(transcript);
                    self.record_message_count();
                }
            }
            InteractionType::ResponseRequired | InteractionType::ReminderRequired => {
                self.prepare_reply(&frame);
                self.respond().await;
            }
            InteractionType::Unknown => {
                warn!(call_id = %self.handle.call_id, "ignoring frame with unknown interaction_type");
            }
        }
        self.handle.transition(SessionState::AwaitingMessage);
    }

    /// Say the farewell and close the session. See [`SessionHandle::end_call`].
    pub async fn end_call(&self) -> bool {
        self.handle.end_call().await
    }

    /// Sync the log from a reply-requesting frame and log the caller's turn.
    fn prepare_reply(&mut self, frame: &InboundFrame) {
        if let Some(transcript) = &frame.transcript {
            self.conversation.sync_from_transcript(transcript);
            self.record_message_count();
        }
        if let Some(turn) = self.conversation.latest_user_message() {
            let preview: String = turn.chars().take(LOGGED_TURN_CHARS).collect();
            info!(
                call_id = %self.handle.call_id,
                question = voice_text::is_question(turn),
                "caller: {preview}"
            );
        }
    }

    /// Run one generation and stream it out. Returns its correlation id.
    async fn respond(&mut self) -> u64 {
        self.response_counter += 1;
        let response_id = self.response_counter;
        self.handle
            .last_response_id
            .store(response_id, Ordering::SeqCst);
        self.handle.transition(SessionState::Responding);

        let started = Instant::now();
        let threshold = self.config.chunk_threshold;
        let max_len = self.config.max_chunk_length;
        let mut buffer = String::new();
        let mut chunks = 0usize;

        let mut reply = self
            .adapter
            .stream(self.conversation.messages(), &self.config.instructions);

        while let Some(fragment) = reply.next().await {
            if !fragment.is_final {
                buffer.push_str(&fragment.text);
                if buffer.chars().count() >= threshold {
                    if let Some(text) = speakable(&buffer, max_len) {
                        self.handle
                            .send(OutboundFrame::chunk(response_id, text))
                            .await;
                        chunks += 1;
                    }
                    buffer.clear();
                }
                continue;
            }

            if let Some(text) = speakable(&buffer, max_len) {
                self.handle
                    .send(OutboundFrame::chunk(response_id, text))
                    .await;
                chunks += 1;
            }
            buffer.clear();

            let closing = voice_text::normalize(&fragment.text, max_len);
            self.handle
                .send(OutboundFrame::complete(response_id, closing))
                .await;
            chunks += 1;
        }

        let full_text = reply.full_text().to_string();
        self.conversation.push_assistant(&full_text);
        self.record_message_count();

        info!(
            call_id = %self.handle.call_id,
            response_id,
            chunks,
            chars = full_text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reply complete"
        );
        response_id
    }

    fn record_message_count(&self) {
        self.handle
            .message_count
            .store(self.conversation.len(), Ordering::SeqCst);
    }
}

fn needs_reply(kind: InteractionType) -> bool {
    matches!(
        kind,
        InteractionType::ResponseRequired | InteractionType::ReminderRequired
    )
}

fn decode(call_id: &str, raw: &str) -> Option<InboundFrame> {
    match InboundFrame::parse(raw) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(call_id, error = %e, "dropping undecodable frame");
            None
        }
    }
}

/// Normalize a buffered chunk, keeping one space on each side where the raw
/// text had whitespace so consecutive chunks do not fuse words.
fn speakable(raw: &str, max_len: usize) -> Option<String> {
    let body = voice_text::normalize(raw, max_len);
    if body.is_empty() {
        return None;
    }
    let mut text = String::with_capacity(body.len() + 2);
    if raw.starts_with(char::is_whitespace) {
        text.push(' ');
    }
    text.push_str(&body);
    if raw.ends_with(char::is_whitespace) {
        text.push(' ');
    }
    Some(text)
}
