//! Live call registry.
//!
//! The registry owns the set of live calls keyed by call id. It is an
//! explicit object owned by the transport; there is no process-global map.
//! Each [`open`](SessionRegistry::open) builds a fresh backend for the call
//! through a [`BackendFactory`], so no upstream client is shared between
//! calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{LlmConfig, SessionConfig};
use crate::error::{RelayError, Result};
use crate::llm::{LlmError, ReplyBackend, StreamAdapter, build_backend};
use crate::protocol::OutboundFrame;
use crate::session::{CallSession, CallSnapshot, SessionHandle};

/// Builds one backend per call.
pub trait BackendFactory: Send + Sync {
    /// Create a backend for a new call.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] when the backend cannot be configured.
    fn create(&self) -> std::result::Result<Box<dyn ReplyBackend>, LlmError>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> std::result::Result<Box<dyn ReplyBackend>, LlmError> + Send + Sync,
{
    fn create(&self) -> std::result::Result<Box<dyn ReplyBackend>, LlmError> {
        self()
    }
}

/// Map of live calls.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    session_config: SessionConfig,
    backends: Box<dyn BackendFactory>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Registry whose sessions use `session_config` and backends from `backends`.
    pub fn new(session_config: SessionConfig, backends: impl BackendFactory + 'static) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            session_config,
            backends: Box::new(backends),
        }
    }

    /// Registry building HTTP backends from `llm`.
    pub fn from_config(session_config: SessionConfig, llm: LlmConfig) -> Self {
        Self::new(session_config, move || build_backend(&llm))
    }

    /// Create and register a session for `call_id`.
    ///
    /// # Errors
    ///
    /// [`RelayError::DuplicateCall`] if the id is already live (the existing
    /// session is left untouched), or [`RelayError::Llm`] if the backend
    /// cannot be built.
    pub fn open(
        &self,
        call_id: &str,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<CallSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(call_id) {
            warn!(call_id, "refusing duplicate call id");
            return Err(RelayError::DuplicateCall(call_id.to_string()));
        }

        let backend = self.backends.create()?;
        let session = CallSession::new(
            call_id,
            StreamAdapter::new(backend),
            self.session_config.clone(),
            outbound,
        );
        sessions.insert(call_id.to_string(), session.handle());
        info!(call_id, active = sessions.len(), "call opened");
        Ok(session)
    }

    /// Register a session under a fresh random id.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub fn open_generated(&self, outbound: mpsc::Sender<OutboundFrame>) -> Result<CallSession> {
        let call_id = uuid::Uuid::new_v4().to_string();
        self.open(&call_id, outbound)
    }

    /// Remove a call. Closing an unknown id is a no-op.
    pub fn close(&self, call_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.remove(call_id).is_some() {
            info!(call_id, active = sessions.len(), "call closed");
        }
    }

    /// Number of live calls.
    pub fn count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Snapshot of every live call, oldest first.
    pub fn snapshot(&self) -> Vec<CallSnapshot> {
        let mut snapshots: Vec<CallSnapshot> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|handle| handle.snapshot())
            .collect();
        snapshots.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.call_id.cmp(&b.call_id))
        });
        snapshots
    }

    /// Clear the registry and end every call it held with the farewell.
    ///
    /// Calls are ended concurrently and each farewell waits at most
    /// [`FAREWELL_SEND_TIMEOUT`](crate::session::FAREWELL_SEND_TIMEOUT), so
    /// a stalled transport cannot hold up shutdown or the other calls.
    pub async fn shutdown_all(&self) {
        let handles: Vec<Arc<SessionHandle>> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "ending all calls");
        let delivered = join_all(handles.iter().map(|handle| handle.end_call()))
            .await
            .into_iter()
            .filter(|sent| *sent)
            .count();
        info!(count = handles.len(), delivered, "all calls ended");
    }
}
