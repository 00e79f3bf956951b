//! Voice relay: real-time call transcripts in, speakable LLM replies out.
//!
//! A telephony provider streams transcript frames over a websocket; the
//! relay keeps a per-call conversation, asks an LLM for a reply when the
//! caller finishes a turn, and streams the reply back in short chunks that
//! are safe to hand straight to text-to-speech:
//! transport → registry → session → LLM → normalizer → transport
//!
//! # Architecture
//!
//! - **voice_text**: Markdown/URL stripping and length bounding for TTS
//! - **llm**: Streaming and buffered upstream backends behind one trait,
//!   wrapped by a never-failing fragment adapter
//! - **conversation**: Per-call message log synced from transcript snapshots
//! - **session**: The per-call protocol state machine
//! - **registry**: Live calls keyed by call id, with bulk shutdown
//! - **server**: Axum websocket transport (shipped separately from the core)

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod voice_text;

#[doc(hidden)]
pub mod test_utils;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use registry::SessionRegistry;
pub use session::{CallSession, CallSnapshot, SessionState};
