//! Seams to the external streaming engine.
//!
//! [`HostClient`] is the synchronous request/response side (status, apps,
//! pairing, launch, quit). [`StreamEngine`] owns the media connection and the
//! input channel once a stream is running.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::pairing::Pin;
use crate::session::SessionEvent;
use crate::types::{
    AppEntry, HostRecord, InputEvent, LaunchRequest, NegotiatedStream, PairOutcome, ServerInfo,
};

/// Default request timeout for host calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel the engine uses to report asynchronous outcomes to the session.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Failures reported by a host interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Not enough memory")]
    OutOfMemory,

    #[error("Invalid data received from server: {0}")]
    InvalidResponse(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Gamestream error: {0}")]
    Gamestream(String),

    #[error("Can't connect to server")]
    Unreachable,

    #[error("Server doesn't support 4K")]
    Unsupported4k,

    #[error("Server doesn't support the requested mode")]
    UnsupportedMode,

    #[error("Optimal Playable Settings isn't supported for this resolution")]
    UnsupportedSopsResolution,

    #[error("Errorcode {0}")]
    Code(i32),
}

/// Failure inside the streaming engine (connection or input channel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl std::fmt::Display) -> Self {
        Self(msg.to_string())
    }
}

/// Request/response calls against a single host. Every call blocks for at
/// most the configured timeout.
pub trait HostClient: Send {
    fn query_status(
        &mut self,
        address: &str,
        allow_unsupported: bool,
    ) -> Result<ServerInfo, HostError>;

    /// Applications in the order the host lists them.
    fn list_apps(&mut self, host: &HostRecord) -> Result<Vec<AppEntry>, HostError>;

    fn pair(&mut self, host: &HostRecord, pin: &Pin) -> Result<PairOutcome, HostError>;

    fn start_app(
        &mut self,
        host: &HostRecord,
        request: &LaunchRequest,
    ) -> Result<NegotiatedStream, HostError>;

    fn quit_app(&mut self, host: &HostRecord) -> Result<(), HostError>;

    fn set_timeout(&mut self, timeout: Duration);
}

/// The media connection. Shared with the input capture thread, hence `Sync`.
pub trait StreamEngine: Send + Sync {
    /// Opens the connection. Termination is reported later through `events`
    /// as [`SessionEvent::StreamTerminated`].
    fn start_connection(
        &self,
        stream: &NegotiatedStream,
        audio_device: Option<&str>,
        events: EventSender,
    ) -> Result<(), EngineError>;

    fn stop_connection(&self);

    fn submit_input(&self, event: &InputEvent) -> Result<(), EngineError>;
}
