//! Client-side session orchestration for game streaming: host status,
//! pairing, stream start/stop and the input capture loop that runs while a
//! stream is active.

#![forbid(unsafe_code)]

pub mod config;
pub mod discovery;
pub mod frontend;
pub mod host;
pub mod hosts;
pub mod identity;
pub mod input;
pub mod pairing;
pub mod session;
pub mod sim;
pub mod stream;
pub mod types;

pub use config::{ClientConfig, ConfigOverlay};
pub use frontend::{ConsoleFrontend, Frontend, SessionView};
pub use host::{EngineError, EventSender, HostClient, HostError, StreamEngine};
pub use hosts::HostBook;
pub use identity::ClientIdentity;
pub use input::{GilrsInput, InputCapability, NoInput};
pub use pairing::{PairingHandler, Pin};
pub use session::{Collaborators, Session, SessionError, SessionEvent, SessionState};
pub use stream::{StreamController, StreamRequest};
pub use types::{
    AppEntry, ButtonFlags, ControllerState, GamepadMask, HostRecord, InputEvent, InputState,
    PendingError, ServerInfo, StreamConfig, VideoFormats,
};
