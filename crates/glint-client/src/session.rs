//! The session state machine.
//!
//! One [`Session`] owns the current state, the selected host and the pending
//! message. Each [`Session::step`] renders, drains one batch of events and
//! applies at most one transition. Host calls block the step; the only
//! concurrent work is the input capture loop while streaming.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::frontend::{Frontend, SessionView};
use crate::host::{EventSender, HostClient, HostError, StreamEngine};
use crate::hosts::HostBook;
use crate::input::{CaptureSettings, InputCapability, MenuNavigator};
use crate::pairing::PairingHandler;
use crate::stream::{describe_launch_failure, StreamController, StreamRequest};
use crate::types::{HostRecord, PendingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Pairing,
    StartingStream,
    Streaming,
    StoppingStream,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, StartingStream)
                | (Connecting, Disconnected)
                | (Connected, StartingStream)
                | (Connected, Pairing)
                | (Connected, Disconnected)
                | (Pairing, Connected)
                | (Pairing, Disconnected)
                | (StartingStream, Streaming)
                | (StartingStream, Connected)
                | (Streaming, StoppingStream)
                | (StoppingStream, Disconnected)
        )
    }

    /// States that wait for user input rather than running an entry action.
    pub fn is_interactive(self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Connected | SessionState::Invalid
        )
    }
}

/// External events consumed by the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Confirm,
    Back,
    Pair,
    Up,
    Down,
    /// User asked to end the stream.
    StopRequested,
    /// The engine lost the stream connection.
    StreamTerminated { error_code: i32 },
    Shutdown,
}

/// Failures surfaced to the user. `Display` is the on-screen message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Specify an IP address in the configuration file.")]
    NoHosts,

    #[error("Failed to create client info: {0}")]
    Identity(String),

    #[error("Can't load configuration: {0}")]
    Config(String),

    #[error("{}", describe_connect_failure(.source))]
    Connect {
        address: String,
        #[source]
        source: HostError,
    },

    #[error("Failed to pair to server: {0}")]
    Pairing(#[source] HostError),

    #[error("Failed to pair to server: the host did not accept the PIN")]
    PairingRejected,

    #[error("You must pair with the PC first")]
    NotPaired,

    #[error("Can't get app list: {0}")]
    AppListUnavailable(#[source] HostError),

    #[error("Can't find app {0}")]
    AppNotFound(String),

    #[error("{}", describe_launch_failure(.source, *.width, *.height, *.fps))]
    Launch {
        #[source]
        source: HostError,
        width: u32,
        height: u32,
        fps: u32,
    },

    #[error("Failed to start connection: {0}")]
    ConnectionStart(String),
}

/// Message for a failed status query. Any non-OK status reads as an
/// unreachable host.
pub fn describe_connect_failure(source: &HostError) -> String {
    match source {
        HostError::Code(_) | HostError::Unreachable => HostError::Unreachable.to_string(),
        other => other.to_string(),
    }
}

/// State owned by the session loop alone.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub state: SessionState,
    /// Index into the host book of the host being talked to.
    pub host: Option<usize>,
    /// Highlighted entry in the host list.
    pub selected: usize,
    pub pending: PendingError,
}

/// The collaborators a session drives.
pub struct Collaborators {
    pub client: Box<dyn HostClient>,
    pub engine: Arc<dyn StreamEngine>,
    pub input: Arc<dyn InputCapability>,
    pub frontend: Box<dyn Frontend>,
}

pub struct Session {
    ctx: SessionContext,
    base_config: ClientConfig,
    config: ClientConfig,
    hosts: HostBook,
    client: Box<dyn HostClient>,
    engine: Arc<dyn StreamEngine>,
    input: Arc<dyn InputCapability>,
    frontend: Box<dyn Frontend>,
    pairing: PairingHandler,
    streams: StreamController,
    menu: MenuNavigator,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    rng: StdRng,
    shutdown: bool,
}

impl Session {
    /// Builds a session and picks the initial state: `Invalid` without hosts,
    /// `Connecting` with exactly one, `Disconnected` otherwise.
    pub fn new(config: ClientConfig, hosts: HostBook, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let settings = CaptureSettings::default();
        let mut session = Self {
            ctx: SessionContext {
                state: SessionState::Disconnected,
                host: None,
                selected: 0,
                pending: PendingError::default(),
            },
            config: config.clone(),
            base_config: config,
            hosts,
            client: collaborators.client,
            engine: collaborators.engine,
            input: collaborators.input,
            frontend: collaborators.frontend,
            pairing: PairingHandler::default(),
            streams: StreamController::new(settings),
            menu: MenuNavigator::default(),
            events_tx,
            events_rx,
            rng: StdRng::from_entropy(),
            shutdown: false,
        };

        match session.hosts.len() {
            0 => session.park_invalid(SessionError::NoHosts),
            1 => session.begin_connect(0),
            _ => {}
        }
        session
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_pairing(mut self, pairing: PairingHandler) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_capture_settings(mut self, settings: CaptureSettings) -> Self {
        self.streams = StreamController::new(settings);
        self
    }

    /// Puts the session in `Invalid` for a setup failure. Nothing leaves
    /// `Invalid` except shutdown.
    pub fn park_invalid(&mut self, err: SessionError) {
        error!("{}", err);
        self.ctx.state = SessionState::Invalid;
        self.ctx.host = None;
        self.ctx.pending.set_error(err.to_string());
    }

    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn pending(&self) -> &PendingError {
        &self.ctx.pending
    }

    pub fn hosts(&self) -> &HostBook {
        &self.hosts
    }

    pub fn current_host(&self) -> Option<&HostRecord> {
        self.ctx.host.and_then(|i| self.hosts.get(i))
    }

    /// Configuration in effect for the current host.
    pub fn effective_config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_capturing(&self) -> bool {
        self.streams.is_capturing()
    }

    /// True once shutdown was requested and no stream is left to tear down.
    pub fn is_finished(&self) -> bool {
        self.shutdown
            && !matches!(
                self.ctx.state,
                SessionState::StartingStream
                    | SessionState::Streaming
                    | SessionState::StoppingStream
            )
    }

    /// Runs until shutdown, sleeping `tick` between iterations.
    pub fn run(&mut self, tick: Duration) {
        info!("session loop started in {:?}", self.ctx.state);
        while !self.is_finished() {
            self.step();
            thread::sleep(tick);
        }
        info!("session loop finished");
    }

    /// One loop iteration.
    pub fn step(&mut self) {
        self.render();
        let events = self.collect_events();
        match self.ctx.state {
            SessionState::Invalid => {}
            SessionState::Disconnected => self.on_disconnected(&events),
            SessionState::Connecting => self.on_connecting(),
            SessionState::Connected => self.on_connected(&events),
            SessionState::Pairing => self.on_pairing(),
            SessionState::StartingStream => self.on_starting_stream(),
            SessionState::Streaming => self.on_streaming(&events),
            SessionState::StoppingStream => self.on_stopping_stream(),
        }
    }

    fn render(&mut self) {
        let view = SessionView {
            state: self.ctx.state,
            hosts: self.hosts.records(),
            selected: self.ctx.selected,
            host: self.ctx.host.and_then(|i| self.hosts.get(i)),
            pending: &self.ctx.pending,
        };
        self.frontend.render(&view);
    }

    fn collect_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        if self.ctx.state.is_interactive() {
            let sample = self.input.sample();
            events.extend(self.menu.poll(&sample));
        }
        if events.contains(&SessionEvent::Shutdown) {
            if !self.shutdown {
                info!("shutdown requested");
            }
            self.shutdown = true;
        }
        events
    }

    /// Replaces the pending message along with the state.
    fn transition(&mut self, next: SessionState) {
        self.ctx.pending.clear();
        self.transition_preserving(next);
    }

    fn transition_preserving(&mut self, next: SessionState) {
        let current = self.ctx.state;
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            current,
            next
        );
        if !current.can_transition_to(next) {
            error!("illegal transition {:?} -> {:?}", current, next);
        }
        debug!("{:?} -> {:?}", current, next);
        self.ctx.state = next;
    }

    fn fail(&mut self, err: SessionError, next: SessionState) {
        warn!("{}", err);
        self.transition(next);
        self.ctx.pending.set_error(err.to_string());
    }

    /// Selects host `index`, refreshes its overrides and enters `Connecting`.
    fn begin_connect(&mut self, index: usize) {
        let Some(address) = self.hosts.get(index).map(|h| h.address.clone()) else {
            return;
        };
        self.ctx.selected = index;
        self.ctx.host = Some(index);

        let overlay = match self.base_config.load_host_overlay(&address) {
            Ok(overlay) => overlay,
            Err(e) => {
                warn!("ignoring host overrides for {}: {}", address, e);
                None
            }
        };
        self.config = match overlay.as_ref() {
            Some(overlay) => match self.base_config.merged_with(overlay) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!("ignoring host overrides for {}: {}", address, e);
                    self.base_config.clone()
                }
            },
            None => self.base_config.clone(),
        };
        if let Some(record) = self.hosts.get_mut(index) {
            record.overrides = overlay;
        }

        self.transition(SessionState::Connecting);
    }

    fn on_disconnected(&mut self, events: &[SessionEvent]) {
        let count = self.hosts.len();
        for event in events {
            match event {
                SessionEvent::Confirm if count > 0 => {
                    self.begin_connect(self.ctx.selected.min(count - 1));
                    return;
                }
                SessionEvent::Down if count > 0 => {
                    self.ctx.selected = (self.ctx.selected + 1) % count;
                }
                SessionEvent::Up => {
                    self.ctx.selected = self.ctx.selected.saturating_sub(1);
                }
                _ => {}
            }
        }
    }

    fn on_connecting(&mut self) {
        let Some(index) = self.ctx.host else {
            self.transition(SessionState::Disconnected);
            return;
        };
        let Some(address) = self.hosts.get(index).map(|h| h.address.clone()) else {
            self.transition(SessionState::Disconnected);
            return;
        };

        info!("Connecting to {}...", address);
        match self
            .client
            .query_status(&address, self.config.stream.allow_unsupported)
        {
            Ok(info) => {
                debug!(
                    "{}, server {} ({}, {})",
                    info.gpu_type, info.server_version, info.gs_version, info.app_version
                );
                debug!("Server codec flags: {:#x}", info.codec_support);
                self.hosts.update_status(index, info);
                if self.config.autostream {
                    self.transition(SessionState::StartingStream);
                } else {
                    self.transition(SessionState::Connected);
                }
            }
            Err(source) => self.fail(
                SessionError::Connect { address, source },
                SessionState::Disconnected,
            ),
        }
    }

    fn on_connected(&mut self, events: &[SessionEvent]) {
        for event in events {
            let next = match event {
                SessionEvent::Confirm => SessionState::StartingStream,
                SessionEvent::Pair => SessionState::Pairing,
                SessionEvent::Back => SessionState::Disconnected,
                _ => continue,
            };
            self.transition(next);
            return;
        }
    }

    fn on_pairing(&mut self) {
        let Some(host) = self.current_host().cloned() else {
            self.transition(SessionState::Disconnected);
            return;
        };

        let frontend = &mut self.frontend;
        let result = self.pairing.pair(
            self.client.as_mut(),
            &host,
            &mut self.rng,
            |pin| frontend.show_pin(&host.address, pin),
        );

        match result {
            Ok(outcome) if !outcome.paired => {
                if let Some(record) = self.ctx.host.and_then(|i| self.hosts.get_mut(i)) {
                    record.paired = false;
                }
                self.fail(SessionError::PairingRejected, SessionState::Connected);
            }
            Ok(outcome) => {
                if let Some(record) = self.ctx.host.and_then(|i| self.hosts.get_mut(i)) {
                    record.paired = true;
                    if let Some(server) = record.server.as_mut() {
                        server.paired = true;
                        server.current_game = outcome.current_game;
                    }
                }
                // A running app means the status we hold is stale; make the
                // user reconnect before doing anything else.
                let next = if outcome.current_game != 0 {
                    SessionState::Disconnected
                } else {
                    SessionState::Connected
                };
                self.transition(next);
                self.ctx.pending.set_info("Successfully paired");
            }
            Err(e) => self.fail(SessionError::Pairing(e), SessionState::Connected),
        }
    }

    fn on_starting_stream(&mut self) {
        let Some(host) = self.current_host().cloned() else {
            self.fail(SessionError::NotPaired, SessionState::Connected);
            return;
        };
        if !host.paired {
            self.fail(SessionError::NotPaired, SessionState::Connected);
            return;
        }

        let mut stream = self.config.stream.clone();
        stream.video_formats = self.config.negotiated_formats();
        let request = StreamRequest {
            app: &self.config.app,
            stream: &stream,
            audio_device: self.config.audio_device.as_deref(),
        };

        let result = self.streams.start_stream(
            self.client.as_mut(),
            self.engine.as_ref(),
            self.input.as_ref(),
            &host,
            request,
            self.events_tx.clone(),
        );

        match result {
            Ok(_) => {
                self.frontend.set_home_shortcut(false);
                self.streams.begin_capture(
                    self.input.clone(),
                    self.engine.clone(),
                    self.events_tx.clone(),
                );
                self.transition(SessionState::Streaming);
            }
            Err(err) => {
                if matches!(err, SessionError::ConnectionStart(_)) {
                    // The host launched the app; don't leave it waiting for us.
                    if let Err(e) = self.client.quit_app(&host) {
                        warn!("app quit request to {} failed: {}", host.address, e);
                    }
                }
                self.fail(err, SessionState::Connected);
            }
        }
    }

    fn on_streaming(&mut self, events: &[SessionEvent]) {
        if self.shutdown {
            self.transition(SessionState::StoppingStream);
            return;
        }
        for event in events {
            match event {
                SessionEvent::StopRequested | SessionEvent::Shutdown => {
                    self.transition(SessionState::StoppingStream);
                    return;
                }
                SessionEvent::StreamTerminated { error_code } => {
                    if *error_code != 0 {
                        self.ctx
                            .pending
                            .set_error(format!("Connection terminated: {}", error_code));
                    }
                    self.transition_preserving(SessionState::StoppingStream);
                    return;
                }
                _ => {}
            }
        }
    }

    fn on_stopping_stream(&mut self) {
        let host = self.current_host().cloned();
        self.streams.stop_stream(
            self.client.as_mut(),
            self.engine.as_ref(),
            host.as_ref(),
            self.config.quit_app_after,
        );
        self.frontend.set_home_shortcut(true);
        self.transition_preserving(SessionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    const ALL: [SessionState; 8] = [
        Invalid,
        Disconnected,
        Connecting,
        Connected,
        Pairing,
        StartingStream,
        Streaming,
        StoppingStream,
    ];

    #[test]
    fn test_invalid_is_a_dead_end() {
        for next in ALL {
            assert!(!Invalid.can_transition_to(next));
        }
    }

    #[test]
    fn test_streaming_only_leaves_through_stopping() {
        for next in ALL {
            assert_eq!(Streaming.can_transition_to(next), next == StoppingStream);
        }
        for next in ALL {
            assert_eq!(StoppingStream.can_transition_to(next), next == Disconnected);
        }
    }

    #[test]
    fn test_streaming_is_only_entered_from_starting() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Streaming), from == StartingStream);
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_session_error_messages() {
        assert_eq!(
            SessionError::AppNotFound("Unknown".into()).to_string(),
            "Can't find app Unknown"
        );
        assert_eq!(
            SessionError::Connect {
                address: "10.0.0.2".into(),
                source: HostError::Unreachable,
            }
            .to_string(),
            "Can't connect to server"
        );
        assert_eq!(
            SessionError::Launch {
                source: HostError::Unsupported4k,
                width: 3840,
                height: 2160,
                fps: 60,
            }
            .to_string(),
            "Server doesn't support 4K"
        );
    }

    #[test]
    fn test_status_error_codes_read_as_unreachable() {
        let connect = |source| SessionError::Connect {
            address: "10.0.0.2".into(),
            source,
        };
        assert_eq!(
            connect(HostError::Code(-1)).to_string(),
            "Can't connect to server"
        );
        assert_eq!(
            connect(HostError::UnsupportedVersion("7.0".into())).to_string(),
            "Unsupported version: 7.0"
        );
    }
}
