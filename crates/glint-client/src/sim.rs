//! In-process stand-ins for the host, the streaming engine, controllers and
//! the frontend. All of them append to a shared [`Journal`], so callers can
//! check what was called and in which order.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::frontend::{Frontend, SessionView};
use crate::host::{EngineError, EventSender, HostClient, HostError, StreamEngine};
use crate::pairing::Pin;
use crate::session::{SessionEvent, SessionState};
use crate::types::{
    AppEntry, ControllerState, HostRecord, InputEvent, InputState, LaunchRequest,
    NegotiatedStream, PairOutcome, ServerInfo,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    QueryStatus(String),
    ListApps,
    Pair(String),
    StartApp { app_id: u32, gamepad_mask: u16 },
    QuitApp,
    SetTimeout(Duration),
    OpenConnection,
    CloseConnection,
    SubmitInput,
    SampleInput,
    HomeShortcut(bool),
    ShowPin(String),
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn record(&self, call: Call) {
        lock(&self.0).push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.0).clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        lock(&self.0).iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        lock(&self.0).iter().position(|c| c == call)
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

/// Host with a fixed app list; 4K launches fail unless enabled.
pub struct SimulatedHost {
    journal: Journal,
    apps: Vec<AppEntry>,
    paired: bool,
    current_game: u32,
    supports_4k: bool,
    accept_pin: bool,
    timeout: Duration,
    status_error: Option<HostError>,
    apps_error: Option<HostError>,
    pair_error: Option<HostError>,
    launch_error: Option<HostError>,
    quit_error: Option<HostError>,
}

impl SimulatedHost {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            apps: Vec::new(),
            paired: false,
            current_game: 0,
            supports_4k: false,
            accept_pin: true,
            timeout: crate::host::DEFAULT_REQUEST_TIMEOUT,
            status_error: None,
            apps_error: None,
            pair_error: None,
            launch_error: None,
            quit_error: None,
        }
    }

    pub fn with_apps(mut self, apps: Vec<AppEntry>) -> Self {
        self.apps = apps;
        self
    }

    pub fn paired(mut self, paired: bool) -> Self {
        self.paired = paired;
        self
    }

    pub fn running_game(mut self, app_id: u32) -> Self {
        self.current_game = app_id;
        self
    }

    pub fn supports_4k(mut self, supported: bool) -> Self {
        self.supports_4k = supported;
        self
    }

    pub fn fail_status(mut self, err: HostError) -> Self {
        self.status_error = Some(err);
        self
    }

    pub fn fail_app_list(mut self, err: HostError) -> Self {
        self.apps_error = Some(err);
        self
    }

    pub fn fail_pairing(mut self, err: HostError) -> Self {
        self.pair_error = Some(err);
        self
    }

    /// Answer pairing requests without marking the client paired.
    pub fn reject_pin(mut self) -> Self {
        self.accept_pin = false;
        self
    }

    pub fn fail_launch(mut self, err: HostError) -> Self {
        self.launch_error = Some(err);
        self
    }

    pub fn fail_quit(mut self, err: HostError) -> Self {
        self.quit_error = Some(err);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl HostClient for SimulatedHost {
    fn query_status(
        &mut self,
        address: &str,
        _allow_unsupported: bool,
    ) -> Result<ServerInfo, HostError> {
        self.journal.record(Call::QueryStatus(address.to_string()));
        if let Some(err) = self.status_error.clone() {
            return Err(err);
        }
        Ok(ServerInfo {
            gpu_type: "Simulated GPU".to_string(),
            server_version: "3.23.0.74".to_string(),
            app_version: "7.1.431.-1".to_string(),
            gs_version: "simulated".to_string(),
            codec_support: 0x0001,
            current_game: self.current_game,
            is_gfe: true,
            paired: self.paired,
        })
    }

    fn list_apps(&mut self, _host: &HostRecord) -> Result<Vec<AppEntry>, HostError> {
        self.journal.record(Call::ListApps);
        match self.apps_error.clone() {
            Some(err) => Err(err),
            None => Ok(self.apps.clone()),
        }
    }

    fn pair(&mut self, host: &HostRecord, pin: &Pin) -> Result<PairOutcome, HostError> {
        self.journal.record(Call::Pair(pin.to_string()));
        if let Some(err) = self.pair_error.clone() {
            return Err(err);
        }
        debug!(
            "simulated pairing with {} {}",
            host.address,
            if self.accept_pin { "accepted" } else { "rejected" }
        );
        self.paired = self.accept_pin;
        Ok(PairOutcome {
            paired: self.accept_pin,
            current_game: self.current_game,
        })
    }

    fn start_app(
        &mut self,
        host: &HostRecord,
        request: &LaunchRequest,
    ) -> Result<NegotiatedStream, HostError> {
        self.journal.record(Call::StartApp {
            app_id: request.app_id,
            gamepad_mask: request.gamepad_mask.bits(),
        });
        if let Some(err) = self.launch_error.clone() {
            return Err(err);
        }
        if request.stream.width >= 3840 && !self.supports_4k {
            return Err(HostError::Unsupported4k);
        }
        self.current_game = request.app_id;
        Ok(NegotiatedStream {
            address: host.address.clone(),
            app_id: request.app_id,
            width: request.stream.width,
            height: request.stream.height,
            fps: request.stream.fps,
            bitrate_kbps: request.stream.bitrate_kbps,
            packet_size: request.stream.packet_size,
            video_formats: request.stream.video_formats,
        })
    }

    fn quit_app(&mut self, _host: &HostRecord) -> Result<(), HostError> {
        self.journal.record(Call::QuitApp);
        if let Some(err) = self.quit_error.clone() {
            return Err(err);
        }
        self.current_game = 0;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.journal.record(Call::SetTimeout(timeout));
        self.timeout = timeout;
    }
}

#[derive(Default)]
struct EngineState {
    events: Option<EventSender>,
    submitted: Vec<InputEvent>,
}

/// Engine that accepts connections and collects submitted input.
pub struct SimulatedEngine {
    journal: Journal,
    fail_open: Option<String>,
    state: Mutex<EngineState>,
}

impl SimulatedEngine {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_open: None,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn fail_connection(mut self, reason: impl Into<String>) -> Self {
        self.fail_open = Some(reason.into());
        self
    }

    pub fn open_connections(&self) -> usize {
        usize::from(lock(&self.state).events.is_some())
    }

    pub fn submitted(&self) -> Vec<InputEvent> {
        lock(&self.state).submitted.clone()
    }

    /// Reports the connection as lost, as the real engine does on network
    /// failure.
    pub fn terminate(&self, error_code: i32) {
        if let Some(events) = lock(&self.state).events.as_ref() {
            let _ = events.send(SessionEvent::StreamTerminated { error_code });
        }
    }
}

impl StreamEngine for SimulatedEngine {
    fn start_connection(
        &self,
        stream: &NegotiatedStream,
        audio_device: Option<&str>,
        events: EventSender,
    ) -> Result<(), EngineError> {
        self.journal.record(Call::OpenConnection);
        if let Some(reason) = self.fail_open.as_ref() {
            return Err(EngineError::new(reason));
        }
        info!(
            "simulated stream {}x{}@{} from {} (audio: {})",
            stream.width,
            stream.height,
            stream.fps,
            stream.address,
            audio_device.unwrap_or("default")
        );
        lock(&self.state).events = Some(events);
        Ok(())
    }

    fn stop_connection(&self) {
        self.journal.record(Call::CloseConnection);
        lock(&self.state).events = None;
    }

    fn submit_input(&self, event: &InputEvent) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        if state.events.is_none() {
            return Err(EngineError::new("no active connection"));
        }
        self.journal.record(Call::SubmitInput);
        state.submitted.push(*event);
        Ok(())
    }
}

/// Controllers whose state is set by the caller.
pub struct SimulatedInput {
    state: Mutex<InputState>,
    journal: Option<Journal>,
}

impl SimulatedInput {
    pub fn with_pads(count: usize) -> Self {
        Self {
            state: Mutex::new(InputState {
                pads: vec![ControllerState::default(); count],
            }),
            journal: None,
        }
    }

    /// Record each sample in `journal`.
    pub fn journaled(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn set_state(&self, state: InputState) {
        *lock(&self.state) = state;
    }
}

impl crate::input::InputCapability for SimulatedInput {
    fn attached_devices(&self) -> usize {
        lock(&self.state).pads.len()
    }

    fn sample(&self) -> InputState {
        if let Some(journal) = self.journal.as_ref() {
            journal.record(Call::SampleInput);
        }
        lock(&self.state).clone()
    }
}

/// Frontend that remembers what it was asked to show.
#[derive(Default)]
pub struct RecordingFrontend {
    journal: Journal,
    states: Arc<Mutex<Vec<SessionState>>>,
}

impl RecordingFrontend {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            states: Arc::default(),
        }
    }

    /// Handle to the states seen by `render`, usable after the frontend has
    /// been boxed into a session.
    pub fn rendered_states(&self) -> Arc<Mutex<Vec<SessionState>>> {
        self.states.clone()
    }
}

impl Frontend for RecordingFrontend {
    fn render(&mut self, view: &SessionView<'_>) {
        lock(&self.states).push(view.state);
    }

    fn show_pin(&mut self, _address: &str, pin: &Pin) {
        self.journal.record(Call::ShowPin(pin.to_string()));
    }

    fn set_home_shortcut(&mut self, enabled: bool) {
        self.journal.record(Call::HomeShortcut(enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GamepadMask;

    #[test]
    fn test_engine_rejects_input_without_connection() {
        let engine = SimulatedEngine::new(Journal::default());
        let event = InputEvent::Controller {
            index: 0,
            active_mask: GamepadMask::from_count(1),
            state: ControllerState::default(),
            timestamp_us: 0,
        };
        assert!(engine.submit_input(&event).is_err());
        assert!(engine.submitted().is_empty());
    }

    #[test]
    fn test_journal_position() {
        let journal = Journal::default();
        journal.record(Call::ListApps);
        journal.record(Call::QuitApp);
        assert_eq!(journal.position(&Call::QuitApp), Some(1));
        assert_eq!(journal.count(&Call::ListApps), 1);
        journal.clear();
        assert!(journal.calls().is_empty());
    }
}
