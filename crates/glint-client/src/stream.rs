//! Stream start/stop.
//!
//! Ordering on the way in: launch on the host, open the engine connection,
//! then start input capture. On the way out: stop and join input capture,
//! close the connection, then optionally ask the host to quit the app.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::host::{EventSender, HostClient, HostError, StreamEngine};
use crate::input::{spawn_capture_loop, CaptureHandle, CaptureSettings, InputCapability};
use crate::session::SessionError;
use crate::types::{
    AppEntry, GamepadMask, HostRecord, LaunchRequest, NegotiatedStream, StreamConfig,
};

/// Per-attempt inputs for [`StreamController::start_stream`].
#[derive(Debug, Clone)]
pub struct StreamRequest<'a> {
    pub app: &'a str,
    pub stream: &'a StreamConfig,
    pub audio_device: Option<&'a str>,
}

/// Looks up an app id by exact, case-sensitive name.
pub fn find_app_id(apps: &[AppEntry], name: &str) -> Option<u32> {
    apps.iter().find(|app| app.name == name).map(|app| app.id)
}

pub fn resolve_app_id(
    client: &mut dyn HostClient,
    host: &HostRecord,
    name: &str,
) -> Result<u32, SessionError> {
    let apps = client.list_apps(host).map_err(|e| {
        warn!("can't get app list from {}: {}", host.address, e);
        SessionError::AppListUnavailable(e)
    })?;
    find_app_id(&apps, name).ok_or_else(|| {
        warn!("can't find app {} on {}", name, host.address);
        SessionError::AppNotFound(name.to_string())
    })
}

#[derive(Default)]
pub struct StreamController {
    capture: Option<CaptureHandle>,
    active: Option<NegotiatedStream>,
    settings: CaptureSettings,
}

impl StreamController {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            capture: None,
            active: None,
            settings,
        }
    }

    /// Resolves the app, launches it and opens the engine connection. Does not
    /// retry. On `ConnectionStart` the host has already launched the app.
    pub fn start_stream(
        &mut self,
        client: &mut dyn HostClient,
        engine: &dyn StreamEngine,
        input: &dyn InputCapability,
        host: &HostRecord,
        request: StreamRequest<'_>,
        events: EventSender,
    ) -> Result<NegotiatedStream, SessionError> {
        let app_id = resolve_app_id(client, host, request.app)?;
        let gamepad_mask = GamepadMask::from_count(input.attached_devices());
        debug!(
            "launching app {} with {} gamepads (mask {:#06x})",
            app_id,
            gamepad_mask.count(),
            gamepad_mask.bits()
        );

        let launch = LaunchRequest {
            app_id,
            stream: request.stream.clone(),
            is_gfe: host.is_gfe(),
            gamepad_mask,
        };
        let negotiated = client.start_app(host, &launch).map_err(|source| {
            let err = SessionError::Launch {
                source,
                width: request.stream.width,
                height: request.stream.height,
                fps: request.stream.fps,
            };
            warn!("{}", err);
            err
        })?;

        debug!(
            "Stream {} x {}, {} fps, {} kbps",
            negotiated.width, negotiated.height, negotiated.fps, negotiated.bitrate_kbps
        );

        engine
            .start_connection(&negotiated, request.audio_device, events)
            .map_err(|e| {
                warn!("failed to start connection: {}", e);
                SessionError::ConnectionStart(e.to_string())
            })?;

        info!("streaming app {} from {}", app_id, host.address);
        self.active = Some(negotiated.clone());
        Ok(negotiated)
    }

    /// Starts input capture. Any previous capture loop is stopped first so at
    /// most one runs.
    pub fn begin_capture(
        &mut self,
        input: Arc<dyn InputCapability>,
        engine: Arc<dyn StreamEngine>,
        events: EventSender,
    ) {
        if let Some(previous) = self.capture.take() {
            previous.stop();
        }
        self.capture = Some(spawn_capture_loop(
            input,
            engine,
            events,
            self.settings.clone(),
        ));
    }

    /// Tears the stream down. Safe to call when nothing is running.
    pub fn stop_stream(
        &mut self,
        client: &mut dyn HostClient,
        engine: &dyn StreamEngine,
        host: Option<&HostRecord>,
        quit_app_after: bool,
    ) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        engine.stop_connection();
        self.active = None;

        if quit_app_after {
            if let Some(host) = host {
                debug!("Sending app quit request ...");
                if let Err(e) = client.quit_app(host) {
                    warn!("app quit request to {} failed: {}", host.address, e);
                }
            }
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn active(&self) -> Option<&NegotiatedStream> {
        self.active.as_ref()
    }
}

/// Message shown for a failed launch.
pub fn describe_launch_failure(source: &HostError, width: u32, height: u32, fps: u32) -> String {
    match source {
        HostError::Unsupported4k => "Server doesn't support 4K".to_string(),
        HostError::UnsupportedMode => format!(
            "Server doesn't support {}x{} ({} fps) or remove --nounsupported option",
            width, height, fps
        ),
        HostError::UnsupportedSopsResolution => format!(
            "Optimal Playable Settings isn't supported for the resolution {}x{}, use supported resolution or add --nosops option",
            width, height
        ),
        HostError::Gamestream(msg) => format!("Gamestream error: {}", msg),
        HostError::Code(code) => format!("Errorcode starting app: {}", code),
        other => format!("Error starting app: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Call, Journal, SimulatedEngine, SimulatedHost, SimulatedInput};
    use tokio::sync::mpsc;

    fn apps() -> Vec<AppEntry> {
        vec![AppEntry::new("Steam", 1), AppEntry::new("Desktop", 2)]
    }

    #[test]
    fn test_find_app_id_exact_match() {
        assert_eq!(find_app_id(&apps(), "Steam"), Some(1));
        assert_eq!(find_app_id(&apps(), "Desktop"), Some(2));
        assert_eq!(find_app_id(&apps(), "steam"), None);
        assert_eq!(find_app_id(&apps(), "Unknown"), None);
    }

    #[test]
    fn test_describe_launch_failure_messages() {
        assert!(describe_launch_failure(&HostError::Unsupported4k, 3840, 2160, 60).contains("4K"));
        assert!(describe_launch_failure(&HostError::UnsupportedMode, 1366, 768, 144)
            .contains("1366x768 (144 fps)"));
        assert!(
            describe_launch_failure(&HostError::UnsupportedSopsResolution, 1366, 768, 60)
                .starts_with("Optimal Playable Settings")
        );
        assert_eq!(
            describe_launch_failure(&HostError::Code(-42), 1280, 720, 60),
            "Errorcode starting app: -42"
        );
    }

    #[test]
    fn test_start_stream_passes_gamepad_mask() {
        let journal = Journal::default();
        let mut host = SimulatedHost::new(journal.clone()).with_apps(apps());
        let engine = SimulatedEngine::new(journal.clone());
        let input = SimulatedInput::with_pads(3);
        let record = HostRecord::new("10.0.0.2");
        let config = StreamConfig::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut controller = StreamController::default();
        let negotiated = controller
            .start_stream(
                &mut host,
                &engine,
                &input,
                &record,
                StreamRequest {
                    app: "Desktop",
                    stream: &config,
                    audio_device: None,
                },
                tx,
            )
            .unwrap();

        assert_eq!(negotiated.app_id, 2);
        assert!(journal.calls().contains(&Call::StartApp {
            app_id: 2,
            gamepad_mask: 0b111
        }));
        assert_eq!(engine.open_connections(), 1);
    }

    #[test]
    fn test_connection_failure_after_launch() {
        let journal = Journal::default();
        let mut host = SimulatedHost::new(journal.clone()).with_apps(apps());
        let engine = SimulatedEngine::new(journal.clone()).fail_connection("no route");
        let input = SimulatedInput::with_pads(0);
        let record = HostRecord::new("10.0.0.2");
        let config = StreamConfig::default();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = StreamController::default()
            .start_stream(
                &mut host,
                &engine,
                &input,
                &record,
                StreamRequest {
                    app: "Steam",
                    stream: &config,
                    audio_device: None,
                },
                tx,
            )
            .unwrap_err();

        assert!(matches!(err, SessionError::ConnectionStart(_)));
        assert_eq!(engine.open_connections(), 0);
    }

    #[test]
    fn test_stop_without_stream_is_safe() {
        let journal = Journal::default();
        let mut host = SimulatedHost::new(journal.clone());
        let engine = SimulatedEngine::new(journal.clone());
        let mut controller = StreamController::default();

        controller.stop_stream(&mut host, &engine, None, true);

        assert!(!controller.is_capturing());
        assert_eq!(journal.calls(), vec![Call::CloseConnection]);
    }
}
