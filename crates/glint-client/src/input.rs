use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gilrs::{Axis, Button, Gamepad, Gilrs};
use glint_common::now_us;
use tracing::{debug, info, warn};

use crate::host::{EventSender, StreamEngine};
use crate::session::SessionEvent;
use crate::types::{ButtonFlags, ControllerState, GamepadMask, InputEvent, InputState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(8);

/// Read access to local controllers. Shared between the session loop (menu
/// navigation, gamepad mask) and the capture thread.
pub trait InputCapability: Send + Sync {
    fn attached_devices(&self) -> usize;
    fn sample(&self) -> InputState;
}

/// Used when no controller backend is available.
pub struct NoInput;

impl InputCapability for NoInput {
    fn attached_devices(&self) -> usize {
        0
    }

    fn sample(&self) -> InputState {
        InputState::default()
    }
}

pub fn normalize_gamepad_deadzone(deadzone: f32) -> f32 {
    deadzone.clamp(0.0, 0.95)
}

pub fn apply_gamepad_deadzone(value: f32, deadzone: f32) -> f32 {
    let deadzone = normalize_gamepad_deadzone(deadzone);
    let abs = value.abs();
    if abs <= deadzone {
        0.0
    } else {
        let scaled = (abs - deadzone) / (1.0 - deadzone);
        scaled.copysign(value).clamp(-1.0, 1.0)
    }
}

fn axis_to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn trigger_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * u8::MAX as f32).round() as u8
}

/// Turns successive samples into the events that changed between them.
#[derive(Debug, Default)]
pub struct InputTracker {
    last: Vec<ControllerState>,
    chord_held: bool,
}

impl InputTracker {
    pub fn diff(&mut self, current: &InputState, timestamp_us: u64) -> Vec<InputEvent> {
        let active_mask = GamepadMask::from_count(current.pads.len());
        let slots = current.pads.len().max(self.last.len());
        let mut events = Vec::new();
        for index in 0..slots.min(GamepadMask::MAX_CONTROLLERS) {
            let now = current.pads.get(index).copied();
            let before = self.last.get(index).copied();
            if now == before {
                continue;
            }
            // A pad that went away is reported once in neutral position.
            events.push(InputEvent::Controller {
                index: index as u8,
                active_mask,
                state: now.unwrap_or_default(),
                timestamp_us,
            });
        }
        self.last = current.pads.clone();
        events
    }

    /// True exactly once per press of `chord` on any controller.
    pub fn chord_pressed(&mut self, current: &InputState, chord: ButtonFlags) -> bool {
        let held = current.pads.iter().any(|pad| pad.buttons.contains(chord));
        let fired = held && !self.chord_held;
        self.chord_held = held;
        fired
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub poll_interval: Duration,
    pub stop_chord: ButtonFlags,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_chord: ButtonFlags::STOP_CHORD,
        }
    }
}

/// The running capture loop. Dropping it without [`CaptureHandle::stop`]
/// still signals the thread, but does not wait for it.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Signals the loop and waits until it has exited.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("input capture thread panicked");
            }
        }
        debug!("input capture stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Starts sampling `input` and forwarding changes to `engine`. The stop chord
/// is reported to the session as [`SessionEvent::StopRequested`].
pub fn spawn_capture_loop(
    input: Arc<dyn InputCapability>,
    engine: Arc<dyn StreamEngine>,
    events: EventSender,
    settings: CaptureSettings,
) -> CaptureHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread = thread::spawn(move || {
        let mut tracker = InputTracker::default();
        while !stop_flag.load(Ordering::Acquire) {
            let state = input.sample();
            for event in tracker.diff(&state, now_us()) {
                if let Err(e) = engine.submit_input(&event) {
                    debug!("input send error: {}", e);
                }
            }
            if tracker.chord_pressed(&state, settings.stop_chord) {
                info!("stop chord pressed");
                let _ = events.send(SessionEvent::StopRequested);
            }
            thread::sleep(settings.poll_interval);
        }
    });
    CaptureHandle {
        stop,
        thread: Some(thread),
    }
}

/// Rising edges of the first controller's buttons, as menu events.
#[derive(Debug, Default)]
pub struct MenuNavigator {
    previous: ButtonFlags,
}

impl MenuNavigator {
    const BINDINGS: [(ButtonFlags, SessionEvent); 5] = [
        (ButtonFlags::A, SessionEvent::Confirm),
        (ButtonFlags::B, SessionEvent::Back),
        (ButtonFlags::X, SessionEvent::Pair),
        (ButtonFlags::UP, SessionEvent::Up),
        (ButtonFlags::DOWN, SessionEvent::Down),
    ];

    pub fn poll(&mut self, state: &InputState) -> Vec<SessionEvent> {
        let buttons = state.pads.first().map(|p| p.buttons).unwrap_or_default();
        let pressed = buttons & !self.previous;
        self.previous = buttons;
        Self::BINDINGS
            .iter()
            .filter(|(flag, _)| pressed.contains(*flag))
            .map(|(_, event)| *event)
            .collect()
    }
}

const BUTTON_MAP: [(Button, ButtonFlags); 15] = [
    (Button::South, ButtonFlags::A),
    (Button::East, ButtonFlags::B),
    (Button::West, ButtonFlags::X),
    (Button::North, ButtonFlags::Y),
    (Button::DPadUp, ButtonFlags::UP),
    (Button::DPadDown, ButtonFlags::DOWN),
    (Button::DPadLeft, ButtonFlags::LEFT),
    (Button::DPadRight, ButtonFlags::RIGHT),
    (Button::Start, ButtonFlags::PLAY),
    (Button::Select, ButtonFlags::BACK),
    (Button::LeftThumb, ButtonFlags::LS_CLK),
    (Button::RightThumb, ButtonFlags::RS_CLK),
    (Button::LeftTrigger, ButtonFlags::LB),
    (Button::RightTrigger, ButtonFlags::RB),
    (Button::Mode, ButtonFlags::SPECIAL),
];

fn read_gamepad(gamepad: &Gamepad<'_>, deadzone: f32) -> ControllerState {
    let mut buttons = ButtonFlags::empty();
    for (button, flag) in BUTTON_MAP {
        if gamepad.is_pressed(button) {
            buttons |= flag;
        }
    }
    let trigger = |button| {
        gamepad
            .button_data(button)
            .map(|data| trigger_to_u8(data.value()))
            .unwrap_or(0)
    };
    let stick = |axis| axis_to_i16(apply_gamepad_deadzone(gamepad.value(axis), deadzone));
    ControllerState {
        buttons,
        left_trigger: trigger(Button::LeftTrigger2),
        right_trigger: trigger(Button::RightTrigger2),
        left_stick: (stick(Axis::LeftStickX), stick(Axis::LeftStickY)),
        right_stick: (stick(Axis::RightStickX), stick(Axis::RightStickY)),
    }
}

/// Gamepads through gilrs. A pump thread owns the gilrs context and
/// publishes a snapshot that [`InputCapability::sample`] copies.
pub struct GilrsInput {
    snapshot: Arc<Mutex<InputState>>,
    running: Arc<AtomicBool>,
}

impl GilrsInput {
    pub fn spawn(deadzone: f32) -> Self {
        let snapshot = Arc::new(Mutex::new(InputState::default()));
        let running = Arc::new(AtomicBool::new(true));
        let deadzone = normalize_gamepad_deadzone(deadzone);

        let shared = snapshot.clone();
        let alive = running.clone();
        thread::spawn(move || {
            let mut gilrs = match Gilrs::new() {
                Ok(g) => g,
                Err(e) => {
                    warn!("gilrs init failed: {}", e);
                    return;
                }
            };
            while alive.load(Ordering::Acquire) {
                while gilrs.next_event().is_some() {}
                let pads = gilrs
                    .gamepads()
                    .filter(|(_, gamepad)| gamepad.is_connected())
                    .map(|(_, gamepad)| read_gamepad(&gamepad, deadzone))
                    .collect();
                let mut guard = match shared.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *guard = InputState { pads };
                drop(guard);
                thread::sleep(DEFAULT_POLL_INTERVAL);
            }
        });

        Self { snapshot, running }
    }

    fn snapshot(&self) -> InputState {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl InputCapability for GilrsInput {
    fn attached_devices(&self) -> usize {
        self.snapshot().pads.len()
    }

    fn sample(&self) -> InputState {
        self.snapshot()
    }
}

impl Drop for GilrsInput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(buttons: ButtonFlags) -> ControllerState {
        ControllerState {
            buttons,
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_gamepad_deadzone() {
        assert_eq!(apply_gamepad_deadzone(0.05, 0.1), 0.0);
        assert_eq!(apply_gamepad_deadzone(-0.1, 0.1), 0.0);
        assert_eq!(apply_gamepad_deadzone(1.0, 0.1), 1.0);
        assert_eq!(apply_gamepad_deadzone(-1.0, 0.1), -1.0);
        let mid = apply_gamepad_deadzone(0.55, 0.1);
        assert!((mid - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_deadzone_clamps() {
        assert_eq!(normalize_gamepad_deadzone(-1.0), 0.0);
        assert_eq!(normalize_gamepad_deadzone(2.0), 0.95);
    }

    #[test]
    fn test_axis_and_trigger_scaling() {
        assert_eq!(axis_to_i16(1.0), i16::MAX);
        assert_eq!(axis_to_i16(0.0), 0);
        assert_eq!(axis_to_i16(-1.0), -i16::MAX);
        assert_eq!(trigger_to_u8(1.0), 255);
        assert_eq!(trigger_to_u8(-0.3), 0);
    }

    #[test]
    fn test_tracker_reports_only_changes() {
        let mut tracker = InputTracker::default();
        let idle = InputState {
            pads: vec![pad(ButtonFlags::empty())],
        };
        assert_eq!(tracker.diff(&idle, 1).len(), 1);
        assert!(tracker.diff(&idle, 2).is_empty());

        let pressed = InputState {
            pads: vec![pad(ButtonFlags::A)],
        };
        let events = tracker.diff(&pressed, 3);
        assert_eq!(
            events,
            vec![InputEvent::Controller {
                index: 0,
                active_mask: GamepadMask::from_count(1),
                state: pad(ButtonFlags::A),
                timestamp_us: 3,
            }]
        );
    }

    #[test]
    fn test_tracker_neutralizes_removed_pad() {
        let mut tracker = InputTracker::default();
        let two = InputState {
            pads: vec![pad(ButtonFlags::empty()), pad(ButtonFlags::B)],
        };
        tracker.diff(&two, 1);

        let one = InputState {
            pads: vec![pad(ButtonFlags::empty())],
        };
        let events = tracker.diff(&one, 2);
        assert_eq!(
            events,
            vec![InputEvent::Controller {
                index: 1,
                active_mask: GamepadMask::from_count(1),
                state: ControllerState::default(),
                timestamp_us: 2,
            }]
        );
    }

    #[test]
    fn test_chord_fires_once_per_press() {
        let mut tracker = InputTracker::default();
        let chord = InputState {
            pads: vec![pad(ButtonFlags::STOP_CHORD | ButtonFlags::A)],
        };
        let released = InputState {
            pads: vec![pad(ButtonFlags::empty())],
        };
        assert!(tracker.chord_pressed(&chord, ButtonFlags::STOP_CHORD));
        assert!(!tracker.chord_pressed(&chord, ButtonFlags::STOP_CHORD));
        assert!(!tracker.chord_pressed(&released, ButtonFlags::STOP_CHORD));
        assert!(tracker.chord_pressed(&chord, ButtonFlags::STOP_CHORD));
    }

    #[test]
    fn test_partial_chord_does_not_fire() {
        let mut tracker = InputTracker::default();
        let partial = InputState {
            pads: vec![pad(ButtonFlags::PLAY | ButtonFlags::BACK)],
        };
        assert!(!tracker.chord_pressed(&partial, ButtonFlags::STOP_CHORD));
    }

    #[test]
    fn test_menu_navigator_edges() {
        let mut menu = MenuNavigator::default();
        let down = InputState {
            pads: vec![pad(ButtonFlags::DOWN)],
        };
        assert_eq!(menu.poll(&down), vec![SessionEvent::Down]);
        assert!(menu.poll(&down).is_empty());

        let confirm = InputState {
            pads: vec![pad(ButtonFlags::A)],
        };
        assert_eq!(menu.poll(&confirm), vec![SessionEvent::Confirm]);
        assert!(menu.poll(&InputState::default()).is_empty());
    }

    #[test]
    fn test_no_input_is_empty() {
        assert_eq!(NoInput.attached_devices(), 0);
        assert!(NoInput.sample().pads.is_empty());
    }
}
