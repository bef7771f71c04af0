use std::fmt::Write as _;
use std::io::{self, Write as _};

use tracing::{debug, info};

use crate::pairing::Pin;
use crate::session::SessionState;
use crate::types::{HostRecord, PendingError};

const SCREEN_BAR: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// What the frontend gets to paint each iteration.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub state: SessionState,
    pub hosts: &'a [HostRecord],
    pub selected: usize,
    pub host: Option<&'a HostRecord>,
    pub pending: &'a PendingError,
}

/// Feedback sink. Nothing it does feeds back into the state machine.
pub trait Frontend: Send {
    fn render(&mut self, view: &SessionView<'_>);
    fn show_pin(&mut self, address: &str, pin: &Pin);
    /// The platform "home" shortcut is disabled while streaming.
    fn set_home_shortcut(&mut self, enabled: bool);
}

pub fn screen_text(view: &SessionView<'_>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let address = view.host.map(|h| h.address.as_str()).unwrap_or("?");
    let mut out = String::new();
    match view.state {
        SessionState::Invalid => {}
        SessionState::Disconnected => {
            let _ = writeln!(
                out,
                "Glint {} (Disconnected), press A to select\n{}",
                version, SCREEN_BAR
            );
            for (i, host) in view.hosts.iter().enumerate() {
                let marker = if i == view.selected { ">" } else { " " };
                let _ = writeln!(out, "{} Connect to {}", marker, host.address);
            }
        }
        SessionState::Connecting => {
            let _ = writeln!(out, "Connecting to {}...", address);
        }
        SessionState::Connected => {
            let _ = writeln!(
                out,
                "Glint {} (Connected to {})\n{}\nPress A to stream\nPress X to pair\n\nPress B to go back",
                version, address, SCREEN_BAR
            );
        }
        SessionState::Pairing => {
            let _ = writeln!(out, "Pairing with {}...", address);
        }
        SessionState::StartingStream => {
            let _ = writeln!(out, "Starting stream...");
        }
        SessionState::Streaming => {
            let _ = writeln!(out, "Streaming from {}", address);
        }
        SessionState::StoppingStream => {
            let _ = writeln!(out, "Stopping stream...");
        }
    }
    if !view.pending.is_empty() {
        let tag = if view.pending.is_error { "error" } else { "ok" };
        let _ = writeln!(out, "[{}] {}", tag, view.pending.message.trim_end());
    }
    out
}

/// Prints screens to stdout, only when they change.
#[derive(Debug)]
pub struct ConsoleFrontend {
    last: String,
    home_enabled: bool,
}

impl ConsoleFrontend {
    pub fn new() -> Self {
        Self {
            last: String::new(),
            home_enabled: true,
        }
    }

    fn print(&mut self, text: String) {
        if text == self.last {
            return;
        }
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "\n{}", text);
        let _ = stdout.flush();
        self.last = text;
    }
}

impl Default for ConsoleFrontend {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontend for ConsoleFrontend {
    fn render(&mut self, view: &SessionView<'_>) {
        let text = screen_text(view);
        self.print(text);
    }

    fn show_pin(&mut self, _address: &str, pin: &Pin) {
        self.print(format!(
            "Please enter the following PIN on the target PC:\n{}\n",
            pin
        ));
    }

    fn set_home_shortcut(&mut self, enabled: bool) {
        if self.home_enabled != enabled {
            debug!("home shortcut {}", if enabled { "enabled" } else { "disabled" });
        }
        self.home_enabled = enabled;
        if !enabled {
            info!("press Start+Select+LB+RB or type `stop` to end the stream");
        }
    }
}
