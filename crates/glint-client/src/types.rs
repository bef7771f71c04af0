use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::config::ConfigOverlay;

bitflags! {
    /// Video formats, used both for the client's preference and for what the
    /// local decoder can handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VideoFormats: u32 {
        const H264 = 0x0001;
        const H265 = 0x0100;
        const H265_MAIN10 = 0x0200;
        const AV1_MAIN8 = 0x1000;
        const AV1_MAIN10 = 0x2000;
    }
}

bitflags! {
    /// Controller button state as submitted to the streaming engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ButtonFlags: u32 {
        const UP = 0x0001;
        const DOWN = 0x0002;
        const LEFT = 0x0004;
        const RIGHT = 0x0008;
        const PLAY = 0x0010;
        const BACK = 0x0020;
        const LS_CLK = 0x0040;
        const RS_CLK = 0x0080;
        const LB = 0x0100;
        const RB = 0x0200;
        const SPECIAL = 0x0400;
        const A = 0x1000;
        const B = 0x2000;
        const X = 0x4000;
        const Y = 0x8000;
    }
}

impl ButtonFlags {
    /// Start + Select + LB + RB, the chord that ends a stream from the pad.
    pub const STOP_CHORD: ButtonFlags = ButtonFlags::PLAY
        .union(ButtonFlags::BACK)
        .union(ButtonFlags::LB)
        .union(ButtonFlags::RB);
}

/// Requested stream parameters. Frozen for the duration of one
/// stream-start attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub packet_size: u32,
    pub video_formats: VideoFormats,
    /// Play audio on the host instead of streaming it.
    pub local_audio: bool,
    /// Let the host optimize game settings for streaming.
    pub sops: bool,
    /// Ask the host for resolutions it does not advertise.
    pub allow_unsupported: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            bitrate_kbps: 5000,
            packet_size: 1024,
            video_formats: VideoFormats::H264,
            local_audio: false,
            sops: false,
            allow_unsupported: true,
        }
    }
}

/// Metadata reported by a host status query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub gpu_type: String,
    pub server_version: String,
    pub app_version: String,
    pub gs_version: String,
    /// Bitmask of codec modes the host can encode.
    pub codec_support: u32,
    /// Id of the app currently running on the host, 0 if none.
    pub current_game: u32,
    pub is_gfe: bool,
    pub paired: bool,
}

/// A known host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub address: String,
    #[serde(skip)]
    pub overrides: Option<ConfigOverlay>,
    #[serde(default)]
    pub paired: bool,
    #[serde(default)]
    pub server: Option<ServerInfo>,
}

impl HostRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            overrides: None,
            paired: false,
            server: None,
        }
    }

    pub fn apply_status(&mut self, info: ServerInfo) {
        self.paired = info.paired;
        self.server = Some(info);
    }

    /// App running on the host according to the last status or pairing
    /// result.
    pub fn current_game(&self) -> u32 {
        self.server.as_ref().map(|s| s.current_game).unwrap_or(0)
    }

    pub fn is_gfe(&self) -> bool {
        self.server.as_ref().map(|s| s.is_gfe).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub id: u32,
}

impl AppEntry {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Result of a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairOutcome {
    pub paired: bool,
    pub current_game: u32,
}

/// One bit per attached local controller, low to high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GamepadMask(u16);

impl GamepadMask {
    pub const MAX_CONTROLLERS: usize = 16;

    pub fn from_count(count: usize) -> Self {
        let count = count.min(Self::MAX_CONTROLLERS);
        let mut mask: u32 = 0;
        for _ in 0..count {
            mask = (mask << 1) | 1;
        }
        Self(mask as u16)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// Everything the host needs to launch an app for streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub app_id: u32,
    pub stream: StreamConfig,
    pub is_gfe: bool,
    pub gamepad_mask: GamepadMask,
}

/// Stream parameters agreed with the host, handed to the streaming engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedStream {
    pub address: String,
    pub app_id: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub packet_size: u32,
    pub video_formats: VideoFormats,
}

/// Per-controller snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub buttons: ButtonFlags,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_stick: (i16, i16),
    pub right_stick: (i16, i16),
}

/// All attached controllers, indexed by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputState {
    pub pads: Vec<ControllerState>,
}

/// Input submitted to the streaming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Controller {
        index: u8,
        active_mask: GamepadMask,
        state: ControllerState,
        timestamp_us: u64,
    },
}

/// Last user-visible message and whether it reports a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingError {
    pub message: String,
    pub is_error: bool,
}

impl PendingError {
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.is_error = true;
    }

    pub fn set_info(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.is_error = false;
    }

    pub fn clear(&mut self) {
        self.message.clear();
        self.is_error = false;
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gamepad_mask_from_count() {
        assert_eq!(GamepadMask::from_count(0).bits(), 0);
        assert_eq!(GamepadMask::from_count(1).bits(), 0b1);
        assert_eq!(GamepadMask::from_count(3).bits(), 0b111);
        assert_eq!(GamepadMask::from_count(16).bits(), 0xFFFF);
        assert_eq!(GamepadMask::from_count(40).bits(), 0xFFFF);
        assert_eq!(GamepadMask::from_count(4).count(), 4);
    }

    #[test]
    fn test_stop_chord_contains_all_buttons() {
        let chord = ButtonFlags::STOP_CHORD;
        assert!(chord.contains(ButtonFlags::PLAY | ButtonFlags::BACK));
        assert!(chord.contains(ButtonFlags::LB | ButtonFlags::RB));
        assert!(!chord.contains(ButtonFlags::A));
    }

    #[test]
    fn test_pending_error_replace_and_clear() {
        let mut pending = PendingError::default();
        pending.set_error("Can't connect to server");
        assert!(pending.is_error);
        pending.set_info("Successfully paired");
        assert!(!pending.is_error);
        assert_eq!(pending.message, "Successfully paired");
        pending.clear();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_host_record_apply_status() {
        let mut host = HostRecord::new("10.0.0.2");
        assert_eq!(host.current_game(), 0);
        host.apply_status(ServerInfo {
            current_game: 7,
            paired: true,
            is_gfe: true,
            ..Default::default()
        });
        assert!(host.paired);
        assert!(host.is_gfe());
        assert_eq!(host.current_game(), 7);
    }
}
