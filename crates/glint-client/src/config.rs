//! Client configuration.
//!
//! Files use a `key = value` line format; `#` starts a comment and `address`
//! may repeat. The same grammar is used for the base file and for per-host
//! overlays in `<hosts_dir>/<address>.conf`.

use std::path::{Path, PathBuf};

use glint_common::{Error, Result};
use tracing::{debug, warn};

use crate::types::{StreamConfig, VideoFormats};

pub const DEFAULT_APP: &str = "Steam";
pub const DEFAULT_GAMEPAD_DEADZONE: f32 = 0.1;

/// Parsed but not yet applied `key = value` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverlay {
    entries: Vec<(String, String)>,
}

impl ConfigOverlay {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::config(format!("line {}: expected `key = value`", lineno + 1))
            })?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(Error::config(format!("line {}: missing key", lineno + 1)));
            }
            entries.push((key, value.trim().to_string()));
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Everything the session needs from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub addresses: Vec<String>,
    pub app: String,
    pub stream: StreamConfig,
    pub quit_app_after: bool,
    pub audio_device: Option<String>,
    pub key_dir: PathBuf,
    pub hosts_dir: Option<PathBuf>,
    /// Skip the host menu and start streaming right after connecting.
    pub autostream: bool,
    pub debug_level: u8,
    pub gamepad_deadzone: f32,
    /// Formats the local decoder can handle.
    pub decoder_formats: VideoFormats,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            app: DEFAULT_APP.to_string(),
            stream: StreamConfig::default(),
            quit_app_after: false,
            audio_device: None,
            key_dir: PathBuf::from("keys"),
            hosts_dir: None,
            autostream: false,
            debug_level: 0,
            gamepad_deadzone: DEFAULT_GAMEPAD_DEADZONE,
            decoder_formats: VideoFormats::H264,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with the file at `path`. Host overlays are looked up
    /// in a `hosts` directory next to it unless one is set explicitly.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::not_found(path.display()));
        }
        let overlay = ConfigOverlay::load(path)?;
        let mut config = Self::default();
        config.apply(&overlay)?;
        if config.hosts_dir.is_none() {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            config.hosts_dir = Some(parent.join("hosts"));
        }
        Ok(config)
    }

    pub fn apply(&mut self, overlay: &ConfigOverlay) -> Result<()> {
        for (key, value) in overlay.entries() {
            self.apply_entry(key, value)?;
        }
        Ok(())
    }

    /// A fresh configuration with `overlay` applied on top of `self`.
    pub fn merged_with(&self, overlay: &ConfigOverlay) -> Result<Self> {
        let mut merged = self.clone();
        merged.apply(overlay)?;
        Ok(merged)
    }

    pub fn host_overlay_path(&self, address: &str) -> Option<PathBuf> {
        self.hosts_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.conf", address)))
    }

    /// Reads the overlay for `address`, if one exists.
    pub fn load_host_overlay(&self, address: &str) -> Result<Option<ConfigOverlay>> {
        let Some(path) = self.host_overlay_path(address) else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }
        debug!("loading host overrides from {}", path.display());
        ConfigOverlay::load(&path).map(Some)
    }

    /// Preferred formats restricted to what the decoder handles, falling back
    /// to H.264.
    pub fn negotiated_formats(&self) -> VideoFormats {
        let formats = self.stream.video_formats & self.decoder_formats;
        if formats.is_empty() {
            VideoFormats::H264
        } else {
            formats
        }
    }

    fn apply_entry(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "address" => {
                if !self.addresses.iter().any(|a| a == value) {
                    self.addresses.push(value.to_string());
                }
            }
            "app" => self.app = value.to_string(),
            "width" => self.stream.width = parse_number(key, value)?,
            "height" => self.stream.height = parse_number(key, value)?,
            "fps" => self.stream.fps = parse_number(key, value)?,
            "bitrate" => self.stream.bitrate_kbps = parse_number(key, value)?,
            "packetsize" => self.stream.packet_size = parse_number(key, value)?,
            "codec" => self.stream.video_formats = parse_codec(value)?,
            "sops" => self.stream.sops = parse_bool(key, value)?,
            "localaudio" => self.stream.local_audio = parse_bool(key, value)?,
            "unsupported" => self.stream.allow_unsupported = parse_bool(key, value)?,
            "quitappafter" => self.quit_app_after = parse_bool(key, value)?,
            "autostream" => self.autostream = parse_bool(key, value)?,
            "audio" => {
                self.audio_device = (!value.is_empty()).then(|| value.to_string());
            }
            "keydir" => self.key_dir = PathBuf::from(value),
            "hostsdir" => self.hosts_dir = Some(PathBuf::from(value)),
            "debug" => self.debug_level = parse_number(key, value)?,
            "deadzone" => {
                let deadzone: f32 = value
                    .parse()
                    .map_err(|_| Error::config(format!("{key}: `{value}` is not a number")))?;
                self.gamepad_deadzone = deadzone;
            }
            _ => warn!("ignoring unknown configuration key `{}`", key),
        }
        Ok(())
    }
}

/// `#` starts a comment at the beginning of a line or after whitespace, so
/// values such as `hw:Device#2` survive.
fn strip_comment(line: &str) -> &str {
    let mut previous = None;
    for (idx, c) in line.char_indices() {
        if c == '#' && previous.map_or(true, char::is_whitespace) {
            return &line[..idx];
        }
        previous = Some(c);
    }
    line
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::config(format!("{key}: `{value}` is not a valid number")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::config(format!("{key}: `{value}` is not a boolean"))),
    }
}

fn parse_codec(value: &str) -> Result<VideoFormats> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(VideoFormats::all()),
        "h264" => Ok(VideoFormats::H264),
        "hevc" | "h265" => Ok(VideoFormats::H265 | VideoFormats::H265_MAIN10),
        "av1" => Ok(VideoFormats::AV1_MAIN8 | VideoFormats::AV1_MAIN10),
        other => Err(Error::config(format!("codec: unknown codec `{other}`"))),
    }
}
