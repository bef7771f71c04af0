use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glint_client::discovery::discover_hosts;
use glint_client::hosts::HOST_STORE_FILE;
use glint_client::sim::{Journal, SimulatedEngine, SimulatedHost};
use glint_client::{
    AppEntry, ClientConfig, ClientIdentity, Collaborators, ConfigOverlay, ConsoleFrontend,
    EventSender, Frontend, GilrsInput, HostBook, HostRecord, InputCapability, NoInput, Session,
    SessionError, SessionEvent,
};
use glint_common::Error as CommonError;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "glint-client")]
#[command(about = "Game-streaming client: pair with a host and stream an app")]
struct Args {
    /// Configuration file (`key = value` lines)
    #[arg(long, default_value = "glint.conf")]
    config: PathBuf,
    /// Host address (repeatable, adds to the configured ones)
    #[arg(long = "address", value_name = "HOST")]
    addresses: Vec<String>,
    /// Application to stream
    #[arg(long)]
    app: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    /// Bitrate in kbps
    #[arg(long)]
    bitrate: Option<u32>,
    /// Let the host optimize game settings for streaming
    #[arg(long, default_value_t = false)]
    sops: bool,
    /// Ask the host to quit the app when the stream ends
    #[arg(long, default_value_t = false)]
    quit_app_after: bool,
    /// Start streaming right after connecting
    #[arg(long, default_value_t = false)]
    autostream: bool,
    /// Directory holding the client identity
    #[arg(long)]
    key_dir: Option<PathBuf>,
    /// Browse the LAN for hosts before starting
    #[arg(long, default_value_t = false)]
    discover: bool,
    #[arg(long, default_value_t = 2000)]
    discover_timeout_ms: u64,
    /// Session loop period
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,
    #[arg(long, env = "GLINT_DEBUG", default_value_t = 0)]
    debug: u8,
}

fn parse_control_line(line: &str) -> Result<SessionEvent, String> {
    let token = line.trim().to_ascii_lowercase();
    match token.as_str() {
        "" => Err("empty command".into()),
        "a" | "confirm" | "select" => Ok(SessionEvent::Confirm),
        "b" | "back" => Ok(SessionEvent::Back),
        "x" | "pair" => Ok(SessionEvent::Pair),
        "up" | "k" => Ok(SessionEvent::Up),
        "down" | "j" => Ok(SessionEvent::Down),
        "stop" => Ok(SessionEvent::StopRequested),
        "quit" | "exit" => Ok(SessionEvent::Shutdown),
        other => Err(format!("unknown command `{}`", other)),
    }
}

/// Forwards control commands until `reader` ends. End of input only
/// disables keyboard control; `quit` is the way to shut down.
fn forward_controls(reader: impl BufRead, events: &EventSender) {
    for line in reader.lines() {
        match line {
            Ok(line) => match parse_control_line(&line) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Err(err) => eprintln!("{} (try a, b, x, up, down, stop, quit)", err),
            },
            Err(err) => {
                eprintln!("stdin read error: {}", err);
                return;
            }
        }
    }
    debug!("stdin closed, keyboard controls disabled");
}

fn spawn_stdin_controls(events: EventSender) {
    std::thread::spawn(move || forward_controls(io::stdin().lock(), &events));
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match ClientConfig::load(&args.config) {
        Ok(config) => config,
        Err(CommonError::NotFound(_)) => ClientConfig::default(),
        Err(e) => return Err(e.into()),
    };

    for address in &args.addresses {
        if !config.addresses.contains(address) {
            config.addresses.push(address.clone());
        }
    }
    if let Some(app) = &args.app {
        config.app = app.clone();
    }
    if let Some(width) = args.width {
        config.stream.width = width;
    }
    if let Some(height) = args.height {
        config.stream.height = height;
    }
    if let Some(fps) = args.fps {
        config.stream.fps = fps;
    }
    if let Some(bitrate) = args.bitrate {
        config.stream.bitrate_kbps = bitrate;
    }
    if let Some(key_dir) = &args.key_dir {
        config.key_dir = key_dir.clone();
    }
    config.quit_app_after |= args.quit_app_after;
    config.autostream |= args.autostream;
    config.debug_level = config.debug_level.max(args.debug);

    // This platform asks for any resolution and only does SOPS on request.
    config.stream.allow_unsupported = true;
    config.stream.sops = args.sops;
    Ok(config)
}

/// Log level to start with. The config file is only peeked at here; it is
/// parsed for real once logging is up so its warnings are not lost.
fn startup_log_level(args: &Args) -> &'static str {
    let file_level = ConfigOverlay::load(&args.config)
        .ok()
        .and_then(|overlay| overlay.get("debug").and_then(|v| v.parse::<u8>().ok()))
        .unwrap_or(0);
    if args.debug.max(file_level) > 0 {
        "debug"
    } else {
        "info"
    }
}

/// Wires the session. Configuration and identity failures park it in
/// `Invalid` instead of ending the process.
fn build_session(
    args: &Args,
    make_input: impl FnOnce(&ClientConfig) -> Arc<dyn InputCapability>,
    frontend: Box<dyn Frontend>,
) -> Session {
    let (config, config_error) = match load_config(args) {
        Ok(config) => (config, None),
        Err(e) => (ClientConfig::default(), Some(e)),
    };

    let mut hosts = HostBook::from_addresses(&config.addresses)
        .with_store(config.key_dir.join(HOST_STORE_FILE));
    if config_error.is_none() {
        if let Err(e) = hosts.load_store() {
            warn!("failed to load saved hosts: {}", e);
        }
        if args.discover {
            match discover_hosts(Duration::from_millis(args.discover_timeout_ms)) {
                Ok(found) => {
                    for address in found {
                        hosts.insert(HostRecord::new(address));
                    }
                }
                Err(e) => warn!("host discovery failed: {}", e),
            }
        }
    }

    warn!("no streaming engine linked, using the simulated host");
    let journal = Journal::default();
    let client = SimulatedHost::new(journal.clone())
        .with_apps(vec![AppEntry::new("Steam", 1), AppEntry::new("Desktop", 2)]);
    let engine = SimulatedEngine::new(journal);
    let input = make_input(&config);
    let key_dir = config.key_dir.clone();

    let mut session = Session::new(
        config,
        hosts,
        Collaborators {
            client: Box::new(client),
            engine: Arc::new(engine),
            input,
            frontend,
        },
    );
    if let Some(e) = config_error {
        session.park_invalid(SessionError::Config(e.to_string()));
        return session;
    }
    match ClientIdentity::load_or_init(&key_dir) {
        Ok(identity) => info!("client id {}", identity.unique_id),
        Err(e) => session.park_invalid(SessionError::Identity(e.to_string())),
    }
    session
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    glint_common::init_tracing_with_default(startup_log_level(&args));

    if !args.config.exists() {
        warn!("{} not found, using defaults", args.config.display());
    }

    let mut session = build_session(
        &args,
        |config: &ClientConfig| -> Arc<dyn InputCapability> {
            if glint_common::env_bool("GLINT_DISABLE_GAMEPAD", false) {
                info!("gamepad input disabled");
                Arc::new(NoInput)
            } else {
                Arc::new(GilrsInput::spawn(config.gamepad_deadzone))
            }
        },
        Box::new(ConsoleFrontend::new()),
    );

    spawn_stdin_controls(session.event_sender());
    session.run(Duration::from_millis(args.tick_ms.max(1)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_client::sim::RecordingFrontend;
    use glint_client::SessionState;
    use std::ffi::OsStr;
    use std::path::Path;

    #[test]
    fn test_parse_control_line() {
        assert_eq!(parse_control_line("a"), Ok(SessionEvent::Confirm));
        assert_eq!(parse_control_line(" PAIR "), Ok(SessionEvent::Pair));
        assert_eq!(parse_control_line("stop"), Ok(SessionEvent::StopRequested));
        assert_eq!(parse_control_line("quit"), Ok(SessionEvent::Shutdown));
        assert!(parse_control_line("").is_err());
        assert!(parse_control_line("launch").is_err());
    }

    #[test]
    fn test_forward_controls_keeps_running_at_eof() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward_controls(io::Cursor::new("down\nbogus\na\n"), &tx);
        assert_eq!(rx.try_recv(), Ok(SessionEvent::Down));
        assert_eq!(rx.try_recv(), Ok(SessionEvent::Confirm));
        assert!(rx.try_recv().is_err());

        forward_controls(io::Cursor::new(""), &tx);
        assert!(rx.try_recv().is_err());

        forward_controls(io::Cursor::new("quit\n"), &tx);
        assert_eq!(rx.try_recv(), Ok(SessionEvent::Shutdown));
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("glint-bin-{tag}-{}", glint_common::now_us()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn session_for(dir: &Path, config: &str) -> Session {
        let path = dir.join("glint.conf");
        std::fs::write(&path, config).unwrap();
        let key_dir = dir.join("keys");
        let args = Args::parse_from([
            OsStr::new("glint-client"),
            OsStr::new("--config"),
            path.as_os_str(),
            OsStr::new("--key-dir"),
            key_dir.as_os_str(),
        ]);
        build_session(
            &args,
            |_: &ClientConfig| -> Arc<dyn InputCapability> { Arc::new(NoInput) },
            Box::new(RecordingFrontend::new(Journal::default())),
        )
    }

    #[test]
    fn test_malformed_config_parks_invalid() {
        let dir = scratch_dir("bad-config");
        let mut session = session_for(&dir, "address = 10.0.0.2\nfps = fast\n");

        assert_eq!(session.state(), SessionState::Invalid);
        assert!(session.pending().is_error);
        assert!(session.pending().message.contains("fps: `fast`"));
        session.step();
        assert_eq!(session.state(), SessionState::Invalid);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_valid_config_connects_to_single_host() {
        let dir = scratch_dir("good-config");
        let session = session_for(&dir, "address = 10.0.0.2\n");

        assert_eq!(session.state(), SessionState::Connecting);
        assert!(dir.join("keys").join("uniqueid.dat").is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_startup_level_reads_config_debug() {
        let dir = scratch_dir("debug-level");
        let path = dir.join("glint.conf");
        std::fs::write(&path, "debug = 1\n").unwrap();
        let args = Args::parse_from([
            OsStr::new("glint-client"),
            OsStr::new("--config"),
            path.as_os_str(),
        ]);
        assert_eq!(startup_log_level(&args), "debug");

        let args = Args::parse_from(["glint-client", "--config", "/nonexistent/glint.conf"]);
        assert_eq!(startup_log_level(&args), "info");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
