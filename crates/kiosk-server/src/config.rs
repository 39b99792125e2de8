//! Server configuration: TOML file + CLI overrides.

use kiosk_core::{KioskError, KioskResult};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// HTTP and WebSocket listeners.
    #[serde(default)]
    pub server: ServerSection,
    /// Where the ledger, settings and session log live.
    #[serde(default)]
    pub storage: StorageSection,
    /// Heartbeat and outbound queue tuning.
    #[serde(default)]
    pub realtime: RealtimeSection,
    /// Login attempt limits.
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Address both listeners bind to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTP API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket port; `port + 1` when unset.
    #[serde(default)]
    pub ws_port: Option<u16>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            ws_port: None,
        }
    }
}

/// `[storage]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Data directory; `~` expands to the home directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Session log entries kept on disk (0 keeps everything).
    #[serde(default = "default_log_retention")]
    pub log_retention: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_retention: default_log_retention(),
        }
    }
}

/// `[realtime]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSection {
    /// Seconds between server pings.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a connection is dropped (0 disables).
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// Messages queued per connection before it is treated as stalled.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Maximum login attempts allowed per client IP within the window.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Length of the login window in seconds.
    #[serde(default = "default_login_window")]
    pub login_window_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            max_login_attempts: default_max_login_attempts(),
            login_window_secs: default_login_window(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_data_dir() -> String {
    "~/.kiosk".to_string()
}
fn default_log_retention() -> usize {
    50_000
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_heartbeat_timeout() -> u64 {
    90
}
fn default_outbound_buffer() -> usize {
    64
}
fn default_max_login_attempts() -> u32 {
    10
}
fn default_login_window() -> u64 {
    60
}

/// Values given on the command line; `None` defers to the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--bind`
    pub bind: Option<String>,
    /// `--port`
    pub port: Option<u16>,
    /// `--ws-port`
    pub ws_port: Option<u16>,
    /// `--data-dir`
    pub data_dir: Option<String>,
}

/// Realtime channel tuning, resolved.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Time between pings; never zero.
    pub heartbeat_interval: Duration,
    /// Silence allowed before a connection is reaped; `None` never reaps.
    pub heartbeat_timeout: Option<Duration>,
    /// Per-connection outbound queue capacity; at least 1.
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeSection::default().into()
    }
}

impl From<RealtimeSection> for RealtimeConfig {
    fn from(section: RealtimeSection) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(section.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: (section.heartbeat_timeout_secs > 0)
                .then(|| Duration::from_secs(section.heartbeat_timeout_secs)),
            outbound_buffer: section.outbound_buffer.max(1),
        }
    }
}

/// Resolved server configuration (all paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP API listener.
    pub http_addr: SocketAddr,
    /// WebSocket listener, on its own port.
    pub ws_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Session log entries kept on disk (0 keeps everything).
    pub log_retention: usize,
    pub realtime: RealtimeConfig,
    /// Maximum login attempts per client IP within the window.
    pub max_login_attempts: u32,
    pub login_window_secs: u64,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &ConfigOverrides) -> KioskResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| KioskError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    fn resolve(file: ConfigFile, cli: &ConfigOverrides) -> KioskResult<Self> {
        let bind = cli.bind.clone().unwrap_or(file.server.bind);
        let ip: IpAddr = bind
            .parse()
            .map_err(|e| KioskError::Config(format!("invalid bind address {bind:?}: {e}")))?;

        let port = cli.port.unwrap_or(file.server.port);
        let ws_port = match cli.ws_port.or(file.server.ws_port) {
            Some(p) => p,
            // Port 0 asks the OS for both.
            None if port == 0 => 0,
            None => port
                .checked_add(1)
                .ok_or_else(|| KioskError::Config("no port left for WebSocket".into()))?,
        };
        if port != 0 && port == ws_port {
            return Err(KioskError::Config(format!(
                "HTTP and WebSocket cannot share port {port}"
            )));
        }

        let data_dir = cli.data_dir.clone().unwrap_or(file.storage.data_dir);

        Ok(Self {
            http_addr: SocketAddr::new(ip, port),
            ws_addr: SocketAddr::new(ip, ws_port),
            data_dir: expand_tilde_str(&data_dir),
            log_retention: file.storage.log_retention,
            realtime: file.realtime.into(),
            max_login_attempts: file.auth.max_login_attempts,
            login_window_secs: file.auth.login_window_secs,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
