//! Gateway configuration
//!
//! Centralized loading for the gateway, backed by a TOML file at
//! `~/.config/fluxgate/gateway.toml`. Sources override each other in a
//! fixed order: built-in defaults, then the TOML file, then `FLUXGATE_*`
//! environment variables, then CLI arguments (which the caller applies
//! through [`ConfigOverrides`]).
//!
//! A file looks like this:
//!
//! ```toml
//! [transport]
//! socket_path = "/run/user/1000/fluxgate/gateway.sock"
//! heartbeat_interval_secs = 20
//! max_missed_pongs = 4
//!
//! [timeouts]
//! chat_secs = 45
//! media_secs = 180
//! cancel_grace_ms = 250
//!
//! [limits]
//! max_history_entries = 128
//! outbound_channel_capacity = 512
//!
//! [[engine]]
//! kind = "echo"
//! chat_streaming = true
//!
//! [[engine]]
//! kind = "image"
//! image_generation = true
//! default_timeout_secs = 180
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DispatcherConfig;
use crate::engine::EngineDescriptor;
use crate::gateway::GatewaySettings;
use crate::liveness::LivenessConfig;
use crate::transport::{TransportConfig, TransportKind};

/// What can go wrong while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        /// Path of the unreadable file
        path: PathBuf,
        /// IO error reported by the read
        source: std::io::Error,
    },

    /// The file's contents are not valid TOML
    #[error("failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value parsed fine but makes no sense
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where the configuration primarily came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from a command-line argument
    Cli,
    /// Value from an environment variable
    Env,
    /// Value from the TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Transport section of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Unix socket path; setting it selects the unix-socket transport
    pub socket_path: Option<String>,
    /// Ceiling on a single connect attempt, in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Ceiling on waiting for an inbound event, in milliseconds (0 waits
    /// forever)
    pub read_timeout_ms: Option<u64>,
    /// Whether liveness pings are sent at all
    pub heartbeat_enabled: Option<bool>,
    /// Quiet interval before a ping goes out, in seconds
    pub heartbeat_interval_secs: Option<u64>,
    /// How long to wait for a pong, in seconds
    pub heartbeat_timeout_secs: Option<u64>,
    /// Consecutive unanswered pings before the connection is declared dead
    pub max_missed_pongs: Option<u32>,
    /// Client-side reconnection attempts
    pub reconnect_attempts: Option<u32>,
    /// Fixed pause between retries, in milliseconds
    pub reconnect_delay_ms: Option<u64>,
}

/// Timeouts section of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsToml {
    /// Default chat request deadline in seconds
    pub chat_secs: Option<u64>,
    /// Default media request deadline in seconds
    pub media_secs: Option<u64>,
    /// Cancellation grace period in milliseconds
    pub cancel_grace_ms: Option<u64>,
}

/// Limits section of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// History entries kept per session (0 = unlimited)
    pub max_history_entries: Option<usize>,
    /// Per-connection outbound event queue capacity
    pub outbound_channel_capacity: Option<usize>,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Largest accepted prompt in bytes (0 = unlimited)
    pub max_prompt_bytes: Option<usize>,
}

/// One `[[engine]]` entry of the TOML file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineToml {
    /// Engine kind identifier
    pub kind: String,
    /// Whether this kind streams chat tokens
    #[serde(default)]
    pub chat_streaming: bool,
    /// Whether this kind generates images
    #[serde(default)]
    pub image_generation: bool,
    /// Per-request deadline; falls back to the `[timeouts]` defaults
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// Top-level TOML structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// `[transport]` section
    pub transport: TransportToml,
    /// Timeouts section
    pub timeouts: TimeoutsToml,
    /// Limits section
    pub limits: LimitsToml,
    /// Engine catalog entries
    #[serde(rename = "engine")]
    pub engines: Vec<EngineToml>,
}

/// One resolved engine catalog entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineEntry {
    /// Engine kind identifier
    pub kind: String,
    /// Whether this kind streams chat tokens
    pub chat_streaming: bool,
    /// Whether this kind generates images
    pub image_generation: bool,
    /// Per-request deadline
    pub timeout: Duration,
}

impl EngineEntry {
    /// The catalog descriptor for this entry
    #[must_use]
    pub fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            kind: self.kind.clone(),
            chat_streaming: self.chat_streaming,
            image_generation: self.image_generation,
            timeout: self.timeout,
        }
    }
}

/// Fully resolved gateway configuration
///
/// Consolidates file, environment and CLI sources into the concrete configs
/// the other modules consume. Use [`load_config`] rather than building this
/// by hand outside tests.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Transport selection and client-side link settings
    pub transport: TransportConfig,
    /// Server-side liveness probing
    pub liveness: LivenessConfig,
    /// Dispatcher tuning
    pub dispatcher: DispatcherConfig,
    /// Default deadline for chat requests
    pub chat_timeout: Duration,
    /// Default deadline for media requests
    pub media_timeout: Duration,
    /// History entries kept per session (0 = unlimited)
    pub max_history_entries: usize,
    /// Per-connection outbound queue capacity
    pub outbound_capacity: usize,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Engine catalog entries
    pub engines: Vec<EngineEntry>,
    /// Path of the file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let chat_timeout = Duration::from_secs(30);
        let media_timeout = Duration::from_secs(120);
        Self {
            transport: TransportConfig::default(),
            liveness: LivenessConfig::default(),
            dispatcher: DispatcherConfig::default(),
            chat_timeout,
            media_timeout,
            max_history_entries: 64,
            outbound_capacity: 256,
            max_connections: 100,
            engines: vec![
                EngineEntry {
                    kind: "echo".to_string(),
                    chat_streaming: true,
                    image_generation: false,
                    timeout: chat_timeout,
                },
                EngineEntry {
                    kind: "image".to_string(),
                    chat_streaming: false,
                    image_generation: true,
                    timeout: media_timeout,
                },
            ],
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with all timings shrunk for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportConfig::for_testing(),
            liveness: LivenessConfig::for_testing(),
            dispatcher: DispatcherConfig::for_testing(),
            chat_timeout: Duration::from_secs(2),
            media_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// The primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Server-loop settings derived from the limits
    #[must_use]
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            max_connections: self.max_connections,
            outbound_capacity: self.outbound_capacity,
            ..GatewaySettings::default()
        }
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first problem:
    /// an empty or duplicate engine kind, a zero timeout, or a zero
    /// connection limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.chat_timeout.is_zero() || self.media_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request timeouts must be non-zero".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.engines {
            if entry.kind.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "engine kind must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.kind.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate engine kind \"{}\"",
                    entry.kind
                )));
            }
            if entry.timeout.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "engine \"{}\" has a zero timeout",
                    entry.kind
                )));
            }
        }
        Ok(())
    }
}

/// The default configuration file path
///
/// `$XDG_CONFIG_HOME/fluxgate/gateway.toml`, typically
/// `~/.config/fluxgate/gateway.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fluxgate").join("gateway.toml"))
}

/// Load configuration from the default path plus the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
/// A missing file is not an error; defaults are used.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path plus the environment
///
/// # Errors
///
/// Returns an error if the named file exists but cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;
            let toml_config: GatewayToml = toml::from_str(&content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;
            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config);
    Ok(config)
}

/// Fold file values into the resolved config
fn apply_toml_config(config: &mut GatewayConfig, toml: &GatewayToml) {
    // Timeouts first: engine entries without their own deadline fall back
    // to these.
    if let Some(secs) = toml.timeouts.chat_secs {
        config.chat_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.timeouts.media_secs {
        config.media_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.timeouts.cancel_grace_ms {
        config.dispatcher.cancel_grace = Duration::from_millis(ms);
    }

    // Transport, with liveness kept in step with the heartbeat keys.
    #[cfg(unix)]
    if let Some(ref path) = toml.transport.socket_path {
        config.transport.kind = TransportKind::UnixSocket {
            path: Some(PathBuf::from(path)),
        };
    }
    if let Some(ms) = toml.transport.connect_timeout_ms {
        config.transport.connect_timeout_ms = ms;
    }
    if let Some(ms) = toml.transport.read_timeout_ms {
        config.transport.read_timeout_ms = ms;
    }
    if let Some(enabled) = toml.transport.heartbeat_enabled {
        config.transport.heartbeat_enabled = enabled;
        config.liveness.enabled = enabled;
    }
    if let Some(secs) = toml.transport.heartbeat_interval_secs {
        config.transport.heartbeat_interval_ms = secs * 1000;
        config.liveness.ping_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.transport.heartbeat_timeout_secs {
        config.liveness.response_window = Duration::from_secs(secs);
    }
    if let Some(max_missed) = toml.transport.max_missed_pongs {
        config.liveness.max_missed_pongs = max_missed;
    }
    if let Some(attempts) = toml.transport.reconnect_attempts {
        config.transport.reconnect_attempts = attempts;
    }
    if let Some(ms) = toml.transport.reconnect_delay_ms {
        config.transport.reconnect_delay_ms = ms;
    }

    // Limits.
    if let Some(n) = toml.limits.max_history_entries {
        config.max_history_entries = n;
    }
    if let Some(n) = toml.limits.outbound_channel_capacity {
        config.outbound_capacity = n;
    }
    if let Some(n) = toml.limits.max_connections {
        config.max_connections = n;
    }
    if let Some(n) = toml.limits.max_prompt_bytes {
        config.dispatcher.max_prompt_bytes = n;
    }

    // Engine entries replace the built-in catalog wholesale when present.
    if !toml.engines.is_empty() {
        config.engines = toml
            .engines
            .iter()
            .map(|entry| {
                let fallback = if entry.image_generation && !entry.chat_streaming {
                    config.media_timeout
                } else {
                    config.chat_timeout
                };
                EngineEntry {
                    kind: entry.kind.clone(),
                    chat_streaming: entry.chat_streaming,
                    image_generation: entry.image_generation,
                    timeout: entry
                        .default_timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(fallback),
                }
            })
            .collect();
    }
}

/// Fold environment overrides into the resolved config
fn apply_env_config(config: &mut GatewayConfig) {
    if let Ok(value) = std::env::var("FLUXGATE_TRANSPORT") {
        match value.to_lowercase().as_str() {
            "inprocess" | "embedded" => {
                config.transport.kind = TransportKind::InProcess;
                config.source = ConfigSource::Env;
            }
            #[cfg(unix)]
            "unix" | "socket" => {
                config.transport.kind = TransportKind::UnixSocket { path: None };
                config.source = ConfigSource::Env;
            }
            _ => {}
        }
    }
    #[cfg(unix)]
    if let Ok(path) = std::env::var("FLUXGATE_SOCKET") {
        config.transport.kind = TransportKind::UnixSocket {
            path: Some(PathBuf::from(path)),
        };
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(ms)) = std::env::var("FLUXGATE_CONNECT_TIMEOUT").map(|v| v.parse::<u64>()) {
        config.transport.connect_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(ms)) = std::env::var("FLUXGATE_READ_TIMEOUT").map(|v| v.parse::<u64>()) {
        config.transport.read_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Ok(value) = std::env::var("FLUXGATE_HEARTBEAT") {
        let enabled = value != "0" && value.to_lowercase() != "false";
        config.transport.heartbeat_enabled = enabled;
        config.liveness.enabled = enabled;
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(ms)) = std::env::var("FLUXGATE_HEARTBEAT_INTERVAL").map(|v| v.parse::<u64>()) {
        config.transport.heartbeat_interval_ms = ms;
        config.liveness.ping_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(n)) = std::env::var("FLUXGATE_RECONNECT_ATTEMPTS").map(|v| v.parse::<u32>()) {
        config.transport.reconnect_attempts = n;
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(ms)) = std::env::var("FLUXGATE_RECONNECT_DELAY").map(|v| v.parse::<u64>()) {
        config.transport.reconnect_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(secs)) = std::env::var("FLUXGATE_CHAT_TIMEOUT").map(|v| v.parse::<u64>()) {
        config.chat_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(secs)) = std::env::var("FLUXGATE_MEDIA_TIMEOUT").map(|v| v.parse::<u64>()) {
        config.media_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Ok(Ok(ms)) = std::env::var("FLUXGATE_CANCEL_GRACE").map(|v| v.parse::<u64>()) {
        config.dispatcher.cancel_grace = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
}

/// CLI overrides applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Socket path override; selects the unix-socket transport
    pub socket_path: Option<PathBuf>,
    /// Liveness enabled override
    pub heartbeat_enabled: Option<bool>,
    /// Liveness ping interval override, in seconds
    pub heartbeat_interval_secs: Option<u64>,
    /// Connection limit override
    pub max_connections: Option<usize>,
}

impl ConfigOverrides {
    /// An empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket path override
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Set the liveness enabled override
    #[must_use]
    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = Some(enabled);
        self
    }

    /// Set the liveness ping interval override
    #[must_use]
    pub fn with_heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = Some(secs);
        self
    }

    /// Set the connection limit override
    #[must_use]
    pub fn with_max_connections(mut self, limit: usize) -> Self {
        self.max_connections = Some(limit);
        self
    }

    /// Apply these overrides to a configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.socket_path.is_some()
            || self.heartbeat_enabled.is_some()
            || self.heartbeat_interval_secs.is_some()
            || self.max_connections.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        #[cfg(unix)]
        if let Some(ref path) = self.socket_path {
            config.transport.kind = TransportKind::UnixSocket {
                path: Some(path.clone()),
            };
        }
        if let Some(enabled) = self.heartbeat_enabled {
            config.transport.heartbeat_enabled = enabled;
            config.liveness.enabled = enabled;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.transport.heartbeat_interval_ms = secs * 1000;
            config.liveness.ping_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = self.max_connections {
            config.max_connections = limit;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();

        assert_eq!(config.chat_timeout, Duration::from_secs(30));
        assert_eq!(config.media_timeout, Duration::from_secs(120));
        assert_eq!(config.max_history_entries, 64);
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.engines.len(), 2);
        assert!(config.engines[0].chat_streaming);
        assert!(config.engines[1].image_generation);
        assert_eq!(config.source(), ConfigSource::Default);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_path_is_fluxgate_owned() {
        if let Some(path) = default_config_path() {
            let text = path.to_string_lossy().to_string();
            assert!(text.contains("fluxgate"));
            assert!(text.ends_with("gateway.toml"));
        }
    }

    #[test]
    fn test_parse_full_toml() {
        let file = write_config(
            r#"
[transport]
connect_timeout_ms = 8000
heartbeat_enabled = true
heartbeat_interval_secs = 40
heartbeat_timeout_secs = 12
max_missed_pongs = 4
reconnect_attempts = 6

[timeouts]
chat_secs = 45
media_secs = 300
cancel_grace_ms = 250

[limits]
max_history_entries = 32
outbound_channel_capacity = 128
max_connections = 10
max_prompt_bytes = 4096

[[engine]]
kind = "streamer"
chat_streaming = true
default_timeout_secs = 20

[[engine]]
kind = "painter"
image_generation = true
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.transport.connect_timeout_ms, 8000);
        assert_eq!(config.transport.reconnect_attempts, 6);
        assert_eq!(config.liveness.ping_interval, Duration::from_secs(40));
        assert_eq!(config.liveness.response_window, Duration::from_secs(12));
        assert_eq!(config.liveness.max_missed_pongs, 4);

        assert_eq!(config.chat_timeout, Duration::from_secs(45));
        assert_eq!(config.media_timeout, Duration::from_secs(300));
        assert_eq!(config.dispatcher.cancel_grace, Duration::from_millis(250));

        assert_eq!(config.max_history_entries, 32);
        assert_eq!(config.outbound_capacity, 128);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.dispatcher.max_prompt_bytes, 4096);

        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[0].kind, "streamer");
        assert_eq!(config.engines[0].timeout, Duration::from_secs(20));
        assert_eq!(config.engines[1].kind, "painter");
        // No explicit deadline: an image-only kind falls back to media_secs.
        assert_eq!(config.engines[1].timeout, Duration::from_secs(300));

        assert_eq!(config.source(), ConfigSource::File);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let file = write_config(
            r#"
[timeouts]
chat_secs = 10
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.chat_timeout, Duration::from_secs(10));
        assert_eq!(config.media_timeout, Duration::from_secs(120));
        // No [[engine]] entries: the built-in catalog stays.
        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[0].kind, "echo");
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let path = PathBuf::from("/nonexistent/fluxgate/gateway.toml");
        let config = load_config_from_path(Some(path)).unwrap();
        assert_eq!(config.engines.len(), 2);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_invalid_toml_reports_parse_error() {
        let file = write_config("this is ][ not toml");
        let error = load_config_from_path(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(error, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_chat_engine_without_deadline_uses_chat_default() {
        let file = write_config(
            r#"
[timeouts]
chat_secs = 42

[[engine]]
kind = "streamer"
chat_streaming = true
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.engines[0].timeout, Duration::from_secs(42));
    }

    #[test]
    fn test_validate_rejects_duplicate_kinds() {
        let mut config = GatewayConfig::default();
        config.engines.push(config.engines[0].clone());
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_rejects_zero_connection_limit() {
        let config = GatewayConfig {
            max_connections: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = GatewayConfig::default();
        let overrides = ConfigOverrides::new()
            .with_heartbeat_enabled(false)
            .with_max_connections(5);
        overrides.apply(&mut config);

        assert!(!config.liveness.enabled);
        assert!(!config.transport.heartbeat_enabled);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_path_override_selects_unix_transport() {
        let mut config = GatewayConfig::default();
        let overrides =
            ConfigOverrides::new().with_socket_path(PathBuf::from("/tmp/test-gw.sock"));
        overrides.apply(&mut config);

        match &config.transport.kind {
            TransportKind::UnixSocket { path } => {
                assert_eq!(path.as_deref(), Some(std::path::Path::new("/tmp/test-gw.sock")));
            }
            other => panic!("expected unix socket kind, got {other:?}"),
        }
    }

    #[test]
    fn test_engine_entry_descriptor() {
        let entry = EngineEntry {
            kind: "streamer".to_string(),
            chat_streaming: true,
            image_generation: false,
            timeout: Duration::from_secs(9),
        };
        let descriptor = entry.descriptor();
        assert_eq!(descriptor.kind, "streamer");
        assert!(descriptor.chat_streaming);
        assert!(!descriptor.image_generation);
        assert_eq!(descriptor.timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_gateway_settings_from_limits() {
        let config = GatewayConfig {
            max_connections: 7,
            outbound_capacity: 32,
            ..GatewayConfig::default()
        };
        let settings = config.gateway_settings();
        assert_eq!(settings.max_connections, 7);
        assert_eq!(settings.outbound_capacity, 32);
    }
}
