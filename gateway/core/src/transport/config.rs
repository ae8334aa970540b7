//! Transport selection and link timing
//!
//! One [`TransportConfig`] serves both sides of a link: the client reads the
//! connect and reconnect knobs, the gateway reads the heartbeat knobs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Transport mechanism selection
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// In-process channel pair, for embedding the gateway in a host binary
    ///
    /// Events move as Rust values; nothing is serialized and nothing
    /// crosses a process boundary.
    #[default]
    InProcess,

    /// Unix domain socket, for a daemonized gateway
    ///
    /// Local-only. Access is gated by directory permissions and a peer
    /// UID check at accept time.
    #[cfg(unix)]
    UnixSocket {
        /// Socket path; `None` selects the standard location,
        /// `$XDG_RUNTIME_DIR/fluxgate/gateway.sock` with a per-UID /tmp
        /// directory as the fallback
        path: Option<PathBuf>,
    },
}

/// Link-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Selected transport mechanism
    pub kind: TransportKind,

    /// Ceiling on a single connect attempt, in milliseconds
    pub connect_timeout_ms: u64,

    /// Ceiling on waiting for an inbound event, in milliseconds (0 waits
    /// forever)
    pub read_timeout_ms: u64,

    /// Whether the gateway probes links with pings
    pub heartbeat_enabled: bool,

    /// Spacing of liveness pings, in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Retry budget after a failed connect (0 disables retrying)
    pub reconnect_attempts: u32,

    /// Fixed pause between retries, in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: 0,
            heartbeat_enabled: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl TransportConfig {
    /// Configuration for embedded (in-process) mode
    #[must_use]
    pub fn embedded() -> Self {
        Self {
            kind: TransportKind::InProcess,
            ..Default::default()
        }
    }

    /// Configuration for local Unix socket mode
    #[cfg(unix)]
    #[must_use]
    pub fn local() -> Self {
        Self {
            kind: TransportKind::UnixSocket { path: None },
            ..Default::default()
        }
    }

    /// Configuration with timings shrunk for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            connect_timeout_ms: 500,
            heartbeat_interval_ms: 50,
            reconnect_delay_ms: 10,
            ..Default::default()
        }
    }

    /// Read configuration from environment variables
    ///
    /// - `FLUXGATE_TRANSPORT`: "inprocess", "embedded", "unix", "socket"
    /// - `FLUXGATE_SOCKET`: Unix socket path
    /// - `FLUXGATE_CONNECT_TIMEOUT`: connect timeout in ms
    /// - `FLUXGATE_READ_TIMEOUT`: read timeout in ms
    /// - `FLUXGATE_HEARTBEAT`: "0" or "false" to disable pings
    /// - `FLUXGATE_HEARTBEAT_INTERVAL`: ping interval in ms
    /// - `FLUXGATE_RECONNECT_ATTEMPTS`: retry budget
    /// - `FLUXGATE_RECONNECT_DELAY`: retry delay in ms
    ///
    /// Unset or unparseable variables fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            kind: kind_from_env(),
            connect_timeout_ms: env_parse("FLUXGATE_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout_ms: env_parse("FLUXGATE_READ_TIMEOUT", 0),
            heartbeat_enabled: !env_is_disabled("FLUXGATE_HEARTBEAT"),
            heartbeat_interval_ms: env_parse(
                "FLUXGATE_HEARTBEAT_INTERVAL",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            ),
            reconnect_attempts: env_parse(
                "FLUXGATE_RECONNECT_ATTEMPTS",
                DEFAULT_RECONNECT_ATTEMPTS,
            ),
            reconnect_delay_ms: env_parse("FLUXGATE_RECONNECT_DELAY", DEFAULT_RECONNECT_DELAY_MS),
        }
    }

    /// Whether this configuration embeds the gateway in-process
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        matches!(self.kind, TransportKind::InProcess)
    }

    /// Whether this configuration uses a Unix socket
    #[cfg(unix)]
    #[must_use]
    pub fn is_unix_socket(&self) -> bool {
        matches!(self.kind, TransportKind::UnixSocket { .. })
    }

    /// Connect timeout as a [`Duration`]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnect delay as a [`Duration`]
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Heartbeat interval as a [`Duration`]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn kind_from_env() -> TransportKind {
    let name = std::env::var("FLUXGATE_TRANSPORT")
        .map(|v| v.to_lowercase())
        .unwrap_or_default();

    match name.as_str() {
        "inprocess" | "embedded" => TransportKind::InProcess,

        #[cfg(unix)]
        "unix" | "socket" => TransportKind::UnixSocket {
            path: std::env::var("FLUXGATE_SOCKET").ok().map(PathBuf::from),
        },

        _ => TransportKind::default(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_is_disabled(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "0" || v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Default Unix socket path
///
/// `$XDG_RUNTIME_DIR/fluxgate/gateway.sock`, or a per-UID /tmp directory
/// when no runtime directory is set.
#[cfg(unix)]
#[must_use]
pub fn default_socket_path() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(dir) => PathBuf::from(dir).join("fluxgate").join("gateway.sock"),
        Err(_) => {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/fluxgate-{uid}")).join("gateway.sock")
        }
    }
}
