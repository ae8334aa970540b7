//! Wire Protocol
//!
//! The bidirectional event taxonomy exchanged between clients and the gateway
//! over a persistent connection. Inbound [`ClientEvent`]s are translated into
//! registry/dispatcher calls; outbound [`ServerEvent`]s carry ordered stream
//! fragments and terminal outcomes back to the client.
//!
//! # Design Philosophy
//!
//! The gateway is the "brain" that owns sessions, request lifecycles, and
//! engine dispatch. Clients are thin: they emit requests and render the event
//! stream they are sent. This separation enables:
//!
//! - Interchangeable client front ends over the same wire contract
//! - Multiple simultaneous connections, each with an isolated session
//! - Headless operation for testing and automation
//!
//! # Wire Encoding
//!
//! Events serialize as JSON objects tagged with an `event` field. Event names
//! are kebab-case (`chat-request`, `token-fragment`), payload fields are
//! camelCase (`requestId`), so the wire reads the same from any client
//! language. On byte-stream transports each JSON payload rides inside a
//! CRC-checked frame (see [`crate::transport::frame`]).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire protocol version, checked during the connect handshake.
///
/// Bumped on any incompatible change to the event taxonomy. A client
/// presenting a different version is rejected with a validation error before a
/// session is opened.
pub const PROTOCOL_VERSION: u32 = 1;

/// Connection identifier
///
/// Assigned by the server when a transport-level link is accepted and echoed
/// back in `connect-ack`. Unique across the life of the process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn-{}", Uuid::new_v4()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request identifier
///
/// Created by the dispatcher when a chat or media request is admitted. Every
/// outbound fragment and terminal event for the request carries it, so a
/// client can correlate an interleaved event stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new unique request ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("req-{}", Uuid::new_v4()))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a history entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Client input
    User,
    /// Engine output
    Assistant,
    /// Instruction context supplied by the client
    System,
}

/// One prior exchange carried in a chat request's history snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// Who authored the turn
    pub role: Role,
    /// The turn's text
    pub text: String,
}

/// Reference to a generated media artifact
///
/// Media completions carry a reference, never the payload bytes; fetching the
/// artifact is outside the streaming protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the artifact can be retrieved
    pub uri: String,
    /// Media type of the artifact (e.g. `image/png`)
    pub mime: String,
}

/// Stable error classification carried on wire error events
///
/// Clients branch on the kind, not on message text. The set is closed: new
/// kinds require a protocol version bump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed or unsupported request; rejected before any engine ran
    Validation,
    /// The session already has an active request
    Busy,
    /// Requested engine kind is not in the descriptor table
    UnknownEngine,
    /// The engine reported an error mid-stream
    EngineFailure,
    /// The request deadline elapsed before a terminal marker arrived
    Timeout,
    /// The transport link failed
    Transport,
    /// Client-side: the reconnection budget is spent
    ConnectivityExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Busy => "busy",
            Self::UnknownEngine => "unknown-engine",
            Self::EngineFailure => "engine-failure",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::ConnectivityExhausted => "connectivity-exhausted",
        };
        write!(f, "{s}")
    }
}

/// Events from client to gateway
///
/// Everything a client can ask of the gateway. Each variant maps to one wire
/// event name in kebab-case.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    // ============================================
    // Connection lifecycle
    // ============================================
    /// Establish the logical connection and open a session
    Connect {
        /// Free-form client identification for logs
        client_name: String,
        /// Client's wire protocol version; must match [`PROTOCOL_VERSION`]
        protocol_version: u32,
    },

    /// Tear down the connection and its session
    Disconnect,

    /// Liveness reply to a server `ping`
    Pong {
        /// Sequence number echoed from the ping
        seq: u64,
    },

    // ============================================
    // Requests
    // ============================================
    /// Start a streaming chat request
    ChatRequest {
        /// The user's message
        message: String,
        /// Prior exchanges to use as context
        #[serde(default)]
        history: Vec<HistoryTurn>,
        /// Request options (engine selection, sampling knobs, ...)
        #[serde(default)]
        options: HashMap<String, String>,
    },

    /// Start a media-generation request (engine kind = image)
    ImageRequest {
        /// The generation prompt
        prompt: String,
        /// Request options
        #[serde(default)]
        options: HashMap<String, String>,
    },

    /// Cancel the named in-flight request
    CancelRequest {
        /// The request to cancel
        request_id: RequestId,
    },
}

impl ClientEvent {
    /// Option key naming the engine kind a request should run on
    ///
    /// Absent key means the catalog's default kind.
    pub const ENGINE_OPTION: &'static str = "engine";
}

/// Events from gateway to client
///
/// Fragments and terminal outcomes are tagged with the request ID they belong
/// to; ordering within one request is guaranteed by the per-connection writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    // ============================================
    // Connection lifecycle
    // ============================================
    /// Handshake acknowledgement: the session is open
    ConnectAck {
        /// Server-assigned connection ID
        connection_id: ConnectionId,
        /// Server's wire protocol version
        protocol_version: u32,
    },

    /// Server-initiated teardown
    Disconnect,

    /// Liveness probe; client must answer with `pong`
    Ping {
        /// Sequence number the client echoes back
        seq: u64,
    },

    // ============================================
    // Streamed fragments
    // ============================================
    /// One ordered chat token
    TokenFragment {
        /// Request this token belongs to
        request_id: RequestId,
        /// The token text
        token: String,
    },

    /// One ordered media progress update
    ProgressFragment {
        /// Request this update belongs to
        request_id: RequestId,
        /// Human-readable generation stage
        stage: String,
        /// Completion estimate, 0-100 when known
        percent: Option<u8>,
    },

    // ============================================
    // Terminal outcomes
    // ============================================
    /// Chat request finished successfully
    ChatComplete {
        /// The completed request
        request_id: RequestId,
    },

    /// Chat request failed
    ChatError {
        /// The failed request; absent when rejected before admission
        request_id: Option<RequestId>,
        /// Stable classification
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },

    /// Media request finished successfully
    ImageComplete {
        /// The completed request
        request_id: RequestId,
        /// Reference to the generated artifact
        artifact: Artifact,
    },

    /// Media request failed
    ImageError {
        /// The failed request; absent when rejected before admission
        request_id: Option<RequestId>,
        /// Stable classification
        kind: ErrorKind,
        /// Human-readable detail
        message: String,
    },

    /// Cancellation acknowledgement
    ///
    /// Confirms a client `cancel-request`; no fragment for this request ID
    /// follows this event.
    RequestCancelled {
        /// The cancelled request
        request_id: RequestId,
    },
}

impl ServerEvent {
    /// The request ID this event is tagged with, if any
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::TokenFragment { request_id, .. }
            | Self::ProgressFragment { request_id, .. }
            | Self::ChatComplete { request_id }
            | Self::ImageComplete { request_id, .. }
            | Self::RequestCancelled { request_id } => Some(request_id),
            Self::ChatError { request_id, .. } | Self::ImageError { request_id, .. } => {
                request_id.as_ref()
            }
            Self::ConnectAck { .. } | Self::Disconnect | Self::Ping { .. } => None,
        }
    }

    /// Whether this event ends a request's event stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ChatComplete { .. }
                | Self::ChatError { .. }
                | Self::ImageComplete { .. }
                | Self::ImageError { .. }
                | Self::RequestCancelled { .. }
        )
    }
}
