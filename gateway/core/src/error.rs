//! Error Types
//!
//! Typed errors for the dispatch path and the client library. Transport-level
//! failures live with the transport traits (see
//! [`crate::transport::TransportError`]); this module covers everything above
//! the wire.
//!
//! Every error that reaches a client is first collapsed to its stable
//! [`ErrorKind`] classification; wire events never leak internal `Debug`
//! strings or type names.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{ConnectionId, ErrorKind, RequestId};
use crate::transport::TransportError;

/// Errors produced while admitting or running a request
///
/// `Validation`, `Busy` and `UnknownEngine` are admission failures: they are
/// surfaced synchronously and no request is created. `EngineFailure` and
/// `Timeout` are terminal stream outcomes. None of these are retried by the
/// dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed or unsupported request payload
    #[error("invalid request: {0}")]
    Validation(String),

    /// The session already has an active request
    #[error("session busy with active request {active}")]
    Busy {
        /// The request currently holding the slot
        active: RequestId,
    },

    /// The requested engine kind is not in the descriptor table
    #[error("unknown engine kind \"{0}\"")]
    UnknownEngine(String),

    /// No session is open for the connection
    #[error("no open session for {0}")]
    SessionNotFound(ConnectionId),

    /// The engine reported an error or failed to start
    #[error("engine failure: {0}")]
    EngineFailure(String),

    /// The request deadline elapsed before a terminal marker arrived
    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),
}

impl DispatchError {
    /// Stable wire classification for this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::SessionNotFound(_) => ErrorKind::Validation,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::UnknownEngine(_) => ErrorKind::UnknownEngine,
            Self::EngineFailure(_) => ErrorKind::EngineFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Errors surfaced by the client library
#[derive(Debug, Error)]
pub enum ClientError {
    /// The bounded reconnection budget is spent; the link stays down
    #[error("connectivity exhausted after {attempts} attempts")]
    ConnectivityExhausted {
        /// How many connection attempts were made
        attempts: u32,
    },

    /// Operation requires a connected link
    #[error("not connected")]
    NotConnected,

    /// Client-side wall-clock deadline elapsed with no server response
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The gateway answered with a terminal error event
    #[error("gateway error ({kind}): {message}")]
    Gateway {
        /// Stable classification from the wire event
        kind: ErrorKind,
        /// Human-readable detail from the wire event
        message: String,
    },
}

impl ClientError {
    /// Stable wire classification for this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectivityExhausted { .. } => ErrorKind::ConnectivityExhausted,
            Self::NotConnected | Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Gateway { kind, .. } => *kind,
        }
    }
}
