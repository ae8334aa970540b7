//! Transport Traits
//!
//! The two sides of a gateway connection:
//! - [`ClientTransport`]: client side, one link to the gateway
//! - [`ServerTransport`]: gateway side, many concurrent client links
//!
//! Implementations own the mechanism (channels, sockets); everything above
//! them speaks [`ClientEvent`] and [`ServerEvent`] and never sees bytes.
//! The connection ID a server assigns at accept is the same one the gateway
//! later echoes in its connect acknowledgement.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{ClientEvent, ConnectionId, ServerEvent};

/// Errors surfaced by transport implementations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Establishing the connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// An outbound event could not be delivered
    #[error("send failed: {0}")]
    SendFailed(String),

    /// An inbound event could not be read
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Event serialization or frame parsing failed
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer did not pass credential checks
    #[error("peer rejected: {0}")]
    PeerRejected(String),

    /// IO error from the underlying mechanism
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted in the wrong state
    #[error("invalid transport state: {0}")]
    InvalidState(String),

    /// Frame checksum mismatch, the byte stream is corrupt
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame header
        expected: u32,
        /// Checksum computed over the received payload
        actual: u32,
    },
}

/// Client side of a gateway link
///
/// One instance, one connection. `send` takes `&self` so a connected
/// transport can be shared behind an `Arc` while a separate task drains
/// `recv`.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Establish the connection
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send an event to the gateway
    async fn send(&self, event: ClientEvent) -> Result<(), TransportError>;

    /// Receive the next gateway event, waiting until one arrives
    async fn recv(&mut self) -> Result<ServerEvent, TransportError>;

    /// Receive a gateway event if one is already buffered
    fn try_recv(&mut self) -> Option<ServerEvent>;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;
}

/// Gateway side of the transport
///
/// Accepts client links and multiplexes outbound events by connection ID.
/// Everything after `listen` takes `&self`, so one accept loop and many
/// per-connection tasks can share the server behind an `Arc`.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Start accepting connections
    async fn listen(&mut self) -> Result<(), TransportError>;

    /// Wait for the next client link
    ///
    /// Returns the assigned connection ID and the receiving end of that
    /// client's event stream. The stream yielding `None` means the client
    /// is gone. Single consumer: exactly one task calls `accept`, and it
    /// drops any in-flight accept future before calling `shutdown`.
    async fn accept(&self)
        -> Result<(ConnectionId, mpsc::Receiver<ClientEvent>), TransportError>;

    /// Send an event to one connected client
    async fn send_to(
        &self,
        connection_id: &ConnectionId,
        event: ServerEvent,
    ) -> Result<(), TransportError>;

    /// Drop one client link
    async fn disconnect(&self, connection_id: &ConnectionId) -> Result<(), TransportError>;

    /// IDs of all currently connected clients
    fn connections(&self) -> Vec<ConnectionId>;

    /// Stop taking new links and drop every existing one
    async fn shutdown(&self) -> Result<(), TransportError>;
}
