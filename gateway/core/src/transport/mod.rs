//! Transport Layer
//!
//! Moves [`ClientEvent`](crate::protocol::ClientEvent)s and
//! [`ServerEvent`](crate::protocol::ServerEvent)s between a client and the
//! gateway:
//! - `InProcess`: channel pairs for embedding the gateway in the client
//! - `UnixSocket`: local IPC through the frame codec
//!
//! The mechanism lives below the traits. The gateway loop and the client
//! library are written against [`ServerTransport`] and [`ClientTransport`]
//! and run unchanged over channels or sockets; tests use the in-process
//! transport, the daemon uses the socket one.
//!
//! Socket transport security: the socket file is chmodded to 0600, the
//! peer's UID is checked through `SO_PEERCRED` on Linux, and nothing ever
//! listens on a network address.

pub mod config;
pub mod frame;
pub mod in_process;
pub mod traits;
#[cfg(unix)]
pub mod unix_socket;

pub use config::{TransportConfig, TransportKind};
pub use frame::{FrameDecoder, FrameEncoder, HEADER_SIZE, MAX_FRAME_SIZE};
pub use in_process::{InProcessClient, InProcessConnector, InProcessServer};
pub use traits::{ClientTransport, ServerTransport, TransportError};

#[cfg(unix)]
pub use unix_socket::{UnixSocketClient, UnixSocketServer};
