//! Unix domain socket transport
//!
//! The daemonized gateway owns a socket at
//! `$XDG_RUNTIME_DIR/fluxgate/gateway.sock` (per-UID /tmp fallback);
//! clients connect to it and speak the frame codec. The socket file is
//! chmodded to 0600 and each accepted peer's UID must match the daemon's,
//! checked through `SO_PEERCRED` on Linux.

mod client;
mod server;

pub use client::UnixSocketClient;
pub use server::UnixSocketServer;

pub use super::config::default_socket_path;
