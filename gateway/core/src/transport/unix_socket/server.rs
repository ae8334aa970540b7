//! Gateway side of the Unix socket transport
//!
//! Owns the socket file, accepts client connections, and runs an inbound
//! and an outbound pump per connection.
//!
//! A frame decode error is unrecoverable: once the byte stream desyncs there
//! is no way to find the next frame boundary, so the inbound pump drops the
//! connection instead of guessing.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::protocol::{ClientEvent, ConnectionId, ServerEvent};
use crate::transport::frame::{encode, FrameDecoder};
use crate::transport::traits::{ServerTransport, TransportError};

/// Per-connection queue depth, each direction
const EVENT_QUEUE_DEPTH: usize = 64;

/// Socket read chunk size
const READ_CHUNK: usize = 8 * 1024;

/// Outbound senders for the live connections, keyed by connection ID
type LinkMap = Arc<DashMap<ConnectionId, mpsc::Sender<ServerEvent>>>;

/// Gateway-side Unix socket transport
///
/// Accepts connections from local clients and multiplexes outbound events
/// by connection ID.
pub struct UnixSocketServer {
    /// Path of the socket file this server owns
    socket_path: PathBuf,
    /// Bound listener, present after `listen`
    listener: Option<UnixListener>,
    links: LinkMap,
}

impl UnixSocketServer {
    /// Create a server that will bind `socket_path`
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
            links: Arc::new(DashMap::new()),
        }
    }

    /// The socket path this server binds
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn restrict_socket_permissions(&self) -> Result<(), TransportError> {
        let owner_only = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.socket_path, owner_only)?;
        Ok(())
    }

    fn prepare_socket_path(&self) -> Result<(), TransportError> {
        if let Some(parent) = self.socket_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(socket_fs_error("create", parent, &e));
            }
        }

        // A stale socket file from a previous run blocks bind.
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                return Err(socket_fs_error("remove stale", &self.socket_path, &e));
            }
        }
        Ok(())
    }

    fn remove_socket_file(&self) {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).ok();
        }
    }

    /// Reject peers running as a different user
    ///
    /// `SO_PEERCRED` is Linux-only; elsewhere the 0600 socket mode is the
    /// whole access control story.
    #[cfg(target_os = "linux")]
    fn validate_peer(stream: &UnixStream) -> Result<(), TransportError> {
        use std::os::unix::io::AsRawFd;

        let fd = stream.as_raw_fd();

        let cred = unsafe {
            let mut cred: libc::ucred = std::mem::zeroed();
            let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

            let result = libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                std::ptr::addr_of_mut!(cred).cast::<libc::c_void>(),
                &mut len,
            );

            if result < 0 {
                return Err(TransportError::PeerRejected(
                    "failed to read peer credentials".to_string(),
                ));
            }
            cred
        };

        let own_uid = unsafe { libc::getuid() };
        if cred.uid != own_uid {
            tracing::warn!(peer_uid = cred.uid, own_uid, "Peer UID mismatch, refusing");
            return Err(TransportError::PeerRejected(format!(
                "peer UID {} does not match gateway UID {own_uid}",
                cred.uid
            )));
        }

        tracing::debug!(peer_uid = cred.uid, peer_pid = cred.pid, "Peer credentials accepted");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn validate_peer(_stream: &UnixStream) -> Result<(), TransportError> {
        tracing::debug!("Peer validation skipped (no SO_PEERCRED on this platform)");
        Ok(())
    }
}

fn socket_fs_error(action: &str, path: &Path, e: &std::io::Error) -> TransportError {
    TransportError::Io(std::io::Error::new(
        e.kind(),
        format!("cannot {action} {}: {e}", path.display()),
    ))
}

/// Socket bytes to decoded client events, until the connection dies
///
/// Removes the connection from the link map on exit; dropping the inbound
/// sender is what tells the gateway this client is gone.
async fn pump_client_events(
    mut read: OwnedReadHalf,
    to_gateway: mpsc::Sender<ClientEvent>,
    connection_id: ConnectionId,
    links: LinkMap,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = 'conn: loop {
        let n = match read.read(&mut chunk).await {
            Ok(0) => break "closed by peer",
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Socket read failed");
                break "read error";
            }
        };
        decoder.push(&chunk[..n]);

        loop {
            match decoder.decode::<ClientEvent>() {
                Ok(Some(event)) => {
                    if to_gateway.send(event).await.is_err() {
                        break 'conn "gateway handler gone";
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Undecodable frame, dropping connection"
                    );
                    break 'conn "decode error";
                }
            }
        }
    };

    links.remove(&connection_id);
    tracing::info!(connection_id = %connection_id, reason, "Connection ended");
}

/// Queued server events to socket frames, until the queue or socket closes
async fn pump_server_events(
    mut outbound: mpsc::Receiver<ServerEvent>,
    mut write: OwnedWriteHalf,
    connection_id: ConnectionId,
) {
    while let Some(event) = outbound.recv().await {
        let frame = match encode(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Could not encode outbound event"
                );
                continue;
            }
        };
        if let Err(e) = write.write_all(&frame).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Socket write failed");
            break;
        }
    }
}

#[async_trait]
impl ServerTransport for UnixSocketServer {
    async fn listen(&mut self) -> Result<(), TransportError> {
        self.prepare_socket_path()?;

        let listener = UnixListener::bind(&self.socket_path)?;
        self.restrict_socket_permissions()?;
        self.listener = Some(listener);

        tracing::info!(path = %self.socket_path.display(), "Gateway listening on Unix socket");
        Ok(())
    }

    async fn accept(
        &self,
    ) -> Result<(ConnectionId, mpsc::Receiver<ClientEvent>), TransportError> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(TransportError::InvalidState("not listening".to_string()));
        };

        let (stream, _) = listener.accept().await?;
        Self::validate_peer(&stream)?;

        let connection_id = ConnectionId::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(pump_client_events(
            read_half,
            inbound_tx,
            connection_id.clone(),
            Arc::clone(&self.links),
        ));
        tokio::spawn(pump_server_events(
            outbound_rx,
            write_half,
            connection_id.clone(),
        ));

        self.links.insert(connection_id.clone(), outbound_tx);
        tracing::info!(connection_id = %connection_id, "Client connected");

        Ok((connection_id, inbound_rx))
    }

    async fn send_to(
        &self,
        connection_id: &ConnectionId,
        event: ServerEvent,
    ) -> Result<(), TransportError> {
        let tx = match self.links.get(connection_id) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(TransportError::SendFailed(format!(
                    "unknown connection: {connection_id}"
                )))
            }
        };
        tx.send(event)
            .await
            .map_err(|_| TransportError::SendFailed("link closed".to_string()))
    }

    async fn disconnect(&self, connection_id: &ConnectionId) -> Result<(), TransportError> {
        // Dropping the sender ends the outbound pump; the peer sees EOF.
        self.links.remove(connection_id);
        tracing::info!(connection_id = %connection_id, "Disconnected");
        Ok(())
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.links.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        // The listener itself closes when the server value drops; removing
        // the socket file is enough to stop new clients finding it.
        self.links.clear();
        self.remove_socket_file();

        tracing::info!("Socket transport shut down");
        Ok(())
    }
}

impl Drop for UnixSocketServer {
    fn drop(&mut self) {
        self.remove_socket_file();
    }
}
