//! Client side of the Unix socket transport
//!
//! Connects to a gateway daemon's socket and
//! splits the stream into an inbound pump (frames to decoded events) and an
//! outbound pump (queued events to frames).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::protocol::{ClientEvent, ServerEvent};
use crate::transport::frame::{encode, FrameDecoder};
use crate::transport::traits::{ClientTransport, TransportError};

/// Queue depth between the pumps and the caller, each direction
const EVENT_QUEUE_DEPTH: usize = 64;

/// Socket read chunk size
const READ_CHUNK: usize = 8 * 1024;

/// Client-side Unix socket transport
pub struct UnixSocketClient {
    /// Path of the gateway's socket
    socket_path: PathBuf,
    /// Decoded gateway events, present while connected
    inbound: Option<mpsc::Receiver<ServerEvent>>,
    /// Outbound queue drained by the write pump
    events: Option<mpsc::Sender<ClientEvent>>,
    connected: Arc<AtomicBool>,
}

impl UnixSocketClient {
    /// Create a client for the socket at `socket_path`
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            inbound: None,
            events: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The socket path this client connects to
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Socket bytes to decoded gateway events, until the link dies
async fn pump_inbound(
    mut read: OwnedReadHalf,
    to_client: mpsc::Sender<ServerEvent>,
    link_up: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        let n = match read.read(&mut chunk).await {
            Ok(0) => break "closed by gateway",
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Socket read failed");
                break "read error";
            }
        };
        decoder.push(&chunk[..n]);
        if let Err(reason) = forward_decoded(&mut decoder, &to_client).await {
            break reason;
        }
    };

    link_up.store(false, Ordering::SeqCst);
    tracing::info!(reason, "Gateway link down");
}

/// Forward every frame currently decodable
///
/// An undecodable frame poisons the whole stream; the caller tears the link
/// down rather than resynchronize.
async fn forward_decoded(
    decoder: &mut FrameDecoder,
    to_client: &mpsc::Sender<ServerEvent>,
) -> Result<(), &'static str> {
    loop {
        let decoded = decoder.decode::<ServerEvent>().map_err(|e| {
            tracing::warn!(error = %e, "Undecodable frame from gateway");
            "decode error"
        })?;
        let Some(event) = decoded else {
            return Ok(());
        };
        if to_client.send(event).await.is_err() {
            return Err("receiver dropped");
        }
    }
}

/// Queued client events to socket frames, until the queue or socket closes
async fn pump_outbound(
    mut from_client: mpsc::Receiver<ClientEvent>,
    mut write: OwnedWriteHalf,
    link_up: Arc<AtomicBool>,
) {
    while let Some(event) = from_client.recv().await {
        let frame = match encode(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Could not encode outbound event");
                continue;
            }
        };
        if let Err(e) = write.write_all(&frame).await {
            tracing::warn!(error = %e, "Socket write failed");
            break;
        }
    }

    link_up.store(false, Ordering::SeqCst);
}

#[async_trait]
impl ClientTransport for UnixSocketClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState(
                "already connected".to_string(),
            ));
        }

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "failed to connect to {}: {e}",
                self.socket_path.display()
            ))
        })?;
        let (read_half, write_half) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        self.connected.store(true, Ordering::SeqCst);
        tokio::spawn(pump_inbound(
            read_half,
            inbound_tx,
            Arc::clone(&self.connected),
        ));
        tokio::spawn(pump_outbound(
            outbound_rx,
            write_half,
            Arc::clone(&self.connected),
        ));

        self.inbound = Some(inbound_rx);
        self.events = Some(outbound_tx);

        tracing::info!(path = %self.socket_path.display(), "Connected to gateway");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.inbound = None;
        self.events = None;
        Ok(())
    }

    async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState("not connected".to_string()));
        }
        match &self.events {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| TransportError::SendFailed("link closed".to_string())),
            None => Err(TransportError::InvalidState("not connected".to_string())),
        }
    }

    async fn recv(&mut self) -> Result<ServerEvent, TransportError> {
        match &mut self.inbound {
            Some(rx) => rx.recv().await.ok_or(TransportError::ConnectionClosed),
            None => Err(TransportError::InvalidState("not connected".to_string())),
        }
    }

    fn try_recv(&mut self) -> Option<ServerEvent> {
        self.inbound.as_mut()?.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
