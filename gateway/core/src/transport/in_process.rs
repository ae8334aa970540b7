//! In-Process Transport
//!
//! Channel-backed transport for running the gateway inside the client
//! process. Events cross task boundaries as values; nothing is serialized
//! and no socket exists.
//!
//! # Usage
//!
//! ```ignore
//! let mut server = InProcessServer::new();
//! let connector = server.connector();
//!
//! // Gateway side
//! server.listen().await?;
//! tokio::spawn(async move { gateway.run(server).await });
//!
//! // Client side, any number of times
//! let mut client = connector.client();
//! client.connect().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use crate::protocol::{ClientEvent, ConnectionId, ServerEvent};

use super::traits::{ClientTransport, ServerTransport, TransportError};

/// Per-link channel capacity, each direction
const LINK_CAPACITY: usize = 100;

/// Queue depth for clients waiting to be accepted
const ACCEPT_BACKLOG: usize = 16;

/// A connected client waiting in the server's accept queue
struct PendingLink {
    inbound: mpsc::Receiver<ClientEvent>,
    outbound: mpsc::Sender<ServerEvent>,
}

/// Cloneable handle for opening client links to an [`InProcessServer`]
///
/// Obtained from [`InProcessServer::connector`] before the server is moved
/// into its accept loop.
#[derive(Clone)]
pub struct InProcessConnector {
    pending_tx: mpsc::Sender<PendingLink>,
}

impl InProcessConnector {
    /// Create a client wired to this connector's server
    #[must_use]
    pub fn client(&self) -> InProcessClient {
        InProcessClient {
            connector: self.clone(),
            events: None,
            inbound: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Gateway-side in-process transport
///
/// Accepts any number of [`InProcessClient`] links created through the
/// server's connector.
pub struct InProcessServer {
    /// Accept queue; locked only by the single accepting task
    pending_rx: Mutex<mpsc::Receiver<PendingLink>>,
    connector: InProcessConnector,
    links: Arc<DashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    listening: AtomicBool,
}

impl Default for InProcessServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessServer {
    /// Create a server with an empty accept queue
    #[must_use]
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = mpsc::channel(ACCEPT_BACKLOG);
        Self {
            pending_rx: Mutex::new(pending_rx),
            connector: InProcessConnector { pending_tx },
            links: Arc::new(DashMap::new()),
            listening: AtomicBool::new(false),
        }
    }

    /// Handle for creating clients of this server
    #[must_use]
    pub fn connector(&self) -> InProcessConnector {
        self.connector.clone()
    }
}

#[async_trait]
impl ServerTransport for InProcessServer {
    async fn listen(&mut self) -> Result<(), TransportError> {
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn accept(
        &self,
    ) -> Result<(ConnectionId, mpsc::Receiver<ClientEvent>), TransportError> {
        if !self.listening.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState("not listening".to_string()));
        }

        let link = self
            .pending_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)?;

        let connection_id = ConnectionId::new();
        self.links.insert(connection_id.clone(), link.outbound);
        tracing::debug!(connection_id = %connection_id, "In-process client accepted");

        Ok((connection_id, link.inbound))
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
        // Dropping the sender closes the client's receive side.
        self.links.remove(connection_id);
        Ok(())
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.links.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.listening.store(false, Ordering::SeqCst);
        self.pending_rx.lock().await.close();
        self.links.clear();
        Ok(())
    }
}

/// Client-side in-process transport
pub struct InProcessClient {
    connector: InProcessConnector,
    events: Option<mpsc::Sender<ClientEvent>>,
    inbound: Option<mpsc::Receiver<ServerEvent>>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl ClientTransport for InProcessClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState(
                "already connected".to_string(),
            ));
        }

        let (event_tx, event_rx) = mpsc::channel(LINK_CAPACITY);
        let (msg_tx, msg_rx) = mpsc::channel(LINK_CAPACITY);

        self.connector
            .pending_tx
            .send(PendingLink {
                inbound: event_rx,
                outbound: msg_tx,
            })
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed("gateway is not accepting links".to_string())
            })?;

        self.events = Some(event_tx);
        self.inbound = Some(msg_rx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.events = None;
        self.inbound = None;
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
            Some(rx) => match rx.recv().await {
                Some(event) => Ok(event),
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    Err(TransportError::ConnectionClosed)
                }
            },
            None => Err(TransportError::InvalidState("not connected".to_string())),
        }
    }

    fn try_recv(&mut self) -> Option<ServerEvent> {
        use tokio::sync::mpsc::error::TryRecvError;

        match self.inbound.as_mut()?.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.connected.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    fn connect_event() -> ClientEvent {
        ClientEvent::Connect {
            client_name: "test".to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    #[tokio::test]
    async fn test_roundtrip_through_pair() {
        let mut server = InProcessServer::new();
        let connector = server.connector();
        server.listen().await.unwrap();

        let mut client = connector.client();
        client.connect().await.unwrap();
        assert!(client.is_connected());

        let (connection_id, mut inbound) = server.accept().await.unwrap();

        client.send(connect_event()).await.unwrap();
        let received = inbound.recv().await.unwrap();
        assert!(matches!(received, ClientEvent::Connect { .. }));

        server
            .send_to(
                &connection_id,
                ServerEvent::ConnectAck {
                    connection_id: connection_id.clone(),
                    protocol_version: PROTOCOL_VERSION,
                },
            )
            .await
            .unwrap();

        let ack = client.recv().await.unwrap();
        assert!(matches!(ack, ServerEvent::ConnectAck { .. }));
    }

    #[tokio::test]
    async fn test_two_clients_routed_independently() {
        let mut server = InProcessServer::new();
        let connector = server.connector();
        server.listen().await.unwrap();

        let mut first = connector.client();
        first.connect().await.unwrap();
        let (first_id, _first_rx) = server.accept().await.unwrap();

        let mut second = connector.client();
        second.connect().await.unwrap();
        let (second_id, _second_rx) = server.accept().await.unwrap();

        assert_ne!(first_id, second_id);

        server
            .send_to(&second_id, ServerEvent::Ping { seq: 2 })
            .await
            .unwrap();

        // Only the second client sees the ping.
        let event = second.recv().await.unwrap();
        assert!(matches!(event, ServerEvent::Ping { seq: 2 }));
        assert!(first.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_accept_requires_listen() {
        let server = InProcessServer::new();
        let result = server.accept().await;
        assert!(matches!(result, Err(TransportError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_clients() {
        let mut server = InProcessServer::new();
        let connector = server.connector();
        server.listen().await.unwrap();
        server.shutdown().await.unwrap();

        let mut client = connector.client();
        let result = client.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_after_server_dropped() {
        let server = InProcessServer::new();
        let connector = server.connector();
        drop(server);

        let mut client = connector.client();
        let result = client.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_invalid_state() {
        let server = InProcessServer::new();
        let client = server.connector().client();

        let result = client.send(connect_event()).await;
        assert!(matches!(result, Err(TransportError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_server_disconnect_closes_client_side() {
        let mut server = InProcessServer::new();
        let connector = server.connector();
        server.listen().await.unwrap();

        let mut client = connector.client();
        client.connect().await.unwrap();
        let (connection_id, _inbound) = server.accept().await.unwrap();

        server.disconnect(&connection_id).await.unwrap();

        let result = client.recv().await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(!client.is_connected());

        // Sending to the removed link now fails.
        let result = server
            .send_to(&connection_id, ServerEvent::Ping { seq: 1 })
            .await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
    }
}
