//! Gateway Client
//!
//! Thin wrapper around a [`ClientTransport`] for applications talking to the
//! gateway. The client owns no business logic; its job is:
//! 1. Establish the link and run the connect handshake
//! 2. Apply the bounded reconnection budget when the link will not come up
//! 3. Translate application calls into wire events
//! 4. Answer liveness pings so callers never have to
//!
//! # Reconnection
//!
//! Connection establishment is an explicit state machine, not an open-ended
//! retry loop:
//!
//! ```text
//!   disconnected ──► connecting(1) ──► connecting(2) ──► ... ──► exhausted
//!                         │                 │
//!                         ▼                 ▼
//!                      connected         connected
//! ```
//!
//! Attempts are bounded by the transport config's `reconnect_attempts` with a
//! fixed delay between them. Once the budget is spent the client parks in
//! `Exhausted` and every operation fails fast until the caller decides to
//! spend a fresh budget with another `connect` call.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::protocol::{
    Artifact, ClientEvent, ConnectionId, HistoryTurn, RequestId, ServerEvent, PROTOCOL_VERSION,
};
use crate::transport::{ClientTransport, TransportConfig, TransportError};

/// Connection state of the client link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No link; `connect` has not been called or the link dropped
    Disconnected,
    /// A connection attempt is in flight
    Connecting {
        /// Which attempt out of the configured budget, starting at 1
        attempt: u32,
    },
    /// Link up, handshake acknowledged
    Connected,
    /// The reconnection budget is spent; operations fail until `connect`
    Exhausted,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Connected => write!(f, "connected"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Client for one gateway link
///
/// Generic over the transport, so the same code talks to an in-process
/// gateway and a unix-socket daemon.
pub struct GatewayClient<T: ClientTransport> {
    transport: T,
    config: TransportConfig,
    state: LinkState,
    connection_id: Option<ConnectionId>,
}

impl<T: ClientTransport> GatewayClient<T> {
    /// Create a client over a transport
    #[must_use]
    pub fn new(transport: T, config: TransportConfig) -> Self {
        Self {
            transport,
            config,
            state: LinkState::Disconnected,
            connection_id: None,
        }
    }

    /// Current link state
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// The server-assigned connection ID, once connected
    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    /// Whether the link is up and handshaked
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.transport.is_connected()
    }

    /// Connect and handshake, spending the reconnection budget if needed
    ///
    /// Connectivity failures are retried with a fixed delay until the budget
    /// (`reconnect_attempts`, minimum one try) is spent, then surface as
    /// [`ClientError::ConnectivityExhausted`]. A gateway refusal (wrong
    /// protocol version) is not a connectivity failure and aborts
    /// immediately without further attempts.
    pub async fn connect(&mut self, client_name: &str) -> Result<ConnectionId, ClientError> {
        if self.state == LinkState::Connected {
            return Err(TransportError::InvalidState("already connected".to_string()).into());
        }

        let budget = self.config.reconnect_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.state = LinkState::Connecting { attempt };
            match self.try_connect(client_name).await {
                Ok(connection_id) => {
                    self.state = LinkState::Connected;
                    self.connection_id = Some(connection_id.clone());
                    info!(connection_id = %connection_id, "Connected to gateway");
                    return Ok(connection_id);
                }
                Err(error @ ClientError::Gateway { .. }) => {
                    let _ = self.transport.disconnect().await;
                    self.state = LinkState::Disconnected;
                    return Err(error);
                }
                Err(error) => {
                    warn!(attempt, budget, error = %error, "Connection attempt failed");
                    let _ = self.transport.disconnect().await;
                    if attempt >= budget {
                        self.state = LinkState::Exhausted;
                        return Err(ClientError::ConnectivityExhausted { attempts: attempt });
                    }
                    attempt += 1;
                    tokio::time::sleep(self.config.reconnect_delay()).await;
                }
            }
        }
    }

    /// One connection attempt: transport connect, then the wire handshake
    async fn try_connect(&mut self, client_name: &str) -> Result<ConnectionId, ClientError> {
        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, self.transport.connect())
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        self.transport
            .send(ClientEvent::Connect {
                client_name: client_name.to_string(),
                protocol_version: PROTOCOL_VERSION,
            })
            .await?;

        let ack = tokio::time::timeout(timeout, self.transport.recv())
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        match ack {
            ServerEvent::ConnectAck {
                connection_id,
                protocol_version,
            } => {
                debug!(
                    connection_id = %connection_id,
                    server_version = protocol_version,
                    "Handshake acknowledged"
                );
                Ok(connection_id)
            }
            // A pre-admission error event is the gateway refusing the
            // handshake, version mismatch being the usual reason.
            ServerEvent::ChatError { kind, message, .. } => {
                Err(ClientError::Gateway { kind, message })
            }
            other => Err(TransportError::InvalidState(format!(
                "expected connect-ack, got {other:?}"
            ))
            .into()),
        }
    }

    /// Tear the link down, telling the gateway first when possible
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        if self.transport.is_connected() {
            let _ = self.transport.send(ClientEvent::Disconnect).await;
            self.transport.disconnect().await?;
        }
        self.state = LinkState::Disconnected;
        self.connection_id = None;
        Ok(())
    }

    /// Start a streaming chat request
    ///
    /// Fragments and the terminal outcome arrive via [`next_event`].
    ///
    /// [`next_event`]: Self::next_event
    pub async fn send_chat(
        &self,
        message: impl Into<String>,
        history: Vec<HistoryTurn>,
        options: HashMap<String, String>,
    ) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.transport
            .send(ClientEvent::ChatRequest {
                message: message.into(),
                history,
                options,
            })
            .await?;
        Ok(())
    }

    /// Start a media-generation request
    pub async fn send_image(
        &self,
        prompt: impl Into<String>,
        options: HashMap<String, String>,
    ) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.transport
            .send(ClientEvent::ImageRequest {
                prompt: prompt.into(),
                options,
            })
            .await?;
        Ok(())
    }

    /// Ask the gateway to cancel an in-flight request
    pub async fn cancel(&self, request_id: RequestId) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.transport
            .send(ClientEvent::CancelRequest { request_id })
            .await?;
        Ok(())
    }

    /// The next server event for this connection
    ///
    /// Pings are answered internally and never surfaced. A server-initiated
    /// disconnect is surfaced after the state flips to
    /// [`LinkState::Disconnected`], so callers see it exactly once.
    pub async fn next_event(&mut self) -> Result<ServerEvent, ClientError> {
        self.ensure_connected()?;
        loop {
            let event = match self.transport.recv().await {
                Ok(event) => event,
                Err(error) => {
                    self.state = LinkState::Disconnected;
                    self.connection_id = None;
                    return Err(error.into());
                }
            };

            match event {
                ServerEvent::Ping { seq } => {
                    if let Err(error) = self.transport.send(ClientEvent::Pong { seq }).await {
                        warn!(error = %error, "Failed to answer ping");
                    }
                }
                ServerEvent::Disconnect => {
                    debug!("Server closed the session");
                    self.state = LinkState::Disconnected;
                    self.connection_id = None;
                    return Ok(ServerEvent::Disconnect);
                }
                other => return Ok(other),
            }
        }
    }

    /// Run a media request to completion under a hard wall-clock deadline
    ///
    /// Convenience wrapper: sends the request, consumes progress updates,
    /// and returns the artifact. When the deadline passes the request is
    /// treated as failed regardless of what the server may still send.
    pub async fn request_image(
        &mut self,
        prompt: impl Into<String>,
        options: HashMap<String, String>,
        deadline: Duration,
    ) -> Result<Artifact, ClientError> {
        self.send_image(prompt, options).await?;

        let wait = async {
            loop {
                match self.next_event().await? {
                    ServerEvent::ImageComplete { artifact, .. } => return Ok(artifact),
                    ServerEvent::ImageError { kind, message, .. } => {
                        return Err(ClientError::Gateway { kind, message })
                    }
                    ServerEvent::ProgressFragment { stage, percent, .. } => {
                        debug!(stage = %stage, percent = ?percent, "Generation progress");
                    }
                    ServerEvent::Disconnect => return Err(ClientError::NotConnected),
                    other => {
                        debug!(event = ?other, "Ignoring unrelated event");
                    }
                }
            }
        };
        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| ClientError::Timeout(deadline))?
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::dispatch::{Dispatcher, DispatcherConfig};
    use crate::engine::{EchoEngine, EngineCatalog, EngineDescriptor, IMAGE_KIND};
    use crate::gateway::{Gateway, ShutdownHandle, ShutdownSignal};
    use crate::liveness::LivenessConfig;
    use crate::protocol::ErrorKind;
    use crate::registry::SessionRegistry;
    use crate::transport::{InProcessClient, InProcessConnector, InProcessServer};

    struct TestStack {
        connector: InProcessConnector,
        shutdown: ShutdownHandle,
        task: JoinHandle<Result<(), TransportError>>,
    }

    fn spawn_gateway(engine_delay: Duration, liveness: LivenessConfig) -> TestStack {
        let mut catalog = EngineCatalog::new();
        catalog.register(
            EngineDescriptor::chat("echo", Duration::from_secs(5)),
            Arc::new(EchoEngine::chat().with_delay(engine_delay)),
        );
        catalog.register(
            EngineDescriptor::image(IMAGE_KIND, Duration::from_secs(5)),
            Arc::new(EchoEngine::image().with_delay(engine_delay)),
        );
        let dispatcher = Dispatcher::new(
            SessionRegistry::new(),
            Arc::new(catalog),
            DispatcherConfig::for_testing(),
        );
        let gateway = Gateway::new(dispatcher, liveness);
        let server = InProcessServer::new();
        let connector = server.connector();
        let (shutdown, signal) = ShutdownSignal::new();
        let task = tokio::spawn(gateway.run(server, signal));
        TestStack {
            connector,
            shutdown,
            task,
        }
    }

    fn test_client(connector: &InProcessConnector) -> GatewayClient<InProcessClient> {
        GatewayClient::new(connector.client(), TransportConfig::for_testing())
    }

    async fn next_within(client: &mut GatewayClient<InProcessClient>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("client error while waiting for event")
    }

    #[tokio::test]
    async fn test_connect_reaches_connected_state() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::disabled());
        let mut client = test_client(&stack.connector);

        let connection_id = client.connect("test-app").await.unwrap();
        assert_eq!(client.state(), LinkState::Connected);
        assert_eq!(client.connection_id(), Some(&connection_id));
        assert!(client.is_connected());

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_exhausts_bounded_budget() {
        // A connector whose server is gone fails every attempt immediately.
        let connector = {
            let server = InProcessServer::new();
            server.connector()
        };
        let mut client = GatewayClient::new(connector.client(), TransportConfig::for_testing());

        let error = client.connect("test-app").await.unwrap_err();
        match error {
            ClientError::ConnectivityExhausted { attempts } => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(client.state(), LinkState::Exhausted);
        assert_eq!(
            ClientError::ConnectivityExhausted { attempts: 3 }.kind(),
            ErrorKind::ConnectivityExhausted
        );
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::disabled());
        let client = test_client(&stack.connector);

        let error = client
            .send_chat("hello", Vec::new(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::NotConnected));

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chat_stream_round_trip() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::disabled());
        let mut client = test_client(&stack.connector);
        client.connect("test-app").await.unwrap();

        client
            .send_chat("hi", Vec::new(), HashMap::new())
            .await
            .unwrap();

        let mut reply = String::new();
        loop {
            match next_within(&mut client).await {
                ServerEvent::TokenFragment { token, .. } => reply.push_str(&token),
                ServerEvent::ChatComplete { .. } => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(reply, "Hi");

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pings_are_answered_internally() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::for_testing());
        let mut client = test_client(&stack.connector);
        client.connect("test-app").await.unwrap();

        // Block in next_event well past the liveness death window; pings are
        // consumed and answered inside, so nothing surfaces and the session
        // survives.
        let pumped =
            tokio::time::timeout(Duration::from_millis(400), client.next_event()).await;
        assert!(pumped.is_err(), "no application event was expected");

        client
            .send_chat("still alive", Vec::new(), HashMap::new())
            .await
            .unwrap();
        loop {
            if let ServerEvent::ChatComplete { .. } = next_within(&mut client).await {
                break;
            }
        }

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_image_returns_artifact() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::disabled());
        let mut client = test_client(&stack.connector);
        client.connect("test-app").await.unwrap();

        let artifact = client
            .request_image("a lighthouse", HashMap::new(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(artifact.uri.starts_with("echo://"));
        assert_eq!(artifact.mime, "image/png");

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_image_deadline_expires() {
        let stack = spawn_gateway(Duration::from_millis(150), LivenessConfig::disabled());
        let mut client = test_client(&stack.connector);
        client.connect("test-app").await.unwrap();

        let error = client
            .request_image("slow render", HashMap::new(), Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::Timeout(_)));
        // The deadline is client-side; the link itself is still up.
        assert_eq!(client.state(), LinkState::Connected);

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_shutdown_surfaces_disconnect() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::disabled());
        let mut client = test_client(&stack.connector);
        client.connect("test-app").await.unwrap();

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();

        match client.next_event().await {
            Ok(ServerEvent::Disconnect) => {
                assert_eq!(client.state(), LinkState::Disconnected);
            }
            // The link may close before the disconnect event is read.
            Err(ClientError::Transport(_)) => {
                assert_eq!(client.state(), LinkState::Disconnected);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let error = client.next_event().await.unwrap_err();
        assert!(matches!(error, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_explicit_disconnect_resets_state() {
        let stack = spawn_gateway(Duration::ZERO, LivenessConfig::disabled());
        let mut client = test_client(&stack.connector);
        client.connect("test-app").await.unwrap();

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), LinkState::Disconnected);
        assert_eq!(client.connection_id(), None);

        let error = client
            .send_chat("anyone there", Vec::new(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(error, ClientError::NotConnected));

        stack.shutdown.shutdown();
        stack.task.await.unwrap().unwrap();
    }
}
