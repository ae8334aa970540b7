//! Gateway Server Loop
//!
//! Accepts transport links, upgrades each into a session through the connect
//! handshake, and runs one handler task per connection until the link drops,
//! the client disconnects, liveness declares the peer dead, or the gateway
//! shuts down.
//!
//! ```text
//!                        Gateway::run
//!                             │ accept
//!             ┌───────────────┼───────────────┐
//!             │               │               │
//!        handler task    handler task    handler task
//!        (conn-1)        (conn-2)        (conn-3)
//!             │               │               │
//!             └───────────────┴───────────────┘
//!                             │ dispatch
//!                        Dispatcher
//!                     (SessionRegistry)
//! ```
//!
//! # Ordered Delivery
//!
//! Each handler task is the only writer for its connection. Relayed request
//! events funnel through one outbound queue drained by the handler, and
//! everything the handler emits itself (acks, pings, admission refusals) is
//! written from the same task. No two events for one connection are ever in
//! flight concurrently, so the order fragments enter the queue is the order
//! the client observes them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::dispatch::Dispatcher;
use crate::liveness::{LinkLiveness, LivenessConfig, LivenessTick};
use crate::protocol::{ClientEvent, ConnectionId, ErrorKind, ServerEvent, PROTOCOL_VERSION};
use crate::registry::SessionRegistry;
use crate::transport::{ServerTransport, TransportError};

/// Handle that stops a running gateway
///
/// Cheap to clone; any clone can trigger shutdown, and triggering twice is
/// harmless.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request a graceful shutdown
    pub fn shutdown(&self) {
        // No receiver just means the gateway already stopped.
        let _ = self.tx.send(true);
    }
}

/// Awaitable side of the shutdown pair, passed into [`Gateway::run`]
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a linked handle/signal pair
    #[must_use]
    pub fn new() -> (ShutdownHandle, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
    }

    /// Resolve once shutdown is requested
    ///
    /// Dropping every [`ShutdownHandle`] resolves this too: a gateway nobody
    /// can stop anymore should stop itself.
    pub async fn triggered(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

/// Runtime knobs for the server loop
#[derive(Clone, Debug)]
pub struct GatewaySettings {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Per-connection outbound event queue capacity
    pub outbound_capacity: usize,
    /// How long a fresh link may take to send `connect`
    pub handshake_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            outbound_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Handler-task bookkeeping, one entry per live connection
struct HandlerState {
    connected_at: Instant,
    /// Set right after spawning; `None` only in the window before that, or
    /// when the handler finished faster than the accept loop could store it
    abort_handle: Option<AbortHandle>,
}

/// The gateway server: accept loop plus per-connection handler tasks
///
/// Generic over [`ServerTransport`], so the same loop serves unix-socket
/// daemons and in-process embeddings.
pub struct Gateway {
    dispatcher: Dispatcher,
    liveness: LivenessConfig,
    settings: GatewaySettings,
}

impl Gateway {
    /// Create a gateway over a dispatcher
    #[must_use]
    pub fn new(dispatcher: Dispatcher, liveness: LivenessConfig) -> Self {
        Self {
            dispatcher,
            liveness,
            settings: GatewaySettings::default(),
        }
    }

    /// Replace the default server-loop settings
    #[must_use]
    pub fn with_settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// The session registry behind this gateway
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        self.dispatcher.registry()
    }

    /// Run the accept loop until shutdown is requested
    ///
    /// Consumes the gateway and the transport. Returns once every connection
    /// has been told to disconnect and the transport has shut down.
    pub async fn run<T>(
        self,
        mut transport: T,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), TransportError>
    where
        T: ServerTransport + 'static,
    {
        transport.listen().await?;
        let transport = Arc::new(transport);
        let handlers: Arc<DashMap<ConnectionId, HandlerState>> = Arc::new(DashMap::new());

        info!("Gateway accepting connections");

        loop {
            tokio::select! {
                accepted = transport.accept() => {
                    match accepted {
                        Ok((connection_id, inbound)) => {
                            if handlers.len() >= self.settings.max_connections {
                                warn!(
                                    connection_id = %connection_id,
                                    limit = self.settings.max_connections,
                                    "Connection limit reached, refusing link"
                                );
                                let _ = transport.disconnect(&connection_id).await;
                                continue;
                            }

                            debug!(
                                connection_id = %connection_id,
                                active_connections = handlers.len() + 1,
                                "Link accepted"
                            );

                            // Insert before spawning: the handler removes its
                            // own entry on exit, and that remove must never
                            // race ahead of the insert.
                            handlers.insert(
                                connection_id.clone(),
                                HandlerState {
                                    connected_at: Instant::now(),
                                    abort_handle: None,
                                },
                            );
                            let task = tokio::spawn(
                                Self::handle_connection(
                                    connection_id.clone(),
                                    inbound,
                                    Arc::clone(&transport),
                                    self.dispatcher.clone(),
                                    self.liveness.clone(),
                                    self.settings.clone(),
                                    Arc::clone(&handlers),
                                )
                                .instrument(info_span!("connection", connection_id = %connection_id)),
                            );
                            if let Some(mut entry) = handlers.get_mut(&connection_id) {
                                entry.abort_handle = Some(task.abort_handle());
                            }
                        }
                        Err(TransportError::ConnectionClosed) => {
                            info!("Transport stopped accepting, shutting down");
                            break;
                        }
                        Err(error) => {
                            warn!(error = %error, "Accept failed");
                        }
                    }
                }
                _ = shutdown.triggered() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        // Graceful teardown: tell every peer, cancel whatever is in flight,
        // then stop the handler tasks and the transport.
        let open = transport.connections();
        if !open.is_empty() {
            info!(connections = open.len(), "Draining connections");
        }
        for connection_id in open {
            let _ = transport
                .send_to(&connection_id, ServerEvent::Disconnect)
                .await;
            self.dispatcher.registry().close(&connection_id);
        }
        for entry in handlers.iter() {
            if let Some(handle) = &entry.value().abort_handle {
                handle.abort();
            }
        }
        handlers.clear();

        transport.shutdown().await?;
        info!("Gateway stopped");
        Ok(())
    }

    /// Drive one connection from handshake to teardown
    async fn handle_connection<T: ServerTransport>(
        connection_id: ConnectionId,
        mut inbound: mpsc::Receiver<ClientEvent>,
        transport: Arc<T>,
        dispatcher: Dispatcher,
        liveness: LivenessConfig,
        settings: GatewaySettings,
        handlers: Arc<DashMap<ConnectionId, HandlerState>>,
    ) {
        debug!("Connection handler started");

        let opened =
            Self::handshake(&connection_id, &mut inbound, &transport, &dispatcher, &settings).await;
        if opened {
            Self::serve(&connection_id, inbound, &transport, &dispatcher, liveness, &settings)
                .await;
        }

        // Close is idempotent and covers the never-handshaked case too.
        dispatcher.registry().close(&connection_id);
        let _ = transport.disconnect(&connection_id).await;
        if let Some((_, state)) = handlers.remove(&connection_id) {
            debug!(
                uptime_secs = state.connected_at.elapsed().as_secs(),
                active_connections = handlers.len(),
                "Connection handler finished"
            );
        }
    }

    /// Await the `connect` event and answer it
    ///
    /// Returns whether a session was opened. Anything other than a timely,
    /// version-compatible `connect` refuses the link; a version mismatch is
    /// additionally answered with a validation error so the client can log
    /// why it was dropped.
    async fn handshake<T: ServerTransport>(
        connection_id: &ConnectionId,
        inbound: &mut mpsc::Receiver<ClientEvent>,
        transport: &Arc<T>,
        dispatcher: &Dispatcher,
        settings: &GatewaySettings,
    ) -> bool {
        let first = tokio::time::timeout(settings.handshake_timeout, inbound.recv()).await;
        match first {
            Ok(Some(ClientEvent::Connect {
                client_name,
                protocol_version,
            })) => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        client_name = %client_name,
                        client_version = protocol_version,
                        server_version = PROTOCOL_VERSION,
                        "Protocol version mismatch"
                    );
                    let refusal = ServerEvent::ChatError {
                        request_id: None,
                        kind: ErrorKind::Validation,
                        message: format!(
                            "protocol version {protocol_version} is not supported \
                             (server speaks {PROTOCOL_VERSION})"
                        ),
                    };
                    let _ = transport.send_to(connection_id, refusal).await;
                    return false;
                }

                dispatcher.registry().open(connection_id.clone());
                let ack = ServerEvent::ConnectAck {
                    connection_id: connection_id.clone(),
                    protocol_version: PROTOCOL_VERSION,
                };
                if let Err(error) = transport.send_to(connection_id, ack).await {
                    warn!(error = %error, "Failed to send connect-ack");
                    return false;
                }
                info!(client_name = %client_name, "Session opened");
                true
            }
            Ok(Some(other)) => {
                warn!(event = ?other, "Expected connect as the first event");
                false
            }
            Ok(None) => {
                debug!("Link closed before handshake");
                false
            }
            Err(_) => {
                warn!(timeout_ms = settings.handshake_timeout.as_millis() as u64, "Handshake timed out");
                false
            }
        }
    }

    /// The post-handshake event loop for one connection
    async fn serve<T: ServerTransport>(
        connection_id: &ConnectionId,
        mut inbound: mpsc::Receiver<ClientEvent>,
        transport: &Arc<T>,
        dispatcher: &Dispatcher,
        liveness: LivenessConfig,
        settings: &GatewaySettings,
    ) {
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel::<ServerEvent>(settings.outbound_capacity);
        let tick = liveness.tick_interval();
        let mut liveness = LinkLiveness::new(liveness);
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = inbound.recv() => {
                    match event {
                        Some(event) => {
                            liveness.record_activity();
                            let keep_open = Self::handle_client_event(
                                connection_id,
                                event,
                                transport,
                                dispatcher,
                                &mut liveness,
                                &outbound_tx,
                            )
                            .await;
                            if !keep_open {
                                break;
                            }
                        }
                        None => {
                            debug!("Link closed by peer");
                            break;
                        }
                    }
                }
                relayed = outbound_rx.recv() => {
                    // outbound_tx lives on this stack frame, so the queue
                    // cannot close while the loop runs.
                    let Some(event) = relayed else { break };
                    if let Err(error) = transport.send_to(connection_id, event).await {
                        warn!(error = %error, "Outbound delivery failed");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match liveness.on_tick() {
                        LivenessTick::Idle => {}
                        LivenessTick::SendPing { seq } => {
                            let ping = ServerEvent::Ping { seq };
                            if transport.send_to(connection_id, ping).await.is_err() {
                                break;
                            }
                        }
                        LivenessTick::Dead { missed } => {
                            warn!(missed, "Connection declared dead");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Translate one client event into registry/dispatcher calls
    ///
    /// Returns false when the connection should close.
    async fn handle_client_event<T: ServerTransport>(
        connection_id: &ConnectionId,
        event: ClientEvent,
        transport: &Arc<T>,
        dispatcher: &Dispatcher,
        liveness: &mut LinkLiveness,
        outbound: &mpsc::Sender<ServerEvent>,
    ) -> bool {
        match event {
            ClientEvent::Connect { client_name, .. } => {
                // A duplicate connect on an open link is a client bug, but a
                // harmless one; re-ack instead of dropping the session.
                debug!(client_name = %client_name, "Duplicate connect, re-acking");
                let ack = ServerEvent::ConnectAck {
                    connection_id: connection_id.clone(),
                    protocol_version: PROTOCOL_VERSION,
                };
                transport.send_to(connection_id, ack).await.is_ok()
            }
            ClientEvent::Disconnect => {
                debug!("Client requested disconnect");
                false
            }
            ClientEvent::Pong { seq } => {
                if !liveness.record_pong(seq) {
                    debug!(seq, "Stale pong ignored");
                }
                true
            }
            ClientEvent::ChatRequest {
                message,
                history,
                options,
            } => {
                let admitted = dispatcher
                    .dispatch_chat(connection_id, message, history, options, outbound.clone())
                    .await;
                match admitted {
                    Ok(request_id) => {
                        debug!(request_id = %request_id, "Chat request admitted");
                        true
                    }
                    Err(error) => {
                        debug!(error = %error, "Chat request refused");
                        let refusal = ServerEvent::ChatError {
                            request_id: None,
                            kind: error.kind(),
                            message: error.to_string(),
                        };
                        transport.send_to(connection_id, refusal).await.is_ok()
                    }
                }
            }
            ClientEvent::ImageRequest { prompt, options } => {
                let admitted = dispatcher
                    .dispatch_image(connection_id, prompt, options, outbound.clone())
                    .await;
                match admitted {
                    Ok(request_id) => {
                        debug!(request_id = %request_id, "Image request admitted");
                        true
                    }
                    Err(error) => {
                        debug!(error = %error, "Image request refused");
                        let refusal = ServerEvent::ImageError {
                            request_id: None,
                            kind: error.kind(),
                            message: error.to_string(),
                        };
                        transport.send_to(connection_id, refusal).await.is_ok()
                    }
                }
            }
            ClientEvent::CancelRequest { request_id } => {
                if !dispatcher.cancel(connection_id, &request_id) {
                    // Terminal races are expected; the request may have
                    // finished between the client deciding and us hearing.
                    debug!(request_id = %request_id, "Cancel for inactive request ignored");
                }
                true
            }
        }
    }
}
