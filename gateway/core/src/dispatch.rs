//! Streaming Dispatcher
//!
//! Routes inbound requests to the engine their kind resolves to, then relays
//! the engine's fragment stream into the connection's outbound queue in
//! production order. One task per in-flight request; the task owns the whole
//! request lifecycle from admission to terminal status.
//!
//! # Request Lifecycle
//!
//! ```text
//!   validate ──► busy check ──► resolve engine ──► claim slot ──► spawn task
//!                                                                    │
//!                 ┌──────────────────────────────────────────────────┘
//!                 ▼
//!   pending ──► streaming ──► completed   (append history, emit complete)
//!                        ├──► failed      (emit error, discard partials)
//!                        └──► cancelled   (client cancel / close / deadline)
//! ```
//!
//! Admission failures (validation, busy, unknown engine) return synchronously
//! and create no request. Everything after admission surfaces as events on
//! the connection's outbound queue, tagged with the request ID.
//!
//! # Cancellation
//!
//! Cooperative: cancelling flips a watch flag the engine observes at its next
//! yield point. The relay stops forwarding the moment it sees the flag, then
//! drains and discards late fragments for a bounded grace period before
//! releasing the active-request slot, whether or not the engine has actually
//! stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn, Instrument};

use crate::engine::{
    CancelHandle, CancelSignal, Engine, EngineCatalog, EngineDescriptor, EngineRequest, Fragment,
    RequestMode,
};
use crate::error::DispatchError;
use crate::protocol::{
    ClientEvent, ConnectionId, ErrorKind, HistoryTurn, RequestId, Role, ServerEvent,
};
use crate::registry::{SessionHandle, SessionRegistry};

/// Lifecycle status of a request
///
/// Transitions are monotonic: `Pending → Streaming → {Completed | Failed |
/// Cancelled}`. Once terminal, a status never changes; whichever outcome is
/// observed first wins any race.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// Admitted, engine not yet streaming
    Pending,
    /// Fragments are being relayed
    Streaming,
    /// Terminal: completion marker relayed, history updated
    Completed,
    /// Terminal: engine error relayed, partials discarded
    Failed,
    /// Terminal: cancelled by client, session close, or deadline
    Cancelled,
}

impl RequestStatus {
    /// Whether this status permits no further transitions
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-request bookkeeping owned by the relay task
struct RequestState {
    id: RequestId,
    mode: RequestMode,
    prompt: String,
    status: RequestStatus,
    /// Non-terminal fragments in arrival order
    fragments: Vec<Fragment>,
}

impl RequestState {
    fn new(id: RequestId, mode: RequestMode, prompt: String) -> Self {
        Self {
            id,
            mode,
            prompt,
            status: RequestStatus::Pending,
            fragments: Vec::new(),
        }
    }

    /// Advance the status; returns false if already terminal
    fn advance(&mut self, next: RequestStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }

    fn push(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    /// The accumulated chat reply, tokens concatenated in arrival order
    fn assembled_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|fragment| match fragment {
                Fragment::Token(token) => Some(token.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Dispatcher tuning knobs
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// How long to wait for an engine to stop after cancellation
    pub cancel_grace: Duration,
    /// Largest accepted prompt/message in bytes (0 = unlimited)
    pub max_prompt_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_millis(500),
            max_prompt_bytes: 64 * 1024,
        }
    }
}

impl DispatcherConfig {
    /// Configuration with timings shrunk for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            cancel_grace: Duration::from_millis(50),
            max_prompt_bytes: 64 * 1024,
        }
    }
}

/// Routes requests to engines and relays their output
///
/// Cheap to clone; clones share the registry and catalog.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    catalog: Arc<EngineCatalog>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher over a registry and an engine catalog
    #[must_use]
    pub fn new(
        registry: SessionRegistry,
        catalog: Arc<EngineCatalog>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            config,
        }
    }

    /// The session registry this dispatcher works against
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Admit and start a chat request
    ///
    /// On success the request is streaming and its events will arrive on
    /// `outbound`; the returned ID tags them. Admission errors are returned
    /// synchronously and create no request.
    pub async fn dispatch_chat(
        &self,
        connection_id: &ConnectionId,
        message: String,
        history: Vec<HistoryTurn>,
        options: std::collections::HashMap<String, String>,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<RequestId, DispatchError> {
        self.validate_prompt(&message)?;
        let request = EngineRequest::chat(message)
            .with_history(history)
            .with_options(options);
        self.dispatch(connection_id, request, outbound).await
    }

    /// Admit and start an image-generation request
    pub async fn dispatch_image(
        &self,
        connection_id: &ConnectionId,
        prompt: String,
        options: std::collections::HashMap<String, String>,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<RequestId, DispatchError> {
        self.validate_prompt(&prompt)?;
        let request = EngineRequest::image(prompt).with_options(options);
        self.dispatch(connection_id, request, outbound).await
    }

    /// Signal cancellation of an in-flight request
    ///
    /// Returns whether the request was active on the connection. Cancelling
    /// an unknown or already-finished request is a no-op; terminal races are
    /// expected, not errors.
    pub fn cancel(&self, connection_id: &ConnectionId, request_id: &RequestId) -> bool {
        match self.registry.get(connection_id) {
            Some(session) => {
                let cancelled = session.lock().cancel_active(request_id);
                if cancelled {
                    debug!(
                        connection_id = %connection_id,
                        request_id = %request_id,
                        "Cancellation requested"
                    );
                }
                cancelled
            }
            None => false,
        }
    }

    fn validate_prompt(&self, text: &str) -> Result<(), DispatchError> {
        if text.trim().is_empty() {
            return Err(DispatchError::Validation("empty prompt".into()));
        }
        let max = self.config.max_prompt_bytes;
        if max > 0 && text.len() > max {
            return Err(DispatchError::Validation(format!(
                "prompt exceeds maximum size of {max} bytes"
            )));
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        connection_id: &ConnectionId,
        mut request: EngineRequest,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<RequestId, DispatchError> {
        let session = self
            .registry
            .get(connection_id)
            .ok_or_else(|| DispatchError::SessionNotFound(connection_id.clone()))?;

        // Busy takes precedence over engine resolution errors.
        if let Some(active) = session.lock().active_request_id().cloned() {
            return Err(DispatchError::Busy { active });
        }

        let requested = request
            .options
            .get(ClientEvent::ENGINE_OPTION)
            .map(String::as_str);
        let (descriptor, engine) = self.catalog.resolve(requested, request.mode)?;

        // A chat request with no explicit context runs against the session's
        // recorded history.
        if request.mode == RequestMode::Chat && request.history.is_empty() {
            request.history = session.lock().history_snapshot();
        }

        let request_id = RequestId::new();
        let (handle, signal) = CancelSignal::new();
        session
            .lock()
            .try_begin_request(request_id.clone(), handle.clone())?;

        debug!(
            connection_id = %connection_id,
            request_id = %request_id,
            engine_kind = %descriptor.kind,
            mode = ?request.mode,
            "Request admitted"
        );

        let state = RequestState::new(request_id.clone(), request.mode, request.prompt.clone());
        let grace = self.config.cancel_grace;
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            connection_id = %connection_id
        );
        tokio::spawn(
            run_request(
                session, state, descriptor, engine, request, signal, handle, outbound, grace,
            )
            .instrument(span),
        );

        Ok(request_id)
    }
}

/// Relay loop for one admitted request
///
/// Owns the request from engine submit to terminal status and slot release.
#[allow(clippy::too_many_arguments)]
async fn run_request(
    session: SessionHandle,
    mut state: RequestState,
    descriptor: EngineDescriptor,
    engine: Arc<dyn Engine>,
    request: EngineRequest,
    mut cancel: CancelSignal,
    cancel_handle: CancelHandle,
    outbound: mpsc::Sender<ServerEvent>,
    grace: Duration,
) {
    state.advance(RequestStatus::Streaming);

    let mut rx = match engine.submit(&request, cancel.clone()).await {
        Ok(rx) => rx,
        Err(error) => {
            warn!(error = %error, "Engine submit failed");
            state.advance(RequestStatus::Failed);
            send_error(
                &outbound,
                &state,
                ErrorKind::EngineFailure,
                format!("engine failed to start: {error}"),
            )
            .await;
            session.lock().finish_request(&state.id);
            return;
        }
    };

    let deadline = tokio::time::sleep(descriptor.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            fragment = rx.recv() => match fragment {
                Some(Fragment::Token(token)) => {
                    state.push(Fragment::Token(token.clone()));
                    let event = ServerEvent::TokenFragment {
                        request_id: state.id.clone(),
                        token,
                    };
                    if outbound.send(event).await.is_err() {
                        // Connection writer is gone; stop the engine and
                        // release bookkeeping without emitting anything.
                        state.advance(RequestStatus::Cancelled);
                        cancel_handle.cancel();
                        break;
                    }
                }
                Some(Fragment::Progress { stage, percent }) => {
                    state.push(Fragment::Progress {
                        stage: stage.clone(),
                        percent,
                    });
                    let event = ServerEvent::ProgressFragment {
                        request_id: state.id.clone(),
                        stage,
                        percent,
                    };
                    if outbound.send(event).await.is_err() {
                        state.advance(RequestStatus::Cancelled);
                        cancel_handle.cancel();
                        break;
                    }
                }
                Some(Fragment::Complete { artifact }) => {
                    match (state.mode, artifact) {
                        (RequestMode::Chat, _) => {
                            state.advance(RequestStatus::Completed);
                            let reply = state.assembled_text();
                            {
                                let mut guard = session.lock();
                                guard.append_history(Role::User, state.prompt.clone());
                                guard.append_history(Role::Assistant, reply);
                            }
                            deliver(
                                &outbound,
                                ServerEvent::ChatComplete {
                                    request_id: state.id.clone(),
                                },
                            )
                            .await;
                        }
                        (RequestMode::Image, Some(artifact)) => {
                            state.advance(RequestStatus::Completed);
                            deliver(
                                &outbound,
                                ServerEvent::ImageComplete {
                                    request_id: state.id.clone(),
                                    artifact,
                                },
                            )
                            .await;
                        }
                        (RequestMode::Image, None) => {
                            state.advance(RequestStatus::Failed);
                            send_error(
                                &outbound,
                                &state,
                                ErrorKind::EngineFailure,
                                "engine completed without an artifact".into(),
                            )
                            .await;
                        }
                    }
                    break;
                }
                Some(Fragment::Error(message)) => {
                    // Partial accumulator is discarded: history untouched.
                    state.advance(RequestStatus::Failed);
                    send_error(&outbound, &state, ErrorKind::EngineFailure, message).await;
                    break;
                }
                None => {
                    state.advance(RequestStatus::Failed);
                    send_error(
                        &outbound,
                        &state,
                        ErrorKind::EngineFailure,
                        "engine stream ended without a terminal marker".into(),
                    )
                    .await;
                    break;
                }
            },

            () = cancel.cancelled() => {
                state.advance(RequestStatus::Cancelled);
                // Ack first; no fragment for this request follows it.
                deliver(
                    &outbound,
                    ServerEvent::RequestCancelled {
                        request_id: state.id.clone(),
                    },
                )
                .await;
                drain_for_grace(&mut rx, grace).await;
                break;
            }

            () = &mut deadline => {
                state.advance(RequestStatus::Cancelled);
                send_error(
                    &outbound,
                    &state,
                    ErrorKind::Timeout,
                    format!("no terminal marker within {:?}", descriptor.timeout),
                )
                .await;
                cancel_handle.cancel();
                drain_for_grace(&mut rx, grace).await;
                break;
            }
        }
    }

    session.lock().finish_request(&state.id);
    debug!(
        status = ?state.status,
        fragments = state.fragments.len(),
        "Request finished"
    );
}

/// Forward a terminal event; a closed connection is not an error here
async fn deliver(outbound: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if outbound.send(event).await.is_err() {
        debug!("Connection closed before terminal event delivery");
    }
}

async fn send_error(
    outbound: &mpsc::Sender<ServerEvent>,
    state: &RequestState,
    kind: ErrorKind,
    message: String,
) {
    let event = match state.mode {
        RequestMode::Chat => ServerEvent::ChatError {
            request_id: Some(state.id.clone()),
            kind,
            message,
        },
        RequestMode::Image => ServerEvent::ImageError {
            request_id: Some(state.id.clone()),
            kind,
            message,
        },
    };
    deliver(outbound, event).await;
}

/// Discard whatever the engine still emits, for at most `grace`
///
/// Dropping the receiver afterwards closes the channel, which stops a
/// well-behaved producer at its next send.
async fn drain_for_grace(rx: &mut mpsc::Receiver<Fragment>, grace: Duration) {
    let drain = async {
        while rx.recv().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        debug!("Engine still producing after cancellation grace period");
    }
}
