//! Engine Traits
//!
//! Trait definitions for inference engines. This abstraction lets the
//! dispatcher drive chat and media generation without knowing provider
//! details.
//!
//! # Design Philosophy
//!
//! The Engine trait provides a common interface for:
//! - Submitting a request and receiving a lazy stream of fragments
//! - Cooperative cancellation via an explicit signal
//! - Health checking the engine
//!
//! A fragment stream carries at most one terminal marker ([`Fragment::Complete`]
//! or [`Fragment::Error`]) and nothing after it. Engines observe cancellation
//! at their next yield point; they must also stop producing when the receiver
//! side of the channel is dropped (a failed `send` means nobody is listening).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::protocol::{Artifact, HistoryTurn};

/// One item of an engine's output stream
#[derive(Clone, Debug, PartialEq)]
pub enum Fragment {
    /// A chat token
    Token(String),

    /// A media generation progress update
    Progress {
        /// Human-readable generation stage
        stage: String,
        /// Completion estimate, 0-100 when known
        percent: Option<u8>,
    },

    /// The stream finished successfully
    Complete {
        /// Artifact reference for media requests; `None` for chat
        artifact: Option<Artifact>,
    },

    /// The stream failed
    Error(String),
}

impl Fragment {
    /// Whether this fragment ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error(_))
    }
}

/// Whether a request streams chat tokens or generates media
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMode {
    /// Token-streamed chat completion
    Chat,
    /// Single-shot image generation with optional progress updates
    Image,
}

/// Payload handed to an engine's `submit`
#[derive(Clone, Debug)]
pub struct EngineRequest {
    /// The prompt or user message
    pub prompt: String,
    /// Snapshot of prior exchanges, oldest first
    pub history: Vec<HistoryTurn>,
    /// Engine-specific options (sampling knobs, model hints, ...)
    pub options: HashMap<String, String>,
    /// Chat or media request
    pub mode: RequestMode,
}

impl EngineRequest {
    /// Create a chat request for a prompt
    pub fn chat(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            options: HashMap::new(),
            mode: RequestMode::Chat,
        }
    }

    /// Create an image-generation request for a prompt
    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            options: HashMap::new(),
            mode: RequestMode::Image,
        }
    }

    /// Attach a history snapshot
    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.history = history;
        self
    }

    /// Attach an options map
    #[must_use]
    pub fn with_options(mut self, options: HashMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// Set a single option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Sender half of a cancellation signal
///
/// One clone sits in the session's active-request slot (for client cancels
/// and session close), another stays with the relay task (for deadline
/// expiry). Cancelling is idempotent; dropping every handle without
/// cancelling also reads as cancellation on the signal side, so an abandoned
/// request never leaves an engine producing forever.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        // No receivers just means the engine already stopped.
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiver half of a cancellation signal
///
/// Cheap to clone; an engine task polls [`CancelSignal::is_cancelled`] at its
/// yield points or awaits [`CancelSignal::cancelled`] in a `select!`.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Create a linked handle/signal pair
    #[must_use]
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested
    ///
    /// A dropped [`CancelHandle`] resolves this too: an engine whose
    /// dispatcher is gone has no reason to keep producing.
    pub async fn cancelled(&mut self) {
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

/// Inference engine contract
///
/// Implement this trait to plug an inference provider into the gateway. The
/// returned receiver yields fragments in production order; the channel closes
/// after the terminal marker.
#[async_trait]
pub trait Engine: Send + Sync {
    /// The engine kind identifier this engine serves (e.g. "echo", "image")
    fn kind(&self) -> &str;

    /// Check if the engine is healthy and reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Submit a request and get a streaming response
    ///
    /// Returns a channel receiver that yields [`Fragment`]s as they are
    /// produced. At most one terminal fragment is sent, then the channel
    /// closes. The engine must react to `cancel` within a bounded grace
    /// period and must stop producing once sends fail.
    async fn submit(
        &self,
        request: &EngineRequest,
        cancel: CancelSignal,
    ) -> anyhow::Result<mpsc::Receiver<Fragment>>;
}

#[cfg(test)]
impl std::fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("kind", &self.kind()).finish()
    }
}
