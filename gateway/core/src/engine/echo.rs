//! Echo Reference Engine
//!
//! A scripted [`Engine`] used wherever the gateway must run without external
//! inference services: daemon default wiring, integration tests, demos. Chat
//! requests are answered with the prompt itself, first letter capitalized,
//! streamed one character per fragment; image requests emit two progress
//! updates and a synthetic artifact reference.
//!
//! Real engines live outside this repository; this one exists so the gateway
//! is self-contained end to end.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::traits::{CancelSignal, Engine, EngineRequest, Fragment, RequestMode};
use crate::protocol::Artifact;

const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

/// Scripted engine that streams the prompt back
#[derive(Clone, Debug)]
pub struct EchoEngine {
    kind: String,
    /// Pause between fragments; zero for tests, a few tens of ms for demos
    delay: Duration,
}

impl EchoEngine {
    /// Echo engine serving the given kind identifier
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            delay: Duration::ZERO,
        }
    }

    /// Echo engine for the default chat kind
    #[must_use]
    pub fn chat() -> Self {
        Self::new("echo")
    }

    /// Echo engine for the image kind
    #[must_use]
    pub fn image() -> Self {
        Self::new(super::catalog::IMAGE_KIND)
    }

    /// Set the inter-fragment delay
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The reply text for a chat prompt: the prompt, first letter capitalized
    fn reply_text(prompt: &str) -> String {
        let mut chars = prompt.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::chat()
    }
}

#[async_trait]
impl Engine for EchoEngine {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn submit(
        &self,
        request: &EngineRequest,
        cancel: CancelSignal,
    ) -> anyhow::Result<mpsc::Receiver<Fragment>> {
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let delay = self.delay;
        let mode = request.mode;
        let prompt = request.prompt.clone();

        tokio::spawn(async move {
            let mut cancel = cancel;
            let fragments = match mode {
                RequestMode::Chat => {
                    let mut out: Vec<Fragment> = Self::reply_text(&prompt)
                        .chars()
                        .map(|c| Fragment::Token(c.to_string()))
                        .collect();
                    out.push(Fragment::Complete { artifact: None });
                    out
                }
                RequestMode::Image => vec![
                    Fragment::Progress {
                        stage: "queued".into(),
                        percent: Some(0),
                    },
                    Fragment::Progress {
                        stage: "rendering".into(),
                        percent: Some(50),
                    },
                    Fragment::Complete {
                        artifact: Some(Artifact {
                            uri: format!("echo://artifacts/{}.png", Uuid::new_v4()),
                            mime: "image/png".into(),
                        }),
                    },
                ],
            };

            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            tracing::debug!("echo engine stopping on cancellation");
                            return;
                        }
                    }
                } else if cancel.is_cancelled() {
                    tracing::debug!("echo engine stopping on cancellation");
                    return;
                }

                if tx.send(fragment).await.is_err() {
                    // Receiver dropped: nobody is listening anymore.
                    return;
                }
            }
        });

        Ok(rx)
    }
}
