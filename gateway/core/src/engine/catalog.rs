//! Engine Catalog
//!
//! The static descriptor table mapping engine-kind identifiers to capability
//! sets and registered engine instances. Built once at startup, read-only
//! afterwards: the dispatcher resolves every request against it and never
//! inspects engine types directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{Engine, RequestMode};
use crate::error::DispatchError;

/// Engine kind every image request resolves to unless overridden
pub const IMAGE_KIND: &str = "image";

/// Capability descriptor for one engine kind
///
/// Built from configuration (`[[engine]]` entries) at startup or in code for
/// tests. The capability flags gate which request modes a kind accepts; the
/// timeout is the per-request deadline the dispatcher enforces for this kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineDescriptor {
    /// Engine kind identifier, unique within the catalog
    pub kind: String,
    /// Whether requests of this kind stream chat tokens
    pub chat_streaming: bool,
    /// Whether requests of this kind generate images
    pub image_generation: bool,
    /// Per-request deadline
    pub timeout: Duration,
}

impl EngineDescriptor {
    /// Descriptor for a token-streaming chat kind
    pub fn chat(kind: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            chat_streaming: true,
            image_generation: false,
            timeout,
        }
    }

    /// Descriptor for an image-generation kind
    pub fn image(kind: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            chat_streaming: false,
            image_generation: true,
            timeout,
        }
    }

    /// Whether this kind accepts the given request mode
    #[must_use]
    pub fn supports(&self, mode: RequestMode) -> bool {
        match mode {
            RequestMode::Chat => self.chat_streaming,
            RequestMode::Image => self.image_generation,
        }
    }
}

struct CatalogEntry {
    descriptor: EngineDescriptor,
    engine: Arc<dyn Engine>,
}

/// Registry of engine kinds available to the dispatcher
///
/// Populated during startup via [`EngineCatalog::register`], then shared
/// immutably (`Arc<EngineCatalog>`). The first chat-capable kind registered
/// becomes the default for chat requests that name no engine; image requests
/// default to [`IMAGE_KIND`].
#[derive(Default)]
pub struct EngineCatalog {
    entries: HashMap<String, CatalogEntry>,
    default_kind: Option<String>,
}

impl EngineCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its descriptor's kind
    ///
    /// A later registration for the same kind replaces the earlier one. The
    /// first chat-capable kind registered becomes the chat default unless
    /// [`EngineCatalog::set_default_kind`] overrides it.
    pub fn register(&mut self, descriptor: EngineDescriptor, engine: Arc<dyn Engine>) {
        if self.default_kind.is_none() && descriptor.chat_streaming {
            self.default_kind = Some(descriptor.kind.clone());
        }
        self.entries
            .insert(descriptor.kind.clone(), CatalogEntry { descriptor, engine });
    }

    /// Override the default kind for chat requests that name no engine
    pub fn set_default_kind(&mut self, kind: impl Into<String>) {
        self.default_kind = Some(kind.into());
    }

    /// The current chat default kind, if any chat-capable kind is registered
    #[must_use]
    pub fn default_kind(&self) -> Option<&str> {
        self.default_kind.as_deref()
    }

    /// Look up a descriptor by kind
    #[must_use]
    pub fn descriptor(&self, kind: &str) -> Option<&EngineDescriptor> {
        self.entries.get(kind).map(|e| &e.descriptor)
    }

    /// All registered kinds
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered kinds
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no kinds are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the engine for a request
    ///
    /// `requested` is the kind named in the request options, if any; `mode`
    /// picks the fallback (chat default or [`IMAGE_KIND`]) and gates the
    /// capability check. Unknown kinds fail before any engine is invoked.
    pub fn resolve(
        &self,
        requested: Option<&str>,
        mode: RequestMode,
    ) -> Result<(EngineDescriptor, Arc<dyn Engine>), DispatchError> {
        let kind = match requested {
            Some(kind) => kind,
            None => match mode {
                RequestMode::Chat => self
                    .default_kind
                    .as_deref()
                    .ok_or_else(|| DispatchError::UnknownEngine("<default>".into()))?,
                RequestMode::Image => IMAGE_KIND,
            },
        };

        let entry = self
            .entries
            .get(kind)
            .ok_or_else(|| DispatchError::UnknownEngine(kind.to_string()))?;

        if !entry.descriptor.supports(mode) {
            let need = match mode {
                RequestMode::Chat => "chat streaming",
                RequestMode::Image => "image generation",
            };
            return Err(DispatchError::Validation(format!(
                "engine kind \"{kind}\" does not support {need}"
            )));
        }

        Ok((entry.descriptor.clone(), Arc::clone(&entry.engine)))
    }

    /// Probe every registered engine's health
    ///
    /// Returns `(kind, healthy)` pairs; used by the daemon at startup to log
    /// which kinds are actually reachable.
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let mut report = Vec::with_capacity(self.entries.len());
        for (kind, entry) in &self.entries {
            report.push((kind.clone(), entry.engine.health_check().await));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::traits::{CancelSignal, EngineRequest, Fragment};

    struct NullEngine(&'static str);

    #[async_trait]
    impl Engine for NullEngine {
        fn kind(&self) -> &str {
            self.0
        }

        async fn submit(
            &self,
            _request: &EngineRequest,
            _cancel: CancelSignal,
        ) -> anyhow::Result<mpsc::Receiver<Fragment>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn catalog() -> EngineCatalog {
        let mut catalog = EngineCatalog::new();
        catalog.register(
            EngineDescriptor::chat("echo", Duration::from_secs(30)),
            Arc::new(NullEngine("echo")),
        );
        catalog.register(
            EngineDescriptor::image(IMAGE_KIND, Duration::from_secs(120)),
            Arc::new(NullEngine(IMAGE_KIND)),
        );
        catalog
    }

    #[test]
    fn test_first_chat_kind_becomes_default() {
        let catalog = catalog();
        assert_eq!(catalog.default_kind(), Some("echo"));
    }

    #[test]
    fn test_resolve_chat_default() {
        let catalog = catalog();
        let (descriptor, engine) = catalog.resolve(None, RequestMode::Chat).unwrap();
        assert_eq!(descriptor.kind, "echo");
        assert_eq!(engine.kind(), "echo");
        assert_eq!(descriptor.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_resolve_image_default() {
        let catalog = catalog();
        let (descriptor, _) = catalog.resolve(None, RequestMode::Image).unwrap();
        assert_eq!(descriptor.kind, IMAGE_KIND);
        assert_eq!(descriptor.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_resolve_unknown_kind() {
        let catalog = catalog();
        let err = catalog.resolve(Some("video"), RequestMode::Chat).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEngine(kind) if kind == "video"));
    }

    #[test]
    fn test_resolve_capability_mismatch_is_validation() {
        let catalog = catalog();
        // The image kind exists but cannot stream chat.
        let err = catalog
            .resolve(Some(IMAGE_KIND), RequestMode::Chat)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn test_empty_catalog_has_no_default() {
        let catalog = EngineCatalog::new();
        assert!(catalog.is_empty());
        let err = catalog.resolve(None, RequestMode::Chat).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEngine(_)));
    }

    #[tokio::test]
    async fn test_health_report_covers_all_kinds() {
        let catalog = catalog();
        let mut report = catalog.health_report().await;
        report.sort();
        assert_eq!(
            report,
            vec![("echo".to_string(), true), (IMAGE_KIND.to_string(), true)]
        );
    }
}
