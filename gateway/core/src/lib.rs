//! Fluxgate Core - Streaming Gateway for Chat and Media Generation
//!
//! This crate multiplexes interactive chat and long-running media generation
//! over persistent connections, completely independent of any engine vendor.
//! It can run embedded inside a host process or behind a daemonized Unix
//! socket, and the same event protocol drives both.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Clients                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │ GatewayClient│  │ GatewayClient│  │  Headless / Testing   │  │
//! │  └──────┬───────┘  └──────┬───────┘  └───────────┬───────────┘  │
//! │         │                 │                      │              │
//! │         └─────────────────┴──────────────────────┘              │
//! │                           │                                      │
//! │                   ClientEvent (up)                               │
//! │                   ServerEvent (down)                             │
//! │                           │                                      │
//! └───────────────────────────┼──────────────────────────────────────┘
//!                             │ in-process channels / Unix socket
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                        GATEWAY                                   │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │                       Gateway                                │ │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────┐ │ │
//! │  │  │ Session  │  │   Link   │  │Dispatcher│  │    Engine    │ │ │
//! │  │  │ Registry │  │ Liveness │  │          │  │   Catalog    │ │ │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └──────────────┘ │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Gateway`]: The server loop that accepts connections and serves them
//! - [`GatewayClient`]: Typed client with reconnection and liveness handling
//! - [`ClientEvent`] / [`ServerEvent`]: The wire protocol, versioned
//! - [`Dispatcher`]: Admits requests and streams engine fragments back
//! - [`Engine`]: Trait a chat or media backend implements
//! - [`SessionRegistry`]: Per-connection session state and history
//!
//! # Quick Start
//!
//! ```ignore
//! use fluxgate_core::{
//!     Dispatcher, DispatcherConfig, EchoEngine, EngineCatalog, EngineDescriptor,
//!     Gateway, GatewayClient, LivenessConfig, SessionRegistry, ShutdownSignal,
//!     TransportConfig, transport::InProcessServer,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Catalog with the echo reference engine for chat.
//!     let mut catalog = EngineCatalog::new();
//!     catalog.register(
//!         EngineDescriptor::chat("echo", Duration::from_secs(30)),
//!         Arc::new(EchoEngine::chat()),
//!     );
//!
//!     // Serve over in-process channels (embedded mode).
//!     let server = InProcessServer::new();
//!     let connector = server.connector();
//!     let (shutdown, signal) = ShutdownSignal::new();
//!     let dispatcher = Dispatcher::new(
//!         SessionRegistry::new(),
//!         Arc::new(catalog),
//!         DispatcherConfig::default(),
//!     );
//!     let gateway = Gateway::new(dispatcher, LivenessConfig::default());
//!     tokio::spawn(gateway.run(server, signal));
//!
//!     // Connect a client and stream a chat response.
//!     let mut client = GatewayClient::new(connector.client(), TransportConfig::embedded());
//!     client.connect("demo").await.unwrap();
//!     client.send_chat("hello", Vec::new(), HashMap::new()).await.unwrap();
//!     while let Ok(event) = client.next_event().await {
//!         // Render token fragments, stop on chat-complete.
//!     }
//!
//!     shutdown.shutdown();
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`protocol`]: Versioned client/server event types and identifiers
//! - [`transport`]: Pluggable link layer (in-process channels, Unix sockets)
//! - [`gateway`]: Server accept loop, handshake, and per-connection handlers
//! - [`client`]: Client-side connection state machine and typed requests
//! - [`dispatch`]: Request admission, fragment relay, and cancellation
//! - [`engine`]: Engine trait, catalog, and the echo reference engine
//! - [`session`]: Per-connection session state and bounded history
//! - [`registry`]: Concurrent map of open sessions
//! - [`liveness`]: Ping/pong link probing and death detection
//! - [`config`]: TOML file, environment, and CLI configuration
//! - [`error`]: Dispatch and client error taxonomies
//!
//! # No Engine Dependencies
//!
//! This crate has **zero** dependencies on any model runtime or rendering
//! backend. Engines are trait objects registered at startup.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use protocol::{
    Artifact, ClientEvent, ConnectionId, ErrorKind, HistoryTurn, RequestId, Role, ServerEvent,
    PROTOCOL_VERSION,
};

pub use error::{ClientError, DispatchError};

// Engine exports
pub use engine::{
    CancelHandle, CancelSignal, EchoEngine, Engine, EngineCatalog, EngineDescriptor,
    EngineRequest, Fragment, RequestMode, IMAGE_KIND,
};

// Dispatch exports
pub use dispatch::{Dispatcher, DispatcherConfig, RequestStatus};

// Session exports
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{ActiveRequest, HistoryEntry, Session};

// Liveness exports
pub use liveness::{LinkHealth, LinkLiveness, LivenessConfig, LivenessTick};

// Server and client exports
pub use client::{GatewayClient, LinkState};
pub use gateway::{Gateway, GatewaySettings, ShutdownHandle, ShutdownSignal};

// Transport exports
pub use transport::{
    ClientTransport, ServerTransport, TransportConfig, TransportError, TransportKind,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, EngineEntry, GatewayConfig, GatewayToml,
};
