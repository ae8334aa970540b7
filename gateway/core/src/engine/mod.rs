//! Engine Interface
//!
//! This module provides abstracted access to inference engines through a
//! common trait interface. The gateway never knows which engine it is talking
//! to: everything flows through [`Engine`] and the fragment stream it returns.
//!
//! # Module Layout
//!
//! - [`traits`]: the [`Engine`] contract, [`Fragment`] stream items, request
//!   payloads and the cooperative [`CancelSignal`]
//! - [`catalog`]: the static descriptor table resolving engine kinds
//! - [`echo`]: a scripted reference engine for self-contained operation
//!
//! Real inference engines (local model runners, remote API clients) live
//! outside this repository and plug in by implementing [`Engine`].
//!
//! # Usage
//!
//! ```ignore
//! use fluxgate_core::engine::{EchoEngine, Engine, EngineRequest, CancelSignal};
//!
//! let engine = EchoEngine::default();
//! let (handle, signal) = CancelSignal::new();
//! let request = EngineRequest::chat("Hello!");
//! let rx = engine.submit(&request, signal).await?;
//! ```

pub mod catalog;
pub mod echo;
pub mod traits;

pub use catalog::{EngineCatalog, EngineDescriptor, IMAGE_KIND};
pub use echo::EchoEngine;
pub use traits::{CancelHandle, CancelSignal, Engine, EngineRequest, Fragment, RequestMode};
