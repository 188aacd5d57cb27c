//! Prompt Relay - Streaming HTTP front end for LLM text generation
//!
//! A small HTTP server that forwards an incrementally generated text stream
//! from an LLM backend to clients as a live event stream, wrapped in a
//! self-healing bootstrap: bounded port retry at startup, per-connection
//! fault isolation while serving, and ordered graceful shutdown on signals
//! or faults.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   GET /?prompt=…    ┌──────────────────────────────┐
//! │   Client   │ ──────────────────► │          RelayServer         │
//! │            │ ◄────────────────── │  (bind retry, accept loop,   │
//! └────────────┘   text/event-stream │   drain on shutdown)         │
//!                  fragment by       └──────────────┬───────────────┘
//!                  fragment                         │ one relay
//!                                                   │ per request
//!                                    ┌──────────────▼───────────────┐
//!                                    │         relay::handle        │
//!                                    │  (prompt → subscription →    │
//!                                    │   backpressured body stream) │
//!                                    └──────────────┬───────────────┘
//!                                                   │
//!                                    ┌──────────────▼───────────────┐
//!                                    │        TextGenerator         │
//!                                    │   (Ollama in production,     │
//!                                    │    scripted doubles in test) │
//!                                    └──────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`RelayServer`]: owns the listening socket and the connection tasks
//! - [`ServerHandle`]: observer view (port, lifecycle state, active relays)
//! - [`TextGenerator`]: the upstream contract; [`OllamaGenerator`] is the
//!   production implementation
//! - [`ShutdownController`]: single funnel for signals and faults
//! - [`RelayConfig`]: environment-derived settings
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use prompt_relay::{OllamaGenerator, RelayConfig, RelayServer, ShutdownController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RelayConfig::from_env();
//!     let shutdown = ShutdownController::new();
//!     prompt_relay::shutdown::spawn_signal_listener(&shutdown);
//!
//!     let generator = Arc::new(OllamaGenerator::from_config(&config));
//!     let server = RelayServer::start(config, generator, shutdown)
//!         .await
//!         .expect("bind failed");
//!     server.run().await;
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod generator;
pub mod relay;
pub mod server;
pub mod shutdown;

pub use config::RelayConfig;
pub use error::{BindError, UpstreamFailure};
pub use generator::{OllamaGenerator, StreamEvent, TextGenerator};
pub use relay::RelayState;
pub use server::{LifecycleState, RelayServer, ServerHandle};
pub use shutdown::{ShutdownController, ShutdownKind};
