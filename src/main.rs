//! Prompt Relay Daemon
//!
//! Streams LLM completions over HTTP. One GET endpoint at the root; the
//! optional `prompt` query parameter selects what to generate.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (3002; walks upward if taken)
//! prompt-relay
//!
//! # Start on a custom port
//! PORT=8080 prompt-relay
//!
//! # With verbose logging
//! RUST_LOG=debug prompt-relay
//! ```
//!
//! # Environment Variables
//!
//! - `PORT`: starting port (default 3002)
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: generator address (default 127.0.0.1:8282)
//! - `RELAY_MODEL`: model name (default gemma3:1b)
//! - `RELAY_DEFAULT_PROMPT`: prompt used when the client sends none
//! - `RELAY_SHUTDOWN_GRACE_SECS`: drain window on shutdown (default 10)
//! - `RUST_LOG`: log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! SIGTERM/SIGINT start a graceful drain; the process exits 0 once in-flight
//! streams finish or the grace window elapses. A fatal startup failure or a
//! fault-triggered shutdown exits 1.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};

use prompt_relay::{
    shutdown, OllamaGenerator, RelayConfig, RelayServer, ShutdownController, ShutdownKind,
    TextGenerator,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("prompt_relay=info".parse().expect("static directive parses")),
        )
        .with_target(true)
        .init();

    info!("Starting prompt relay");
    info!("PID: {}", std::process::id());

    let config = RelayConfig::from_env();
    let shutdown_controller = ShutdownController::new();
    shutdown::install_panic_hook(&shutdown_controller);
    shutdown::spawn_signal_listener(&shutdown_controller);

    let generator = Arc::new(OllamaGenerator::from_config(&config));
    if generator.health_check().await {
        info!(generator = generator.name(), "upstream generator reachable");
    } else {
        warn!(
            generator = generator.name(),
            "upstream generator unreachable, requests will fail until it comes back"
        );
    }

    let server =
        match RelayServer::start(config, generator, Arc::clone(&shutdown_controller)).await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "failed to acquire a listening port");
                return ExitCode::from(1);
            }
        };

    info!("Server is running on http://localhost:{}", server.port());
    server.run().await;

    match shutdown_controller.kind() {
        Some(ShutdownKind::Fault) => {
            error!("shut down after an unrecoverable fault");
            ExitCode::from(1)
        }
        _ => {
            info!("Server shut down successfully");
            ExitCode::SUCCESS
        }
    }
}
