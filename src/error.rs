//! Error Types
//!
//! The failure taxonomy for the relay:
//!
//! - [`BindError`]: startup cannot acquire a listening port. Fatal; the
//!   process exits non-zero without serving anything.
//! - [`UpstreamFailure`]: the text generator signalled an error for one
//!   subscription. Scoped to the affected request, never escalates.
//!
//! Two further failure classes exist but carry no type of their own:
//! transport errors on an individual accepted socket are caught and logged
//! inside that connection's task (the listener never sees them), and panics
//! anywhere in the process are routed through the shutdown controller's
//! panic hook, draining the server before a non-zero exit.

use thiserror::Error;

/// Errors raised while acquiring the listening socket
#[derive(Debug, Error)]
pub enum BindError {
    /// Every candidate port in the retry window was already taken
    #[error("no free port after {attempts} attempts starting at {first_port}")]
    PortsExhausted {
        /// First port tried
        first_port: u16,
        /// Number of bind attempts made
        attempts: u32,
    },

    /// A bind attempt failed for a reason other than contention.
    /// Not retried; retrying cannot fix permissions or bad addresses.
    #[error("failed to bind port {port}: {source}")]
    Io {
        /// Port the failed attempt targeted
        port: u16,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a text generator subscription
#[derive(Debug, Error)]
pub enum UpstreamFailure {
    /// The HTTP request to the generator could not be sent or timed out
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The generator answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status returned by the generator
        status: reqwest::StatusCode,
        /// Response body, for the log line
        body: String,
    },
}
