//! Relay Configuration
//!
//! All settings come from environment variables with tolerant parsing: an
//! unset or unparseable value falls back to the default rather than failing
//! startup. Builder methods exist for the settings tests need to pin down.
//!
//! # Environment Variables
//!
//! - `PORT`: starting port for the bind retry window (default 3002)
//! - `OLLAMA_HOST`: generator host (default 127.0.0.1)
//! - `OLLAMA_PORT`: generator port (default 8282)
//! - `RELAY_MODEL`: model name sent to the generator (default gemma3:1b)
//! - `RELAY_DEFAULT_PROMPT`: prompt used when the client supplies none
//! - `RELAY_SHUTDOWN_GRACE_SECS`: drain window before forced close (default 10)
//! - `RELAY_CHANNEL_CAPACITY`: in-flight fragment window (default 32)
//! - `RELAY_UPSTREAM_TIMEOUT_SECS`: whole-request timeout on the generator
//!   client, streaming included (default 120)

use std::time::Duration;

/// Port used when `PORT` is unset or does not parse
pub const DEFAULT_PORT: u16 = 3002;

/// Bind attempts made before giving up on startup
pub const DEFAULT_MAX_BIND_ATTEMPTS: u32 = 10;

/// Prompt substituted when the request carries none
pub const DEFAULT_PROMPT: &str = "Write a short poem for me";

/// Configuration for the relay process
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// First port to try binding; contention walks upward from here
    pub port: u16,
    /// Total bind attempts before startup fails
    pub max_bind_attempts: u32,
    /// How long shutdown waits for in-flight relays before forcing closure
    pub shutdown_grace: Duration,
    /// Prompt used when the request has no (or an empty) `prompt` parameter
    pub default_prompt: String,
    /// Capacity of the fragment channel between generator and relay.
    /// Bounds memory under a slow client: the generator blocks once this
    /// many fragments are waiting to be written.
    pub channel_capacity: usize,
    /// Generator host address
    pub ollama_host: String,
    /// Generator port number
    pub ollama_port: u16,
    /// Model identifier passed to the generator
    pub model: String,
    /// Whole-request timeout on the generator client
    pub upstream_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_bind_attempts: DEFAULT_MAX_BIND_ATTEMPTS,
            shutdown_grace: Duration::from_secs(10),
            default_prompt: DEFAULT_PROMPT.to_string(),
            channel_capacity: 32,
            ollama_host: "127.0.0.1".to_string(),
            ollama_port: 8282,
            model: "gemma3:1b".to_string(),
            upstream_timeout: Duration::from_secs(120),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            max_bind_attempts: DEFAULT_MAX_BIND_ATTEMPTS,
            shutdown_grace: std::env::var("RELAY_SHUTDOWN_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(defaults.shutdown_grace, Duration::from_secs),
            default_prompt: std::env::var("RELAY_DEFAULT_PROMPT")
                .unwrap_or_else(|_| DEFAULT_PROMPT.to_string()),
            channel_capacity: std::env::var("RELAY_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.channel_capacity),
            ollama_host: std::env::var("OLLAMA_HOST").unwrap_or(defaults.ollama_host),
            ollama_port: std::env::var("OLLAMA_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ollama_port),
            model: std::env::var("RELAY_MODEL").unwrap_or(defaults.model),
            upstream_timeout: std::env::var("RELAY_UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(defaults.upstream_timeout, Duration::from_secs),
        }
    }

    /// Set the starting port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind attempt budget
    #[must_use]
    pub fn with_max_bind_attempts(mut self, attempts: u32) -> Self {
        self.max_bind_attempts = attempts;
        self
    }

    /// Set the shutdown grace window
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the default prompt
    #[must_use]
    pub fn with_default_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_prompt = prompt.into();
        self
    }

    /// Set the fragment channel capacity
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_contract() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3002);
        assert_eq!(config.max_bind_attempts, 10);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.default_prompt, "Write a short poem for me");
        assert_eq!(config.ollama_port, 8282);
    }

    #[test]
    fn builders_override_fields() {
        let config = RelayConfig::default()
            .with_port(0)
            .with_max_bind_attempts(3)
            .with_shutdown_grace(Duration::from_millis(200))
            .with_default_prompt("hi")
            .with_channel_capacity(4);

        assert_eq!(config.port, 0);
        assert_eq!(config.max_bind_attempts, 3);
        assert_eq!(config.shutdown_grace, Duration::from_millis(200));
        assert_eq!(config.default_prompt, "hi");
        assert_eq!(config.channel_capacity, 4);
    }

    #[test]
    fn invalid_port_env_falls_back_to_default() {
        // Sole test touching PORT; keep it that way so parallel runs stay safe.
        std::env::set_var("PORT", "not-a-port");
        let config = RelayConfig::from_env();
        assert_eq!(config.port, DEFAULT_PORT);
        std::env::remove_var("PORT");
    }
}
