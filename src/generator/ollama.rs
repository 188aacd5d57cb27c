//! Ollama Generator
//!
//! Streams completions from a local Ollama server via `/api/generate` with
//! `stream: true`. The response is newline-delimited JSON; each line's
//! `response` field is one fragment, and `done: true` marks the end.
//!
//! Cancellation: the forwarding task selects on channel closure, so a
//! dropped subscription aborts the upstream HTTP request at the next
//! scheduler poll instead of waiting for the next chunk to bounce.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::traits::{StreamEvent, TextGenerator};
use crate::config::RelayConfig;
use crate::error::UpstreamFailure;

/// One line of the streaming generate response
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Generator backed by an Ollama server
#[derive(Clone)]
pub struct OllamaGenerator {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// Model identifier sent with every request
    model: String,
    /// Fragment channel capacity per subscription
    channel_capacity: usize,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaGenerator {
    /// Create a new generator client
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized, which only happens
    /// on a broken install.
    pub fn new(host: impl Into<String>, port: u16, model: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            model: model.into(),
            channel_capacity: 32,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Create from relay configuration
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            host: config.ollama_host.clone(),
            port: config.ollama_port,
            model: config.model.clone(),
            channel_capacity: config.channel_capacity,
            http_client: reqwest::Client::builder()
                .timeout(config.upstream_timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get the generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    /// Get the tags endpoint URL, used as the reachability probe
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }
}

impl Default for OllamaGenerator {
    fn default() -> Self {
        Self::new("127.0.0.1", 8282, "gemma3:1b")
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn subscribe(&self, prompt: &str) -> Result<mpsc::Receiver<StreamEvent>, UpstreamFailure> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let json_request = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
        });

        let response = self
            .http_client
            .post(self.generate_url())
            .json(&json_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamFailure::Status { status, body });
        }

        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();

            loop {
                let chunk = tokio::select! {
                    () = tx.closed() => {
                        debug!("subscriber gone, cancelling upstream request");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        // Complete lines only; a partial line stays buffered
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            let Some(parsed) = parse_line(&line) else {
                                continue;
                            };

                            if !parsed.response.is_empty()
                                && tx
                                    .send(StreamEvent::Fragment(parsed.response))
                                    .await
                                    .is_err()
                            {
                                return;
                            }

                            if parsed.done {
                                let _ = tx.send(StreamEvent::Done).await;
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                        return;
                    }
                    None => {
                        // Stream ended without a done marker; treat as complete
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Parse one NDJSON line, ignoring blanks and garbage
fn parse_line(line: &str) -> Option<GenerateChunk> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn generator_urls() {
        let generator = OllamaGenerator::new("localhost", 11434, "llama2");
        assert_eq!(generator.base_url(), "http://localhost:11434");
        assert_eq!(generator.generate_url(), "http://localhost:11434/api/generate");
        assert_eq!(generator.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn default_points_at_local_server() {
        let generator = OllamaGenerator::default();
        assert_eq!(generator.base_url(), "http://127.0.0.1:8282");
        assert_eq!(generator.model, "gemma3:1b");
    }

    #[test]
    fn parse_line_extracts_fragment() {
        let chunk = parse_line(r#"{"response":"Once","done":false}"#).unwrap();
        assert_eq!(chunk.response, "Once");
        assert!(!chunk.done);
    }

    #[test]
    fn parse_line_handles_done_marker() {
        let chunk = parse_line(r#"{"response":"","done":true}"#).unwrap();
        assert_eq!(chunk.response, "");
        assert!(chunk.done);
    }

    #[test]
    fn parse_line_skips_blank_and_garbage() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("not json").is_none());
    }

    #[test]
    fn from_config_carries_settings() {
        let config = RelayConfig::default().with_channel_capacity(4);
        let generator = OllamaGenerator::from_config(&config);
        assert_eq!(generator.host, "127.0.0.1");
        assert_eq!(generator.port, 8282);
        assert_eq!(generator.channel_capacity, 4);
    }
}
