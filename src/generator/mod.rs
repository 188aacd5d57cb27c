//! Text Generator Abstraction
//!
//! The relay consumes an upstream generator that turns a prompt into a lazy
//! sequence of text fragments. The trait lives in [`traits`]; [`ollama`]
//! provides the production implementation against a local Ollama server.
//! Tests substitute scripted doubles behind the same trait.

pub mod ollama;
pub mod traits;

pub use ollama::OllamaGenerator;
pub use traits::{StreamEvent, TextGenerator};
