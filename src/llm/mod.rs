//! Interpretation service: turns free text into raw structured output.
//!
//! The [`Interpreter`] trait is the seam between the dispatcher and whatever
//! language model runs behind it. Implementations only return the raw model
//! output; structure is always re-derived by [`crate::normalizer`].

pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama::OllamaInterpreter;

/// Default instruction sent as the system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You convert household requests into commands. \
Reply ONLY with a JSON array of objects. Every object must contain an \"action\" key naming \
the command, plus any parameters the command needs, e.g. \
[{\"action\": \"download_movie\", \"title\": \"Inception\"}]. \
If the message contains no actionable request, reply with [].";

/// Raw answer of the interpretation service.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    /// Model output, untouched.
    pub raw_output: String,
    /// Model that produced it.
    pub model: String,
}

/// The interpretation service could not produce usable output.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct InterpretError {
    pub message: String,
    /// Whatever raw output was received before the failure (may be empty).
    pub raw_output: String,
}

impl InterpretError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_output: String::new(),
        }
    }

    pub fn with_raw(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = raw_output.into();
        self
    }
}

/// Client of a natural-language interpretation service.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Interpret `text`. Timeouts are the implementation's responsibility.
    async fn interpret(&self, text: &str) -> Result<Interpretation, InterpretError>;

    /// Identifier of the model in use.
    fn model_id(&self) -> &str;

    /// Whether the service is reachable.
    async fn test_connection(&self) -> bool;
}
