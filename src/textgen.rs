//! Text generation seam.
//!
//! Workflow nodes that summarize or analyze text depend on this trait
//! rather than any concrete provider. Implementations are injected into
//! nodes explicitly at construction; the engine itself never calls a
//! generator and carries no ambient default.

use async_trait::async_trait;
use miette::Diagnostic;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// An asynchronous prompt-to-text collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for `prompt`, keeping the result within roughly
    /// `max_len` characters. The limit is a hint for the provider, not a
    /// guarantee enforced here.
    async fn generate(&self, prompt: &str, max_len: usize) -> Result<String, TextGenError>;
}

/// Errors from a text generation collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum TextGenError {
    /// The provider rejected or failed the request.
    #[error("text generation failed ({provider}): {message}")]
    #[diagnostic(code(loomflow::textgen::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// The provider is unreachable.
    #[error("text generation provider unavailable: {message}")]
    #[diagnostic(
        code(loomflow::textgen::unavailable),
        help("Check provider credentials and connectivity.")
    )]
    Unavailable { message: String },
}

/// Canned generator for tests and demos.
///
/// Replies with a fixed prefix plus a truncated echo of the prompt, and
/// records every prompt it sees so tests can assert on invocation counts
/// (for instance, that a sentinel short-circuit skipped the call).
#[derive(Clone)]
pub struct MockTextGenerator {
    prefix: String,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::with_prefix("summary:")
    }
}

impl MockTextGenerator {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every prompt passed to [`generate`](TextGenerator::generate) so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// How many times the generator was invoked.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate(&self, prompt: &str, max_len: usize) -> Result<String, TextGenError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut reply = format!("{} {}", self.prefix, prompt);
        if reply.len() > max_len {
            reply.truncate(max_len);
        }
        Ok(reply)
    }
}
