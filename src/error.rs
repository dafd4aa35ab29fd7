//! Session-level error taxonomy
//!
//! Failures of the program under repair are not errors here; they are the
//! signal the loop runs on. Everything in this enum ends a session early.

use crate::executor::ExecutorError;
use crate::llm::LlmError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    /// Bad or missing settings detected before the loop starts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no API key for {provider}: set {env_var} or run with --save-api-key")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("another repair session holds the lock at {0}")]
    SessionLocked(PathBuf),

    /// The query-generation reply did not contain `search_query: "..."`.
    #[error("could not find a search query in the model reply: {preview}")]
    QueryParse { preview: String },

    #[error("model request failed: {0}")]
    Model(#[from] LlmError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to read {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
