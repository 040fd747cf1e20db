/// Error types shared by the library
///
/// Startup problems (bad configuration, unreachable backends) are meant to
/// stop the process; answer parsing problems are meant to be absorbed by the
/// chat front end.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Knowledge store backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("Inference request failed: {0}")]
    InferenceRequestFailed(String),

    #[error("Unable to parse answer: {0}")]
    AnswerUnparseable(String),

    #[error("Embedding request failed: {0}")]
    EmbeddingFailed(String),

    #[error("Ingestion failed: {0}")]
    IngestFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BotError {
    pub(crate) fn backend(backend: &'static str, reason: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
