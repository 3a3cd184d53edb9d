use async_openai::error::OpenAIError;
use thiserror::Error;

/// What a caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAdvice {
    /// Transient upstream failure, retrying the request may succeed.
    Retry,
    /// The request itself is wrong (unknown collection, bad selector, ...).
    FixRequest,
    /// Operator intervention is needed (key material, corrupt ciphertext).
    ContactOperator,
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object storage error: {0}")]
    Storage(#[from] object_store::Error),
    /// Existence and ownership failures share one variant and one message,
    /// so a foreign collection is indistinguishable from a missing one.
    #[error("Collection not found: {0}")]
    NotFoundOrNotOwned(String),
    #[error("Name already taken: {0}")]
    DuplicateName(String),
    #[error("Invalid name or secret")]
    InvalidCredentials,
    #[error("Stored credential is corrupt: {0}")]
    CorruptCredential(String),
    #[error("Unsupported model selector: {0}")]
    UnsupportedModel(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Generation error: {0}")]
    Generation(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Collapses the taxonomy into the three outcomes a caller can act on.
    pub fn advice(&self) -> ErrorAdvice {
        match self {
            AppError::NotFoundOrNotOwned(_)
            | AppError::DuplicateName(_)
            | AppError::InvalidCredentials
            | AppError::UnsupportedModel(_)
            | AppError::Validation(_) => ErrorAdvice::FixRequest,
            AppError::CorruptCredential(_) | AppError::Config(_) => ErrorAdvice::ContactOperator,
            AppError::Database(_)
            | AppError::OpenAI(_)
            | AppError::Io(_)
            | AppError::Storage(_)
            | AppError::Embedding(_)
            | AppError::Generation(_)
            | AppError::Anyhow(_) => ErrorAdvice::Retry,
        }
    }

    /// The single outward signal for both "does not exist" and "not yours".
    pub fn not_found_or_not_owned(collection_id: &str) -> Self {
        AppError::NotFoundOrNotOwned(collection_id.to_owned())
    }
}
