use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Stored embeddings were produced by '{stored}' but the active embedder is '{current}'; clear embeddings before regenerating"
    )]
    EmbedderChanged { stored: String, current: String },

    #[error("Store operation timed out after {0} s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fail fast when a vector does not have the dimensionality the store expects.
pub fn ensure_dim(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}
