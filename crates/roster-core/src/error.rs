use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("embedding has {actual} dimensions, store expects {expected}")]
    InvalidDimension { expected: usize, actual: usize },
    #[error("embedding is empty, all-zero or contains non-finite values")]
    DegenerateEmbedding,
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("invalid label: {0}")]
    InvalidLabel(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("corrupt stored record: {0}")]
    CorruptRecord(String),
}

impl RosterError {
    /// True for malformed input that will never succeed on resubmission.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RosterError::InvalidDimension { .. } | RosterError::DegenerateEmbedding
        )
    }
}
