use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    /// The persistence layer did not answer in time; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
