use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("call log entry not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("backend error: {0}")]
    Backend(String),
}
