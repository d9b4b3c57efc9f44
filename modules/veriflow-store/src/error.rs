use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Verification not found: {0}")]
    NotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for veriflow_common::PipelineError {
    fn from(e: StoreError) -> Self {
        veriflow_common::PipelineError::Store(e.to_string())
    }
}
