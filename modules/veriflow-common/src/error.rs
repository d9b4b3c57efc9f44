use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("{service} failed: {message}")]
    Collaborator {
        service: &'static str,
        message: String,
        transient: bool,
    },

    #[error("Content not valid for fact check: {0}")]
    ContentInvalid(String),

    #[error("Exceeded maximum retry attempts ({0})")]
    RetryBudgetExhausted(u32),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn collaborator(service: &'static str, message: impl Into<String>, transient: bool) -> Self {
        PipelineError::Collaborator {
            service,
            message: message.into(),
            transient,
        }
    }

    /// Transient errors are worth retrying at the call site or by redelivery.
    /// Content and budget errors are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Store(_) | PipelineError::Broker(_) | PipelineError::Timeout { .. } => true,
            PipelineError::Collaborator { transient, .. } => *transient,
            PipelineError::ContentInvalid(_)
            | PipelineError::RetryBudgetExhausted(_)
            | PipelineError::Serialization(_)
            | PipelineError::Config(_) => false,
            PipelineError::Anyhow(e) => e
                .downcast_ref::<PipelineError>()
                .map(PipelineError::is_transient)
                .unwrap_or(true),
        }
    }
}
