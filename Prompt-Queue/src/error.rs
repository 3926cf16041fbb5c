use page_agent::AgentError;
use prompt_gen::GenError;
use thiserror::Error;

/// Errors that can occur in the prompt queue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Prompt not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Prompt generation failed: {0}")]
    Generation(#[from] GenError),

    #[error("Event emission failed: {0}")]
    Event(String),

    #[error("Queue is not running")]
    NotRunning,

    #[error("Queue is already running")]
    AlreadyRunning,

    #[error("Queue orchestrator has shut down")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Other(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
