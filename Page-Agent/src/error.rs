use std::time::Duration;

use thiserror::Error;

/// Errors raised while driving a page or talking to its agent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// No prompt field matched any configured selector within the wait window.
    #[error("Prompt input not found: {0}")]
    ElementNotFound(String),

    /// The submit control stayed disabled, or the typed text did not stick.
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// No loading indicator appeared after submitting.
    #[error("Generation did not start within {0:?}")]
    GenerationDidNotStart(Duration),

    /// Completion was never observed before the hard timeout.
    #[error("Generation timed out after {0:?}")]
    GenerationTimedOut(Duration),

    /// The agent could not be reached or re-injected. Reload the page.
    #[error("Page agent unavailable: {0}. Reload the target page and try again")]
    AgentUnavailable(String),

    /// The target tool reports a usage limit.
    #[error("{0}")]
    RateLimited(String),

    /// The target tool reported an error status.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// A submission is already in flight on this agent.
    #[error("Agent is busy with another submission")]
    Busy,

    /// The receiving side of a message is gone (agent task ended or the
    /// page-resident helper vanished after a navigation).
    #[error("Receiving end does not exist")]
    ReceiverMissing,

    /// A DOM operation failed inside the page.
    #[error("DOM operation failed: {0}")]
    Dom(String),
}

impl AgentError {
    /// Errors that should stop the whole queue rather than fail one item.
    pub fn halts_queue(&self) -> bool {
        matches!(
            self,
            AgentError::RateLimited(_) | AgentError::AgentUnavailable(_)
        )
    }
}

impl From<chromiumoxide::error::CdpError> for AgentError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AgentError::Dom(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentError>;
