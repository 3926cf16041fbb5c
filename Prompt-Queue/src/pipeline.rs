use std::sync::Arc;

use async_trait::async_trait;
use page_agent::{AgentError, AgentSupervisor, SubmitJob};
use tracing::{debug, info, warn};

use crate::types::PromptItem;

const DEFAULT_LIMIT_MESSAGE: &str = "Usage limit reached. Try again later";

/// Hands one item to the page. `Ok` means generation started; the final
/// outcome arrives later through the completion notifications.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, item: &PromptItem) -> page_agent::Result<()>;
}

/// Submits through the agent supervisor: make sure the agent answers,
/// refuse to submit under a usage limit, then send the prompt.
pub struct AgentSubmitter {
    supervisor: Arc<AgentSupervisor>,
    page_id: String,
}

impl AgentSubmitter {
    pub fn new(supervisor: Arc<AgentSupervisor>, page_id: impl Into<String>) -> Self {
        Self {
            supervisor,
            page_id: page_id.into(),
        }
    }
}

#[async_trait]
impl Submitter for AgentSubmitter {
    async fn submit(&self, item: &PromptItem) -> page_agent::Result<()> {
        debug!(item_id = %item.id, page_id = %self.page_id, "Preparing agent");
        self.supervisor.ensure_ready(&self.page_id).await?;

        let limit = self.supervisor.check_limit(&self.page_id).await?;
        if limit.found {
            let message = limit
                .message
                .unwrap_or_else(|| DEFAULT_LIMIT_MESSAGE.to_string());
            warn!(item_id = %item.id, message = %message, "Usage limit banner present");
            return Err(AgentError::RateLimited(message));
        }

        self.supervisor
            .submit(
                &self.page_id,
                SubmitJob {
                    item_id: item.id.clone(),
                    text: item.text.clone(),
                },
            )
            .await?;
        info!(item_id = %item.id, page_id = %self.page_id, "Prompt submitted");
        Ok(())
    }
}
