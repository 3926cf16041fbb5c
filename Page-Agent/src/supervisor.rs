use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{AgentError, Result};
use crate::protocol::*;

/// Installs a fresh agent into a page and returns its handle.
#[async_trait]
pub trait AgentInjector: Send + Sync {
    async fn inject(&self, page_id: &str) -> Result<AgentHandle>;
}

/// Keeps one live agent per page and routes commands to it.
///
/// Liveness is established lazily: [`AgentSupervisor::ensure_ready`] probes
/// the registered agent and re-injects once when probing fails.
pub struct AgentSupervisor {
    config: SupervisorConfig,
    injector: Arc<dyn AgentInjector>,
    agents: Mutex<HashMap<PageId, AgentHandle>>,
}

impl AgentSupervisor {
    pub fn new(injector: Arc<dyn AgentInjector>, config: SupervisorConfig) -> Self {
        Self {
            config,
            injector,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Register (or replace) the agent for its page.
    pub fn register(&self, handle: AgentHandle) {
        let page_id = handle.page_id().to_string();
        let previous = self
            .agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.clone(), handle);
        if previous.is_some() {
            debug!(page_id = %page_id, "Agent handle replaced");
        }
    }

    pub fn handle(&self, page_id: &str) -> Option<AgentHandle> {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .cloned()
    }

    /// Forward the completion signal to the page's agent.
    pub fn signal_complete(&self, page_id: &str) -> bool {
        match self.handle(page_id) {
            Some(handle) => handle.signal_complete(),
            None => false,
        }
    }

    async fn ping_once(&self, page_id: &str) -> Result<AgentPhase> {
        let handle = self.handle(page_id).ok_or(AgentError::ReceiverMissing)?;
        match handle
            .request(AgentCommand::Ping, self.config.ping_timeout)
            .await?
        {
            AgentReply::Pong { phase } => Ok(phase),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Make sure a responsive agent is running in `page_id`.
    ///
    /// Pings every `ping_interval` until `probe_budget` is spent, then
    /// re-injects once and pings again after `inject_settle`.
    pub async fn ensure_ready(&self, page_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.probe_budget;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.ping_once(page_id).await {
                Ok(phase) => {
                    debug!(page_id, phase = phase.as_str(), attempts, "Agent ready");
                    return Ok(());
                }
                Err(e) => debug!(page_id, attempt = attempts, error = %e, "Agent ping failed"),
            }
            if Instant::now() + self.config.ping_interval > deadline {
                break;
            }
            sleep(self.config.ping_interval).await;
        }

        info!(page_id, attempts, "Agent not responding, re-injecting");
        let handle = self.injector.inject(page_id).await.map_err(|e| {
            AgentError::AgentUnavailable(format!("re-injection into {} failed: {}", page_id, e))
        })?;
        self.register(handle);
        sleep(self.config.inject_settle).await;

        match self.ping_once(page_id).await {
            Ok(_) => {
                info!(page_id, "Agent re-injected");
                Ok(())
            }
            Err(e) => {
                warn!(page_id, error = %e, "Agent still unresponsive after re-injection");
                Err(AgentError::AgentUnavailable(format!(
                    "no response from {} after re-injection ({})",
                    page_id, e
                )))
            }
        }
    }

    /// Send `command`, re-establishing the agent when the receiving end is
    /// missing. Backs off `attempt × retry_base_delay` between attempts. Any
    /// other error is returned immediately.
    pub async fn send_with_retry(
        &self,
        page_id: &str,
        command: AgentCommand,
        max_attempts: u32,
    ) -> Result<AgentReply> {
        let max_attempts = max_attempts.max(1);
        let timeout = self.timeout_for(&command);

        for attempt in 1..=max_attempts {
            let result = match self.handle(page_id) {
                Some(handle) => handle.request(command.clone(), timeout).await,
                None => Err(AgentError::ReceiverMissing),
            };

            match result {
                Err(AgentError::ReceiverMissing) if attempt < max_attempts => {
                    warn!(
                        page_id,
                        attempt,
                        command = command.name(),
                        "Receiving end missing, re-establishing agent"
                    );
                    self.ensure_ready(page_id).await?;
                    sleep(self.config.retry_base_delay * attempt).await;
                }
                Err(AgentError::ReceiverMissing) => {
                    return Err(AgentError::AgentUnavailable(format!(
                        "{} to {} failed after {} attempts",
                        command.name(),
                        page_id,
                        max_attempts
                    )));
                }
                other => return other,
            }
        }

        Err(AgentError::ReceiverMissing)
    }

    fn timeout_for(&self, command: &AgentCommand) -> Duration {
        match command {
            AgentCommand::Submit(_) => self.config.submit_timeout,
            AgentCommand::Ping => self.config.ping_timeout,
            AgentCommand::CheckLimit => self.config.command_timeout,
        }
    }

    pub async fn ping(&self, page_id: &str) -> Result<AgentPhase> {
        self.ping_once(page_id).await
    }

    /// Submit one prompt. Resolves once generation has started.
    pub async fn submit(&self, page_id: &str, job: SubmitJob) -> Result<()> {
        match self
            .send_with_retry(page_id, AgentCommand::Submit(job), 3)
            .await?
        {
            AgentReply::Submitted => Ok(()),
            other => Err(unexpected("submit", &other)),
        }
    }

    pub async fn check_limit(&self, page_id: &str) -> Result<LimitStatus> {
        match self
            .send_with_retry(page_id, AgentCommand::CheckLimit, 3)
            .await?
        {
            AgentReply::Limit(status) => Ok(status),
            other => Err(unexpected("checkLimit", &other)),
        }
    }
}

fn unexpected(command: &str, reply: &AgentReply) -> AgentError {
    AgentError::Dom(format!("unexpected reply to {}: {:?}", command, reply))
}
