//! Messages exchanged between the host context and page agents.
//!
//! Both directions are plain `tokio::sync::mpsc` channels. Requests that
//! expect an answer carry a `oneshot` reply sender; the sender side always
//! bounds its wait with a timeout.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{AgentError, Result};

/// Identifies one target page instance (a browser tab).
pub type PageId = String;

/// Submission state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentPhase {
    Idle,
    FindingInput,
    Typing,
    WaitingBeforeSubmit,
    Submitting,
    AwaitingStart,
    AwaitingCompletion,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPhase::Idle => "idle",
            AgentPhase::FindingInput => "finding-input",
            AgentPhase::Typing => "typing",
            AgentPhase::WaitingBeforeSubmit => "waiting-before-submit",
            AgentPhase::Submitting => "submitting",
            AgentPhase::AwaitingStart => "awaiting-start",
            AgentPhase::AwaitingCompletion => "awaiting-completion",
        }
    }
}

/// One prompt to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJob {
    pub item_id: String,
    pub text: String,
}

/// Result of probing the page for a usage-limit banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LimitStatus {
    pub found: bool,
    pub message: Option<String>,
}

/// Commands the host sends to an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    Ping,
    Submit(SubmitJob),
    CheckLimit,
}

impl AgentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::Ping => "ping",
            AgentCommand::Submit(_) => "submit",
            AgentCommand::CheckLimit => "checkLimit",
        }
    }
}

/// Successful replies from an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentReply {
    Pong { phase: AgentPhase },
    /// The prompt was submitted and generation started. Not "finished".
    Submitted,
    Limit(LimitStatus),
}

pub type ReplySender = oneshot::Sender<Result<AgentReply>>;

/// Everything an agent's inbox can receive.
#[derive(Debug)]
pub enum AgentMessage {
    Command {
        command: AgentCommand,
        reply: ReplySender,
    },
    /// The host observed generation finished for this page.
    GenerationComplete,
}

/// Requests an agent sends to the host process.
#[derive(Debug)]
pub enum HostRequest {
    StartNetworkMonitoring {
        page_id: PageId,
        ack: oneshot::Sender<bool>,
    },
    StopNetworkMonitoring {
        page_id: PageId,
        ack: oneshot::Sender<bool>,
    },
    MarkComplete {
        item_id: String,
        ack: oneshot::Sender<bool>,
    },
    MarkFailed {
        item_id: String,
        error: String,
        ack: oneshot::Sender<bool>,
    },
}

/// Cloneable sender half of an agent's inbox.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    page_id: PageId,
    tx: mpsc::Sender<AgentMessage>,
}

impl AgentHandle {
    pub fn new(page_id: impl Into<PageId>, tx: mpsc::Sender<AgentMessage>) -> Self {
        Self {
            page_id: page_id.into(),
            tx,
        }
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Whether the agent's task has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Deliver a command and wait up to `timeout` for its reply.
    ///
    /// A closed inbox or a dropped reply sender is reported as
    /// [`AgentError::ReceiverMissing`]; an elapsed timeout as
    /// [`AgentError::AgentUnavailable`].
    pub async fn request(
        &self,
        command: AgentCommand,
        timeout: std::time::Duration,
    ) -> Result<AgentReply> {
        let name = command.name();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentMessage::Command { command, reply })
            .await
            .map_err(|_| AgentError::ReceiverMissing)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AgentError::ReceiverMissing),
            Err(_) => Err(AgentError::AgentUnavailable(format!(
                "no reply to {} within {:?}",
                name, timeout
            ))),
        }
    }

    /// Deliver the completion signal. Returns `false` if the agent is gone.
    pub fn signal_complete(&self) -> bool {
        self.tx.try_send(AgentMessage::GenerationComplete).is_ok()
    }
}
