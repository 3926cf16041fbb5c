use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::monitor::NetworkMonitor;
use crate::protocol::HostRequest;
use crate::supervisor::AgentSupervisor;

/// Receives the final outcome of a submission. Implemented by the queue.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// Returns whether the notification was accepted.
    async fn mark_complete(&self, item_id: &str) -> bool;
    async fn mark_failed(&self, item_id: &str, error: &str) -> bool;
}

/// Host side of the agent protocol.
///
/// Serves [`HostRequest`]s from every agent: starts and stops network
/// monitoring (routing the monitor's completion back to the page's agent)
/// and forwards outcomes to the [`CompletionSink`].
pub struct HostBridge {
    monitor: NetworkMonitor,
    agents: Arc<AgentSupervisor>,
    sink: Arc<dyn CompletionSink>,
}

impl HostBridge {
    pub fn new(
        monitor: NetworkMonitor,
        agents: Arc<AgentSupervisor>,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            monitor,
            agents,
            sink,
        }
    }

    /// Serve requests until every sender is dropped.
    pub fn spawn(self, mut rx: mpsc::Receiver<HostRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                self.handle(request).await;
            }
            debug!("Host bridge closed");
        })
    }

    async fn handle(&self, request: HostRequest) {
        match request {
            HostRequest::StartNetworkMonitoring { page_id, ack } => {
                if self.agents.handle(&page_id).is_none() {
                    warn!(page_id = %page_id, "Monitoring requested for unknown page");
                    let _ = ack.send(false);
                    return;
                }
                let agents = Arc::clone(&self.agents);
                let target = page_id.clone();
                self.monitor.start_monitoring(&page_id, move || {
                    if !agents.signal_complete(&target) {
                        warn!(page_id = %target, "Agent gone before completion signal");
                    }
                });
                let _ = ack.send(true);
            }
            HostRequest::StopNetworkMonitoring { page_id, ack } => {
                self.monitor.stop_monitoring(&page_id);
                let _ = ack.send(true);
            }
            HostRequest::MarkComplete { item_id, ack } => {
                let accepted = self.sink.mark_complete(&item_id).await;
                let _ = ack.send(accepted);
            }
            HostRequest::MarkFailed {
                item_id,
                error,
                ack,
            } => {
                let accepted = self.sink.mark_failed(&item_id, &error).await;
                let _ = ack.send(accepted);
            }
        }
    }
}
