use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{AgentTimings, SelectorConfig, StatusKind};
use crate::dom::{ElementRef, PageDom, PageStatus};
use crate::error::{AgentError, Result};
use crate::protocol::*;
use crate::signal::CompletionSignal;

const INBOX_CAPACITY: usize = 32;

/// Builder for a page agent bound to one page.
///
/// The agent runs as its own task and is reached only through the
/// returned [`AgentHandle`]. It owns the per-submission state machine:
///
/// `idle → finding-input → typing → waiting-before-submit → submitting →
/// awaiting-start → awaiting-completion → idle`
///
/// A `Submit` is answered with [`AgentReply::Submitted`] once generation has
/// visibly started. Completion is reported later to the host as
/// [`HostRequest::MarkComplete`] (or [`HostRequest::MarkFailed`]).
pub struct PageAgent {
    page_id: PageId,
    dom: Arc<dyn PageDom>,
    host: mpsc::Sender<HostRequest>,
    selectors: Arc<SelectorConfig>,
    timings: AgentTimings,
}

struct AgentShared {
    page_id: PageId,
    dom: Arc<dyn PageDom>,
    host: mpsc::Sender<HostRequest>,
    selectors: Arc<SelectorConfig>,
    timings: AgentTimings,
    signal: CompletionSignal,
    phase: Mutex<AgentPhase>,
}

impl PageAgent {
    pub fn new(
        page_id: impl Into<PageId>,
        dom: Arc<dyn PageDom>,
        host: mpsc::Sender<HostRequest>,
    ) -> Self {
        Self {
            page_id: page_id.into(),
            dom,
            host,
            selectors: Arc::new(SelectorConfig::default()),
            timings: AgentTimings::default(),
        }
    }

    pub fn with_selectors(mut self, selectors: Arc<SelectorConfig>) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_timings(mut self, timings: AgentTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Start the agent task and return its handle.
    pub fn spawn(self) -> AgentHandle {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let shared = Arc::new(AgentShared {
            page_id: self.page_id.clone(),
            dom: self.dom,
            host: self.host,
            selectors: self.selectors,
            timings: self.timings,
            signal: CompletionSignal::new(),
            phase: Mutex::new(AgentPhase::Idle),
        });
        tokio::spawn(run_inbox(shared, rx));
        debug!(page_id = %self.page_id, "Page agent spawned");
        AgentHandle::new(self.page_id, tx)
    }
}

impl AgentShared {
    fn phase(&self) -> AgentPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: AgentPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
        debug!(page_id = %self.page_id, phase = phase.as_str(), "Agent phase");
    }

    /// Claim the agent for a new submission. `false` when one is in flight.
    fn try_begin(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != AgentPhase::Idle {
            return false;
        }
        *phase = AgentPhase::FindingInput;
        true
    }

    async fn status(&self) -> Result<PageStatus> {
        self.dom
            .status(
                &self.selectors.loading_selectors,
                &self.selectors.status_selectors,
                &self.selectors.error_selectors,
            )
            .await
    }

    /// Send a request to the host and wait for its acknowledgement.
    async fn request_host<F>(&self, build: F) -> bool
    where
        F: FnOnce(oneshot::Sender<bool>) -> HostRequest,
    {
        let (ack, rx) = oneshot::channel();
        if self.host.send(build(ack)).await.is_err() {
            return false;
        }
        matches!(
            timeout(self.timings.host_request_timeout, rx).await,
            Ok(Ok(true))
        )
    }
}

async fn run_inbox(shared: Arc<AgentShared>, mut rx: mpsc::Receiver<AgentMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            AgentMessage::GenerationComplete => {
                if !shared.signal.fire() {
                    debug!(page_id = %shared.page_id, "Completion signal arrived while not waiting");
                }
            }
            AgentMessage::Command { command, reply } => match command {
                AgentCommand::Ping => {
                    let result = match shared.dom.is_installed().await {
                        Ok(true) => Ok(AgentReply::Pong {
                            phase: shared.phase(),
                        }),
                        Ok(false) => Err(AgentError::ReceiverMissing),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
                AgentCommand::CheckLimit => {
                    let _ = reply.send(check_limit(&shared).await);
                }
                AgentCommand::Submit(job) => {
                    if !shared.try_begin() {
                        warn!(
                            page_id = %shared.page_id,
                            item_id = %job.item_id,
                            phase = shared.phase().as_str(),
                            "Submit rejected, agent busy"
                        );
                        let _ = reply.send(Err(AgentError::Busy));
                        continue;
                    }
                    tokio::spawn(run_submission(Arc::clone(&shared), job, reply));
                }
            },
        }
    }
    debug!(page_id = %shared.page_id, "Agent inbox closed");
}

async fn run_submission(shared: Arc<AgentShared>, job: SubmitJob, reply: ReplySender) {
    info!(page_id = %shared.page_id, item_id = %job.item_id, "Submitting prompt");

    if let Err(e) = submit_and_await_start(&shared, &job).await {
        warn!(page_id = %shared.page_id, item_id = %job.item_id, error = %e, "Submission failed");
        shared.set_phase(AgentPhase::Idle);
        let _ = reply.send(Err(e));
        return;
    }
    let _ = reply.send(Ok(AgentReply::Submitted));

    shared.set_phase(AgentPhase::AwaitingCompletion);
    let outcome = await_completion(&shared).await;
    shared.set_phase(AgentPhase::Idle);

    let item_id = job.item_id.clone();
    let acknowledged = match outcome {
        Ok(()) => {
            info!(page_id = %shared.page_id, item_id = %item_id, "Generation finished");
            shared
                .request_host(|ack| HostRequest::MarkComplete { item_id, ack })
                .await
        }
        Err(e) => {
            warn!(page_id = %shared.page_id, item_id = %item_id, error = %e, "Generation did not finish");
            let error = e.to_string();
            shared
                .request_host(|ack| HostRequest::MarkFailed {
                    item_id,
                    error,
                    ack,
                })
                .await
        }
    };
    if !acknowledged {
        warn!(page_id = %shared.page_id, item_id = %job.item_id, "Host did not acknowledge the outcome");
    }
}

async fn submit_and_await_start(shared: &AgentShared, job: &SubmitJob) -> Result<()> {
    let input = find_input(shared).await?;

    shared.set_phase(AgentPhase::Typing);
    type_prompt(shared, &input, &job.text).await?;

    shared.set_phase(AgentPhase::WaitingBeforeSubmit);
    sleep(shared.timings.pre_submit_delay).await;

    shared.set_phase(AgentPhase::Submitting);
    submit(shared, &input).await?;

    shared.set_phase(AgentPhase::AwaitingStart);
    await_start(shared).await
}

async fn find_input(shared: &AgentShared) -> Result<ElementRef> {
    let selectors = &shared.selectors.input_selectors;
    let wait = shared.timings.find_input_timeout;
    let deadline = Instant::now() + wait;

    loop {
        if let Some(element) = shared.dom.find_first_visible(selectors).await? {
            return Ok(element);
        }
        if Instant::now() >= deadline {
            return Err(AgentError::ElementNotFound(format!(
                "none of {} selectors matched a visible element within {:?}",
                selectors.len(),
                wait
            )));
        }
        sleep(shared.timings.poll_interval).await;
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

async fn type_prompt(shared: &AgentShared, input: &ElementRef, text: &str) -> Result<()> {
    for attempt in 1..=2 {
        shared.dom.set_value(input, text).await?;
        let current = shared.dom.read_value(input).await?;
        if same_text(&current, text) {
            return Ok(());
        }
        debug!(page_id = %shared.page_id, attempt, "Typed value did not stick");
    }
    Err(AgentError::SubmissionRejected(
        "prompt text did not persist in the input field".into(),
    ))
}

async fn submit(shared: &AgentShared, input: &ElementRef) -> Result<()> {
    let retries = shared.timings.submit_retries.max(1);
    let mut disabled_label = None;

    for attempt in 1..=retries {
        match shared
            .dom
            .find_submit_control(
                input,
                &shared.selectors.submit_texts,
                &shared.selectors.submit_labels,
            )
            .await?
        {
            Some(control) if control.enabled => {
                shared.dom.click(&control.element).await?;
                info!(page_id = %shared.page_id, label = %control.label, attempt, "Clicked submit control");
                return Ok(());
            }
            Some(control) => {
                debug!(page_id = %shared.page_id, label = %control.label, attempt, "Submit control disabled");
                disabled_label = Some(control.label);
            }
            None => {
                debug!(page_id = %shared.page_id, attempt, "No submit control found");
                disabled_label = None;
            }
        }
        if attempt < retries {
            sleep(shared.timings.submit_retry_delay).await;
        }
    }

    if let Some(label) = disabled_label {
        return Err(AgentError::SubmissionRejected(format!(
            "submit control '{}' still disabled after {} attempts",
            label, retries
        )));
    }

    info!(page_id = %shared.page_id, "No submit control, falling back to Enter key");
    shared.dom.press_enter(input).await?;
    sleep(shared.timings.poll_interval).await;

    if !shared.status().await?.loading && shared.dom.submit_form(input).await? {
        info!(page_id = %shared.page_id, "Dispatched form submit");
    }
    Ok(())
}

async fn await_start(shared: &AgentShared) -> Result<()> {
    let wait = shared.timings.start_timeout;
    let deadline = Instant::now() + wait;

    loop {
        let status = shared.status().await?;
        if let Some(error) = explicit_error(shared, &status) {
            return Err(AgentError::GenerationFailed(error));
        }
        let in_progress = status
            .status_text
            .as_deref()
            .map(|t| shared.selectors.classify_status(t) == StatusKind::InProgress)
            .unwrap_or(false);
        if status.loading || in_progress {
            debug!(page_id = %shared.page_id, "Generation started");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(AgentError::GenerationDidNotStart(wait));
        }
        sleep(shared.timings.poll_interval).await;
    }
}

/// Error text from an error element, or a status text classified as error.
fn explicit_error(shared: &AgentShared, status: &PageStatus) -> Option<String> {
    if let Some(text) = status.error_text.as_deref() {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }
    status
        .status_text
        .as_deref()
        .filter(|t| shared.selectors.classify_status(t) == StatusKind::Error)
        .map(|t| t.trim().to_string())
}

async fn await_completion(shared: &AgentShared) -> Result<()> {
    let listener = shared.signal.arm();
    let page_id = shared.page_id.clone();
    let monitoring = shared
        .request_host(|ack| HostRequest::StartNetworkMonitoring { page_id, ack })
        .await;

    let outcome = if monitoring {
        let hard_cap = shared.timings.completion_timeout;
        let signal_path = async {
            match timeout(hard_cap, listener.wait()).await {
                Ok(Ok(())) => Some(Ok(())),
                Ok(Err(_)) => None,
                Err(_) => Some(Err(AgentError::GenerationTimedOut(hard_cap))),
            }
        };

        tokio::select! {
            signalled = signal_path => match signalled {
                Some(result) => result,
                None => {
                    warn!(page_id = %shared.page_id, "Completion listener closed, falling back to DOM polling");
                    poll_completion(shared).await
                }
            },
            error = watch_for_error(shared) => Err(error),
        }
    } else {
        shared.signal.disarm();
        warn!(page_id = %shared.page_id, "Network monitor unavailable, falling back to DOM polling");
        poll_completion(shared).await
    };

    shared.signal.disarm();
    let page_id = shared.page_id.clone();
    shared
        .request_host(|ack| HostRequest::StopNetworkMonitoring { page_id, ack })
        .await;
    outcome
}

/// Resolves only when the page shows an explicit error.
async fn watch_for_error(shared: &AgentShared) -> AgentError {
    loop {
        sleep(shared.timings.poll_interval).await;
        match shared.status().await {
            Ok(status) => {
                if let Some(error) = explicit_error(shared, &status) {
                    return AgentError::GenerationFailed(error);
                }
            }
            Err(e) => debug!(page_id = %shared.page_id, error = %e, "Status probe failed"),
        }
    }
}

/// DOM-only completion detection: loading indicators gone (or a ready
/// status), confirmed again after the settle delay.
async fn poll_completion(shared: &AgentShared) -> Result<()> {
    let wait = shared.timings.fallback_timeout;
    let deadline = Instant::now() + wait;

    loop {
        if Instant::now() >= deadline {
            return Err(AgentError::GenerationTimedOut(wait));
        }

        let status = shared.status().await?;
        if let Some(error) = explicit_error(shared, &status) {
            return Err(AgentError::GenerationFailed(error));
        }
        let kind = status
            .status_text
            .as_deref()
            .map(|t| shared.selectors.classify_status(t))
            .unwrap_or(StatusKind::Unknown);

        if kind == StatusKind::Ready || (!status.loading && kind != StatusKind::InProgress) {
            sleep(shared.timings.settle_delay).await;
            let settled = shared.status().await?;
            if let Some(error) = explicit_error(shared, &settled) {
                return Err(AgentError::GenerationFailed(error));
            }
            if !settled.loading {
                return Ok(());
            }
        }

        sleep(shared.timings.poll_interval).await;
    }
}

async fn check_limit(shared: &AgentShared) -> Result<AgentReply> {
    let texts = shared
        .dom
        .visible_texts(&shared.selectors.rate_limit_selectors)
        .await?;
    let banner = texts
        .into_iter()
        .map(|t| t.trim().to_string())
        .find(|t| shared.selectors.is_rate_limit_text(t));

    Ok(AgentReply::Limit(match banner {
        Some(message) => {
            warn!(page_id = %shared.page_id, message = %message, "Usage limit banner found");
            LimitStatus {
                found: true,
                message: Some(message),
            }
        }
        None => LimitStatus::default(),
    }))
}
