use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use page_agent::CompletionSink;
use prompt_gen::{MediaKind, PromptGenerator};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::events::*;
use crate::pipeline::Submitter;
use crate::recovery::recover_interrupted;
use crate::store::PromptStore;
use crate::types::{recount, ItemPatch, PromptItem, PromptStatus, QueueState, StatePatch};

/// Reply to every UI command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        Err(QueueError::Other(
            self.error.unwrap_or_else(|| "command failed".into()),
        ))
    }
}

impl From<Result<()>> for CommandResult {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start(Reply<CommandResult>),
    Pause(Reply<CommandResult>),
    Resume(Reply<CommandResult>),
    Stop(Reply<CommandResult>),
    ProcessSelected {
        ids: Vec<String>,
        reply: Reply<CommandResult>,
    },
    State(Reply<Result<QueueState>>),
    MarkComplete {
        item_id: String,
        reply: Reply<bool>,
    },
    MarkFailed {
        item_id: String,
        error: String,
        reply: Reply<bool>,
    },
    ProcessNext {
        token: u64,
    },
    PipelineFinished {
        item_id: String,
        result: page_agent::Result<()>,
    },
    GenerationFinished {
        result: prompt_gen::Result<Vec<String>>,
        media_kind: MediaKind,
    },
}

/// Builds and spawns the queue actor.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(SqliteStore::open(Some(Path::new("prompts.db")))?);
/// let submitter = Arc::new(AgentSubmitter::new(supervisor, page_id));
///
/// let queue = QueueOrchestrator::new(config, store, submitter)
///     .with_generator(Arc::new(OllamaGenerator::new(GeneratorConfig::default())?))
///     .with_events(Arc::new(events.clone()))
///     .spawn()
///     .await?;
///
/// queue.start().await.into_result()?;
/// ```
pub struct QueueOrchestrator {
    config: QueueConfig,
    store: Arc<dyn PromptStore>,
    submitter: Arc<dyn Submitter>,
    generator: Option<Arc<dyn PromptGenerator>>,
    events: Arc<dyn EventSink>,
}

impl QueueOrchestrator {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn PromptStore>,
        submitter: Arc<dyn Submitter>,
    ) -> Self {
        Self {
            config,
            store,
            submitter,
            generator: None,
            events: Arc::new(NoopSink),
        }
    }

    /// Enable auto-regeneration (also needs `config.auto_generate`).
    pub fn with_generator(mut self, generator: Arc<dyn PromptGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Run crash recovery, then start the actor task.
    pub async fn spawn(self) -> Result<QueueHandle> {
        let requeued = recover_interrupted(self.store.as_ref()).await?;
        if requeued > 0 {
            info!(requeued, "Recovered interrupted prompts");
        }

        let (tx, rx) = mpsc::channel(64);
        let actor = QueueActor {
            config: self.config,
            store: self.store,
            submitter: self.submitter,
            generator: self.generator,
            events: self.events,
            tx: tx.downgrade(),
            timer: None,
            timer_token: 0,
            selection: None,
            in_flight: None,
            generating: false,
        };
        tokio::spawn(actor.run(rx));

        Ok(QueueHandle { tx })
    }
}

/// Cloneable handle to a running queue actor.
///
/// Dropping every handle shuts the actor down.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Command>,
}

impl QueueHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    async fn command(&self, build: impl FnOnce(Reply<CommandResult>) -> Command) -> CommandResult {
        self.call(build)
            .await
            .unwrap_or_else(CommandResult::failed)
    }

    /// Start processing pending items in list order. No-op when running.
    pub async fn start(&self) -> CommandResult {
        self.command(Command::Start).await
    }

    /// Stop scheduling new items. The in-flight item is untouched.
    pub async fn pause(&self) -> CommandResult {
        self.command(Command::Pause).await
    }

    pub async fn resume(&self) -> CommandResult {
        self.command(Command::Resume).await
    }

    /// Stop the queue. Item statuses are left as they are.
    pub async fn stop(&self) -> CommandResult {
        self.command(Command::Stop).await
    }

    /// Run only the given pending items, in the given order, then stop.
    pub async fn process_selected(&self, ids: Vec<String>) -> CommandResult {
        self.command(|reply| Command::ProcessSelected { ids, reply })
            .await
    }

    pub async fn state(&self) -> Result<QueueState> {
        self.call(Command::State).await?
    }
}

#[async_trait]
impl CompletionSink for QueueHandle {
    async fn mark_complete(&self, item_id: &str) -> bool {
        let item_id = item_id.to_string();
        self.call(|reply| Command::MarkComplete { item_id, reply })
            .await
            .unwrap_or(false)
    }

    async fn mark_failed(&self, item_id: &str, error: &str) -> bool {
        let item_id = item_id.to_string();
        let error = error.to_string();
        self.call(|reply| Command::MarkFailed {
            item_id,
            error,
            reply,
        })
        .await
        .unwrap_or(false)
    }
}

/// Sole owner of every queue mutation.
struct QueueActor {
    config: QueueConfig,
    store: Arc<dyn PromptStore>,
    submitter: Arc<dyn Submitter>,
    generator: Option<Arc<dyn PromptGenerator>>,
    events: Arc<dyn EventSink>,
    tx: mpsc::WeakSender<Command>,
    timer: Option<JoinHandle<()>>,
    /// Only a `ProcessNext` carrying the current token is acted on.
    timer_token: u64,
    /// Remaining ids of a `process_selected` run.
    selection: Option<VecDeque<String>>,
    in_flight: Option<String>,
    generating: bool,
}

impl QueueActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        self.cancel_timer();
        debug!("Queue actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.start().await.into());
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause().await.into());
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume().await.into());
            }
            Command::Stop(reply) => {
                let _ = reply.send(self.stop().await.into());
            }
            Command::ProcessSelected { ids, reply } => {
                let _ = reply.send(self.process_selected(ids).await.into());
            }
            Command::State(reply) => {
                let _ = reply.send(self.store.queue_state().await);
            }
            Command::MarkComplete { item_id, reply } => {
                let accepted = self
                    .mark_complete(&item_id)
                    .await
                    .unwrap_or_else(|e| {
                        error!(item_id = %item_id, error = %e, "Failed to record completion");
                        false
                    });
                let _ = reply.send(accepted);
            }
            Command::MarkFailed {
                item_id,
                error,
                reply,
            } => {
                let accepted = self
                    .mark_failed(&item_id, &error)
                    .await
                    .unwrap_or_else(|e| {
                        error!(item_id = %item_id, error = %e, "Failed to record failure");
                        false
                    });
                let _ = reply.send(accepted);
            }
            Command::ProcessNext { token } => {
                if token != self.timer_token {
                    debug!(token, "Ignoring cancelled timer");
                    return;
                }
                self.timer = None;
                let outcome = self.process_next().await;
                log_failure("process next prompt", outcome);
            }
            Command::PipelineFinished { item_id, result } => {
                let outcome = self.on_pipeline_finished(item_id, result).await;
                log_failure("handle submission result", outcome);
            }
            Command::GenerationFinished { result, media_kind } => {
                let outcome = self.on_generation_finished(result, media_kind).await;
                log_failure("handle generated batch", outcome);
            }
        }
    }

    fn emit(&self, event: QueueEvent) {
        if let Err(e) = self.events.emit(&event) {
            warn!(event = event.name(), error = %e, "Failed to emit queue event");
        }
    }

    /// Recount, write the counters along with `patch`, publish the result.
    async fn commit_state(&self, mut patch: StatePatch) -> Result<QueueState> {
        let counts = recount(&self.store.items().await?);
        patch.processed_count = Some(counts.processed);
        patch.total_count = Some(counts.total);
        let state = self.store.set_queue_state(patch).await?;
        self.emit(QueueEvent::StateChanged(StateChangedEvent {
            state: state.clone(),
            counts,
        }));
        Ok(state)
    }

    async fn find_item(&self, id: &str) -> Result<Option<PromptItem>> {
        Ok(self.store.items().await?.into_iter().find(|i| i.id == id))
    }

    fn running_patch() -> StatePatch {
        StatePatch {
            is_running: Some(true),
            is_paused: Some(false),
            queue_start_time: Some(Some(chrono::Utc::now().to_rfc3339())),
            last_error: Some(None),
            ..StatePatch::default()
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.store.queue_state().await?.is_running {
            debug!("Start ignored, queue already running");
            return Ok(());
        }
        self.selection = None;
        let state = self.commit_state(Self::running_patch()).await?;
        info!(total = state.total_count, "Queue started");
        self.process_next().await
    }

    async fn process_selected(&mut self, ids: Vec<String>) -> Result<()> {
        if self.store.queue_state().await?.is_running {
            return Err(QueueError::AlreadyRunning);
        }
        info!(count = ids.len(), "Processing selected prompts");
        self.selection = Some(ids.into());
        self.commit_state(Self::running_patch()).await?;
        self.process_next().await
    }

    async fn pause(&mut self) -> Result<()> {
        let state = self.store.queue_state().await?;
        if !state.is_running {
            return Err(QueueError::NotRunning);
        }
        if state.is_paused {
            return Ok(());
        }
        self.cancel_timer();
        self.commit_state(StatePatch {
            is_paused: Some(true),
            ..StatePatch::default()
        })
        .await?;
        info!(in_flight = ?self.in_flight, "Queue paused");
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        let state = self.store.queue_state().await?;
        if !state.is_running {
            return Err(QueueError::NotRunning);
        }
        if !state.is_paused {
            return Ok(());
        }
        self.commit_state(StatePatch {
            is_paused: Some(false),
            ..StatePatch::default()
        })
        .await?;
        info!("Queue resumed");
        self.process_next().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel_timer();
        self.selection = None;
        self.commit_state(StatePatch::stopped()).await?;
        info!(in_flight = ?self.in_flight, "Queue stopped");
        Ok(())
    }

    /// Stop with a surfaced error. Used for rate limits, an unreachable
    /// agent and failed regeneration.
    async fn halt(&mut self, reason: String) -> Result<()> {
        self.cancel_timer();
        self.selection = None;
        let mut patch = StatePatch::stopped();
        patch.last_error = Some(Some(reason.clone()));
        self.commit_state(patch).await?;
        warn!(reason = %reason, "Queue halted");
        self.emit(QueueEvent::QueueHalted(QueueHaltedEvent { reason }));
        Ok(())
    }

    /// Pop selection ids until one names a pending item.
    fn next_selected(&mut self, items: &[PromptItem]) -> Option<PromptItem> {
        let selection = self.selection.as_mut()?;
        while let Some(id) = selection.pop_front() {
            match items.iter().find(|i| i.id == id) {
                Some(item) if item.status == PromptStatus::Pending => return Some(item.clone()),
                Some(item) => {
                    warn!(item_id = %id, status = item.status.as_str(), "Skipping selected prompt that is not pending")
                }
                None => warn!(item_id = %id, "Skipping unknown selected prompt"),
            }
        }
        None
    }

    async fn process_next(&mut self) -> Result<()> {
        let state = self.store.queue_state().await?;
        if !state.is_running || state.is_paused {
            debug!(
                running = state.is_running,
                paused = state.is_paused,
                "Not picking next prompt"
            );
            return Ok(());
        }
        if let Some(id) = &self.in_flight {
            debug!(item_id = %id, "Prompt still in flight");
            return Ok(());
        }
        if self.generating {
            debug!("Waiting for generated batch");
            return Ok(());
        }

        let items = self.store.items().await?;
        let next = if self.selection.is_some() {
            match self.next_selected(&items) {
                Some(item) => item,
                None => {
                    info!("Selected prompts processed");
                    return self.stop().await;
                }
            }
        } else {
            match items.into_iter().find(|i| i.status == PromptStatus::Pending) {
                Some(item) => item,
                None => return self.handle_empty_queue().await,
            }
        };

        self.begin(next).await
    }

    async fn begin(&mut self, item: PromptItem) -> Result<()> {
        self.cancel_timer();
        let item = self
            .store
            .update_item(&item.id, ItemPatch::processing())
            .await?;
        let committed = self
            .commit_state(StatePatch {
                current_prompt_id: Some(Some(item.id.clone())),
                ..StatePatch::default()
            })
            .await;
        if let Err(e) = committed {
            self.release(&item.id).await;
            return Err(e);
        }
        self.in_flight = Some(item.id.clone());
        info!(item_id = %item.id, media_kind = item.media_kind.as_str(), "Processing prompt");
        self.emit(QueueEvent::ItemStarted(ItemStartedEvent {
            item_id: item.id.clone(),
        }));

        let submitter = Arc::clone(&self.submitter);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = submitter.submit(&item).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx
                    .send(Command::PipelineFinished {
                        item_id: item.id,
                        result,
                    })
                    .await;
            }
        });
        Ok(())
    }

    /// Return an item that never reached the submitter to `pending`.
    async fn release(&self, item_id: &str) {
        match self.store.update_item(item_id, ItemPatch::pending()).await {
            Ok(_) => warn!(item_id, "Prompt returned to pending"),
            Err(e) => error!(item_id, error = %e, "Failed to return prompt to pending"),
        }
    }

    async fn on_pipeline_finished(
        &mut self,
        item_id: String,
        result: page_agent::Result<()>,
    ) -> Result<()> {
        if self.in_flight.as_deref() != Some(item_id.as_str()) {
            debug!(item_id = %item_id, "Submission result for prompt no longer in flight");
            return Ok(());
        }

        match result {
            Ok(()) => {
                debug!(item_id = %item_id, "Generation started, awaiting completion");
                Ok(())
            }
            Err(e) if e.halts_queue() => {
                self.in_flight = None;
                self.store
                    .update_item(&item_id, ItemPatch::pending())
                    .await?;
                error!(item_id = %item_id, error = %e, "Submission halted the queue");
                self.halt(e.to_string()).await
            }
            Err(e) => {
                self.in_flight = None;
                warn!(item_id = %item_id, error = %e, "Submission failed");
                let recorded = self.record_failure(&item_id, &e.to_string()).await;
                self.schedule_from_store().await?;
                recorded
            }
        }
    }

    async fn record_failure(&mut self, item_id: &str, error: &str) -> Result<()> {
        let Some(item) = self.find_item(item_id).await? else {
            return Err(QueueError::NotFound(item_id.to_string()));
        };
        self.store
            .update_item(item_id, ItemPatch::failed(&item, error))
            .await?;
        self.emit(QueueEvent::ItemFailed(ItemFailedEvent {
            item_id: item_id.to_string(),
            error: error.to_string(),
        }));
        self.commit_state(self.clear_current(item_id).await?).await?;
        Ok(())
    }

    /// Patch clearing `current_prompt_id` when it names `item_id`.
    async fn clear_current(&self, item_id: &str) -> Result<StatePatch> {
        let state = self.store.queue_state().await?;
        let mut patch = StatePatch::default();
        if state.current_prompt_id.as_deref() == Some(item_id) {
            patch.current_prompt_id = Some(None);
        }
        Ok(patch)
    }

    /// Accepts a notification only for an item currently `processing`.
    async fn processing_item(&self, item_id: &str) -> Result<Option<PromptItem>> {
        match self.find_item(item_id).await? {
            Some(item) if item.status == PromptStatus::Processing => Ok(Some(item)),
            Some(item) => {
                warn!(item_id = %item_id, status = item.status.as_str(), "Ignoring notification for prompt that is not processing");
                Ok(None)
            }
            None => {
                warn!(item_id = %item_id, "Ignoring notification for unknown prompt");
                Ok(None)
            }
        }
    }

    async fn mark_complete(&mut self, item_id: &str) -> Result<bool> {
        let Some(item) = self.processing_item(item_id).await? else {
            return Ok(false);
        };
        let item = self
            .store
            .update_item(item_id, ItemPatch::completed(&item))
            .await?;
        if self.in_flight.as_deref() == Some(item_id) {
            self.in_flight = None;
        }
        info!(item_id = %item_id, duration_ms = ?item.duration_ms, "Prompt completed");
        self.emit(QueueEvent::ItemCompleted(ItemCompletedEvent {
            item_id: item_id.to_string(),
            duration_ms: item.duration_ms,
        }));

        let committed = match self.clear_current(item_id).await {
            Ok(patch) => self.commit_state(patch).await,
            Err(e) => Err(e),
        };
        match committed {
            Ok(state) => self.schedule_next(&state),
            Err(e) => {
                error!(item_id = %item_id, error = %e, "Failed to update queue record");
                self.schedule_from_store().await?;
            }
        }
        Ok(true)
    }

    async fn mark_failed(&mut self, item_id: &str, error: &str) -> Result<bool> {
        if self.processing_item(item_id).await?.is_none() {
            return Ok(false);
        }
        if self.in_flight.as_deref() == Some(item_id) {
            self.in_flight = None;
        }
        warn!(item_id = %item_id, error = %error, "Prompt failed after submission");
        let recorded = self.record_failure(item_id, error).await;
        self.schedule_from_store().await?;
        recorded.map(|()| true)
    }

    /// Arm the pacing timer. Does nothing once the queue is stopped or paused.
    fn schedule_next(&mut self, state: &QueueState) {
        if !state.is_running || state.is_paused {
            debug!(
                running = state.is_running,
                paused = state.is_paused,
                "Not scheduling next prompt"
            );
            return;
        }
        self.cancel_timer();
        let delay = self.config.next_delay();
        let token = self.timer_token;
        let tx = self.tx.clone();
        debug!(delay_ms = delay.as_millis() as u64, "Next prompt scheduled");
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::ProcessNext { token }).await;
            }
        }));
    }

    async fn schedule_from_store(&mut self) -> Result<()> {
        let state = self.store.queue_state().await?;
        self.schedule_next(&state);
        Ok(())
    }

    fn cancel_timer(&mut self) {
        self.timer_token += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    async fn handle_empty_queue(&mut self) -> Result<()> {
        let auto = self
            .config
            .auto_generate
            .clone()
            .filter(|auto| auto.is_valid());
        let (Some(auto), Some(generator)) = (auto, self.generator.clone()) else {
            info!("No pending prompts, stopping queue");
            return self.stop().await;
        };

        let finished: Vec<String> = self
            .store
            .items()
            .await?
            .into_iter()
            .filter(|i| i.status.is_finished())
            .map(|i| i.id)
            .collect();
        if !finished.is_empty() {
            let moved = self.store.move_to_history(&finished).await?;
            info!(moved, "Archived finished prompts");
        }
        self.commit_state(StatePatch::default()).await?;

        info!(count = auto.count, context = %auto.context, "Generating new prompt batch");
        self.generating = true;
        let request = auto.request();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = generator.generate(&request).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx
                    .send(Command::GenerationFinished {
                        result,
                        media_kind: request.media_kind,
                    })
                    .await;
            }
        });
        Ok(())
    }

    async fn on_generation_finished(
        &mut self,
        result: prompt_gen::Result<Vec<String>>,
        media_kind: MediaKind,
    ) -> Result<()> {
        self.generating = false;
        let running = self.store.queue_state().await?.is_running;
        let prompts = match result {
            Ok(prompts) if !prompts.is_empty() => prompts,
            Ok(_) if !running => {
                debug!("Empty batch after the queue stopped");
                return Ok(());
            }
            Ok(_) => return self.halt("Prompt generation returned no prompts".into()).await,
            Err(e) if !running => {
                warn!(error = %e, "Generation failed after the queue stopped");
                return Ok(());
            }
            Err(e) => {
                let e = QueueError::from(e);
                error!(error = %e, "Auto-generation failed");
                return self.halt(e.to_string()).await;
            }
        };

        let items: Vec<PromptItem> = prompts
            .into_iter()
            .map(|text| PromptItem::new(text).with_media_kind(media_kind))
            .collect();
        let count = items.len();
        self.store.append_items(items).await?;
        info!(count, "Appended generated prompts");
        self.emit(QueueEvent::BatchGenerated(BatchGeneratedEvent { count }));
        self.commit_state(StatePatch::default()).await?;

        self.process_next().await
    }
}

fn log_failure(what: &str, result: Result<()>) {
    if let Err(e) = result {
        error!(error = %e, "Failed to {}", what);
    }
}
