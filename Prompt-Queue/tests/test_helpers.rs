#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use page_agent::{
    AgentCommand, AgentError, AgentHandle, AgentInjector, AgentMessage, AgentPhase, AgentReply,
    LimitStatus,
};
use prompt_gen::{GenerateRequest, PromptGenerator};
use prompt_queue::*;
use tokio::sync::mpsc;

pub const PAGE: &str = "tab-1";

/// Submitter that replays scripted outcomes (default `Ok`) and records
/// which items it saw.
#[derive(Default)]
pub struct FakeSubmitter {
    outcomes: Mutex<VecDeque<page_agent::Result<()>>>,
    submitted: Mutex<Vec<String>>,
}

impl FakeSubmitter {
    pub fn push(&self, outcome: page_agent::Result<()>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Submitter for FakeSubmitter {
    async fn submit(&self, item: &PromptItem) -> page_agent::Result<()> {
        self.submitted.lock().unwrap().push(item.id.clone());
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Generator that replays scripted batches.
#[derive(Default)]
pub struct FakeGenerator {
    batches: Mutex<VecDeque<prompt_gen::Result<Vec<String>>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    delay: Mutex<Duration>,
}

impl FakeGenerator {
    pub fn push(&self, batch: prompt_gen::Result<Vec<String>>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Hold every batch back for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl PromptGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerateRequest) -> prompt_gen::Result<Vec<String>> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(prompt_gen::GenError::EmptyResponse))
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<QueueEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn halted(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                QueueEvent::QueueHalted(h) => Some(h.reason),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: &QueueEvent) -> prompt_queue::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

type StatePredicate = Box<dyn Fn(&StatePatch) -> bool + Send>;

/// Memory store whose next queue-record write matching a predicate fails.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_next: Mutex<Option<StatePredicate>>,
}

impl FlakyStore {
    pub fn new(items: Vec<PromptItem>) -> Self {
        Self {
            inner: MemoryStore::with_items(items),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_state_write(&self, matches: impl Fn(&StatePatch) -> bool + Send + 'static) {
        *self.fail_next.lock().unwrap() = Some(Box::new(matches));
    }

    pub async fn status(&self, id: &str) -> PromptStatus {
        self.inner
            .items()
            .await
            .unwrap()
            .into_iter()
            .find(|i| i.id == id)
            .unwrap()
            .status
    }
}

#[async_trait]
impl PromptStore for FlakyStore {
    async fn items(&self) -> prompt_queue::Result<Vec<PromptItem>> {
        self.inner.items().await
    }

    async fn update_item(&self, id: &str, patch: ItemPatch) -> prompt_queue::Result<PromptItem> {
        self.inner.update_item(id, patch).await
    }

    async fn append_items(&self, items: Vec<PromptItem>) -> prompt_queue::Result<()> {
        self.inner.append_items(items).await
    }

    async fn move_to_history(&self, ids: &[String]) -> prompt_queue::Result<usize> {
        self.inner.move_to_history(ids).await
    }

    async fn history(&self) -> prompt_queue::Result<Vec<PromptItem>> {
        self.inner.history().await
    }

    async fn queue_state(&self) -> prompt_queue::Result<QueueState> {
        self.inner.queue_state().await
    }

    async fn set_queue_state(&self, patch: StatePatch) -> prompt_queue::Result<QueueState> {
        let fail = {
            let mut armed = self.fail_next.lock().unwrap();
            let matched = armed.as_ref().is_some_and(|matches| matches(&patch));
            if matched {
                *armed = None;
            }
            matched
        };
        if fail {
            return Err(QueueError::Other("disk I/O error".into()));
        }
        self.inner.set_queue_state(patch).await
    }

    async fn requeue_interrupted(&self) -> prompt_queue::Result<Vec<String>> {
        self.inner.requeue_interrupted().await
    }
}

pub fn item(id: &str) -> PromptItem {
    PromptItem::new(format!("prompt {}", id)).with_id(id)
}

pub fn items(ids: &[&str]) -> Vec<PromptItem> {
    ids.iter().map(|id| item(id)).collect()
}

pub fn config() -> QueueConfig {
    QueueConfig::builder()
        .with_delay_range(Duration::from_secs(5), Duration::from_secs(15))
        .build()
}

/// Let every runnable task finish. Time is paused in these tests, so this
/// returns once the runtime is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub submitter: Arc<FakeSubmitter>,
    pub generator: Arc<FakeGenerator>,
    pub events: Arc<RecordingEvents>,
    pub queue: QueueHandle,
}

impl Harness {
    pub async fn new(items: Vec<PromptItem>) -> Self {
        Self::with_config(items, config()).await
    }

    pub async fn with_config(items: Vec<PromptItem>, config: QueueConfig) -> Self {
        let store = Arc::new(MemoryStore::with_items(items));
        let submitter = Arc::new(FakeSubmitter::default());
        let generator = Arc::new(FakeGenerator::default());
        let events = Arc::new(RecordingEvents::default());

        let queue = QueueOrchestrator::new(config, store.clone(), submitter.clone())
            .with_generator(generator.clone())
            .with_events(events.clone())
            .spawn()
            .await
            .unwrap();

        Self {
            store,
            submitter,
            generator,
            events,
            queue,
        }
    }

    pub async fn status(&self, id: &str) -> PromptStatus {
        self.item(id).await.status
    }

    pub async fn item(&self, id: &str) -> PromptItem {
        self.store
            .items()
            .await
            .unwrap()
            .into_iter()
            .find(|i| i.id == id)
            .unwrap()
    }

    pub async fn state(&self) -> QueueState {
        self.queue.state().await.unwrap()
    }

    pub async fn counts(&self) -> QueueCounts {
        recount(&self.store.items().await.unwrap())
    }
}

/// Agent stand-in that answers pings and reports a fixed limit status.
pub fn spawn_scripted_agent(limit: LimitStatus) -> (AgentHandle, Arc<Mutex<Vec<String>>>) {
    let (tx, mut rx) = mpsc::channel(16);
    let commands = Arc::new(Mutex::new(Vec::new()));
    let log = commands.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let AgentMessage::Command { command, reply } = message else {
                continue;
            };
            log.lock().unwrap().push(command.name().to_string());
            let answer = match command {
                AgentCommand::Ping => AgentReply::Pong {
                    phase: AgentPhase::Idle,
                },
                AgentCommand::CheckLimit => AgentReply::Limit(limit.clone()),
                AgentCommand::Submit(_) => AgentReply::Submitted,
            };
            let _ = reply.send(Ok(answer));
        }
    });
    (AgentHandle::new(PAGE, tx), commands)
}

pub struct NoInjector;

#[async_trait]
impl AgentInjector for NoInjector {
    async fn inject(&self, page_id: &str) -> page_agent::Result<AgentHandle> {
        Err(AgentError::AgentUnavailable(format!("cannot inject into {}", page_id)))
    }
}
