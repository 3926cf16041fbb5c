//! # Prompt Queue
//!
//! Paced, crash-safe queue that feeds prompts to a page agent one at a time.
//!
//! ## Features
//!
//! - Single-owner actor: every queue mutation happens on one task
//! - Start, pause, resume, stop and "process selected" controls
//! - Randomized pacing between items
//! - Rate-limit and unreachable-agent halts that leave items untouched
//! - SQLite persistence with crash recovery (feature `sqlite`, on by default)
//! - Auto-regeneration of an empty queue through a [`PromptGenerator`](prompt_gen::PromptGenerator)
//! - Events over a broadcast channel, or Tauri events (feature `tauri`)
//!
//! ## Quick Start
//!
//! 1. Open a store ([`SqliteStore`] or [`MemoryStore`])
//! 2. Build a [`QueueOrchestrator`] with a [`QueueConfig`] and a [`Submitter`]
//! 3. [`QueueOrchestrator::spawn()`] runs recovery and returns a [`QueueHandle`]
//! 4. Hand the handle to the page agent host as its completion sink, then call
//!    [`QueueHandle::start()`]

pub mod config;
#[cfg(feature = "sqlite")]
pub mod db;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod recovery;
pub mod store;
pub mod types;

pub use config::{AutoGenerate, QueueConfig, QueueConfigBuilder};
#[cfg(feature = "sqlite")]
pub use db::SqliteStore;
pub use error::{QueueError, Result};
pub use events::{
    BatchGeneratedEvent, BroadcastSink, EventSink, ItemCompletedEvent, ItemFailedEvent,
    ItemStartedEvent, NoopSink, QueueEvent, QueueHaltedEvent, StateChangedEvent,
};
pub use orchestrator::{CommandResult, QueueHandle, QueueOrchestrator};
pub use pipeline::{AgentSubmitter, Submitter};
pub use recovery::recover_interrupted;
pub use store::{MemoryStore, PromptStore};
pub use types::{
    recount, ItemPatch, PresentationHints, PromptItem, PromptStatus, QueueCounts, QueueState,
    StatePatch,
};
