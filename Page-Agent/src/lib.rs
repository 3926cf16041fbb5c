//! # Page Agent
//!
//! Drives a third-party generation page to submit one prompt at a time and
//! detects when generation has really finished.
//!
//! ## Features
//!
//! - Per-page agent actor with a phase state machine (find input, type,
//!   submit, await start, await completion)
//! - Data-driven selectors and status patterns ([`SelectorConfig`])
//! - Network-silence completion detection with a DOM polling fallback
//! - Liveness supervision with on-demand re-injection
//! - Chrome DevTools backend via `chromiumoxide`
//!
//! ## Quick Start
//!
//! 1. Create the host channel and an [`AgentInjector`] (e.g. [`ChromeInjector`])
//! 2. Build an [`AgentSupervisor`] around the injector
//! 3. Spawn a [`HostBridge`] with a [`NetworkMonitor`] and your [`CompletionSink`]
//! 4. Call [`AgentSupervisor::submit()`]; the outcome arrives at the sink

pub mod agent;
pub mod chrome;
pub mod config;
pub mod dom;
pub mod error;
pub mod host;
pub mod monitor;
pub mod protocol;
pub mod signal;
pub mod supervisor;

pub use agent::PageAgent;
pub use chrome::{ChromeConfig, ChromeDom, ChromeInjector, ChromeSession};
pub use config::{AgentTimings, MonitorConfig, SelectorConfig, StatusKind, SupervisorConfig};
pub use dom::{ElementRef, PageDom, PageStatus, SubmitControl};
pub use error::{AgentError, Result};
pub use host::{CompletionSink, HostBridge};
pub use monitor::NetworkMonitor;
pub use protocol::{
    AgentCommand, AgentHandle, AgentMessage, AgentPhase, AgentReply, HostRequest, LimitStatus,
    PageId, SubmitJob,
};
pub use signal::{CompletionSignal, SignalClosed, SignalListener};
pub use supervisor::{AgentInjector, AgentSupervisor};
