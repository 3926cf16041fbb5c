#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use page_agent::*;
use tokio::sync::mpsc;

/// What the submit control looks like to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Enabled,
    Disabled,
    Missing,
}

#[derive(Debug)]
pub struct FakeState {
    pub installed: bool,
    pub input_present: bool,
    pub value_sticks: bool,
    pub value: String,
    pub submit: SubmitMode,
    /// Clicking submit (or pressing Enter) turns the loading indicator on.
    pub starts_generation: bool,
    pub loading: bool,
    pub status_text: Option<String>,
    pub error_text: Option<String>,
    pub banners: Vec<String>,
    pub clicks: u32,
    pub enters: u32,
    pub form_submits: u32,
    pub submit_lookups: u32,
    pub installs: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            installed: true,
            input_present: true,
            value_sticks: true,
            value: String::new(),
            submit: SubmitMode::Enabled,
            starts_generation: true,
            loading: false,
            status_text: None,
            error_text: None,
            banners: Vec::new(),
            clicks: 0,
            enters: 0,
            form_submits: 0,
            submit_lookups: 0,
            installs: 0,
        }
    }
}

/// Scripted page. Every call fails with `ReceiverMissing` while the helper
/// is not installed, like a reloaded tab.
#[derive(Default)]
pub struct FakeDom {
    pub state: Mutex<FakeState>,
}

impl FakeDom {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(configure: impl FnOnce(&mut FakeState)) -> Arc<Self> {
        let dom = Self::default();
        configure(&mut dom.state.lock().unwrap());
        Arc::new(dom)
    }

    pub fn update(&self, change: impl FnOnce(&mut FakeState)) {
        change(&mut self.state.lock().unwrap());
    }

    pub fn read<T>(&self, get: impl FnOnce(&FakeState) -> T) -> T {
        get(&self.state.lock().unwrap())
    }

    fn installed(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let state = self.state.lock().unwrap();
        if state.installed {
            Ok(state)
        } else {
            Err(AgentError::ReceiverMissing)
        }
    }
}

#[async_trait]
impl PageDom for FakeDom {
    async fn is_installed(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().installed)
    }

    async fn install(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.installed = true;
        state.installs += 1;
        Ok(())
    }

    async fn find_first_visible(&self, _selectors: &[String]) -> Result<Option<ElementRef>> {
        let state = self.installed()?;
        Ok(state.input_present.then(|| ElementRef("input".into())))
    }

    async fn set_value(&self, _element: &ElementRef, text: &str) -> Result<()> {
        let mut state = self.installed()?;
        if state.value_sticks {
            state.value = text.to_string();
        }
        Ok(())
    }

    async fn read_value(&self, _element: &ElementRef) -> Result<String> {
        Ok(self.installed()?.value.clone())
    }

    async fn find_submit_control(
        &self,
        _near: &ElementRef,
        _texts: &[String],
        _labels: &[String],
    ) -> Result<Option<SubmitControl>> {
        let mut state = self.installed()?;
        state.submit_lookups += 1;
        let control = |enabled| SubmitControl {
            element: ElementRef("submit".into()),
            enabled,
            label: "Create".into(),
        };
        Ok(match state.submit {
            SubmitMode::Enabled => Some(control(true)),
            SubmitMode::Disabled => Some(control(false)),
            SubmitMode::Missing => None,
        })
    }

    async fn click(&self, _element: &ElementRef) -> Result<()> {
        let mut state = self.installed()?;
        state.clicks += 1;
        if state.starts_generation {
            state.loading = true;
        }
        Ok(())
    }

    async fn press_enter(&self, _element: &ElementRef) -> Result<()> {
        let mut state = self.installed()?;
        state.enters += 1;
        if state.starts_generation {
            state.loading = true;
        }
        Ok(())
    }

    async fn submit_form(&self, _element: &ElementRef) -> Result<bool> {
        let mut state = self.installed()?;
        state.form_submits += 1;
        Ok(true)
    }

    async fn status(
        &self,
        _loading_selectors: &[String],
        _status_selectors: &[String],
        _error_selectors: &[String],
    ) -> Result<PageStatus> {
        let state = self.installed()?;
        Ok(PageStatus {
            loading: state.loading,
            status_text: state.status_text.clone(),
            error_text: state.error_text.clone(),
        })
    }

    async fn visible_texts(&self, _selectors: &[String]) -> Result<Vec<String>> {
        Ok(self.installed()?.banners.clone())
    }
}

/// Injector that re-installs the fake helper and spawns a fresh agent.
pub struct FakeInjector {
    pub dom: Arc<FakeDom>,
    pub host: mpsc::Sender<HostRequest>,
    pub timings: AgentTimings,
    pub injections: AtomicU32,
    pub fail: bool,
}

impl FakeInjector {
    pub fn new(dom: Arc<FakeDom>, host: mpsc::Sender<HostRequest>) -> Arc<Self> {
        Arc::new(Self {
            dom,
            host,
            timings: AgentTimings::default(),
            injections: AtomicU32::new(0),
            fail: false,
        })
    }

    pub fn failing(dom: Arc<FakeDom>, host: mpsc::Sender<HostRequest>) -> Arc<Self> {
        Arc::new(Self {
            dom,
            host,
            timings: AgentTimings::default(),
            injections: AtomicU32::new(0),
            fail: true,
        })
    }

    pub fn injections(&self) -> u32 {
        self.injections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentInjector for FakeInjector {
    async fn inject(&self, page_id: &str) -> Result<AgentHandle> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::Dom("script blocked".into()));
        }
        self.dom.install().await?;
        Ok(PageAgent::new(page_id, self.dom.clone(), self.host.clone())
            .with_timings(self.timings.clone())
            .spawn())
    }
}

/// Records outcomes delivered by the host bridge.
#[derive(Default)]
pub struct RecordingSink {
    pub completed: Mutex<Vec<String>>,
    pub failed: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionSink for RecordingSink {
    async fn mark_complete(&self, item_id: &str) -> bool {
        self.completed.lock().unwrap().push(item_id.to_string());
        true
    }

    async fn mark_failed(&self, item_id: &str, error: &str) -> bool {
        self.failed
            .lock()
            .unwrap()
            .push((item_id.to_string(), error.to_string()));
        true
    }
}

/// A full host: monitor, supervisor over a fake injector and a bridge
/// delivering outcomes to a recording sink.
pub struct Harness {
    pub dom: Arc<FakeDom>,
    pub injector: Arc<FakeInjector>,
    pub supervisor: Arc<AgentSupervisor>,
    pub monitor: NetworkMonitor,
    pub sink: Arc<RecordingSink>,
}

pub const PAGE: &str = "tab-1";

impl Harness {
    pub fn new(dom: Arc<FakeDom>) -> Self {
        Self::build(dom, false)
    }

    pub fn with_failing_injector(dom: Arc<FakeDom>) -> Self {
        Self::build(dom, true)
    }

    fn build(dom: Arc<FakeDom>, failing: bool) -> Self {
        let (host_tx, host_rx) = mpsc::channel(16);
        let injector = if failing {
            FakeInjector::failing(dom.clone(), host_tx)
        } else {
            FakeInjector::new(dom.clone(), host_tx)
        };
        let supervisor = Arc::new(AgentSupervisor::new(
            injector.clone(),
            SupervisorConfig::default(),
        ));
        let monitor = NetworkMonitor::default();
        let sink = Arc::new(RecordingSink::default());
        HostBridge::new(monitor.clone(), supervisor.clone(), sink.clone()).spawn(host_rx);

        Self {
            dom,
            injector,
            supervisor,
            monitor,
            sink,
        }
    }

    pub fn job(id: &str, text: &str) -> SubmitJob {
        SubmitJob {
            item_id: id.to_string(),
            text: text.to_string(),
        }
    }
}

/// Host stand-in that refuses network monitoring and records everything.
pub fn spawn_refusing_host() -> (mpsc::Sender<HostRequest>, Arc<Mutex<Vec<String>>>) {
    let (tx, mut rx) = mpsc::channel::<HostRequest>(16);
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let entry = match request {
                HostRequest::StartNetworkMonitoring { page_id, ack } => {
                    let _ = ack.send(false);
                    format!("start:{}", page_id)
                }
                HostRequest::StopNetworkMonitoring { page_id, ack } => {
                    let _ = ack.send(true);
                    format!("stop:{}", page_id)
                }
                HostRequest::MarkComplete { item_id, ack } => {
                    let _ = ack.send(true);
                    format!("complete:{}", item_id)
                }
                HostRequest::MarkFailed {
                    item_id,
                    error,
                    ack,
                } => {
                    let _ = ack.send(true);
                    format!("failed:{}:{}", item_id, error)
                }
            };
            seen.lock().unwrap().push(entry);
        }
    });
    (tx, log)
}
