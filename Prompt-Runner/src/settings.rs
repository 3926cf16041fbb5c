use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use page_agent::{AgentTimings, ChromeConfig, MonitorConfig, SelectorConfig, SupervisorConfig};
use prompt_gen::GeneratorConfig;
use prompt_queue::{AutoGenerate, QueueConfig};
use serde::{Deserialize, Serialize};

fn default_db_path() -> PathBuf {
    PathBuf::from("prompts.db")
}

/// Random pause between items, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_delay_secs: 5,
            max_delay_secs: 15,
        }
    }
}

/// Network-silence detection, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Silence {
    pub check_interval_secs: u64,
    pub threshold_secs: u64,
}

impl Default for Silence {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            threshold_secs: 30,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Agent and supervisor time bounds, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub find_input_ms: u64,
    pub start_ms: u64,
    pub completion_ms: u64,
    pub fallback_ms: u64,
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    pub ping_ms: u64,
    pub probe_budget_ms: u64,
    pub submit_reply_ms: u64,
    pub command_reply_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        let agent = AgentTimings::default();
        let supervisor = SupervisorConfig::default();
        Self {
            find_input_ms: millis(agent.find_input_timeout),
            start_ms: millis(agent.start_timeout),
            completion_ms: millis(agent.completion_timeout),
            fallback_ms: millis(agent.fallback_timeout),
            settle_ms: millis(agent.settle_delay),
            poll_interval_ms: millis(agent.poll_interval),
            ping_ms: millis(supervisor.ping_timeout),
            probe_budget_ms: millis(supervisor.probe_budget),
            submit_reply_ms: millis(supervisor.submit_timeout),
            command_reply_ms: millis(supervisor.command_timeout),
        }
    }
}

/// Everything the runner reads from its JSON file. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub db_path: PathBuf,
    pub chrome: ChromeConfig,
    pub selectors: SelectorConfig,
    pub generator: GeneratorConfig,
    pub pacing: Pacing,
    pub silence: Silence,
    pub timeouts: Timeouts,
    /// Refill the queue from the generator when it runs dry.
    pub auto_generate: Option<AutoGenerate>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            chrome: ChromeConfig::default(),
            selectors: SelectorConfig::default(),
            generator: GeneratorConfig::default(),
            pacing: Pacing::default(),
            silence: Silence::default(),
            timeouts: Timeouts::default(),
            auto_generate: None,
        }
    }
}

impl RunnerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Zero intervals would stall the silence check or spin the poll loops.
    pub fn validate(&self) -> Result<()> {
        if self.silence.check_interval_secs == 0 {
            bail!("silence.check_interval_secs must be at least 1");
        }
        if self.silence.threshold_secs == 0 {
            bail!("silence.threshold_secs must be at least 1");
        }
        if self.timeouts.poll_interval_ms == 0 {
            bail!("timeouts.poll_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        let mut builder = QueueConfig::builder().with_delay_range(
            Duration::from_secs(self.pacing.min_delay_secs),
            Duration::from_secs(self.pacing.max_delay_secs),
        );
        if let Some(auto) = &self.auto_generate {
            builder = builder.with_auto_generate(auto.clone());
        }
        builder.build()
    }

    pub fn agent_timings(&self) -> AgentTimings {
        let t = &self.timeouts;
        AgentTimings::default()
            .with_find_input_timeout(Duration::from_millis(t.find_input_ms))
            .with_start_timeout(Duration::from_millis(t.start_ms))
            .with_completion_timeout(Duration::from_millis(t.completion_ms))
            .with_fallback_timeout(Duration::from_millis(t.fallback_ms))
            .with_settle_delay(Duration::from_millis(t.settle_ms))
            .with_poll_interval(Duration::from_millis(t.poll_interval_ms))
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let t = &self.timeouts;
        SupervisorConfig {
            ping_timeout: Duration::from_millis(t.ping_ms),
            probe_budget: Duration::from_millis(t.probe_budget_ms),
            submit_timeout: Duration::from_millis(t.submit_reply_ms),
            command_timeout: Duration::from_millis(t.command_reply_ms),
            ..SupervisorConfig::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(self.silence.check_interval_secs),
            silence_threshold: Duration::from_secs(self.silence.threshold_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_path_gives_defaults() {
        let config = RunnerConfig::load(None).unwrap();
        assert_eq!(config.db_path, PathBuf::from("prompts.db"));
        assert_eq!(config.pacing, Pacing::default());
        assert!(config.auto_generate.is_none());
        assert!(config.validate().is_ok());

        let timings = config.agent_timings();
        assert_eq!(timings.completion_timeout, Duration::from_secs(600));
        assert_eq!(timings.poll_interval, AgentTimings::default().poll_interval);
        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.submit_timeout, Duration::from_secs(60));
        assert_eq!(supervisor.ping_interval, SupervisorConfig::default().ping_interval);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "db_path": "/tmp/q.db",
                "pacing": {{ "min_delay_secs": 2, "max_delay_secs": 4 }},
                "chrome": {{ "connect_url": "http://127.0.0.1:9222" }},
                "timeouts": {{ "completion_ms": 120000, "probe_budget_ms": 5000 }},
                "auto_generate": {{ "context": "forest spirits", "count": 5, "mediaKind": "video" }}
            }}"#
        )
        .unwrap();

        let config = RunnerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/q.db"));
        assert_eq!(
            config.chrome.connect_url.as_deref(),
            Some("http://127.0.0.1:9222")
        );
        assert_eq!(config.chrome.target_url, ChromeConfig::default().target_url);
        assert_eq!(config.selectors, SelectorConfig::default());
        assert_eq!(config.silence, Silence::default());

        assert_eq!(
            config.agent_timings().completion_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(config.timeouts.settle_ms, 2000);
        assert_eq!(
            config.supervisor_config().probe_budget,
            Duration::from_secs(5)
        );

        let queue = config.queue_config();
        assert_eq!(queue.min_delay, Duration::from_secs(2));
        assert_eq!(queue.max_delay, Duration::from_secs(4));
        let auto = queue.auto_generate.unwrap();
        assert_eq!(auto.media_kind, prompt_gen::MediaKind::Video);
        assert!(auto.is_valid());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = RunnerConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn test_zero_silence_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "silence": {{ "check_interval_secs": 0 }} }}"#).unwrap();
        let err = RunnerConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("check_interval_secs must be at least 1"));
    }
}
