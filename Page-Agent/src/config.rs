use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Data-driven description of the target page.
///
/// Every list is evaluated in order; for element lookups the first visible
/// match wins. Text patterns are matched case-insensitively as substrings.
/// Loaded from the runner's JSON config so layout drift on the target site
/// does not require a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorConfig {
    #[serde(default = "default_input_selectors")]
    pub input_selectors: Vec<String>,

    /// Button texts that identify a submit control.
    #[serde(default = "default_submit_texts")]
    pub submit_texts: Vec<String>,

    /// ARIA labels / titles that identify a submit control.
    #[serde(default = "default_submit_labels")]
    pub submit_labels: Vec<String>,

    /// Elements whose presence means a generation is running.
    #[serde(default = "default_loading_selectors")]
    pub loading_selectors: Vec<String>,

    /// Elements carrying a textual generation status.
    #[serde(default = "default_status_selectors")]
    pub status_selectors: Vec<String>,

    /// Elements whose presence means the tool reported an error.
    #[serde(default = "default_error_selectors")]
    pub error_selectors: Vec<String>,

    #[serde(default = "default_in_progress_patterns")]
    pub in_progress_patterns: Vec<String>,

    #[serde(default = "default_ready_patterns")]
    pub ready_patterns: Vec<String>,

    #[serde(default = "default_error_patterns")]
    pub error_patterns: Vec<String>,

    /// Where a usage-limit banner may appear.
    #[serde(default = "default_rate_limit_selectors")]
    pub rate_limit_selectors: Vec<String>,

    #[serde(default = "default_rate_limit_patterns")]
    pub rate_limit_patterns: Vec<String>,

    /// URL fragments of the telemetry requests the network monitor tracks.
    /// Empty means every request counts as activity.
    #[serde(default = "default_telemetry_url_patterns")]
    pub telemetry_url_patterns: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            input_selectors: default_input_selectors(),
            submit_texts: default_submit_texts(),
            submit_labels: default_submit_labels(),
            loading_selectors: default_loading_selectors(),
            status_selectors: default_status_selectors(),
            error_selectors: default_error_selectors(),
            in_progress_patterns: default_in_progress_patterns(),
            ready_patterns: default_ready_patterns(),
            error_patterns: default_error_patterns(),
            rate_limit_selectors: default_rate_limit_selectors(),
            rate_limit_patterns: default_rate_limit_patterns(),
            telemetry_url_patterns: default_telemetry_url_patterns(),
        }
    }
}

/// What a status text says about the running generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    InProgress,
    Ready,
    Error,
    Unknown,
}

impl SelectorConfig {
    /// Classify a status text against the configured patterns.
    ///
    /// Error patterns are checked first: a page that says "failed to
    /// generate" also contains "generate".
    pub fn classify_status(&self, text: &str) -> StatusKind {
        let lowered = text.to_lowercase();
        let hit = |patterns: &[String]| {
            patterns
                .iter()
                .any(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
        };

        if hit(&self.error_patterns) {
            StatusKind::Error
        } else if hit(&self.in_progress_patterns) {
            StatusKind::InProgress
        } else if hit(&self.ready_patterns) {
            StatusKind::Ready
        } else {
            StatusKind::Unknown
        }
    }

    /// Whether a banner text looks like a usage limit message.
    pub fn is_rate_limit_text(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.rate_limit_patterns
            .iter()
            .any(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
    }

    /// Whether a request URL counts as generation activity.
    pub fn is_telemetry_url(&self, url: &str) -> bool {
        self.telemetry_url_patterns.is_empty()
            || self
                .telemetry_url_patterns
                .iter()
                .any(|p| url.contains(p.as_str()))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_input_selectors() -> Vec<String> {
    strings(&[
        "textarea[placeholder*='prompt' i]",
        "textarea[aria-label*='prompt' i]",
        "[contenteditable='true'][role='textbox']",
        "textarea",
        "input[type='text'][placeholder*='prompt' i]",
    ])
}

fn default_submit_texts() -> Vec<String> {
    strings(&["create", "generate", "submit", "send"])
}

fn default_submit_labels() -> Vec<String> {
    strings(&["create", "generate", "submit", "send"])
}

fn default_loading_selectors() -> Vec<String> {
    strings(&[
        "[role='progressbar']",
        "[aria-busy='true']",
        ".loading",
        ".spinner",
    ])
}

fn default_status_selectors() -> Vec<String> {
    strings(&["[role='status']", "[aria-live='polite']"])
}

fn default_error_selectors() -> Vec<String> {
    strings(&["[role='alert']"])
}

fn default_in_progress_patterns() -> Vec<String> {
    strings(&["generating", "creating", "in progress", "queued", "%"])
}

fn default_ready_patterns() -> Vec<String> {
    strings(&["ready", "complete", "done"])
}

fn default_error_patterns() -> Vec<String> {
    strings(&["error", "failed", "something went wrong", "couldn't"])
}

fn default_rate_limit_selectors() -> Vec<String> {
    strings(&["[role='alert']", "[role='dialog']", "[role='status']"])
}

fn default_rate_limit_patterns() -> Vec<String> {
    strings(&["limit", "try again later", "try later", "quota"])
}

fn default_telemetry_url_patterns() -> Vec<String> {
    strings(&["/log", "telemetry", "analytics", "/batchexecute"])
}

/// Time bounds for one submission.
#[derive(Debug, Clone)]
pub struct AgentTimings {
    /// How long to look for the prompt field.
    pub find_input_timeout: Duration,
    /// Pause between typing and looking for the submit control.
    pub pre_submit_delay: Duration,
    /// Attempts to find an enabled submit control.
    pub submit_retries: u32,
    /// Delay between submit-control attempts.
    pub submit_retry_delay: Duration,
    /// How long to wait for a loading indicator after submitting.
    pub start_timeout: Duration,
    /// Hard cap on the network-silence completion path.
    pub completion_timeout: Duration,
    /// Hard cap on the DOM polling fallback.
    pub fallback_timeout: Duration,
    /// Wait after the loading indicator disappears before declaring success.
    pub settle_delay: Duration,
    /// Interval for every DOM poll loop.
    pub poll_interval: Duration,
    /// Bound on each request to the host (start/stop monitoring).
    pub host_request_timeout: Duration,
}

impl Default for AgentTimings {
    fn default() -> Self {
        Self {
            find_input_timeout: Duration::from_secs(10),
            pre_submit_delay: Duration::from_millis(500),
            submit_retries: 5,
            submit_retry_delay: Duration::from_millis(500),
            start_timeout: Duration::from_secs(10),
            completion_timeout: Duration::from_secs(10 * 60),
            fallback_timeout: Duration::from_secs(5 * 60),
            settle_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            host_request_timeout: Duration::from_secs(5),
        }
    }
}

impl AgentTimings {
    pub fn with_find_input_timeout(mut self, timeout: Duration) -> Self {
        self.find_input_timeout = timeout;
        self
    }

    pub fn with_pre_submit_delay(mut self, delay: Duration) -> Self {
        self.pre_submit_delay = delay;
        self
    }

    pub fn with_submit_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.submit_retries = retries;
        self.submit_retry_delay = delay;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Network-silence monitor tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often each tracked page is checked.
    pub check_interval: Duration,
    /// Silence after the last matching request that counts as "finished".
    pub silence_threshold: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            silence_threshold: Duration::from_secs(30),
        }
    }
}

/// Liveness probing and delivery retry tuning for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Window for a single ping reply.
    pub ping_timeout: Duration,
    /// Delay between pings.
    pub ping_interval: Duration,
    /// Cumulative probing budget before re-injecting.
    pub probe_budget: Duration,
    /// Wait after re-injection before the confirming ping.
    pub inject_settle: Duration,
    /// Base of the linear backoff in `send_with_retry`.
    pub retry_base_delay: Duration,
    /// Bound on a submit reply (finding, typing, submitting, awaiting start).
    pub submit_timeout: Duration,
    /// Bound on any other command reply.
    pub command_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(300),
            ping_interval: Duration::from_millis(200),
            probe_budget: Duration::from_secs(3),
            inject_settle: Duration::from_millis(500),
            retry_base_delay: Duration::from_millis(500),
            submit_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_wins_over_progress() {
        let cfg = SelectorConfig::default();
        assert_eq!(cfg.classify_status("Failed to generate"), StatusKind::Error);
        assert_eq!(cfg.classify_status("Generating 42%"), StatusKind::InProgress);
        assert_eq!(cfg.classify_status("Ready"), StatusKind::Ready);
        assert_eq!(cfg.classify_status("Hello"), StatusKind::Unknown);
    }

    #[test]
    fn test_rate_limit_text() {
        let cfg = SelectorConfig::default();
        assert!(cfg.is_rate_limit_text("Daily limit reached. Try later"));
        assert!(!cfg.is_rate_limit_text("Welcome back"));
    }

    #[test]
    fn test_telemetry_match() {
        let mut cfg = SelectorConfig::default();
        cfg.telemetry_url_patterns = vec!["/log".into()];
        assert!(cfg.is_telemetry_url("https://tool.example/log?x=1"));
        assert!(!cfg.is_telemetry_url("https://tool.example/static/app.js"));

        cfg.telemetry_url_patterns.clear();
        assert!(cfg.is_telemetry_url("https://anything"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: SelectorConfig =
            serde_json::from_str(r##"{"input_selectors": ["#prompt"]}"##).unwrap();
        assert_eq!(cfg.input_selectors, vec!["#prompt".to_string()]);
        assert_eq!(cfg.submit_texts, SelectorConfig::default().submit_texts);
    }

    #[test]
    fn test_default_timings() {
        let t = AgentTimings::default();
        assert_eq!(t.find_input_timeout, Duration::from_secs(10));
        assert_eq!(t.submit_retries, 5);
        assert_eq!(t.completion_timeout, Duration::from_secs(600));
        assert_eq!(t.fallback_timeout, Duration::from_secs(300));
        assert_eq!(t.settle_delay, Duration::from_secs(2));
    }
}
