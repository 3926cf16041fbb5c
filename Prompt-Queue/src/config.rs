use std::time::Duration;

use prompt_gen::{GenerateRequest, MediaKind};
use serde::{Deserialize, Serialize};

/// Parameters for refilling an empty queue with generated prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoGenerate {
    pub context: String,
    pub count: usize,
    #[serde(default)]
    pub media_kind: MediaKind,
    #[serde(default)]
    pub enhanced: bool,
}

impl AutoGenerate {
    /// Only valid parameters trigger regeneration.
    pub fn is_valid(&self) -> bool {
        self.request().validate().is_ok()
    }

    pub fn request(&self) -> GenerateRequest {
        GenerateRequest::new(self.context.clone(), self.count)
            .with_media_kind(self.media_kind)
            .with_enhanced(self.enhanced)
    }
}

/// Configuration for the queue.
///
/// Use [`QueueConfig::builder()`] for ergonomic construction, or
/// [`QueueConfig::default()`] for defaults (5-15s pacing,
/// no auto-generation).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Lower bound of the random pause between items.
    pub min_delay: Duration,

    /// Upper bound of the random pause between items.
    pub max_delay: Duration,

    /// Refill the queue when it runs dry.
    pub auto_generate: Option<AutoGenerate>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15),
            auto_generate: None,
        }
    }
}

impl QueueConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Uniform random pause in `[min_delay, max_delay]`.
    pub fn next_delay(&self) -> Duration {
        use rand::Rng;
        let (lo, hi) = (self.min_delay.as_millis(), self.max_delay.as_millis());
        if hi <= lo {
            return self.min_delay;
        }
        let lo = lo as u64;
        let hi = hi as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Builder for [`QueueConfig`].
#[derive(Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Set the random pause range between items.
    pub fn with_delay_range(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_delay = min;
        self.config.max_delay = max.max(min);
        self
    }

    pub fn with_auto_generate(mut self, auto: AutoGenerate) -> Self {
        self.config.auto_generate = Some(auto);
        self
    }

    /// Build the final [`QueueConfig`].
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_range() {
        let config = QueueConfig::builder()
            .with_delay_range(Duration::from_millis(100), Duration::from_millis(200))
            .build();
        for _ in 0..200 {
            let d = config.next_delay();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_inverted_range_is_clamped() {
        let config = QueueConfig::builder()
            .with_delay_range(Duration::from_secs(3), Duration::from_secs(1))
            .build();
        assert_eq!(config.max_delay, Duration::from_secs(3));
        assert_eq!(config.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_auto_generate_validity() {
        let valid = AutoGenerate {
            context: "forest spirits".into(),
            count: 5,
            media_kind: MediaKind::Image,
            enhanced: false,
        };
        assert!(valid.is_valid());
        assert!(!AutoGenerate {
            context: " ".into(),
            ..valid.clone()
        }
        .is_valid());
        assert!(!AutoGenerate { count: 0, ..valid }.is_valid());
    }
}
