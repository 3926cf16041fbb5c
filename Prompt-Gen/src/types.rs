use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};

/// Largest batch a single request may ask for.
pub const MAX_BATCH: usize = 50;

/// What the target tool should produce from a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// A request for a batch of prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Free-text theme or brief the prompts are derived from.
    pub context: String,
    pub count: usize,
    #[serde(default)]
    pub media_kind: MediaKind,
    /// Ask for longer, more detailed prompts.
    #[serde(default)]
    pub enhanced: bool,
}

impl GenerateRequest {
    pub fn new(context: impl Into<String>, count: usize) -> Self {
        Self {
            context: context.into(),
            count,
            media_kind: MediaKind::Image,
            enhanced: false,
        }
    }

    pub fn with_media_kind(mut self, kind: MediaKind) -> Self {
        self.media_kind = kind;
        self
    }

    pub fn with_enhanced(mut self, enhanced: bool) -> Self {
        self.enhanced = enhanced;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.context.trim().is_empty() {
            return Err(GenError::InvalidRequest("context is empty".into()));
        }
        if self.count == 0 || self.count > MAX_BATCH {
            return Err(GenError::InvalidRequest(format!(
                "count must be between 1 and {}, got {}",
                MAX_BATCH, self.count
            )));
        }
        Ok(())
    }
}
