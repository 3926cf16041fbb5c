use prompt_gen::MediaKind;
use serde::{Deserialize, Serialize};

/// Prompt status lifecycle: Pending -> Processing -> Completed/Failed.
///
/// `Editing` is a lock held while a human edits the text; such items are
/// never picked by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Editing,
}

impl PromptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Pending => "pending",
            PromptStatus::Processing => "processing",
            PromptStatus::Completed => "completed",
            PromptStatus::Failed => "failed",
            PromptStatus::Editing => "editing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PromptStatus::Pending),
            "processing" => Some(PromptStatus::Processing),
            "completed" => Some(PromptStatus::Completed),
            "failed" => Some(PromptStatus::Failed),
            "editing" => Some(PromptStatus::Editing),
            _ => None,
        }
    }

    /// Completed or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, PromptStatus::Completed | PromptStatus::Failed)
    }
}

/// Optional per-item settings shown to the user alongside the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl PresentationHints {
    pub fn is_empty(&self) -> bool {
        self.aspect_ratio.is_none() && self.variations.is_none() && self.style.is_none()
    }
}

/// One prompt in the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptItem {
    pub id: String,
    pub text: String,
    pub media_kind: MediaKind,
    pub status: PromptStatus,
    #[serde(default)]
    pub hints: PresentationHints,
    /// RFC 3339.
    pub created_at: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub completed_time: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PromptItem {
    /// Create a pending item with a generated UUID.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            media_kind: MediaKind::Image,
            status: PromptStatus::Pending,
            hints: PresentationHints::default(),
            created_at: chrono::Utc::now().to_rfc3339(),
            start_time: None,
            completed_time: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_media_kind(mut self, kind: MediaKind) -> Self {
        self.media_kind = kind;
        self
    }

    pub fn with_hints(mut self, hints: PresentationHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_status(mut self, status: PromptStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial update of a [`PromptItem`]. `None` leaves a field untouched;
/// `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub status: Option<PromptStatus>,
    pub text: Option<String>,
    pub start_time: Option<Option<String>>,
    pub completed_time: Option<Option<String>>,
    pub duration_ms: Option<Option<i64>>,
    pub error: Option<Option<String>>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn millis_since(start: Option<&str>) -> Option<i64> {
    let start = chrono::DateTime::parse_from_rfc3339(start?).ok()?;
    Some((chrono::Utc::now() - start.with_timezone(&chrono::Utc)).num_milliseconds())
}

impl ItemPatch {
    pub fn processing() -> Self {
        Self {
            status: Some(PromptStatus::Processing),
            start_time: Some(Some(now())),
            completed_time: Some(None),
            duration_ms: Some(None),
            error: Some(None),
            ..Self::default()
        }
    }

    /// Completed now; duration measured from the item's start time.
    pub fn completed(item: &PromptItem) -> Self {
        Self {
            status: Some(PromptStatus::Completed),
            completed_time: Some(Some(now())),
            duration_ms: Some(millis_since(item.start_time.as_deref())),
            ..Self::default()
        }
    }

    pub fn failed(item: &PromptItem, error: impl Into<String>) -> Self {
        Self {
            status: Some(PromptStatus::Failed),
            completed_time: Some(Some(now())),
            duration_ms: Some(millis_since(item.start_time.as_deref())),
            error: Some(Some(error.into())),
            ..Self::default()
        }
    }

    /// Back to pending with timing and error cleared.
    pub fn pending() -> Self {
        Self {
            status: Some(PromptStatus::Pending),
            start_time: Some(None),
            completed_time: Some(None),
            duration_ms: Some(None),
            error: Some(None),
            ..Self::default()
        }
    }

    pub fn status(status: PromptStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, item: &mut PromptItem) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(text) = &self.text {
            item.text = text.clone();
        }
        if let Some(start) = &self.start_time {
            item.start_time = start.clone();
        }
        if let Some(done) = &self.completed_time {
            item.completed_time = done.clone();
        }
        if let Some(duration) = self.duration_ms {
            item.duration_ms = duration;
        }
        if let Some(error) = &self.error {
            item.error = error.clone();
        }
    }
}

/// The singleton queue record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub is_running: bool,
    pub is_paused: bool,
    pub current_prompt_id: Option<String>,
    pub processed_count: usize,
    pub total_count: usize,
    pub queue_start_time: Option<String>,
    /// Message of the last condition that halted the queue.
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Partial update of the [`QueueState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub is_running: Option<bool>,
    pub is_paused: Option<bool>,
    pub current_prompt_id: Option<Option<String>>,
    pub processed_count: Option<usize>,
    pub total_count: Option<usize>,
    pub queue_start_time: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
}

impl StatePatch {
    pub fn counts(counts: &QueueCounts) -> Self {
        Self {
            processed_count: Some(counts.processed),
            total_count: Some(counts.total),
            ..Self::default()
        }
    }

    /// The fully stopped record. Counters are left alone.
    pub fn stopped() -> Self {
        Self {
            is_running: Some(false),
            is_paused: Some(false),
            current_prompt_id: Some(None),
            queue_start_time: Some(None),
            ..Self::default()
        }
    }

    pub fn apply(&self, state: &mut QueueState) {
        if let Some(running) = self.is_running {
            state.is_running = running;
        }
        if let Some(paused) = self.is_paused {
            state.is_paused = paused;
        }
        if let Some(current) = &self.current_prompt_id {
            state.current_prompt_id = current.clone();
        }
        if let Some(processed) = self.processed_count {
            state.processed_count = processed;
        }
        if let Some(total) = self.total_count {
            state.total_count = total;
        }
        if let Some(start) = &self.queue_start_time {
            state.queue_start_time = start.clone();
        }
        if let Some(error) = &self.last_error {
            state.last_error = error.clone();
        }
    }
}

/// Counters derived from item statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub editing: usize,
    /// Completed plus failed.
    pub processed: usize,
}

/// Recompute every counter from scratch.
pub fn recount(items: &[PromptItem]) -> QueueCounts {
    let mut counts = QueueCounts {
        total: items.len(),
        ..QueueCounts::default()
    };
    for item in items {
        match item.status {
            PromptStatus::Pending => counts.pending += 1,
            PromptStatus::Processing => counts.processing += 1,
            PromptStatus::Completed => counts.completed += 1,
            PromptStatus::Failed => counts.failed += 1,
            PromptStatus::Editing => counts.editing += 1,
        }
    }
    counts.processed = counts.completed + counts.failed;
    counts
}
