use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{QueueError, Result};
use crate::types::{ItemPatch, PromptItem, PromptStatus, QueueState, StatePatch};

/// Persistence for the prompt list, its history and the queue record.
///
/// Every mutation is a read-modify-write of the addressed record. The queue
/// record is created with defaults on first read.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Active items in list order.
    async fn items(&self) -> Result<Vec<PromptItem>>;

    /// Apply `patch` to one item and return the updated item.
    async fn update_item(&self, id: &str, patch: ItemPatch) -> Result<PromptItem>;

    async fn append_items(&self, items: Vec<PromptItem>) -> Result<()>;

    /// Move items out of the active list. Unknown ids are ignored.
    /// Returns how many moved.
    async fn move_to_history(&self, ids: &[String]) -> Result<usize>;

    /// Archived items, newest first.
    async fn history(&self) -> Result<Vec<PromptItem>>;

    async fn queue_state(&self) -> Result<QueueState>;

    async fn set_queue_state(&self, patch: StatePatch) -> Result<QueueState>;

    /// Reset every `processing` item to `pending`. Returns their ids.
    async fn requeue_interrupted(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
struct MemoryInner {
    items: Vec<PromptItem>,
    history: Vec<PromptItem>,
    state: QueueState,
}

/// Process-local store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<PromptItem>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                items,
                ..MemoryInner::default()
            }),
        }
    }
}

#[async_trait]
impl PromptStore for MemoryStore {
    async fn items(&self) -> Result<Vec<PromptItem>> {
        Ok(self.inner.lock().await.items.clone())
    }

    async fn update_item(&self, id: &str, patch: ItemPatch) -> Result<PromptItem> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        patch.apply(item);
        Ok(item.clone())
    }

    async fn append_items(&self, items: Vec<PromptItem>) -> Result<()> {
        self.inner.lock().await.items.extend(items);
        Ok(())
    }

    async fn move_to_history(&self, ids: &[String]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.items)
            .into_iter()
            .partition(|i| ids.contains(&i.id));
        inner.items = kept;
        let count = moved.len();
        for item in moved {
            inner.history.insert(0, item);
        }
        Ok(count)
    }

    async fn history(&self) -> Result<Vec<PromptItem>> {
        Ok(self.inner.lock().await.history.clone())
    }

    async fn queue_state(&self) -> Result<QueueState> {
        Ok(self.inner.lock().await.state.clone())
    }

    async fn set_queue_state(&self, patch: StatePatch) -> Result<QueueState> {
        let mut inner = self.inner.lock().await;
        patch.apply(&mut inner.state);
        Ok(inner.state.clone())
    }

    async fn requeue_interrupted(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let mut ids = Vec::new();
        for item in inner
            .items
            .iter_mut()
            .filter(|i| i.status == PromptStatus::Processing)
        {
            ItemPatch::pending().apply(item);
            ids.push(item.id.clone());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_unknown_item() {
        let store = MemoryStore::new();
        let err = store
            .update_item("nope", ItemPatch::status(PromptStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_move_to_history_newest_first() {
        let store = MemoryStore::with_items(vec![
            PromptItem::new("a").with_id("a"),
            PromptItem::new("b").with_id("b"),
            PromptItem::new("c").with_id("c"),
        ]);
        let moved = store
            .move_to_history(&["a".to_string(), "c".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(moved, 2);

        let items = store.items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "b");

        let history: Vec<_> = store
            .history()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(history, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_requeue_only_touches_processing() {
        let store = MemoryStore::with_items(vec![
            PromptItem::new("a")
                .with_id("a")
                .with_status(PromptStatus::Processing),
            PromptItem::new("b")
                .with_id("b")
                .with_status(PromptStatus::Completed),
            PromptItem::new("c")
                .with_id("c")
                .with_status(PromptStatus::Editing),
        ]);
        let ids = store.requeue_interrupted().await.unwrap();
        assert_eq!(ids, vec!["a"]);

        let statuses: Vec<_> = store
            .items()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                PromptStatus::Pending,
                PromptStatus::Completed,
                PromptStatus::Editing
            ]
        );
    }
}
