use tracing::{info, warn};

use crate::store::PromptStore;
use crate::types::{recount, StatePatch};

/// Startup hook: every item left `processing` by a crash goes back to
/// `pending`, and a queue record still claiming to run is marked stopped.
/// Returns how many items were requeued.
pub async fn recover_interrupted(store: &dyn PromptStore) -> crate::Result<usize> {
    let ids = store.requeue_interrupted().await?;
    if !ids.is_empty() {
        warn!(count = ids.len(), ids = ?ids, "Requeued interrupted prompts");
    }

    let state = store.queue_state().await?;
    if state.is_running || state.is_paused || state.current_prompt_id.is_some() {
        let counts = recount(&store.items().await?);
        let mut patch = StatePatch::stopped();
        patch.processed_count = Some(counts.processed);
        patch.total_count = Some(counts.total);
        store.set_queue_state(patch).await?;
        info!("Cleared stale running state from previous session");
    }

    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{PromptItem, PromptStatus, QueueState};

    #[tokio::test]
    async fn test_recovery_only_resets_processing() {
        let store = MemoryStore::with_items(vec![
            PromptItem::new("a")
                .with_id("a")
                .with_status(PromptStatus::Completed),
            PromptItem::new("b")
                .with_id("b")
                .with_status(PromptStatus::Processing),
            PromptItem::new("c").with_id("c"),
        ]);
        let before = store.items().await.unwrap();

        assert_eq!(recover_interrupted(&store).await.unwrap(), 1);

        let after = store.items().await.unwrap();
        assert_eq!(after[1].status, PromptStatus::Pending);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
    }

    #[tokio::test]
    async fn test_recovery_clears_stale_running_flag() {
        let store = MemoryStore::with_items(vec![PromptItem::new("a")
            .with_id("a")
            .with_status(PromptStatus::Processing)]);
        store
            .set_queue_state(StatePatch {
                is_running: Some(true),
                current_prompt_id: Some(Some("a".into())),
                ..StatePatch::default()
            })
            .await
            .unwrap();

        recover_interrupted(&store).await.unwrap();

        let state = store.queue_state().await.unwrap();
        assert_eq!(
            state,
            QueueState {
                total_count: 1,
                ..QueueState::default()
            }
        );
    }

    #[tokio::test]
    async fn test_recovery_on_clean_store_is_noop() {
        let store = MemoryStore::new();
        assert_eq!(recover_interrupted(&store).await.unwrap(), 0);
        assert_eq!(store.queue_state().await.unwrap(), QueueState::default());
    }
}
