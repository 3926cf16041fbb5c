use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use prompt_gen::MediaKind;
use rusqlite::{params, Connection, Row};

use crate::error::QueueError;
use crate::store::PromptStore;
use crate::types::{ItemPatch, PromptItem, PromptStatus, QueueState, StatePatch};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS prompt_items (
    id              TEXT PRIMARY KEY,
    position        INTEGER NOT NULL,
    text            TEXT NOT NULL,
    media_kind      TEXT NOT NULL CHECK(media_kind IN ('image', 'video')),
    status          TEXT NOT NULL CHECK(status IN ('pending', 'processing', 'completed', 'failed', 'editing')),
    hints_json      TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    start_time      TEXT,
    completed_time  TEXT,
    duration_ms     INTEGER,
    error_message   TEXT
);

CREATE INDEX IF NOT EXISTS idx_prompt_items_position ON prompt_items(position);

CREATE TABLE IF NOT EXISTS prompt_history (
    id              TEXT PRIMARY KEY,
    text            TEXT NOT NULL,
    media_kind      TEXT NOT NULL,
    status          TEXT NOT NULL,
    hints_json      TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    start_time      TEXT,
    completed_time  TEXT,
    duration_ms     INTEGER,
    error_message   TEXT,
    moved_at        TEXT NOT NULL,
    seq             INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_state (
    id              INTEGER PRIMARY KEY CHECK(id = 1),
    state_json      TEXT NOT NULL
);
"#;

const ITEM_COLUMNS: &str = "id, text, media_kind, status, hints_json, created_at, \
     start_time, completed_time, duration_ms, error_message";

/// Open (or create) the prompt database. Pass `None` for an in-memory database.
pub fn open_database(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(p) => Connection::open(p).context("Failed to open prompt database")?,
        None => Connection::open_in_memory().context("Failed to open in-memory database")?,
    };

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .context("Failed to set PRAGMA options")?;

    conn.execute_batch(SCHEMA)
        .context("Failed to create prompt schema")?;

    Ok(conn)
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<(PromptItem, String, String, String)> {
    Ok((
        PromptItem {
            id: row.get(0)?,
            text: row.get(1)?,
            media_kind: MediaKind::Image,
            status: PromptStatus::Pending,
            hints: Default::default(),
            created_at: row.get(5)?,
            start_time: row.get(6)?,
            completed_time: row.get(7)?,
            duration_ms: row.get(8)?,
            error: row.get(9)?,
        },
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

/// Fill in the enum and JSON columns read as text.
fn finish_item(raw: (PromptItem, String, String, String)) -> Result<PromptItem> {
    let (mut item, media_kind, status, hints_json) = raw;
    item.media_kind = MediaKind::parse(&media_kind)
        .with_context(|| format!("Unknown media kind '{}' for {}", media_kind, item.id))?;
    item.status = PromptStatus::parse(&status)
        .with_context(|| format!("Unknown status '{}' for {}", status, item.id))?;
    item.hints = serde_json::from_str(&hints_json)
        .with_context(|| format!("Failed to parse hints for {}", item.id))?;
    Ok(item)
}

fn query_items(conn: &Connection, sql: &str, what: &str) -> Result<Vec<PromptItem>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("Failed to prepare {} query", what))?;
    let rows = stmt
        .query_map([], row_to_item)
        .with_context(|| format!("Failed to execute {} query", what))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(finish_item(row.context("Failed to read prompt row")?)?);
    }
    Ok(items)
}

/// Active items in list order.
pub fn list_items(conn: &Connection) -> Result<Vec<PromptItem>> {
    query_items(
        conn,
        &format!(
            "SELECT {} FROM prompt_items ORDER BY position ASC",
            ITEM_COLUMNS
        ),
        "list_items",
    )
}

/// Archived items, newest first.
pub fn list_history(conn: &Connection) -> Result<Vec<PromptItem>> {
    query_items(
        conn,
        &format!(
            "SELECT {} FROM prompt_history ORDER BY seq DESC",
            ITEM_COLUMNS
        ),
        "list_history",
    )
}

pub fn get_item(conn: &Connection, id: &str) -> Result<Option<PromptItem>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM prompt_items WHERE id = ?1",
            ITEM_COLUMNS
        ))
        .context("Failed to prepare get_item query")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(finish_item(row_to_item(row)?)?)),
        None => Ok(None),
    }
}

/// Append items after the current last position.
pub fn insert_items(conn: &mut Connection, items: &[PromptItem]) -> Result<()> {
    let tx = conn.transaction().context("Failed to begin insert")?;
    let mut position: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(position), -1) FROM prompt_items",
            [],
            |row| row.get(0),
        )
        .context("Failed to read last position")?;

    for item in items {
        position += 1;
        tx.execute(
            "INSERT INTO prompt_items (id, position, text, media_kind, status, hints_json,
                 created_at, start_time, completed_time, duration_ms, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id,
                position,
                item.text,
                item.media_kind.as_str(),
                item.status.as_str(),
                serde_json::to_string(&item.hints)?,
                item.created_at,
                item.start_time,
                item.completed_time,
                item.duration_ms,
                item.error,
            ],
        )
        .with_context(|| format!("Failed to insert prompt {}", item.id))?;
    }

    tx.commit().context("Failed to commit insert")?;
    Ok(())
}

/// Write back every mutable column of an item.
pub fn write_item(conn: &Connection, item: &PromptItem) -> Result<()> {
    conn.execute(
        "UPDATE prompt_items SET text = ?1, status = ?2, start_time = ?3,
             completed_time = ?4, duration_ms = ?5, error_message = ?6
         WHERE id = ?7",
        params![
            item.text,
            item.status.as_str(),
            item.start_time,
            item.completed_time,
            item.duration_ms,
            item.error,
            item.id,
        ],
    )
    .context("Failed to update prompt")?;
    Ok(())
}

/// Move items to the history table. Returns how many moved.
pub fn move_to_history(conn: &mut Connection, ids: &[String]) -> Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction().context("Failed to begin history move")?;
    let mut seq: i64 = tx
        .query_row("SELECT COALESCE(MAX(seq), 0) FROM prompt_history", [], |row| {
            row.get(0)
        })
        .context("Failed to read history sequence")?;

    let mut moved = 0;
    for id in ids {
        seq += 1;
        let copied = tx
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO prompt_history ({cols}, moved_at, seq)
                     SELECT {cols}, ?1, ?2 FROM prompt_items WHERE id = ?3",
                    cols = ITEM_COLUMNS
                ),
                params![now, seq, id],
            )
            .with_context(|| format!("Failed to archive prompt {}", id))?;
        if copied > 0 {
            tx.execute("DELETE FROM prompt_items WHERE id = ?1", params![id])
                .with_context(|| format!("Failed to remove archived prompt {}", id))?;
            moved += 1;
        }
    }

    tx.commit().context("Failed to commit history move")?;
    Ok(moved)
}

/// Read the queue record, defaulting when it was never written.
pub fn get_state(conn: &Connection) -> Result<QueueState> {
    let mut stmt = conn
        .prepare("SELECT state_json FROM queue_state WHERE id = 1")
        .context("Failed to prepare get_state query")?;
    let mut rows = stmt.query([])?;

    match rows.next()? {
        Some(row) => {
            let json: String = row.get(0)?;
            serde_json::from_str(&json).context("Failed to parse queue state JSON")
        }
        None => Ok(QueueState::default()),
    }
}

pub fn put_state(conn: &Connection, state: &QueueState) -> Result<()> {
    conn.execute(
        "INSERT INTO queue_state (id, state_json) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET state_json = excluded.state_json",
        params![serde_json::to_string(state)?],
    )
    .context("Failed to write queue state")?;
    Ok(())
}

/// Re-queue any prompts that were mid-processing when the app crashed.
/// Returns the ids requeued.
pub fn requeue_interrupted(conn: &mut Connection) -> Result<Vec<String>> {
    let tx = conn.transaction().context("Failed to begin requeue")?;
    let ids = {
        let mut stmt = tx
            .prepare("SELECT id FROM prompt_items WHERE status = 'processing'")
            .context("Failed to prepare requeue query")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read interrupted prompts")?
    };
    tx.execute(
        "UPDATE prompt_items
         SET status = 'pending', start_time = NULL, completed_time = NULL,
             duration_ms = NULL, error_message = NULL
         WHERE status = 'processing'",
        [],
    )
    .context("Failed to requeue interrupted prompts")?;
    tx.commit().context("Failed to commit requeue")?;
    Ok(ids)
}

/// [`PromptStore`] over a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: Option<&Path>) -> crate::Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(open_database(path)?)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> crate::Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| QueueError::Other(e.to_string()))?;
        Ok(f(&mut conn)?)
    }
}

#[async_trait]
impl PromptStore for SqliteStore {
    async fn items(&self) -> crate::Result<Vec<PromptItem>> {
        self.with_conn(|c| list_items(c))
    }

    async fn update_item(&self, id: &str, patch: ItemPatch) -> crate::Result<PromptItem> {
        let updated = self.with_conn(|c| {
            let Some(mut item) = get_item(c, id)? else {
                return Ok(None);
            };
            patch.apply(&mut item);
            write_item(c, &item)?;
            Ok(Some(item))
        })?;
        updated.ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    async fn append_items(&self, items: Vec<PromptItem>) -> crate::Result<()> {
        self.with_conn(|c| insert_items(c, &items))
    }

    async fn move_to_history(&self, ids: &[String]) -> crate::Result<usize> {
        self.with_conn(|c| move_to_history(c, ids))
    }

    async fn history(&self) -> crate::Result<Vec<PromptItem>> {
        self.with_conn(|c| list_history(c))
    }

    async fn queue_state(&self) -> crate::Result<QueueState> {
        self.with_conn(|c| get_state(c))
    }

    async fn set_queue_state(&self, patch: StatePatch) -> crate::Result<QueueState> {
        self.with_conn(|c| {
            let mut state = get_state(c)?;
            patch.apply(&mut state);
            put_state(c, &state)?;
            Ok(state)
        })
    }

    async fn requeue_interrupted(&self) -> crate::Result<Vec<String>> {
        self.with_conn(requeue_interrupted)
    }
}
