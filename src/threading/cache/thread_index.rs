//! Per-account persistent thread index
//!
//! Maps message ids to thread ids so that "which thread is this message in" can
//! be answered without re-threading. Backed by one SQLite database per account,
//! holding three tables: `threads`, `thread_counter` (single row) and
//! `folder_update_timestamps`.
//!
//! Every multi-statement operation runs in its own short transaction; no
//! transaction ever spans two accounts.

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::{FolderTimestampRow, IndexError, IndexStats, ThreadId, millis_to_datetime};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Keeps `IN (...)` lists and multi-row inserts well below SQLite's bind limit
const BIND_CHUNK_SIZE: usize = 500;

/// Handle to one account's thread index database
#[derive(Debug, Clone)]
pub struct ThreadIndex {
    pool: SqlitePool,
    path: PathBuf,
}

impl ThreadIndex {
    /// Open (creating if missing) the index at `path` and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| IndexError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // A single connection gives the index a single writer
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;
        log::debug!("opened thread index at {}", path.display());

        Ok(ThreadIndex { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the message already has a thread id.
    pub async fn is_cached(&self, message_id: &str) -> Result<bool, IndexError> {
        Ok(self.thread_id_for(message_id).await?.is_some())
    }

    /// Whether the message itself has been filed, not just referenced by another one.
    pub async fn has_message(&self, message_id: &str) -> Result<bool, IndexError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM threads WHERE message_id = ? AND is_dummy = 0")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn thread_id_for(&self, message_id: &str) -> Result<Option<ThreadId>, IndexError> {
        let row: Option<(ThreadId,)> =
            sqlx::query_as("SELECT thread_id FROM threads WHERE message_id = ?")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(thread_id,)| thread_id))
    }

    /// Distinct thread ids currently associated with any of `message_ids`, ascending.
    ///
    /// More than one result means previously separate threads now have to merge.
    pub async fn thread_ids_for(&self, message_ids: &[String]) -> Result<Vec<ThreadId>, IndexError> {
        let mut thread_ids = BTreeSet::new();

        for chunk in message_ids.chunks(BIND_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT DISTINCT thread_id FROM threads WHERE message_id IN (");
            let mut separated = builder.separated(", ");
            for message_id in chunk {
                separated.push_bind(message_id.clone());
            }
            separated.push_unseparated(")");

            let rows: Vec<(ThreadId,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            thread_ids.extend(rows.into_iter().map(|(thread_id,)| thread_id));
        }

        Ok(thread_ids.into_iter().collect())
    }

    /// All message ids filed under `thread_id`, in lexical order.
    pub async fn message_ids_for(&self, thread_id: ThreadId) -> Result<Vec<String>, IndexError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT message_id FROM threads WHERE thread_id = ? ORDER BY message_id")
                .bind(thread_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(message_id,)| message_id).collect())
    }

    /// Hand out the next thread id. The first id ever allocated is 1.
    pub async fn allocate_thread_id(&self) -> Result<ThreadId, IndexError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(ThreadId,)> =
            sqlx::query_as("SELECT thread_id FROM thread_counter WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await?;

        let next = match current {
            Some((thread_id,)) => {
                let next = thread_id + 1;
                sqlx::query("UPDATE thread_counter SET thread_id = ? WHERE id = 1")
                    .bind(next)
                    .execute(&mut *tx)
                    .await?;
                next
            }
            None => {
                sqlx::query("INSERT INTO thread_counter (id, thread_id) VALUES (1, 1)")
                    .execute(&mut *tx)
                    .await?;
                1
            }
        };

        tx.commit().await?;
        Ok(next)
    }

    /// File `message_ids` under `thread_id`, folding in every message currently
    /// filed under any of `merged_thread_ids`.
    ///
    /// `dummy_ids` are filed the same way but flagged as referenced only. A row
    /// once stored as a real message never goes back to being a dummy.
    ///
    /// Rows for the merged ids are deleted and re-inserted under `thread_id`.
    /// Inserting a message id that already has a row keeps its thread id, so
    /// storing the same thread twice leaves the index unchanged.
    pub async fn store_thread(
        &self,
        thread_id: ThreadId,
        merged_thread_ids: &[ThreadId],
        message_ids: &[String],
        dummy_ids: &[String],
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;
        // message id -> is_dummy
        let mut members: BTreeMap<String, bool> = BTreeMap::new();
        let merged: Vec<ThreadId> = merged_thread_ids
            .iter()
            .copied()
            .filter(|&merged_id| merged_id != thread_id)
            .collect();

        for merged_id in &merged {
            let rows: Vec<(String, bool)> =
                sqlx::query_as("SELECT message_id, is_dummy FROM threads WHERE thread_id = ?")
                    .bind(merged_id)
                    .fetch_all(&mut *tx)
                    .await?;
            members.extend(rows);

            sqlx::query("DELETE FROM threads WHERE thread_id = ?")
                .bind(merged_id)
                .execute(&mut *tx)
                .await?;
        }

        for message_id in message_ids {
            members.insert(message_id.clone(), false);
        }
        for dummy_id in dummy_ids {
            members.entry(dummy_id.clone()).or_insert(true);
        }

        let members: Vec<(String, bool)> = members.into_iter().collect();
        for chunk in members.chunks(BIND_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO threads (message_id, thread_id, is_dummy) ");
            builder.push_values(chunk, |mut row, (message_id, is_dummy)| {
                row.push_bind(message_id.clone())
                    .push_bind(thread_id)
                    .push_bind(*is_dummy);
            });
            builder.push(
                " ON CONFLICT(message_id) DO UPDATE SET is_dummy = MIN(threads.is_dummy, excluded.is_dummy)",
            );
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        if !merged.is_empty() {
            log::debug!("merged thread ids {:?} into {}", merged, thread_id);
        }
        log::trace!("stored {} messages under thread {}", members.len(), thread_id);
        Ok(())
    }

    /// Remove the rows for `message_ids`. Returns how many rows were deleted.
    pub async fn forget_messages(&self, message_ids: &[String]) -> Result<u64, IndexError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for chunk in message_ids.chunks(BIND_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM threads WHERE message_id IN (");
            let mut separated = builder.separated(", ");
            for message_id in chunk {
                separated.push_bind(message_id.clone());
            }
            separated.push_unseparated(")");
            deleted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    /// Watermark of the last completed sweep of `folder_uri`.
    pub async fn folder_update_timestamp(
        &self,
        folder_uri: &str,
    ) -> Result<Option<DateTime<Utc>>, IndexError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT updated_at FROM folder_update_timestamps WHERE folder_uri = ?")
                .bind(folder_uri)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(millis,)| millis_to_datetime(millis)).transpose()
    }

    pub async fn set_folder_update_timestamp(
        &self,
        folder_uri: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        sqlx::query(
            r#"INSERT INTO folder_update_timestamps (folder_uri, updated_at)
               VALUES (?, ?)
               ON CONFLICT(folder_uri) DO UPDATE SET updated_at = excluded.updated_at"#,
        )
        .bind(folder_uri)
        .bind(updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every folder watermark, ordered by folder.
    pub async fn folder_timestamps(&self) -> Result<Vec<(String, DateTime<Utc>)>, IndexError> {
        let rows: Vec<FolderTimestampRow> = sqlx::query_as(
            "SELECT folder_uri, updated_at FROM folder_update_timestamps ORDER BY folder_uri",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FolderTimestampRow::into_entry).collect()
    }

    /// Drop and recreate every table, forcing a full re-thread on next access.
    pub async fn reset(&self) -> Result<(), IndexError> {
        log::info!("resetting thread index at {}", self.path.display());

        for table in [
            "threads",
            "thread_counter",
            "folder_update_timestamps",
            "_sqlx_migrations",
        ] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await?;
        }

        MIGRATOR.run(&self.pool).await?;
        log::info!("thread index reset complete");
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let (message_count, thread_count): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT thread_id) FROM threads")
                .fetch_one(&self.pool)
                .await?;
        let last: Option<(ThreadId,)> =
            sqlx::query_as("SELECT thread_id FROM thread_counter WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        let (folder_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM folder_update_timestamps")
            .fetch_one(&self.pool)
            .await?;

        Ok(IndexStats {
            message_count,
            thread_count,
            last_thread_id: last.map(|(thread_id,)| thread_id).unwrap_or(0),
            folder_count,
        })
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
