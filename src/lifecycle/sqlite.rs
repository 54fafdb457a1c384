//! SQLite-backed lifecycle store.
//!
//! One row per item. Reopening the same file after a restart hands recovery
//! every record the previous process left unfinished.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tracing::info;

use super::{Clock, ItemId, LifecycleItem, LifecycleStatus, LifecycleStore, StoreError, SystemClock};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS lifecycle_items (
    id INTEGER PRIMARY KEY,
    expires_at TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS lifecycle_items_status ON lifecycle_items (status)";

const COLUMNS: &str = "id, expires_at, status, updated_at";

/// Persistent [`LifecycleStore`] over a SQLite file in WAL mode.
///
/// Clones share the connection pool.
#[derive(Clone)]
pub struct SqliteLifecycleStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteLifecycleStore {
    /// Open `path`, creating the file and schema if missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend)?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(backend)?;
        sqlx::query(STATUS_INDEX).execute(&pool).await.map_err(backend)?;

        info!(path = %path.display(), "lifecycle store opened");
        Ok(Self {
            pool,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` to stamp `updated_at` on transitions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for in-use connections and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn row_to_item(row: &SqliteRow) -> Result<LifecycleItem, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(LifecycleItem {
        id: ItemId(row.try_get("id").map_err(backend)?),
        expires_at: row.try_get("expires_at").map_err(backend)?,
        status: status.parse().map_err(StoreError::Backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

#[async_trait]
impl LifecycleStore for SqliteLifecycleStore {
    async fn get(&self, id: ItemId) -> Result<Option<LifecycleItem>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM lifecycle_items WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn insert(&self, item: LifecycleItem) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO lifecycle_items (id, expires_at, status, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(item.id.0)
        .bind(item.expires_at)
        .bind(item.status.to_string())
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(item.id));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: ItemId,
        status: LifecycleStatus,
    ) -> Result<LifecycleItem, StoreError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM lifecycle_items WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let mut item = match row {
            Some(row) => row_to_item(&row)?,
            None => return Err(StoreError::NotFound(id)),
        };

        if item.advance(status, now)? {
            sqlx::query("UPDATE lifecycle_items SET status = ?, updated_at = ? WHERE id = ?")
                .bind(item.status.to_string())
                .bind(item.updated_at)
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(item)
    }

    async fn find_unfinished(&self) -> Result<Vec<LifecycleItem>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM lifecycle_items WHERE status != ?"
        ))
        .bind(LifecycleStatus::Ended.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut items = rows.iter().map(row_to_item).collect::<Result<Vec<_>, _>>()?;
        items.sort_by_key(|item| (item.expires_at, item.id));
        Ok(items)
    }
}
