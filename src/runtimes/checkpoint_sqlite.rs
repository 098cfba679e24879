/*!
SQLite-backed checkpoint store.

Durable implementation of the [`CheckpointStore`] trait, keyed by
`(lineage, namespace, id)` with a secondary index on
`(lineage, namespace, step desc, created_at desc)` backing "latest"
queries.

## Behavior

- Checkpoint bodies and metadata are encoded through the serde persistence
  models (see `runtimes::persistence`); pending writes get one row each.
- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) run on connect; disabling
  the feature assumes external migration orchestration.
- `put`/`put_full` use `INSERT OR REPLACE` inside a transaction, so a
  checkpoint id is written atomically.

## Storage growth

Full history is retained. Long-running deployments should prune by lineage
(`delete_lineage`) or with direct SQL over the `created_at` column.
*/

use std::sync::Arc;

use rustc_hash::FxHashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::runtimes::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointStore, CheckpointTuple,
    ListFilter, Result, StoreError,
};
use crate::runtimes::persistence::{
    PersistedCheckpoint, PersistedMetadata, from_json_str, to_json_string,
};
use crate::state::PendingWrite;
use crate::value::ChannelValue;

/// Durable checkpoint store over a SQLite connection pool.
pub struct SqliteCheckpointStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointStore").finish()
    }
}

fn backend_err(op: &'static str, config: &CheckpointConfig, e: impl ToString) -> StoreError {
    StoreError::Backend {
        op,
        lineage: config.lineage.clone(),
        namespace: config.namespace.clone(),
        message: e.to_string(),
    }
}

fn serde_err(e: impl ToString) -> StoreError {
    StoreError::Serde {
        message: e.to_string(),
    }
}

impl SqliteCheckpointStore {
    /// Connect to (or create) a SQLite database at `database_url`, e.g.
    /// `sqlite://flowgraph.db` or `sqlite::memory:`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| StoreError::Backend {
                op: "connect",
                lineage: String::new(),
                namespace: String::new(),
                message: format!("invalid database url: {e}"),
            })?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| StoreError::Backend {
                op: "connect",
                lineage: String::new(),
                namespace: String::new(),
                message: e.to_string(),
            })?;

        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(StoreError::Backend {
                    op: "migrate",
                    lineage: String::new(),
                    namespace: String::new(),
                    message: e.to_string(),
                });
            }
        }

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn insert_checkpoint(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        let payload = to_json_string(&PersistedCheckpoint::from(checkpoint)).map_err(serde_err)?;
        let metadata_json =
            to_json_string(&PersistedMetadata::from(metadata)).map_err(serde_err)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (
                lineage, namespace, id, parent_id, step, created_at, source, payload, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&checkpoint.lineage)
        .bind(&checkpoint.namespace)
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.parent_id.map(|id| id.to_string()))
        .bind(checkpoint.step)
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(checkpoint.source.as_str())
        .bind(payload)
        .bind(metadata_json)
        .execute(&mut **tx)
        .await
        .map_err(|e| backend_err("put", config, e))?;
        Ok(())
    }

    async fn insert_writes(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        config: &CheckpointConfig,
        checkpoint_id: Uuid,
        writes: &[PendingWrite],
    ) -> Result<()> {
        for write in writes {
            let value = to_json_string(&write.value).map_err(serde_err)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO pending_writes (
                    lineage, namespace, checkpoint_id, task_id, sequence, channel, value
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&config.lineage)
            .bind(&config.namespace)
            .bind(checkpoint_id.to_string())
            .bind(&write.task_id)
            .bind(write.seq as i64)
            .bind(&write.channel)
            .bind(value)
            .execute(&mut **tx)
            .await
            .map_err(|e| backend_err("put_writes", config, e))?;
        }
        Ok(())
    }

    async fn fetch_row(&self, config: &CheckpointConfig) -> Result<Option<SqliteRow>> {
        let row = match config.checkpoint_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    SELECT payload, metadata FROM checkpoints
                    WHERE lineage = ?1 AND namespace = ?2 AND id = ?3
                    "#,
                )
                .bind(&config.lineage)
                .bind(&config.namespace)
                .bind(id.to_string())
                .fetch_optional(&*self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT payload, metadata FROM checkpoints
                    WHERE lineage = ?1 AND namespace = ?2
                    ORDER BY step DESC, created_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(&config.lineage)
                .bind(&config.namespace)
                .fetch_optional(&*self.pool)
                .await
            }
        };
        row.map_err(|e| backend_err("get", config, e))
    }

    fn decode_row(row: &SqliteRow) -> Result<(Checkpoint, CheckpointMetadata)> {
        let payload: String = row.try_get("payload").map_err(serde_err)?;
        let metadata: String = row.try_get("metadata").map_err(serde_err)?;
        let checkpoint =
            Checkpoint::try_from(from_json_str::<PersistedCheckpoint>(&payload).map_err(serde_err)?)
                .map_err(serde_err)?;
        let metadata =
            CheckpointMetadata::try_from(from_json_str::<PersistedMetadata>(&metadata).map_err(serde_err)?)
                .map_err(serde_err)?;
        Ok((checkpoint, metadata))
    }

    async fn pending_writes_for(
        &self,
        config: &CheckpointConfig,
        checkpoint_id: Uuid,
    ) -> Result<Vec<PendingWrite>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, sequence, channel, value FROM pending_writes
            WHERE lineage = ?1 AND namespace = ?2 AND checkpoint_id = ?3
            ORDER BY task_id ASC, sequence ASC
            "#,
        )
        .bind(&config.lineage)
        .bind(&config.namespace)
        .bind(checkpoint_id.to_string())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend_err("get", config, e))?;

        let mut writes = Vec::with_capacity(rows.len());
        for row in rows {
            let task_id: String = row.try_get("task_id").map_err(serde_err)?;
            let seq: i64 = row.try_get("sequence").map_err(serde_err)?;
            let channel: String = row.try_get("channel").map_err(serde_err)?;
            let value: String = row.try_get("value").map_err(serde_err)?;
            let value: ChannelValue = from_json_str(&value).map_err(serde_err)?;
            writes.push(PendingWrite {
                channel,
                value,
                task_id,
                seq: seq as u64,
            });
        }
        Ok(writes)
    }

    async fn tuple_from_row(
        &self,
        config: &CheckpointConfig,
        row: &SqliteRow,
    ) -> Result<CheckpointTuple> {
        let (checkpoint, metadata) = Self::decode_row(row)?;
        let pending_writes = self.pending_writes_for(config, checkpoint.id).await?;
        let parent_config = checkpoint.parent_id.map(|parent_id| CheckpointConfig {
            lineage: checkpoint.lineage.clone(),
            namespace: checkpoint.namespace.clone(),
            checkpoint_id: Some(parent_id),
        });
        Ok(CheckpointTuple {
            config: checkpoint.config(),
            parent_config,
            metadata,
            pending_writes,
            checkpoint,
        })
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self, checkpoint, metadata, _new_versions), err)]
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: &FxHashMap<String, u64>,
    ) -> Result<CheckpointConfig> {
        let updated = checkpoint.config();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("put", config, e))?;
        self.insert_checkpoint(&mut tx, config, &checkpoint, &metadata)
            .await?;
        tx.commit().await.map_err(|e| backend_err("put", config, e))?;
        Ok(updated)
    }

    #[instrument(skip(self, checkpoint, metadata, _new_versions, pending_writes), err)]
    async fn put_full(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: &FxHashMap<String, u64>,
        pending_writes: Vec<PendingWrite>,
    ) -> Result<CheckpointConfig> {
        let updated = checkpoint.config();
        let checkpoint_id = checkpoint.id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("put_full", config, e))?;
        self.insert_checkpoint(&mut tx, config, &checkpoint, &metadata)
            .await?;
        sqlx::query(
            r#"
            DELETE FROM pending_writes
            WHERE lineage = ?1 AND namespace = ?2 AND checkpoint_id = ?3
            "#,
        )
        .bind(&config.lineage)
        .bind(&config.namespace)
        .bind(checkpoint_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| backend_err("put_full", config, e))?;
        self.insert_writes(&mut tx, config, checkpoint_id, &pending_writes)
            .await?;
        tx.commit()
            .await
            .map_err(|e| backend_err("put_full", config, e))?;
        Ok(updated)
    }

    #[instrument(skip(self, writes), err)]
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<PendingWrite>,
        _task_id: &str,
    ) -> Result<()> {
        let id = config.checkpoint_id.ok_or_else(|| StoreError::NotFound {
            lineage: config.lineage.clone(),
            namespace: config.namespace.clone(),
            id: None,
        })?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_err("put_writes", config, e))?;
        self.insert_writes(&mut tx, config, id, &writes).await?;
        tx.commit()
            .await
            .map_err(|e| backend_err("put_writes", config, e))?;
        Ok(())
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        match self.fetch_row(config).await? {
            Some(row) => Ok(Some(Self::decode_row(&row)?.0)),
            None => Ok(None),
        }
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        match self.fetch_row(config).await? {
            Some(row) => Ok(Some(self.tuple_from_row(config, &row).await?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        filter: &ListFilter,
    ) -> Result<Vec<CheckpointTuple>> {
        let rows = sqlx::query(
            r#"
            SELECT payload, metadata FROM checkpoints
            WHERE lineage = ?1 AND namespace = ?2
            ORDER BY step DESC, created_at DESC
            "#,
        )
        .bind(&config.lineage)
        .bind(&config.namespace)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| backend_err("list", config, e))?;

        let mut tuples = Vec::with_capacity(rows.len());
        for row in &rows {
            tuples.push(self.tuple_from_row(config, row).await?);
        }

        if let Some(before) = filter.before {
            if let Some(pos) = tuples.iter().position(|t| t.checkpoint.id == before) {
                tuples = tuples.split_off(pos + 1);
            }
        }
        tuples.retain(|t| {
            filter
                .metadata
                .iter()
                .all(|(k, v)| t.metadata.extra.get(k) == Some(v))
        });
        if let Some(limit) = filter.limit {
            tuples.truncate(limit);
        }
        Ok(tuples)
    }

    async fn list_lineage(&self, lineage: &str) -> Result<Vec<CheckpointTuple>> {
        let rows = sqlx::query(
            r#"
            SELECT lineage, namespace, payload, metadata FROM checkpoints
            WHERE lineage = ?1
            ORDER BY step DESC, created_at DESC
            "#,
        )
        .bind(lineage)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            op: "list_lineage",
            lineage: lineage.to_string(),
            namespace: String::new(),
            message: e.to_string(),
        })?;

        let mut tuples = Vec::with_capacity(rows.len());
        for row in &rows {
            let namespace: String = row.try_get("namespace").map_err(serde_err)?;
            let config = CheckpointConfig::latest(lineage, namespace);
            tuples.push(self.tuple_from_row(&config, row).await?);
        }
        Ok(tuples)
    }

    #[instrument(skip(self), err)]
    async fn delete_lineage(&self, lineage: &str) -> Result<()> {
        let err = |e: sqlx::Error| StoreError::Backend {
            op: "delete_lineage",
            lineage: lineage.to_string(),
            namespace: String::new(),
            message: e.to_string(),
        };
        let mut tx = self.pool.begin().await.map_err(err)?;
        sqlx::query("DELETE FROM pending_writes WHERE lineage = ?1")
            .bind(lineage)
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        sqlx::query("DELETE FROM checkpoints WHERE lineage = ?1")
            .bind(lineage)
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        tx.commit().await.map_err(err)?;
        Ok(())
    }
}
