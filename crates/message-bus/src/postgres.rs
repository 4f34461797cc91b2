use async_trait::async_trait;
use sqlx::PgPool;

use crate::CheckpointError;
use crate::checkpoint::CheckpointStore;

/// PostgreSQL-backed checkpoint store.
///
/// One row per scope in `consumer_checkpoints`; upserts replace the stored
/// offset with the value computed by the consumer.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Creates a new PostgreSQL checkpoint store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and makes sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self, CheckpointError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the checkpoint table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), CheckpointError> {
        sqlx::raw_sql(include_str!(
            "../../../migrations/001_create_consumer_checkpoints.sql"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[tracing::instrument(skip(self))]
    async fn get_offset(&self, scope: &str) -> Result<i64, CheckpointError> {
        let offset: Option<i64> =
            sqlx::query_scalar(r#"SELECT "offset" FROM consumer_checkpoints WHERE scope = $1"#)
                .bind(scope)
                .fetch_optional(&self.pool)
                .await?;

        offset.ok_or_else(|| CheckpointError::NotFound(scope.to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn upsert_offset(&self, scope: &str, offset: i64) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO consumer_checkpoints (scope, "offset", updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (scope) DO UPDATE
            SET "offset" = EXCLUDED."offset", updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(scope)
        .bind(offset)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
