use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Error as SqlxError, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::{CommitOutcome, DocumentRow, DocumentStore, StoreError};
use crate::models::DocumentChange;

/// Postgres-backed document store
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound of the pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self, document_id: &str) -> Result<Transaction<'static, Postgres>, SqlxError> {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "Syncing document {}. Pool connections: {} idle, {} in use",
            document_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );

        match self.pool.begin().await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool for document {}: {}. Pool state: {} idle, {} total",
                    document_id,
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                Err(e)
            }
        }
    }

    /// History rows strictly newer than the row that introduced `base_version`. A base
    /// version that never appeared in the history (e.g. the initial version) yields the
    /// full history.
    async fn changes_since(
        tx: &mut Transaction<'static, Postgres>,
        document_id: &str,
        base_version: &str,
    ) -> Result<Vec<DocumentChange>, StoreError> {
        let query_sql = r#"
            SELECT content
            FROM document_versions
            WHERE document_id = $1::uuid
                AND created_at > COALESCE(
                    (SELECT MAX(created_at) FROM document_versions
                        WHERE document_id = $1::uuid AND version = $2),
                    '-infinity'::timestamptz
                )
            ORDER BY created_at ASC, id ASC
        "#;

        let rows = sqlx::query(query_sql)
            .bind(document_id)
            .bind(base_version)
            .fetch_all(&mut **tx)
            .await?;

        let mut changes = Vec::with_capacity(rows.len());
        for row in rows {
            let content: String = row.try_get("content")?;
            changes.push(serde_json::from_str::<DocumentChange>(&content)?);
        }
        Ok(changes)
    }
}

/// `document_versions.editor_id` is a uuid column, like every user id in the schema
fn editor_id(user_id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(user_id).map_err(|_| StoreError::InvalidUserId(user_id.to_string()))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_viewable_document(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<Option<DocumentRow>, StoreError> {
        let query_sql = r#"
            SELECT d.id, d.title, d.owner_id::text AS owner_id, d.version, d.created_at, d.updated_at
            FROM documents d
            JOIN document_permissions p ON d.id = p.document_id
            WHERE d.id = $1::uuid AND p.user_id::text = $2
        "#;

        let document = sqlx::query_as::<_, DocumentRow>(query_sql)
            .bind(document_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(document)
    }

    async fn current_version(&self, document_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT version FROM documents WHERE id = $1::uuid")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("version")?)),
            None => Ok(None),
        }
    }

    async fn commit_change(
        &self,
        change: &DocumentChange,
        base_version: &str,
    ) -> Result<CommitOutcome, StoreError> {
        let document_id = change.document_id.as_str();
        let editor = editor_id(&change.user_id)?;
        let mut tx = self.begin(document_id).await?;

        // Row lock held until commit/rollback so concurrent syncs serialize here
        let row = sqlx::query("SELECT version FROM documents WHERE id = $1::uuid FOR UPDATE")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;
        let current_version: String = match row {
            Some(row) => row.try_get("version")?,
            None => {
                tx.rollback().await?;
                return Err(StoreError::NotFound(document_id.to_string()));
            }
        };

        if current_version != base_version {
            let changes = Self::changes_since(&mut tx, document_id, base_version).await?;
            tx.rollback().await?;
            return Ok(CommitOutcome::Conflict {
                current_version,
                changes,
            });
        }

        let content = serde_json::to_string(change)?;
        sqlx::query(
            r#"
            INSERT INTO document_versions (document_id, content, editor_id, version, created_at)
            VALUES ($1::uuid, $2, $3, $4, clock_timestamp())
            "#,
        )
        .bind(document_id)
        .bind(content)
        .bind(editor)
        .bind(&change.version)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET version = $1, updated_at = NOW()
            WHERE id = $2::uuid AND version = $3
            "#,
        )
        .bind(&change.version)
        .bind(document_id)
        .bind(base_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            error!(
                "Conditional version update matched {} rows for document {}",
                updated.rows_affected(),
                document_id
            );
            tx.rollback().await?;
            return Err(StoreError::LostUpdate(document_id.to_string()));
        }

        tx.commit().await?;
        info!("Document {} moved to version {}", document_id, change.version);
        Ok(CommitOutcome::Committed)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
