//! Alias repository

use crate::db::DatabasePool;
use crate::models::Alias;
use async_trait::async_trait;
use mailmask_common::types::AliasId;
use mailmask_common::{Error, Result};

/// Alias repository trait.
///
/// The pipeline resolves aliases and bumps their counters; creation and
/// deletion belong to the web application.
#[async_trait]
pub trait AliasRepository: Send + Sync {
    async fn exists(&self, local_part: &str, domain: &str) -> Result<bool>;
    async fn get_by_name(&self, local_part: &str, domain: &str) -> Result<Option<Alias>>;
    /// At-least-once increment of the suppression counter
    async fn increment_suppressions(&self, id: AliasId) -> Result<()>;
    /// At-least-once increment of the forwarded-mail counter
    async fn increment_forwards(&self, id: AliasId) -> Result<()>;
}

/// Database alias repository
pub struct DbAliasRepository {
    pool: DatabasePool,
}

impl DbAliasRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AliasRepository for DbAliasRepository {
    async fn exists(&self, local_part: &str, domain: &str) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM aliases WHERE local_part = $1 AND domain = $2)",
        )
        .bind(local_part)
        .bind(domain)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.0)
    }

    async fn get_by_name(&self, local_part: &str, domain: &str) -> Result<Option<Alias>> {
        sqlx::query_as::<_, Alias>("SELECT * FROM aliases WHERE local_part = $1 AND domain = $2")
            .bind(local_part)
            .bind(domain)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn increment_suppressions(&self, id: AliasId) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE aliases SET suppressions = suppressions + 1, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn increment_forwards(&self, id: AliasId) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query("UPDATE aliases SET forwards = forwards + 1, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
