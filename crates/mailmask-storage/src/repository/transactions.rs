//! Transaction log repository

use crate::db::DatabasePool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailmask_common::types::TransactionEvent;
use mailmask_common::{Error, Result};
use uuid::Uuid;

/// Transaction log repository trait
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Append a batch of drained events
    async fn create_many(&self, events: &[TransactionEvent]) -> Result<()>;
    /// Delete records older than the cutoff; returns the number removed
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Database transaction log repository
pub struct DbTransactionRepository {
    pool: DatabasePool,
}

impl DbTransactionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for DbTransactionRepository {
    async fn create_many(&self, events: &[TransactionEvent]) -> Result<()> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO mail_transactions (id, status, sender, recipient, forward_target, occurred_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(event.status.code())
            .bind(&event.sender)
            .bind(&event.recipient)
            .bind(&event.forward_target)
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mail_transactions WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
