//! Inbound message repository

use crate::db::DatabasePool;
use crate::models::InboundMessage;
use async_trait::async_trait;
use mailmask_common::{Error, Result};

/// Inbound message repository trait.
///
/// Rows are written once per accepted delivery and never updated.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &InboundMessage) -> Result<()>;
}

/// Database inbound message repository
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn create(&self, message: &InboundMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inbound_messages (id, alias_id, sender, subject, raw_message, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.alias_id)
        .bind(&message.sender)
        .bind(&message.subject)
        .bind(&message.raw_message)
        .bind(message.received_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
