//! Database models

use chrono::{DateTime, Utc};
use mailmask_common::types::{AliasId, MessageId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model.
///
/// Account lifecycle (registration, login, password) is managed by the web
/// application; the pipeline only reads the forward address and activity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Alias model - one disposable forwarding address
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Alias {
    pub id: AliasId,
    pub local_part: String,
    pub domain: String,
    pub user_id: Option<UserId>,
    pub active: bool,
    pub forward_enabled: bool,
    /// Delivery attempts blocked while the alias or its owner was disabled
    pub suppressions: i64,
    /// Messages successfully handed to the outbound relay
    pub forwards: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alias {
    /// Full alias address as `local@domain`
    pub fn address(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }
}

/// Inbound message model - the raw copy kept for every accepted delivery
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub alias_id: AliasId,
    pub sender: String,
    pub subject: String,
    pub raw_message: String,
    pub received_at: DateTime<Utc>,
}

/// Transaction log row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MailTransaction {
    pub id: uuid::Uuid,
    pub status: i32,
    pub sender: String,
    pub recipient: Option<String>,
    pub forward_target: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
