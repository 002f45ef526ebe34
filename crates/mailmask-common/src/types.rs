//! Common types for mailmask

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users
pub type UserId = Uuid;

/// Unique identifier for aliases
pub type AliasId = Uuid;

/// Unique identifier for inbound messages
pub type MessageId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Splits a recipient address into its local part and domain.
///
/// Trailing empty fields are discarded, so `"user@"` yields a single field
/// and is rejected, while `"@example.org"` keeps its empty local part.
/// Returns `None` unless exactly two fields remain.
pub fn split_address(address: &str) -> Option<(&str, &str)> {
    let mut parts: Vec<&str> = address.split('@').collect();
    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }
    match parts.as_slice() {
        [local, domain] => Some((local, domain)),
        _ => None,
    }
}

/// Outcome of one inbound delivery decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Recipient address does not split into local part and domain
    MalformedRecipient = 0,
    /// No alias exists for the recipient address
    NoSuchAlias = 100,
    /// Alias exists but is disabled
    AliasDisabled = 200,
    /// Forward target address malformed at send time
    ForwardAddressInvalid = 400,
    /// Recipient domain is not served here (relay denied)
    RelayDenied = 500,
    /// Owning user is disabled or absent
    OwnerDisabled = 600,
}

impl TransactionStatus {
    /// Numeric status code as stored in the transaction log
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Convert a stored status code back to the enum
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::MalformedRecipient),
            100 => Some(Self::NoSuchAlias),
            200 => Some(Self::AliasDisabled),
            400 => Some(Self::ForwardAddressInvalid),
            500 => Some(Self::RelayDenied),
            600 => Some(Self::OwnerDisabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Audit record of one inbound delivery decision.
///
/// `recipient` and `forward_target` are filled asymmetrically depending on
/// the status code; see the emitting call sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub status: TransactionStatus,
    pub sender: String,
    pub recipient: Option<String>,
    pub forward_target: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TransactionEvent {
    /// Create an event stamped with the current time
    pub fn new(
        status: TransactionStatus,
        sender: impl Into<String>,
        recipient: Option<String>,
        forward_target: Option<String>,
    ) -> Self {
        Self {
            status,
            sender: sender.into(),
            recipient,
            forward_target,
            occurred_at: Utc::now(),
        }
    }
}
