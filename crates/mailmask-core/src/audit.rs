//! Transaction audit stream
//!
//! Every gate, precondition, and send-time decision is recorded as a
//! transaction event. Producers append through [`AuditSink`] from any
//! delivery flow; a single [`AuditWorker`] drains the channel into the
//! transaction repository and expires aged records. When retention is
//! configured to zero the sink is disabled and emission is skipped
//! entirely.

use chrono::Utc;
use mailmask_common::types::{TransactionEvent, TransactionStatus};
use mailmask_storage::repository::TransactionRepository;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// Events persisted per batch when the queue is busy
const MAX_BATCH: usize = 100;

/// Seconds between retention sweeps
const CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Non-blocking producer handle for transaction events.
///
/// The channel is bounded; when it is full the event is dropped with a
/// warning rather than back-pressuring the accepting path.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<TransactionEvent>>,
}

impl AuditSink {
    /// Create an enabled sink and the receiver its worker drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransactionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Create a sink that skips emission entirely (retention set to zero)
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Append one event; never blocks the caller
    pub fn emit(
        &self,
        status: TransactionStatus,
        sender: &str,
        recipient: Option<&str>,
        forward_target: Option<&str>,
    ) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = TransactionEvent::new(
            status,
            sender,
            recipient.map(str::to_string),
            forward_target.map(str::to_string),
        );

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Transaction queue full, dropping status {} event from {}",
                    event.status, event.sender
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Transaction queue closed, dropping event");
            }
        }
    }
}

/// Single consumer of the transaction stream
pub struct AuditWorker {
    rx: mpsc::Receiver<TransactionEvent>,
    transactions: Arc<dyn TransactionRepository>,
    retention_days: u32,
}

impl AuditWorker {
    pub fn new(
        rx: mpsc::Receiver<TransactionEvent>,
        transactions: Arc<dyn TransactionRepository>,
        retention_days: u32,
    ) -> Self {
        Self {
            rx,
            transactions,
            retention_days,
        }
    }

    /// Drain events until every sink handle is dropped, expiring aged
    /// records on a fixed interval
    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));

        info!("Audit worker started (retention: {} days)", self.retention_days);

        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(first) => {
                            let mut batch = vec![first];
                            while batch.len() < MAX_BATCH {
                                match self.rx.try_recv() {
                                    Ok(event) => batch.push(event),
                                    Err(_) => break,
                                }
                            }
                            if let Err(e) = self.transactions.create_many(&batch).await {
                                error!("Failed to persist {} transaction(s): {}", batch.len(), e);
                            }
                        }
                        None => {
                            info!("Transaction queue closed, audit worker stopping");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.expire_aged_records().await;
                }
            }
        }
    }

    async fn expire_aged_records(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention_days));
        match self.transactions.delete_older_than(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(
                "Expired {} transaction record(s) older than {} day(s)",
                removed, self.retention_days
            ),
            Err(e) => error!("Transaction cleanup failed: {}", e),
        }
    }
}
