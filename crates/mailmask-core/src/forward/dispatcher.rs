//! Forward dispatch
//!
//! Hands transformed messages to the outbound relay without holding the
//! accepting session open. Outcomes of the outbound hop (retries, bounces)
//! are the relay's concern; the dispatcher only records them in the log and
//! bumps the alias forward counter on success. Concurrent sends are capped
//! by a semaphore acquired inside the spawned task, so the caller returns
//! immediately even when the relay is slow.

use crate::forward::composer::ForwardedMail;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mailmask_common::config::OutboundConfig;
use mailmask_storage::models::Alias;
use mailmask_storage::repository::AliasRepository;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

/// Outbound transport seam
#[async_trait]
pub trait ForwardTransport: Send + Sync + 'static {
    async fn send(&self, mail: &ForwardedMail) -> anyhow::Result<()>;
}

/// Production transport: raw SMTP submission to the configured relay
pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelay {
    pub fn new(config: &OutboundConfig) -> Self {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Self {
            transport: builder.build(),
        }
    }
}

#[async_trait]
impl ForwardTransport for SmtpRelay {
    async fn send(&self, mail: &ForwardedMail) -> anyhow::Result<()> {
        self.transport.send_raw(&mail.envelope, &mail.data).await?;
        Ok(())
    }
}

/// Fire-and-forget dispatcher for forwarded mail
pub struct ForwardDispatcher<T: ForwardTransport> {
    transport: Arc<T>,
    aliases: Arc<dyn AliasRepository>,
    send_permits: Arc<Semaphore>,
    debug: bool,
}

impl<T: ForwardTransport> ForwardDispatcher<T> {
    pub fn new(transport: Arc<T>, aliases: Arc<dyn AliasRepository>, config: &OutboundConfig) -> Self {
        Self {
            transport,
            aliases,
            send_permits: Arc::new(Semaphore::new(config.max_concurrent_sends)),
            debug: config.debug,
        }
    }

    /// Starts the outbound send and returns immediately.
    ///
    /// The caller never observes the send outcome; failures are logged and
    /// successful sends increment the alias forward counter.
    pub fn dispatch(&self, mail: ForwardedMail, alias: &Alias) {
        if self.debug {
            debug!(
                "Outbound message for {}:\n{}",
                alias.address(),
                String::from_utf8_lossy(&mail.data)
            );
        }

        let transport = self.transport.clone();
        let aliases = self.aliases.clone();
        let permits = self.send_permits.clone();
        let alias_id = alias.id;
        let alias_address = alias.address();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match transport.send(&mail).await {
                Ok(()) => {
                    debug!("Forwarded mail for {}", alias_address);
                    if let Err(e) = aliases.increment_forwards(alias_id).await {
                        warn!("Could not count forward for {}: {}", alias_address, e);
                    }
                }
                Err(e) => {
                    error!("Failed to forward mail for {}: {}", alias_address, e);
                }
            }
        });
    }
}
