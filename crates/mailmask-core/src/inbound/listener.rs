//! Inbound mail listener
//!
//! The transport layer calls [`InboundListener::accept`] before receiving
//! message bytes and [`InboundListener::deliver`] once it has them. Within
//! one delivery the gate, precondition checks, bounded read, persistence,
//! and loop check run in order on the calling flow; only the outbound send
//! is offloaded. None of the rejection paths surface an error to the
//! transport: delivery simply stops after the transaction is recorded.

use crate::audit::AuditSink;
use crate::forward::{compose_forward, ForwardDispatcher, ForwardTransport};
use crate::inbound::loopcheck::check_for_loop;
use crate::inbound::reader::{read_limited, ReadError};
use anyhow::Result;
use chrono::Utc;
use mail_parser::MessageParser;
use mailmask_common::config::MailConfig;
use mailmask_common::types::{split_address, TransactionStatus};
use mailmask_storage::models::{Alias, InboundMessage, User};
use mailmask_storage::repository::{AliasRepository, MessageRepository, UserRepository};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{error, info};
use uuid::Uuid;

/// Handles all actions for incoming mail
pub struct InboundListener<T: ForwardTransport> {
    config: MailConfig,
    aliases: Arc<dyn AliasRepository>,
    users: Arc<dyn UserRepository>,
    messages: Arc<dyn MessageRepository>,
    audit: AuditSink,
    dispatcher: ForwardDispatcher<T>,
}

impl<T: ForwardTransport> InboundListener<T> {
    pub fn new(
        config: MailConfig,
        aliases: Arc<dyn AliasRepository>,
        users: Arc<dyn UserRepository>,
        messages: Arc<dyn MessageRepository>,
        audit: AuditSink,
        dispatcher: ForwardDispatcher<T>,
    ) -> Self {
        Self {
            config,
            aliases,
            users,
            messages,
            audit,
            dispatcher,
        }
    }

    /// Decides whether to receive a message at all, before any bytes flow.
    ///
    /// Accepts the address only when the recipient domain is one of the
    /// configured domains. Rejections are recorded as relay-denied, with
    /// the unparsed recipient in the forward-target field.
    pub fn accept(&self, from: &str, recipient: &str) -> bool {
        if let Some((_, domain)) = split_address(recipient) {
            if self.config.domains.iter().any(|d| d == domain) {
                return true;
            }
        }

        self.audit
            .emit(TransactionStatus::RelayDenied, from, None, Some(recipient));
        false
    }

    /// Accepts a complete message for one recipient.
    ///
    /// The raw copy is persisted for every delivery that passes the
    /// precondition checks and the size ceiling; whether the forward then
    /// happens (loop check, forward flag, compose errors) does not affect
    /// the persisted copy.
    pub async fn deliver<R>(&self, from: &str, recipient: &str, data: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let Some((alias, owner)) = self.check_preconditions(from, recipient).await? else {
            return Ok(());
        };

        let raw = match read_limited(data, self.config.max_size_bytes).await {
            Ok(raw) => raw,
            Err(ReadError::SizeLimitExceeded { limit }) => {
                error!(
                    "Dropped mail '{} => {}' since its size exceeds the configured limit of {} bytes",
                    from, recipient, limit
                );
                return Ok(());
            }
            Err(ReadError::Io(e)) => return Err(e.into()),
        };

        let parser = MessageParser::default();
        let Some(mail) = parser.parse(raw.as_bytes()) else {
            error!("Could not parse mail '{} => {}', delivery stopped", from, recipient);
            return Ok(());
        };

        let message = InboundMessage {
            id: Uuid::now_v7(),
            alias_id: alias.id,
            sender: from.to_string(),
            subject: mail.subject().unwrap_or_default().to_string(),
            raw_message: raw.clone(),
            received_at: Utc::now(),
        };
        self.messages.create(&message).await?;

        // the mail stays persisted even when the alias does not forward
        if !alias.forward_enabled {
            return Ok(());
        }

        if let Some(reason) = check_for_loop(&mail) {
            info!(
                "Broke a possible loop, mail '{} => {}' was not forwarded: {}",
                from, recipient, reason
            );
            return Ok(());
        }

        let alias_address = alias.address();
        match compose_forward(
            &raw,
            &mail,
            from,
            &alias_address,
            &owner.email,
            self.config.rewrite_as_quoted,
        ) {
            Ok(forwarded) => self.dispatcher.dispatch(forwarded, &alias),
            Err(e) => {
                // the forward target or alias address has no sendable form;
                // the persisted copy is unaffected
                error!("Could not compose forward '{} => {}': {}", from, recipient, e);
                self.audit.emit(
                    TransactionStatus::ForwardAddressInvalid,
                    from,
                    Some(recipient),
                    Some(&owner.email),
                );
            }
        }

        Ok(())
    }

    /// Checks the preconditions tied to the alias and its owner.
    ///
    /// First match wins: malformed recipient, unknown alias, disabled
    /// alias, then disabled or absent owner. Returns the alias and owner
    /// when delivery may proceed, `None` after recording the rejection.
    /// Suppressions are counted only for rejections attributable to alias
    /// or owner state.
    async fn check_preconditions(
        &self,
        from: &str,
        recipient: &str,
    ) -> Result<Option<(Alias, User)>> {
        let Some((local_part, domain)) = split_address(recipient) else {
            self.audit
                .emit(TransactionStatus::MalformedRecipient, from, None, Some(recipient));
            return Ok(None);
        };

        let Some(alias) = self.aliases.get_by_name(local_part, domain).await? else {
            self.audit
                .emit(TransactionStatus::NoSuchAlias, from, Some(recipient), None);
            return Ok(None);
        };

        let owner = match alias.user_id {
            Some(user_id) => self.users.get(user_id).await?,
            None => None,
        };
        // display string for the transaction log; empty when the alias is orphaned
        let forward_target = owner.as_ref().map(|u| u.email.clone()).unwrap_or_default();

        if !alias.active {
            self.audit.emit(
                TransactionStatus::AliasDisabled,
                from,
                Some(recipient),
                Some(&forward_target),
            );
            self.aliases.increment_suppressions(alias.id).await?;
            return Ok(None);
        }

        match owner.filter(|user| user.active) {
            Some(owner) => Ok(Some((alias, owner))),
            None => {
                self.audit.emit(
                    TransactionStatus::OwnerDisabled,
                    from,
                    Some(recipient),
                    Some(&forward_target),
                );
                self.aliases.increment_suppressions(alias.id).await?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mailmask_common::config::OutboundConfig;
    use mailmask_common::types::{AliasId, TransactionEvent, UserId};
    use mailmask_common::Result as CommonResult;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakeAliases {
        aliases: Mutex<HashMap<(String, String), Alias>>,
        suppressions: Mutex<Vec<AliasId>>,
        forwards: Mutex<Vec<AliasId>>,
    }

    #[async_trait]
    impl AliasRepository for FakeAliases {
        async fn exists(&self, local_part: &str, domain: &str) -> CommonResult<bool> {
            Ok(self
                .aliases
                .lock()
                .unwrap()
                .contains_key(&(local_part.to_string(), domain.to_string())))
        }

        async fn get_by_name(&self, local_part: &str, domain: &str) -> CommonResult<Option<Alias>> {
            Ok(self
                .aliases
                .lock()
                .unwrap()
                .get(&(local_part.to_string(), domain.to_string()))
                .cloned())
        }

        async fn increment_suppressions(&self, id: AliasId) -> CommonResult<()> {
            self.suppressions.lock().unwrap().push(id);
            Ok(())
        }

        async fn increment_forwards(&self, id: AliasId) -> CommonResult<()> {
            self.forwards.lock().unwrap().push(id);
            Ok(())
        }
    }

    struct FakeUsers {
        users: Mutex<HashMap<UserId, User>>,
    }

    #[async_trait]
    impl UserRepository for FakeUsers {
        async fn get(&self, id: UserId) -> CommonResult<Option<User>> {
            Ok(self.users.lock().unwrap().get(&id).cloned())
        }
    }

    struct FakeMessages {
        created: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl MessageRepository for FakeMessages {
        async fn create(&self, message: &InboundMessage) -> CommonResult<()> {
            self.created.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct CaptureTransport {
        sent: Mutex<Vec<crate::forward::ForwardedMail>>,
    }

    #[async_trait]
    impl ForwardTransport for CaptureTransport {
        async fn send(&self, mail: &crate::forward::ForwardedMail) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    struct Harness {
        listener: InboundListener<CaptureTransport>,
        aliases: Arc<FakeAliases>,
        messages: Arc<FakeMessages>,
        transport: Arc<CaptureTransport>,
        events: mpsc::Receiver<TransactionEvent>,
    }

    fn user(active: bool) -> User {
        User {
            id: Uuid::now_v7(),
            email: "owner@real.example".to_string(),
            active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn alias(local_part: &str, user_id: Option<UserId>) -> Alias {
        Alias {
            id: Uuid::now_v7(),
            local_part: local_part.to_string(),
            domain: "mailmask.test".to_string(),
            user_id,
            active: true,
            forward_enabled: true,
            suppressions: 0,
            forwards: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn harness(aliases: Vec<Alias>, users: Vec<User>) -> Harness {
        let alias_map = aliases
            .into_iter()
            .map(|a| ((a.local_part.clone(), a.domain.clone()), a))
            .collect();
        let user_map = users.into_iter().map(|u| (u.id, u)).collect();

        let fake_aliases = Arc::new(FakeAliases {
            aliases: Mutex::new(alias_map),
            suppressions: Mutex::new(Vec::new()),
            forwards: Mutex::new(Vec::new()),
        });
        let fake_users = Arc::new(FakeUsers {
            users: Mutex::new(user_map),
        });
        let fake_messages = Arc::new(FakeMessages {
            created: Mutex::new(Vec::new()),
        });
        let transport = Arc::new(CaptureTransport {
            sent: Mutex::new(Vec::new()),
        });

        let (audit, events) = AuditSink::new(16);
        let dispatcher = ForwardDispatcher::new(
            transport.clone(),
            fake_aliases.clone(),
            &OutboundConfig::default(),
        );

        let config = MailConfig {
            domains: vec!["mailmask.test".to_string()],
            max_size_bytes: 4096,
            rewrite_as_quoted: false,
        };

        Harness {
            listener: InboundListener::new(
                config,
                fake_aliases.clone(),
                fake_users,
                fake_messages.clone(),
                audit,
                dispatcher,
            ),
            aliases: fake_aliases,
            messages: fake_messages,
            transport,
            events,
        }
    }

    async fn wait_for_dispatch(transport: &CaptureTransport) -> bool {
        for _ in 0..100 {
            if !transport.sent.lock().unwrap().is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    const CLEAN_MAIL: &str = "Message-ID: <abc@origin.example>\r\n\
        From: someone@origin.example\r\n\
        To: box@mailmask.test\r\n\
        Subject: hello\r\n\r\nbody\r\n";

    #[tokio::test]
    async fn test_accept_for_served_domain() {
        let mut h = harness(vec![], vec![]);
        assert!(h.listener.accept("someone@origin.example", "any@mailmask.test"));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_denies_foreign_domain() {
        let mut h = harness(vec![], vec![]);
        assert!(!h.listener.accept("someone@origin.example", "user@elsewhere.test"));

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::RelayDenied);
        assert_eq!(event.sender, "someone@origin.example");
        assert_eq!(event.recipient, None);
        assert_eq!(event.forward_target.as_deref(), Some("user@elsewhere.test"));
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accept_denies_unsplittable_recipient() {
        let mut h = harness(vec![], vec![]);
        assert!(!h.listener.accept("someone@origin.example", "not-an-address"));
        assert_eq!(h.events.try_recv().unwrap().status, TransactionStatus::RelayDenied);
    }

    #[tokio::test]
    async fn test_accept_with_audit_disabled_still_rejects() {
        let h = harness(vec![], vec![]);
        let quiet = InboundListener::new(
            MailConfig {
                domains: vec!["mailmask.test".to_string()],
                max_size_bytes: 4096,
                rewrite_as_quoted: false,
            },
            h.aliases.clone(),
            Arc::new(FakeUsers {
                users: Mutex::new(HashMap::new()),
            }),
            h.messages.clone(),
            AuditSink::disabled(),
            ForwardDispatcher::new(h.transport.clone(), h.aliases.clone(), &OutboundConfig::default()),
        );
        assert!(!quiet.accept("someone@origin.example", "user@elsewhere.test"));
    }

    #[tokio::test]
    async fn test_deliver_malformed_recipient() {
        let mut h = harness(vec![], vec![]);
        h.listener
            .deliver("someone@origin.example", "a@b@c", CLEAN_MAIL.as_bytes())
            .await
            .unwrap();

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::MalformedRecipient);
        assert_eq!(event.sender, "someone@origin.example");
        assert_eq!(event.recipient, None);
        assert_eq!(event.forward_target.as_deref(), Some("a@b@c"));
        assert!(h.messages.created.lock().unwrap().is_empty());
        assert!(h.aliases.suppressions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_unknown_alias() {
        let mut h = harness(vec![], vec![]);
        h.listener
            .deliver(
                "someone@origin.example",
                "ghost@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::NoSuchAlias);
        assert_eq!(event.recipient.as_deref(), Some("ghost@mailmask.test"));
        assert_eq!(event.forward_target, None);
        assert!(h.messages.created.lock().unwrap().is_empty());
        assert!(h.aliases.suppressions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_disabled_alias_counts_suppression() {
        let owner = user(true);
        let mut disabled = alias("box", Some(owner.id));
        disabled.active = false;
        let alias_id = disabled.id;

        let mut h = harness(vec![disabled], vec![owner]);
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::AliasDisabled);
        assert_eq!(event.forward_target.as_deref(), Some("owner@real.example"));
        assert_eq!(h.aliases.suppressions.lock().unwrap().as_slice(), &[alias_id]);
        assert!(h.messages.created.lock().unwrap().is_empty());
        assert!(h.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_disabled_owner_counts_suppression() {
        let owner = user(false);
        let aliased = alias("box", Some(owner.id));
        let alias_id = aliased.id;

        let mut h = harness(vec![aliased], vec![owner]);
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::OwnerDisabled);
        assert_eq!(event.forward_target.as_deref(), Some("owner@real.example"));
        assert_eq!(h.aliases.suppressions.lock().unwrap().as_slice(), &[alias_id]);
    }

    #[tokio::test]
    async fn test_deliver_orphaned_alias_reports_empty_target() {
        let mut h = harness(vec![alias("box", None)], vec![]);
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::OwnerDisabled);
        assert_eq!(event.forward_target.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_deliver_persists_and_forwards() {
        let owner = user(true);
        let aliased = alias("box", Some(owner.id));

        let mut h = harness(vec![aliased], vec![owner]);
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        let created = h.messages.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].sender, "someone@origin.example");
        assert_eq!(created[0].subject, "hello");
        assert_eq!(created[0].raw_message, CLEAN_MAIL);
        drop(created);

        assert!(wait_for_dispatch(&h.transport).await);
        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(
            sent[0].envelope.from().map(|a| a.to_string()),
            Some("box@mailmask.test".to_string())
        );
        let data = String::from_utf8(sent[0].data.clone()).unwrap();
        assert!(data.contains("To: owner@real.example"));
        assert!(data.contains("X-Loop: loopbreakerbox@mailmask.test"));
        drop(sent);

        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_loop_detected_persists_without_forward() {
        let owner = user(true);
        let aliased = alias("box", Some(owner.id));
        let mut h = harness(vec![aliased], vec![owner]);

        let looping = "Message-ID: <abc@example.org>\r\n\
            To: box@mailmask.test\r\n\
            References: <older@example.org>\r\n\
            Subject: loop\r\n\r\nbody\r\n";
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                looping.as_bytes(),
            )
            .await
            .unwrap();

        assert_eq!(h.messages.created.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.transport.sent.lock().unwrap().is_empty());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_forward_disabled_persists_without_forward() {
        let owner = user(true);
        let mut aliased = alias("box", Some(owner.id));
        aliased.forward_enabled = false;

        let mut h = harness(vec![aliased], vec![owner]);
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        assert_eq!(h.messages.created.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.transport.sent.lock().unwrap().is_empty());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_oversized_mail_dropped_silently() {
        let owner = user(true);
        let aliased = alias("box", Some(owner.id));
        let mut h = harness(vec![aliased], vec![owner]);

        // harness ceiling is 4096 bytes
        let huge = format!("Subject: big\r\n\r\n{}", "x".repeat(8192));
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                huge.as_bytes(),
            )
            .await
            .unwrap();

        assert!(h.messages.created.lock().unwrap().is_empty());
        assert!(h.transport.sent.lock().unwrap().is_empty());
        assert!(h.events.try_recv().is_err());
        assert!(h.aliases.suppressions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_invalid_forward_target_logs_status_400() {
        let mut owner = user(true);
        owner.email = "not an address".to_string();
        let aliased = alias("box", Some(owner.id));

        let mut h = harness(vec![aliased], vec![owner]);
        h.listener
            .deliver(
                "someone@origin.example",
                "box@mailmask.test",
                CLEAN_MAIL.as_bytes(),
            )
            .await
            .unwrap();

        // persisted, but the forward was aborted at compose time
        assert_eq!(h.messages.created.lock().unwrap().len(), 1);
        let event = h.events.try_recv().unwrap();
        assert_eq!(event.status, TransactionStatus::ForwardAddressInvalid);
        assert_eq!(event.recipient.as_deref(), Some("box@mailmask.test"));
        assert_eq!(event.forward_target.as_deref(), Some("not an address"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_precondition_checks_are_idempotent() {
        let mut h = harness(vec![], vec![]);
        for _ in 0..2 {
            h.listener
                .deliver(
                    "someone@origin.example",
                    "ghost@mailmask.test",
                    CLEAN_MAIL.as_bytes(),
                )
                .await
                .unwrap();
        }

        assert_eq!(h.events.try_recv().unwrap().status, TransactionStatus::NoSuchAlias);
        assert_eq!(h.events.try_recv().unwrap().status, TransactionStatus::NoSuchAlias);
        assert!(h.events.try_recv().is_err());
    }
}
