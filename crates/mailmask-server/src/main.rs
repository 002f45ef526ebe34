//! mailmask - forwarding mail server entry point

use anyhow::Result;
use mailin_embedded::{Server, SslConfig};
use mailmask_common::config::{Config, LoggingConfig};
use mailmask_core::{AuditSink, AuditWorker, ForwardDispatcher, InboundListener, SmtpGateway, SmtpRelay};
use mailmask_storage::db::DatabasePool;
use mailmask_storage::repository::{
    AliasRepository, AliasRepositoryImpl, MessageRepository, MessageRepositoryImpl,
    TransactionRepository, TransactionRepositoryImpl, UserRepository, UserRepositoryImpl,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting mailmask mail server...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // Run migrations
    db_pool.migrate().await?;

    // Repositories
    let aliases: Arc<dyn AliasRepository> = Arc::new(AliasRepositoryImpl::new(db_pool.clone()));
    let users: Arc<dyn UserRepository> = Arc::new(UserRepositoryImpl::new(db_pool.clone()));
    let messages: Arc<dyn MessageRepository> = Arc::new(MessageRepositoryImpl::new(db_pool.clone()));
    let transactions: Arc<dyn TransactionRepository> =
        Arc::new(TransactionRepositoryImpl::new(db_pool.clone()));

    // Transaction audit stream; retention 0 disables it entirely
    let (audit, audit_handle) = if config.transactions.retention_days != 0 {
        let (sink, rx) = AuditSink::new(config.transactions.queue_capacity);
        let worker = AuditWorker::new(rx, transactions, config.transactions.retention_days);
        (sink, Some(tokio::spawn(worker.run())))
    } else {
        info!("Transaction logging disabled (retention is 0)");
        (AuditSink::disabled(), None)
    };

    // Outbound relay and dispatcher
    let relay = Arc::new(SmtpRelay::new(&config.outbound));
    let dispatcher = ForwardDispatcher::new(relay, aliases.clone(), &config.outbound);

    // Inbound pipeline
    let listener = Arc::new(InboundListener::new(
        config.mail.clone(),
        aliases,
        users,
        messages,
        audit,
        dispatcher,
    ));

    // Inbound SMTP transport; the library owns the protocol and its threads
    let gateway = SmtpGateway::new(listener, Handle::current(), config.mail.max_size_bytes);
    let hostname = config.server.hostname.clone();
    let bind = config.server.smtp_bind.clone();

    info!("SMTP gateway listening on {} as {}", bind, hostname);

    let smtp_handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut server = Server::new(gateway);
        server.with_name(hostname);
        server
            .with_ssl(SslConfig::None)
            .map_err(|e| anyhow::anyhow!("SMTP server TLS setup failed: {}", e))?;
        server
            .with_addr(bind)
            .map_err(|e| anyhow::anyhow!("SMTP server bind failed: {}", e))?;
        server
            .serve()
            .map_err(|e| anyhow::anyhow!("SMTP server stopped: {}", e))?;
        Ok(())
    });

    info!("mailmask server started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    smtp_handle.abort();
    if let Some(handle) = audit_handle {
        handle.abort();
    }

    info!("mailmask server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailmask=debug", config.level)));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .init();
    }
}
