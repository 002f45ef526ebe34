//! Inbound SMTP transport bridge

mod gateway;

pub use gateway::SmtpGateway;
