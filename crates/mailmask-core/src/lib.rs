//! mailmask Core - inbound mail acceptance and forwarding pipeline
//!
//! This crate implements the delivery path for disposable forwarding
//! mailboxes: the recipient-domain acceptance gate, alias and owner
//! precondition checks, bounded message ingestion, loop detection, header
//! rewriting, asynchronous forwarding, and the transaction audit stream.

pub mod audit;
pub mod forward;
pub mod inbound;
pub mod smtp;

/// Header used to mark forwarded mail so a returning copy is recognized
pub const LOOP_HEADER_NAME: &str = "X-Loop";

/// Literal prefix of the loop-marker value, immediately followed by the
/// marked recipient address
pub const LOOP_HEADER_VALUE_PREFIX: &str = "loopbreaker";

pub use audit::{AuditSink, AuditWorker};
pub use forward::{compose_forward, ComposeError, ForwardDispatcher, ForwardTransport, ForwardedMail, SmtpRelay};
pub use inbound::{check_for_loop, read_limited, InboundListener, ReadError};
pub use smtp::SmtpGateway;
