//! Bridge between the SMTP transport library and the inbound listener
//!
//! The SMTP protocol itself (command parsing, session state, dot-stuffing)
//! is `mailin-embedded`'s job; this handler only feeds its callbacks into
//! the pipeline. The library clones the handler per connection and drives
//! it on its own threads, so delivery re-enters the async runtime through
//! the stored handle.

use crate::forward::ForwardTransport;
use crate::inbound::InboundListener;
use mailin_embedded::response::{NO_MAILBOX, OK};
use mailin_embedded::{Handler, Response};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error};

/// Per-connection SMTP handler delegating to an [`InboundListener`]
pub struct SmtpGateway<T: ForwardTransport> {
    listener: Arc<InboundListener<T>>,
    runtime: Handle,
    max_data: usize,
    from: String,
    recipients: Vec<String>,
    data: Vec<u8>,
}

impl<T: ForwardTransport> SmtpGateway<T> {
    pub fn new(listener: Arc<InboundListener<T>>, runtime: Handle, max_data: usize) -> Self {
        Self {
            listener,
            runtime,
            max_data,
            from: String::new(),
            recipients: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl<T: ForwardTransport> Clone for SmtpGateway<T> {
    fn clone(&self) -> Self {
        Self::new(self.listener.clone(), self.runtime.clone(), self.max_data)
    }
}

impl<T: ForwardTransport> Handler for SmtpGateway<T> {
    fn mail(&mut self, _ip: IpAddr, _domain: &str, from: &str) -> Response {
        self.from = from.to_string();
        OK
    }

    fn rcpt(&mut self, to: &str) -> Response {
        if self.listener.accept(&self.from, to) {
            self.recipients.push(to.to_string());
            OK
        } else {
            debug!("Rejected recipient {} for sender {}", to, self.from);
            NO_MAILBOX
        }
    }

    fn data_start(&mut self, _domain: &str, _from: &str, _is8bit: bool, _to: &[String]) -> Response {
        self.data.clear();
        OK
    }

    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        // retain one byte past the ceiling so the bounded reader trips;
        // anything beyond that is discarded unread
        let room = (self.max_data + 1).saturating_sub(self.data.len());
        self.data.extend_from_slice(&buf[..buf.len().min(room)]);
        Ok(())
    }

    fn data_end(&mut self) -> Response {
        let recipients = std::mem::take(&mut self.recipients);
        let data = std::mem::take(&mut self.data);

        for recipient in recipients {
            let result = self
                .runtime
                .block_on(self.listener.deliver(&self.from, &recipient, &data[..]));
            if let Err(e) = result {
                error!("Delivery failed '{} => {}': {}", self.from, recipient, e);
            }
        }

        OK
    }
}
