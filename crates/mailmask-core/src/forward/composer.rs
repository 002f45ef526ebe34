//! Forward message composition
//!
//! Rewrites an accepted message for the outbound hop. The relay identity is
//! deliberately isolated from the original (possibly spoofed) sender: the
//! forwarded message carries the alias address as sender and `From`, while
//! `Reply-To` routes replies back to the external sender.

use crate::{LOOP_HEADER_NAME, LOOP_HEADER_VALUE_PREFIX};
use lettre::address::{Address, AddressError, Envelope};
use mail_builder::MessageBuilder;
use mail_parser::Message;
use thiserror::Error;

/// Headers replaced or stripped before the forward is sent
const STRIPPED_HEADERS: &[&str] = &["To", "Cc", "Bcc", "From", "Sender", "Reply-To"];

/// Errors composing the outbound message; all of them abort the forward
/// while leaving the persisted copy untouched
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid address '{address}': {source}")]
    InvalidAddress {
        address: String,
        source: AddressError,
    },

    #[error("failed to build envelope: {0}")]
    Envelope(String),

    #[error("failed to build quoted wrapper: {0}")]
    Quote(#[from] std::io::Error),
}

/// A message ready for the outbound relay
#[derive(Debug, Clone)]
pub struct ForwardedMail {
    pub envelope: Envelope,
    pub data: Vec<u8>,
}

/// Produces the outbound copy of `raw` addressed to `forward_target`.
///
/// `Cc`/`Bcc` are dropped, `To` is replaced by the forward target, the
/// envelope sender and `From` become the alias address, and the marker
/// headers (`X-FORWARDED-FROM`, loop marker, `Auto-Submitted`) are added.
/// When `rewrite_as_quoted` is set the original is first wrapped as a
/// quoted forward inside a fresh message.
pub fn compose_forward(
    raw: &str,
    mail: &Message,
    original_sender: &str,
    alias_address: &str,
    forward_target: &str,
    rewrite_as_quoted: bool,
) -> Result<ForwardedMail, ComposeError> {
    let target: Address = parse_address(forward_target)?;
    let sender: Address = parse_address(alias_address)?;

    let source = if rewrite_as_quoted {
        quote_original(mail)?
    } else {
        raw.to_string()
    };

    let (head, body) = split_raw(&source);

    let mut out = String::with_capacity(source.len() + 256);
    let mut skipping = false;
    for line in head.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // continuation line belongs to the preceding header
            if skipping {
                continue;
            }
        } else {
            let name = line.split(':').next().unwrap_or("");
            skipping = STRIPPED_HEADERS
                .iter()
                .any(|stripped| stripped.eq_ignore_ascii_case(name));
            if skipping {
                continue;
            }
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out.push_str(&format!("To: {}\r\n", forward_target));
    out.push_str(&format!("From: {}\r\n", alias_address));
    out.push_str(&format!("Sender: {}\r\n", alias_address));
    out.push_str(&format!("Reply-To: {}\r\n", original_sender));
    out.push_str(&format!("X-FORWARDED-FROM: {}\r\n", original_sender));
    out.push_str(&format!(
        "{}: {}{}\r\n",
        LOOP_HEADER_NAME, LOOP_HEADER_VALUE_PREFIX, alias_address
    ));
    out.push_str("Auto-Submitted: auto-forwarded\r\n");
    out.push_str("\r\n");
    out.push_str(body);

    let envelope = Envelope::new(Some(sender), vec![target])
        .map_err(|e| ComposeError::Envelope(e.to_string()))?;

    Ok(ForwardedMail {
        envelope,
        data: out.into_bytes(),
    })
}

fn parse_address(address: &str) -> Result<Address, ComposeError> {
    address
        .parse()
        .map_err(|source| ComposeError::InvalidAddress {
            address: address.to_string(),
            source,
        })
}

/// Splits a raw message into its header block and body at the first blank line
fn split_raw(raw: &str) -> (&str, &str) {
    if let Some(idx) = raw.find("\r\n\r\n") {
        (&raw[..idx], &raw[idx + 4..])
    } else if let Some(idx) = raw.find("\n\n") {
        (&raw[..idx], &raw[idx + 2..])
    } else {
        (raw, "")
    }
}

/// Wraps the original message as a quoted text forward inside a new message
fn quote_original(mail: &Message) -> std::io::Result<String> {
    let subject = mail.subject().unwrap_or_default();
    let from = mail
        .from()
        .and_then(|a| a.first())
        .and_then(|a| a.address())
        .unwrap_or("unknown sender");

    let mut body = String::from("---------- Forwarded message ----------\r\n");
    body.push_str(&format!("From: {}\r\n", from));
    body.push_str(&format!("Subject: {}\r\n\r\n", subject));

    let text = mail
        .body_text(0)
        .unwrap_or(std::borrow::Cow::Borrowed(""));
    for line in text.lines() {
        body.push_str("> ");
        body.push_str(line);
        body.push_str("\r\n");
    }

    MessageBuilder::new()
        .subject(subject)
        .text_body(body)
        .write_to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_parser::MessageParser;
    use pretty_assertions::assert_eq;

    const RAW: &str = "Message-ID: <abc@origin.example>\r\n\
        From: Someone <someone@origin.example>\r\n\
        To: box@mailmask.test\r\n\
        Cc: copy@origin.example\r\n\
        Bcc: hidden@origin.example\r\n\
        Subject: hello\r\n\r\n\
        body line\r\n";

    fn compose(rewrite: bool) -> ForwardedMail {
        let mail = MessageParser::default().parse(RAW.as_bytes()).unwrap();
        compose_forward(
            RAW,
            &mail,
            "someone@origin.example",
            "box@mailmask.test",
            "owner@real.example",
            rewrite,
        )
        .unwrap()
    }

    fn header_lines(mail: &ForwardedMail) -> Vec<String> {
        let text = String::from_utf8(mail.data.clone()).unwrap();
        let head = text.split("\r\n\r\n").next().unwrap();
        head.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_headers_rewritten() {
        let forwarded = compose(false);
        let headers = header_lines(&forwarded);

        assert!(headers.contains(&"To: owner@real.example".to_string()));
        assert!(headers.contains(&"From: box@mailmask.test".to_string()));
        assert!(headers.contains(&"Sender: box@mailmask.test".to_string()));
        assert!(headers.contains(&"Reply-To: someone@origin.example".to_string()));
        assert!(headers.contains(&"X-FORWARDED-FROM: someone@origin.example".to_string()));
        assert!(headers.contains(&"X-Loop: loopbreakerbox@mailmask.test".to_string()));
        assert!(headers.contains(&"Auto-Submitted: auto-forwarded".to_string()));
    }

    #[test]
    fn test_cc_and_bcc_stripped() {
        let forwarded = compose(false);
        let headers = header_lines(&forwarded);

        assert!(!headers.iter().any(|l| l.starts_with("Cc:")));
        assert!(!headers.iter().any(|l| l.starts_with("Bcc:")));
        // exactly one To and one From survive
        assert_eq!(headers.iter().filter(|l| l.starts_with("To:")).count(), 1);
        assert_eq!(headers.iter().filter(|l| l.starts_with("From:")).count(), 1);
    }

    #[test]
    fn test_body_preserved() {
        let forwarded = compose(false);
        let text = String::from_utf8(forwarded.data).unwrap();
        assert!(text.ends_with("\r\n\r\nbody line\r\n") || text.contains("\r\n\r\nbody line"));
    }

    #[test]
    fn test_folded_stripped_header_fully_removed() {
        let raw = "Message-ID: <abc@origin.example>\r\n\
            To: box@mailmask.test,\r\n\
            \tother@mailmask.test\r\n\
            Subject: folded\r\n\r\nbody\r\n";
        let mail = MessageParser::default().parse(raw.as_bytes()).unwrap();
        let forwarded = compose_forward(
            raw,
            &mail,
            "someone@origin.example",
            "box@mailmask.test",
            "owner@real.example",
            false,
        )
        .unwrap();
        let text = String::from_utf8(forwarded.data).unwrap();
        assert!(!text.contains("other@mailmask.test"));
    }

    #[test]
    fn test_envelope_uses_alias_as_sender() {
        let forwarded = compose(false);
        assert_eq!(
            forwarded.envelope.from().map(|a| a.to_string()),
            Some("box@mailmask.test".to_string())
        );
        let to: Vec<String> = forwarded.envelope.to().iter().map(|a| a.to_string()).collect();
        assert_eq!(to, vec!["owner@real.example".to_string()]);
    }

    #[test]
    fn test_invalid_forward_target_rejected() {
        let mail = MessageParser::default().parse(RAW.as_bytes()).unwrap();
        let err = compose_forward(
            RAW,
            &mail,
            "someone@origin.example",
            "box@mailmask.test",
            "not an address",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::InvalidAddress { .. }));
    }

    #[test]
    fn test_quoted_rewrite_wraps_body() {
        let forwarded = compose(true);
        let text = String::from_utf8(forwarded.data).unwrap();

        assert!(text.contains("Forwarded message"));
        assert!(text.contains("> body line"));
        assert!(text.contains("Subject: hello"));
        // marker headers apply to the wrapper as well
        assert!(text.contains("X-Loop: loopbreakerbox@mailmask.test"));
        assert!(text.contains("To: owner@real.example"));
    }
}
