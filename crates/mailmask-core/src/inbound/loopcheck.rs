//! Heuristic mail loop detection
//!
//! Forwarding a message that already passed through this relay would start
//! a forwarding storm, so the checks here favor over-blocking: a false
//! positive merely leaves the message unforwarded (the persisted copy is
//! unaffected), while a false negative loops.

use crate::{LOOP_HEADER_NAME, LOOP_HEADER_VALUE_PREFIX};
use mail_parser::{HeaderValue, Message};

/// Checks whether forwarding `mail` could trigger a loop.
///
/// Inspects the custom loop-marker header, the `Message-ID` domain, and the
/// `References` / `In-Reply-To` headers, in that order. Returns `None` when
/// forwarding is safe, or a human-readable reason when it is not. Messages
/// without a well-formed `Message-ID` are never forwarded.
pub fn check_for_loop(mail: &Message) -> Option<String> {
    // custom loop-marker header, matched against the first To recipient
    if let Some(marker) = header_text(mail, LOOP_HEADER_NAME) {
        let first_recipient = mail.to().and_then(|a| a.first()).and_then(|a| a.address());
        if let Some(recipient) = first_recipient {
            let expected = format!("{}{}", LOOP_HEADER_VALUE_PREFIX, recipient.to_lowercase());
            if marker.to_lowercase().contains(&expected) {
                return Some(format!("{} header already marks {}", LOOP_HEADER_NAME, recipient));
            }
        }
    }

    // determine the originating domain from the Message-ID
    let Some(message_id) = mail.message_id() else {
        return Some("not forwarding: message has no Message-ID header".to_string());
    };
    let Some(domain) = message_id.split('@').nth(1) else {
        return Some("not forwarding: Message-ID has no domain part".to_string());
    };
    let domain = domain.to_lowercase();
    let needle = format!("@{}", domain);

    if let Some(references) = header_text(mail, "References") {
        if references.to_lowercase().contains(&needle) {
            return Some(format!("References header mentions the alias domain {}", domain));
        }
    }

    if let Some(in_reply_to) = header_text(mail, "In-Reply-To") {
        if in_reply_to.to_lowercase().contains(&needle) {
            return Some(format!("In-Reply-To header mentions the alias domain {}", domain));
        }
    }

    None
}

/// Joins every textual value of the named header into one string
fn header_text(mail: &Message, name: &str) -> Option<String> {
    let mut joined = String::new();
    for header in mail.headers() {
        if !header.name().eq_ignore_ascii_case(name) {
            continue;
        }
        let piece = match header.value() {
            HeaderValue::Text(text) => text.to_string(),
            HeaderValue::TextList(list) => list.join(" "),
            _ => continue,
        };
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(&piece);
    }
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}
