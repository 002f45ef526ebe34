//! Bounded reading of inbound message data
//!
//! Inbound mail is 7-bit text; the stream is decoded as US-ASCII with
//! replacement characters for anything outside that range. The running
//! total is checked after every chunk so a hostile or misconfigured sender
//! cannot grow the buffer past the configured ceiling.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Errors produced while reading inbound message data
#[derive(Debug, Error)]
pub enum ReadError {
    /// The stream crossed the configured ceiling; the message is dropped
    #[error("data stream exceeds size limit of {limit} bytes")]
    SizeLimitExceeded { limit: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads up to `max_size` characters from `data` using US-ASCII decoding.
///
/// Returns the decoded text, or [`ReadError::SizeLimitExceeded`] as soon as
/// the chunk that crosses the boundary has been read.
pub async fn read_limited<R>(mut data: R, max_size: usize) -> Result<String, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 4096];
    let mut text = String::new();
    let mut count: usize = 0;

    loop {
        let n = data.read(&mut buffer).await?;
        if n == 0 {
            break;
        }

        for &byte in &buffer[..n] {
            if byte.is_ascii() {
                text.push(byte as char);
            } else {
                text.push(char::REPLACEMENT_CHARACTER);
            }
        }

        count += n;
        if count > max_size {
            return Err(ReadError::SizeLimitExceeded { limit: max_size });
        }
    }

    Ok(text)
}
