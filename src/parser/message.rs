//! Message parsing and envelope synthesis.
//!
//! Parsing is lenient: anything that does not look like a header
//! ends the header block and becomes body. The only rejection is a message
//! larger than the configured limit.

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::debug;

use crate::model::address::EmailAddress;
use crate::model::envelope::Envelope;
use crate::model::message::{MailMessage, ParsedMessage};
use crate::parser::header;

/// Default maximum message size in bytes (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Why a message could not be parsed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("message is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Parses raw RFC 5322 bytes into a [`ParsedMessage`].
#[derive(Debug, Clone)]
pub struct MessageParser {
    max_message_size: usize,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageParser {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Split `data` into headers and body.
    ///
    /// A leading `From ` line is dropped; the archive writer emits a fresh
    /// envelope instead.
    pub fn parse(&self, data: &[u8]) -> Result<ParsedMessage, MessageParseError> {
        if data.len() > self.max_message_size {
            return Err(MessageParseError::TooLarge {
                size: data.len(),
                limit: self.max_message_size,
            });
        }

        let block = header::split_header_block(data);
        if block.unix_from.is_some() {
            debug!("Dropping existing envelope line");
        }

        Ok(ParsedMessage {
            headers: block.headers,
            body: data[block.body_start..].to_vec(),
        })
    }
}

/// Build the envelope for `msg`, using the current time when there is no usable date.
pub fn synthesize_envelope(msg: &impl MailMessage, sentinel: &str) -> Envelope {
    synthesize_envelope_at(msg, sentinel, Local::now())
}

/// Build the envelope for `msg` with an explicit fallback time.
pub fn synthesize_envelope_at(
    msg: &impl MailMessage,
    sentinel: &str,
    now: DateTime<Local>,
) -> Envelope {
    let from = msg.header("from").map(EmailAddress::parse).unwrap_or_default();
    let address = from.address_or(sentinel).to_string();

    let parsed_date = msg.header("date").and_then(header::parse_date);
    let (date, date_is_fallback) = match parsed_date {
        Some(dt) => (dt.with_timezone(&Local), false),
        None => (now, true),
    };

    Envelope {
        address,
        date,
        date_is_fallback,
    }
}
