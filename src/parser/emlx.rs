//! Reader for Apple Mail `.emlx` message files.
//!
//! An `.emlx` file is normally laid out as:
//!
//! ```text
//! 1234\n                  <- decimal byte count of the message
//! <1234 bytes of RFC 5322 message>
//! <?xml ... plist ...>    <- Apple Mail flags, ignored
//! ```
//!
//! The count line is optional. When it is missing, or declares more bytes than
//! the file holds, the whole file is returned unchanged so no content is lost.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};

/// Longest first line still considered as a byte count candidate.
const MAX_LENGTH_LINE: u64 = 64;

/// How the message bytes were located inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// A valid count line was found; exactly this many bytes were taken after it.
    LengthPrefixed(u64),
    /// The first line is not a byte count; the whole file is the message.
    Unframed,
    /// The count line declared more bytes than available; the whole file
    /// (count line included) was returned.
    Truncated { declared: u64, available: u64 },
}

/// Message bytes extracted from one container file.
#[derive(Debug, Clone)]
pub struct EmlxContent {
    pub bytes: Vec<u8>,
    pub framing: Framing,
}

/// Errors from reading a container.
#[derive(Error, Debug)]
pub enum EmlxError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The message is larger than the allowed size; reading stopped at the limit.
    #[error("message exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
}

/// Read the message bytes from an `.emlx` file.
///
/// At most `max_size + 1` message bytes are ever read; larger messages are
/// a [`ConvertError::Parse`] failure.
pub fn read_emlx(path: impl AsRef<Path>, max_size: usize) -> Result<EmlxContent> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConvertError::read(path, e))?;
    let content = read_emlx_from(file, max_size as u64).map_err(|e| match e {
        EmlxError::Io(e) => ConvertError::read(path, e),
        too_large @ EmlxError::TooLarge { .. } => ConvertError::parse(path, too_large.to_string()),
    })?;

    match content.framing {
        Framing::Truncated {
            declared,
            available,
        } => warn!(
            path = %path.display(),
            declared,
            available,
            "Byte count exceeds file content, using whole file"
        ),
        framing => debug!(path = %path.display(), ?framing, len = content.bytes.len(), "Read container"),
    }

    Ok(content)
}

/// Extract the message bytes from any seekable source, reading no more than
/// `max_size + 1` bytes of message.
pub fn read_emlx_from<R: Read + Seek>(
    source: R,
    max_size: u64,
) -> std::result::Result<EmlxContent, EmlxError> {
    let mut reader = BufReader::new(source);

    let mut first_line = Vec::new();
    reader
        .by_ref()
        .take(MAX_LENGTH_LINE)
        .read_until(b'\n', &mut first_line)?;

    let declared = match first_line.last() {
        Some(b'\n') => parse_length_line(&first_line),
        _ => None,
    };
    let Some(declared) = declared else {
        return Ok(EmlxContent {
            bytes: read_all_from_start(&mut reader, max_size)?,
            framing: Framing::Unframed,
        });
    };

    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(declared.min(max_size.saturating_add(1)))
        .read_to_end(&mut bytes)?;
    let available = bytes.len() as u64;

    if available > max_size {
        return Err(EmlxError::TooLarge { limit: max_size });
    }
    if available < declared {
        return Ok(EmlxContent {
            bytes: read_all_from_start(&mut reader, max_size)?,
            framing: Framing::Truncated {
                declared,
                available,
            },
        });
    }

    Ok(EmlxContent {
        bytes,
        framing: Framing::LengthPrefixed(declared),
    })
}

/// Interpret a line as a decimal byte count.
///
/// Surrounding whitespace is ignored. Counts too large for `u64` cannot be
/// satisfied by any file and are reported as the largest possible count,
/// which then takes the whole-file path.
fn parse_length_line(line: &[u8]) -> Option<u64> {
    let digits = line.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let value = digits
        .iter()
        .try_fold(0u64, |acc, &d| {
            acc.checked_mul(10)?.checked_add(u64::from(d - b'0'))
        })
        .unwrap_or(u64::MAX);
    Some(value)
}

fn read_all_from_start<R: Read + Seek>(
    reader: &mut BufReader<R>,
    max_size: u64,
) -> std::result::Result<Vec<u8>, EmlxError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    reader
        .by_ref()
        .take(max_size.saturating_add(1))
        .read_to_end(&mut bytes)?;
    if bytes.len() as u64 > max_size {
        return Err(EmlxError::TooLarge { limit: max_size });
    }
    Ok(bytes)
}
