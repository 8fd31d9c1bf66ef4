//! Streaming MBOX reader and the mboxrd `From ` escaping rules.
//!
//! Reads archives line by line with a 1 MB buffer. Every line starting with
//! `From ` opens a new entry; body lines of the form `>From `, `>>From `, …
//! lose exactly one leading `>` on the way out, undoing the escaping done
//! when the archive was written (see [`needs_escape`]).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ConvertError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// One entry read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MboxEntry {
    /// Byte offset of the envelope line in the archive.
    pub offset: u64,
    /// The envelope line without its terminator.
    pub envelope: String,
    /// Unescaped message bytes (headers, blank line, body).
    pub message: Vec<u8>,
}

/// Sequential reader over an MBOX archive.
pub struct MboxReader {
    path: PathBuf,
}

impl MboxReader {
    /// Open a reader for the archive at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::metadata(&path).map_err(|e| ConvertError::io(&path, e))?;
        Ok(Self { path })
    }

    /// Path to the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the archive, calling `entry_callback` for every entry.
    ///
    /// The callback returns `true` to continue or `false` to stop early.
    /// Content before the first envelope line is ignored with a warning.
    /// Returns the number of entries delivered.
    pub fn for_each_entry(
        &self,
        entry_callback: &mut dyn FnMut(MboxEntry) -> bool,
    ) -> Result<u64> {
        let file = File::open(&self.path).map_err(|e| ConvertError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut current: Option<MboxEntry> = None;
        let mut prev_line_was_blank = true;
        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            line_buf.clear();
            let line_len = reader
                .read_until(b'\n', &mut line_buf)
                .map_err(|e| ConvertError::io(&self.path, e))?;
            if line_len == 0 {
                break;
            }

            if is_mbox_separator(&line_buf) {
                if !prev_line_was_blank {
                    warn!(offset, "Found 'From ' separator without preceding blank line");
                }
                if let Some(done) = current.take() {
                    count += 1;
                    if !entry_callback(finish_entry(done)) {
                        return Ok(count);
                    }
                }
                current = Some(MboxEntry {
                    offset,
                    envelope: String::from_utf8_lossy(trim_line_end(&line_buf)).into_owned(),
                    message: Vec::new(),
                });
            } else if let Some(entry) = current.as_mut() {
                entry.message.extend_from_slice(unescape_line(&line_buf));
            } else if !is_blank_line(&line_buf) {
                warn!(offset, "Ignoring content before the first 'From ' line");
            }

            prev_line_was_blank = is_blank_line(&line_buf);
            offset += line_len as u64;
        }

        if let Some(done) = current.take() {
            count += 1;
            entry_callback(finish_entry(done));
        }

        Ok(count)
    }
}

/// Read every entry of the archive at `path` into memory.
pub fn read_archive(path: impl AsRef<Path>) -> Result<Vec<MboxEntry>> {
    let reader = MboxReader::new(path)?;
    let mut entries = Vec::new();
    reader.for_each_entry(&mut |entry| {
        entries.push(entry);
        true
    })?;
    Ok(entries)
}

/// Drop the blank separator line that follows every message.
fn finish_entry(mut entry: MboxEntry) -> MboxEntry {
    if entry.message.ends_with(b"\n\n") {
        entry.message.pop();
    } else if entry.message.ends_with(b"\r\n\r\n") {
        entry.message.truncate(entry.message.len() - 2);
    }
    entry
}

/// Check whether a line is an MBOX separator (`From ` at the start).
pub fn is_mbox_separator(line: &[u8]) -> bool {
    line.starts_with(b"From ")
}

/// Whether `line` must gain a leading `>` before it goes into an archive (`^>*From `).
pub fn needs_escape(line: &[u8]) -> bool {
    let quoted = line.iter().take_while(|&&b| b == b'>').count();
    line[quoted..].starts_with(b"From ")
}

/// Undo the archive escaping: `>+From ` loses one leading `>`.
pub fn unescape_line(line: &[u8]) -> &[u8] {
    if line.first() == Some(&b'>') && needs_escape(line) {
        &line[1..]
    } else {
        line
    }
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
