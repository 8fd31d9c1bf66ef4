//! RFC 5322 header block tokenizing (folding, raw byte preservation) and date parsing.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

use crate::model::message::Header;

/// Result of scanning the start of a message for its header block.
#[derive(Debug, Clone, Default)]
pub struct HeaderBlock {
    /// Header fields in source order.
    pub headers: Vec<Header>,
    /// A pre-existing `From ` envelope line found on the first line, if any.
    pub unix_from: Option<Vec<u8>>,
    /// Byte offset where the body begins.
    pub body_start: usize,
}

/// Split `data` into header fields and locate the body.
///
/// Scanning stops at the first blank line (consumed as the separator) or at
/// the first line that is neither a field nor a continuation line. In the
/// latter case that line is the first line of the body.
pub fn split_header_block(data: &[u8]) -> HeaderBlock {
    let mut block = HeaderBlock {
        body_start: data.len(),
        ..HeaderBlock::default()
    };
    let mut pos = 0usize;

    while pos < data.len() {
        let end = next_line_end(data, pos);
        let line = &data[pos..end];

        if pos == 0 && line.starts_with(b"From ") {
            block.unix_from = Some(line.to_vec());
        } else if is_line_break(line) {
            block.body_start = end;
            return block;
        } else if line[0] == b' ' || line[0] == b'\t' {
            match block.headers.last_mut() {
                Some(last) => {
                    last.raw.extend_from_slice(line);
                    append_continuation(&mut last.value, line);
                }
                None => {
                    debug!(offset = pos, "Continuation line before any header, starting body");
                    block.body_start = pos;
                    return block;
                }
            }
        } else if let Some(colon) = field_name_end(line) {
            block.headers.push(Header {
                name: String::from_utf8_lossy(&line[..colon]).into_owned(),
                value: decode_header_bytes(&line[colon + 1..]).trim().to_string(),
                raw: line.to_vec(),
            });
        } else {
            debug!(offset = pos, "Non-header line without separator, starting body");
            block.body_start = pos;
            return block;
        }

        pos = end;
    }

    block
}

/// Index one past the end of the line starting at `start` (`\n` included).
fn next_line_end(data: &[u8], start: usize) -> usize {
    data[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(data.len(), |i| start + i + 1)
}

/// A line that is only a line terminator.
fn is_line_break(line: &[u8]) -> bool {
    matches!(line, b"\n" | b"\r\n" | b"\r")
}

/// Position of the colon ending a field name, if `line` starts a header field.
///
/// Field names are printable US-ASCII other than the colon.
fn field_name_end(line: &[u8]) -> Option<usize> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| (0x21..=0x7e).contains(&b)) {
        return None;
    }
    Some(colon)
}

fn append_continuation(value: &mut String, line: &[u8]) {
    let text = decode_header_bytes(line);
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !value.is_empty() {
        value.push(' ');
    }
    value.push_str(text);
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Parse a `Date:` header value.
///
/// RFC 2822 is tried first, then common real-world variants. A date with no
/// zone is taken as local time. Returns `None` when nothing matches.
pub fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = strip_trailing_comment(date_str.trim());
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt);
    }

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [no_dow.to_string(), replace_named_tz(no_dow)];

    const ZONED: [&str; 4] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d-%b-%Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
    ];
    const NAIVE: [&str; 4] = [
        "%d %b %Y %H:%M:%S",
        "%d-%b-%Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S",
    ];

    for candidate in &candidates {
        for fmt in ZONED {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt);
            }
        }
    }
    for fmt in NAIVE {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(no_dow, fmt) {
            if let Some(local) = Local.from_local_datetime(&ndt).earliest() {
                return Some(local.fixed_offset());
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser`'s lenient date grammar have a go.
fn mail_parser_date(input: &str) -> Option<DateTime<FixedOffset>> {
    use mail_parser::MessageParser;

    let fake_msg = format!("Date: {input}\n\n");
    let parsed = MessageParser::default().parse(fake_msg.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339).ok()
}

/// Drop a trailing `(comment)`, e.g. `+0000 (UTC)`.
fn strip_trailing_comment(s: &str) -> &str {
    match (s.rfind('('), s.ends_with(')')) {
        (Some(open), true) => s[..open].trim_end(),
        _ => s,
    }
}

/// Strip a leading day-of-week such as `"Thu, "` or `"Thu "`.
fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if let Some(rest) = rest.strip_prefix(',').or_else(|| rest.strip_prefix(' ')) {
                return rest.trim_start();
            }
        }
    }
    s
}

/// Replace a trailing zone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 14] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            if head.ends_with(' ') {
                return format!("{head}{offset}");
            }
        }
    }
    s.to_string()
}
