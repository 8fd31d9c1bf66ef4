//! The synthetic `From ` line that opens every archive entry.

use std::fmt;

use chrono::{DateTime, Local};

/// `strftime` pattern matching C `asctime()` without the trailing newline,
/// e.g. `Thu Jan  4 10:00:00 2024`.
pub const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Envelope of one archive entry: `From <address> <asctime date>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Bare sender address, or the configured sentinel.
    pub address: String,
    /// Message date in local time.
    pub date: DateTime<Local>,
    /// `true` when `date` is the conversion time rather than the `Date:` header.
    pub date_is_fallback: bool,
}

impl Envelope {
    /// The full envelope line, without line terminator.
    pub fn line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "From {} {}",
            self.address,
            self.date.format(ASCTIME_FORMAT)
        )
    }
}
