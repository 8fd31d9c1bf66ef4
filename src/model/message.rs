//! Parsed message types.

/// Read access to a message, as needed by envelope synthesis and the archive writer.
pub trait MailMessage {
    /// Unfolded value of the first header named `name` (case-insensitive).
    fn header(&self, name: &str) -> Option<&str>;

    /// Raw body bytes (everything after the header/body separator).
    fn body(&self) -> &[u8];
}

/// One header field as found in the source message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Field name exactly as written (case preserved).
    pub name: String,
    /// Unfolded, trimmed value used for lookups.
    pub value: String,
    /// The source bytes of the field, continuation lines and line endings included.
    pub raw: Vec<u8>,
}

impl Header {
    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// A message split into its ordered header list and opaque body.
///
/// Duplicate headers are kept in source order; lookups return the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl MailMessage for ParsedMessage {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}
