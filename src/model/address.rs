//! Mailbox address extraction from `From:` header values (RFC 5322 §3.4).

/// The bare mailbox of a sender; display names and comments are dropped.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `address = "juan@ejemplo.com"`
/// - `"user@example.com (User Name)"` → `address = "user@example.com"`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailAddress {
    /// The bare email address (`user@domain`), possibly empty.
    pub address: String,
}

impl EmailAddress {
    /// Parse the first mailbox out of a header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    /// - `"user@domain.com (Display Name)"`
    ///
    /// For address lists only the first mailbox is kept.
    pub fn parse(raw: &str) -> Self {
        let first = first_mailbox(raw);
        let trimmed = first.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        // "Display Name <address>" or "<address>"
        if let Some(angle_start) = trimmed.rfind('<') {
            if let Some(angle_end) = trimmed.rfind('>') {
                if angle_end > angle_start {
                    return Self {
                        address: compact(&trimmed[angle_start + 1..angle_end]),
                    };
                }
            }
        }

        // "address (Display Name)"
        if let Some(paren_start) = trimmed.find('(') {
            return Self {
                address: compact(&trimmed[..paren_start]),
            };
        }

        Self {
            address: compact(trimmed),
        }
    }

    /// The bare address, or `sentinel` when there is none.
    pub fn address_or<'a>(&'a self, sentinel: &'a str) -> &'a str {
        if self.address.is_empty() {
            sentinel
        } else {
            &self.address
        }
    }
}

/// Cut an address list at the first top-level comma.
///
/// Commas inside quotes, angle brackets or comments do not split.
fn first_mailbox(raw: &str) -> &str {
    let mut in_quotes = false;
    let mut angle_depth = 0u32;
    let mut paren_depth = 0u32;

    for (i, ch) in raw.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => angle_depth += 1,
            '>' if !in_quotes => angle_depth = angle_depth.saturating_sub(1),
            '(' if !in_quotes => paren_depth += 1,
            ')' if !in_quotes => paren_depth = paren_depth.saturating_sub(1),
            ',' if !in_quotes && angle_depth == 0 && paren_depth == 0 => return &raw[..i],
            _ => {}
        }
    }
    raw
}

/// An envelope address must be a single token.
fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
