//! Parsing: `.emlx` containers, RFC 5322 headers and dates, messages, and MBOX archives.

pub mod emlx;
pub mod header;
pub mod mbox;
pub mod message;
