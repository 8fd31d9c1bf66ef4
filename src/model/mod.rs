//! Core data model types: parsed messages, sender addresses, and envelopes.

pub mod address;
pub mod envelope;
pub mod message;
