//! `emlx2mbox`: convert Apple Mail `.emlx` message trees into one MBOX archive.
//!
//! This crate provides the core library: reading `.emlx` containers, parsing
//! messages, synthesizing envelope lines, and writing a locked mboxrd archive.

pub mod config;
pub mod convert;
pub mod discovery;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod paths;
