//! Export functionality: the MBOX archive writer.

pub mod mbox;
