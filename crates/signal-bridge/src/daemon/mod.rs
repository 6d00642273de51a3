//! Tool host: operation table, NDJSON envelope and the stdio server loop.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial module structure

pub mod protocol;
pub mod server;
pub mod service;
