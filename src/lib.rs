//! sqlview is a read-only viewer for SQLite database files: load a file,
//! list its tables, browse/search/sort/paginate rows, and compute simple
//! aggregate statistics inferred heuristically from column names.
//!
//! The library core (`session`, `stats`, `view`) is exposed to consumers
//! through an MCP server over stdio (`server`).

pub mod error;
pub mod heuristics;
pub mod server;
pub mod session;
pub mod stats;
pub mod view;
