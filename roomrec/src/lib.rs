//! roomrec library crate.
//!
//! Core of the recording finalizer: per-participant stream reconstruction,
//! side-by-side composition and publishing. The HTTP/auth surface of the
//! conferencing backend lives elsewhere and calls in through
//! [`pipeline::Orchestrator`].

pub mod config;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod report;

pub use error::{Error, Result};
