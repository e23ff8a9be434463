//! Client for the remote chunk store backing room recordings.
//!
//! Live sessions upload short media chunks named so that every chunk of one
//! (session, participant, stream) shares a common prefix. This crate lists
//! those prefixes page by page, orders the results so concatenation
//! reproduces recording order, streams chunk bodies without buffering whole
//! recordings, and uploads finished files under overwrite-safe identifiers.

pub mod error;
pub mod http;
pub mod key;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use http::{HttpObjectStore, StoreConfig};
pub use key::{ChunkKey, StreamKind, scan_gaps, sort_refs};
pub use memory::MemoryObjectStore;
pub use store::{ByteStream, ChunkRef, ObjectStore};
