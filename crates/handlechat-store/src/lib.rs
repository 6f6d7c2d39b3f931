//! Capability backends for the handlechat sync engine.
//!
//! Provides in-memory implementations (feature `memory`) of the remote log,
//! blob store, user directory and config source. Useful for development,
//! tests and single-process deployments.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryBlobStore, MemoryConfigSource, MemoryRemoteLog, MemoryUserDirectory};
