//! In-memory backends.
//!
//! Data is lost on restart.

mod blob;
mod config;
mod directory;
mod log;

pub use blob::MemoryBlobStore;
pub use config::MemoryConfigSource;
pub use directory::MemoryUserDirectory;
pub use log::MemoryRemoteLog;

fn poisoned<E: std::fmt::Display>(e: E) -> String {
    format!("lock poisoned: {e}")
}
