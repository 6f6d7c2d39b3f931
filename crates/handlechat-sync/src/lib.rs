//! Room synchronization and session lifecycle for handlechat.
//!
//! Provides:
//! - `SessionResolver` - Pick the room a session binds to
//! - `SyncEngine` - Single live subscription plus bootstrap window
//! - `OutboundCoordinator` - Text and two-phase attachment sends
//! - `SessionController` - Drive the engine from sign-in/sign-out events

pub mod buffer;
pub mod controller;
pub mod engine;
pub mod outbound;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{BufferEvent, MessageBuffer};
pub use controller::{AuthEvent, ControllerError, SessionController, SessionState, Transition};
pub use engine::{EngineNotice, EngineState, SyncEngine, SyncError};
pub use outbound::{OutboundCoordinator, OutboundError};
pub use resolver::SessionResolver;
