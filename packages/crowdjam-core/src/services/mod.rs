//! Application services layer.
//!
//! This module contains the services that sit between the API layer and the
//! pure round logic in [`crate::session`]: session ownership, persistence,
//! per-session timers and command routing.

pub mod scheduler;
pub mod session_engine;
pub mod session_registry;
pub mod session_store;

pub use scheduler::SessionScheduler;
pub use session_engine::{CommandOutcome, SessionCommand, SessionEngine};
pub use session_registry::{Departure, SessionHandle, SessionRegistry};
pub use session_store::{InMemorySessionStore, SessionStore};
