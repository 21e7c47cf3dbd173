//! # Armada Server
//!
//! Authoritative session host for the fleet engine.
//!
//! A [`FleetEngine`] turns commands into validated state changes against a
//! [`SessionStore`]. Each session's [`SessionScheduler`] owns the clock,
//! the RNG and the timed-command queue, and ticks on its own `tokio` task
//! under the [`SessionRegistry`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod engine;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, RegenerationRules, ServerConfig};
pub use engine::{EntityFailure, EntityRef, FleetEngine, SharedTerrain, UpdateReport};
pub use registry::{SessionRegistry, SessionStatus};
pub use scheduler::{SessionScheduler, TickReport};
pub use store::{InMemoryStore, SessionSnapshot, SessionStore};
