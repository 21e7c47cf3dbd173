//! # Armada Core
//!
//! Fleet movement and tactical combat engine for a persistent,
//! multi-faction strategy session.
//!
//! This crate contains **only** deterministic logic:
//! - No IO
//! - No async
//! - No wall clock (callers pass simulated time)
//! - No system randomness (callers pass a seeded RNG)
//! - Fixed-point math for every simulated quantity
//!
//! The session runtime (`armada_server`) loads entities from a store,
//! runs these components once per tick, and writes the results back.
//!
//! ## Crate Structure
//!
//! - [`pathfinding`] - Navigation grid and A* search
//! - [`terrain`] - Terrain hazards and the [`terrain::TerrainAssessor`] seam
//! - [`components`] - Fleet data model
//! - [`movement`] - Strategic and tactical movement, warp variance
//! - [`combat`] - Damage formulas and attrition
//! - [`encounter`] - Tactical encounter lifecycle
//! - [`commands`] - Timed commander commands
//! - [`events`] - Per-tick events
//! - [`rules`] - Tunable numeric rules
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod combat;
pub mod commands;
pub mod components;
pub mod encounter;
pub mod error;
pub mod events;
pub mod factions;
pub mod math;
pub mod movement;
pub mod pathfinding;
pub mod rules;
pub mod terrain;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::combat::{AttackKind, CombatMode, CombatResolver, RangedOutcome};
    pub use crate::commands::{CommandId, CommandKind, TimedCommand, TimedCommandQueue};
    pub use crate::components::*;
    pub use crate::encounter::{
        EncounterResult, EncounterStatus, Outcome, Roster, TacticalEncounter,
        TacticalEncounterManager,
    };
    pub use crate::error::{EngineError, ErrorKind, Result};
    pub use crate::events::EngineEvent;
    pub use crate::factions::Faction;
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::movement::{MoveOrder, MovementController, WarpOutcome};
    pub use crate::pathfinding::{find_path, GridCell, NavGrid};
    pub use crate::rules::EngineRules;
    pub use crate::terrain::{SectorTerrain, TerrainAssessor};
}
