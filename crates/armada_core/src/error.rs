//! Error types for the fleet engine.

use thiserror::Error;

use crate::components::{EncounterId, FleetId};
use crate::pathfinding::GridCell;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Broad classification of an [`EngineError`].
///
/// Lets command callers tell an invalid request apart from a valid one
/// that cannot be carried out right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself was malformed or referenced bad state.
    Validation,
    /// The request was valid but no route exists at the moment.
    Unreachable,
    /// The backing store failed.
    Storage,
    /// Configuration was rejected.
    Configuration,
}

/// Top-level error type for all engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Referenced fleet does not exist in the session.
    #[error("Fleet not found: {0}")]
    FleetNotFound(FleetId),

    /// Referenced encounter does not exist in the session.
    #[error("Encounter not found: {0}")]
    EncounterNotFound(EncounterId),

    /// Destination lies outside the navigation grid.
    #[error("Destination ({}, {}) is outside the navigation grid", .0.x, .0.y)]
    OutOfBounds(GridCell),

    /// Destination cell cannot be entered.
    #[error("Destination ({}, {}) is impassable", .0.x, .0.y)]
    ImpassableDestination(GridCell),

    /// Strategic orders are refused while a fleet is fighting.
    #[error("Fleet {0} is currently in combat")]
    FleetInCombat(FleetId),

    /// Tactical orders need a fleet enrolled in an encounter.
    #[error("Fleet {0} is not part of an active encounter")]
    NotInEncounter(FleetId),

    /// Destroyed fleets accept no orders.
    #[error("Fleet {0} has been destroyed")]
    FleetDestroyed(FleetId),

    /// Attack target belongs to the attacker's own faction.
    #[error("Fleet {target} is not hostile to fleet {attacker}")]
    TargetNotHostile {
        /// Attacking fleet.
        attacker: FleetId,
        /// Intended target.
        target: FleetId,
    },

    /// Attack target is beyond the attacker's combat range.
    #[error("Target out of range: distance {distance}, range {range}")]
    TargetOutOfRange {
        /// Distance to target, rounded down.
        distance: u32,
        /// Attacker combat range.
        range: u32,
    },

    /// Planned route needs more fuel than the fleet carries.
    #[error("Insufficient fuel: need {required}, have {available}")]
    InsufficientFuel {
        /// Fuel the route needs.
        required: u32,
        /// Fuel on board.
        available: u32,
    },

    /// Command costs more supplies than the fleet carries.
    #[error("Insufficient supplies: need {required}, have {available}")]
    InsufficientSupplies {
        /// Supplies the command needs.
        required: u32,
        /// Supplies on board.
        available: u32,
    },

    /// No route within the search limit.
    #[error("No path from ({}, {}) to ({}, {})", .from.x, .from.y, .to.x, .to.y)]
    Unreachable {
        /// Start cell.
        from: GridCell,
        /// Requested destination.
        to: GridCell,
    },

    /// Navigation grid data was inconsistent.
    #[error("Invalid navigation grid: {0}")]
    InvalidGrid(String),

    /// Configuration rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal invariant broken.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::Storage(_) | Self::InvalidState(_) => ErrorKind::Storage,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            _ => ErrorKind::Validation,
        }
    }
}
