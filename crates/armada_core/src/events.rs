//! Events emitted by the engine each tick.
//!
//! Serialized as internally tagged JSON for the transport layer, e.g.
//! `{"type":"encounter-started","encounter":3,...}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::commands::{CommandId, CommandKind};
use crate::components::{EncounterId, FleetId};
use crate::encounter::Outcome;
use crate::factions::Faction;
use crate::pathfinding::GridCell;

/// Something observable happened during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// A fleet fired on a target within range.
    Shot {
        /// Encounter the exchange happened in.
        encounter: EncounterId,
        /// Firing fleet.
        attacker: FleetId,
        /// Target fleet.
        target: FleetId,
    },
    /// Damage landed on a fleet.
    Hit {
        /// Encounter the exchange happened in.
        encounter: EncounterId,
        /// Firing fleet.
        attacker: FleetId,
        /// Damaged fleet.
        target: FleetId,
        /// Health points absorbed.
        damage: u32,
        /// Ships in groups wiped out by this hit.
        ships_lost: u32,
    },
    /// A fleet lost its last ship.
    Destroy {
        /// Encounter it was destroyed in.
        encounter: EncounterId,
        /// Destroyed fleet.
        fleet: FleetId,
        /// Its faction.
        faction: Faction,
    },
    /// A strategic move finished.
    Arrived {
        /// Fleet that arrived.
        fleet: FleetId,
        /// Cell it arrived at.
        cell: GridCell,
    },
    /// A tactical encounter was created.
    EncounterStarted {
        /// New encounter.
        encounter: EncounterId,
        /// Strategic cell it was spawned from.
        cell: GridCell,
        /// Enrolled fleets.
        participants: Vec<FleetId>,
    },
    /// A fleet joined an encounter already in progress.
    Reinforced {
        /// Encounter joined.
        encounter: EncounterId,
        /// Arriving fleet.
        fleet: FleetId,
    },
    /// A tactical encounter ended.
    EncounterConcluded {
        /// Concluded encounter.
        encounter: EncounterId,
        /// Strategic cell it was spawned from.
        cell: GridCell,
        /// Winner or draw.
        outcome: Outcome,
        /// Ships lost per faction.
        casualties: BTreeMap<Faction, u32>,
    },
    /// A retreating fleet left its encounter.
    RetreatCompleted {
        /// Encounter left.
        encounter: EncounterId,
        /// Retreating fleet.
        fleet: FleetId,
        /// Strategic cell it landed on.
        cell: GridCell,
    },
    /// A timed command came due and was applied.
    CommandCompleted {
        /// Command identifier.
        command: CommandId,
        /// Fleet the command targeted.
        fleet: FleetId,
        /// What the command did.
        kind: CommandKind,
    },
    /// Periodic regeneration ran.
    ResourcesRegenerated {
        /// Number of fleets replenished.
        fleets: u32,
    },
}

impl EngineEvent {
    /// Fleet this event is primarily about, if any.
    #[must_use]
    pub const fn fleet(&self) -> Option<FleetId> {
        match self {
            Self::Shot { attacker, .. } => Some(*attacker),
            Self::Hit { target, .. } => Some(*target),
            Self::Destroy { fleet, .. }
            | Self::Arrived { fleet, .. }
            | Self::Reinforced { fleet, .. }
            | Self::RetreatCompleted { fleet, .. }
            | Self::CommandCompleted { fleet, .. } => Some(*fleet),
            Self::EncounterStarted { .. }
            | Self::EncounterConcluded { .. }
            | Self::ResourcesRegenerated { .. } => None,
        }
    }
}
