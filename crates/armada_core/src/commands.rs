//! Commander-issued commands that complete after a delay.
//!
//! Commands are kept ordered by completion time, then by id, so draining
//! is deterministic when several fall due in the same tick.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::components::{Fleet, FleetId, Formation, SessionId, SimTime};
use crate::error::{EngineError, Result};
use crate::pathfinding::GridCell;

/// Unique identifier for timed commands.
pub type CommandId = u64;

/// What a timed command does when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Switch formation.
    ChangeFormation(Formation),
    /// Take on supplies and fuel.
    Resupply {
        /// Supplies added.
        supplies: u32,
        /// Fuel added.
        fuel: u32,
    },
    /// Restore per-ship health across all groups.
    Repair {
        /// Health points restored per ship.
        health: u32,
    },
    /// Start a strategic move.
    Warp {
        /// Requested destination.
        destination: GridCell,
    },
}

/// A command waiting for its completion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedCommand {
    /// Command identifier.
    pub id: CommandId,
    /// Owning session.
    pub session: SessionId,
    /// Target fleet.
    pub fleet: FleetId,
    /// Effect.
    pub kind: CommandKind,
    /// Simulated time at which it takes effect.
    pub completes_at: SimTime,
}

/// Pending timed commands for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimedCommandQueue {
    next_id: CommandId,
    pending: BTreeMap<(SimTime, CommandId), TimedCommand>,
}

impl TimedCommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command and return its id.
    pub fn schedule(
        &mut self,
        session: SessionId,
        fleet: FleetId,
        kind: CommandKind,
        completes_at: SimTime,
    ) -> CommandId {
        self.next_id += 1;
        let id = self.next_id;
        self.pending.insert(
            (completes_at, id),
            TimedCommand {
                id,
                session,
                fleet,
                kind,
                completes_at,
            },
        );
        id
    }

    /// Remove and return every command due at or before `now`, in order.
    pub fn drain_due(&mut self, now: SimTime) -> Vec<TimedCommand> {
        let later = self.pending.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values().collect()
    }

    /// Cancel a pending command.
    pub fn cancel(&mut self, id: CommandId) -> Option<TimedCommand> {
        let key = self.pending.keys().find(|(_, cid)| *cid == id).copied()?;
        self.pending.remove(&key)
    }

    /// Completion time of the earliest pending command.
    #[must_use]
    pub fn next_due(&self) -> Option<SimTime> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    /// Number of pending commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no commands are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Apply a command whose effect is local to the fleet.
///
/// # Errors
///
/// [`EngineError::FleetDestroyed`] for destroyed fleets, and
/// [`EngineError::InvalidState`] for [`CommandKind::Warp`], which needs
/// the movement controller.
pub fn apply_fleet_command(fleet: &mut Fleet, kind: CommandKind) -> Result<()> {
    if fleet.is_destroyed() {
        return Err(EngineError::FleetDestroyed(fleet.id));
    }
    match kind {
        CommandKind::ChangeFormation(formation) => fleet.formation = formation,
        CommandKind::Resupply { supplies, fuel } => fleet.replenish(supplies, fuel, 0),
        CommandKind::Repair { health } => fleet.repair(health),
        CommandKind::Warp { .. } => {
            return Err(EngineError::InvalidState(
                "warp commands are routed through the movement controller".into(),
            ))
        }
    }
    Ok(())
}
