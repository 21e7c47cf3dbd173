//! Fleet data model.
//!
//! A [`Fleet`] is the unit the engine moves and fights with. Its spatial
//! state is a tagged [`Position`], so a fleet is always unambiguously on
//! the strategic grid or on a tactical plane, and its movement state is a
//! single optional [`MovementPlan`], so "moving" and "has a path" can
//! never disagree.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::factions::Faction;
use crate::math::{fixed_serde, narrow, percent, Fixed, Vec2Fixed, WideFixed};
use crate::pathfinding::GridCell;

/// Unique identifier for fleets.
pub type FleetId = u64;

/// Unique identifier for tactical encounters.
pub type EncounterId = u64;

/// Unique identifier for game sessions.
pub type SessionId = u64;

/// Reference to the commander in charge of a fleet.
pub type CommanderId = u64;

/// Simulated milliseconds since the session started.
pub type SimTime = u64;

/// Maximum per-ship health.
pub const FULL_HEALTH: u32 = 100;

/// Maximum morale.
pub const MAX_MORALE: u8 = 100;

/// Maximum supplies a fleet can carry.
pub const MAX_SUPPLIES: u32 = 1000;

/// Maximum fuel a fleet can carry.
pub const MAX_FUEL: u32 = 1000;

// ============================================================================
// Composition
// ============================================================================

/// Hull class of a ship group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipType {
    /// Line-of-battle ship.
    Battleship,
    /// Fast escort.
    Cruiser,
    /// Light escort.
    Destroyer,
    /// Fighter carrier.
    Carrier,
    /// Picket and patrol craft.
    Frigate,
    /// Supply and troop transport.
    Transport,
}

impl ShipType {
    /// Combat strength of one ship of this class at full health.
    #[must_use]
    pub const fn base_strength(self) -> u32 {
        match self {
            Self::Battleship => 10,
            Self::Carrier => 8,
            Self::Cruiser => 6,
            Self::Destroyer => 4,
            Self::Frigate => 2,
            Self::Transport => 1,
        }
    }
}

/// A block of identical ships sharing one per-ship health value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipGroup {
    /// Hull class.
    pub ship_type: ShipType,
    /// Number of ships in the group.
    pub count: u32,
    /// Per-ship health, 0 to [`FULL_HEALTH`].
    #[serde(with = "fixed_serde")]
    pub health: Fixed,
}

impl ShipGroup {
    /// A group at full health.
    #[must_use]
    pub fn new(ship_type: ShipType, count: u32) -> Self {
        Self {
            ship_type,
            count,
            health: Fixed::from_num(FULL_HEALTH),
        }
    }

    /// Builder: set per-ship health (clamped to 0..=100).
    #[must_use]
    pub fn with_health(mut self, health: u32) -> Self {
        self.health = Fixed::from_num(health.min(FULL_HEALTH));
        self
    }

    /// Effective strength: `count × health% × base strength`.
    ///
    /// Saturates at [`Fixed::MAX`].
    #[must_use]
    pub fn strength(&self) -> Fixed {
        narrow(
            WideFixed::from_num(self.count)
                * WideFixed::from_num(self.health)
                * WideFixed::from_num(self.ship_type.base_strength())
                / WideFixed::from_num(FULL_HEALTH),
        )
    }

    /// Total health points the group can absorb before it is wiped out.
    ///
    /// Saturates at [`Fixed::MAX`].
    #[must_use]
    pub fn damage_pool(&self) -> Fixed {
        narrow(WideFixed::from_num(self.count) * WideFixed::from_num(self.health))
    }

    /// True once the group has no ships or no health left.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.count == 0 || self.health <= Fixed::ZERO
    }
}

// ============================================================================
// Stance and status
// ============================================================================

/// Fleet-wide combat stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Formation {
    /// Balanced line.
    #[default]
    Standard,
    /// Aggressive stance, more damage out.
    Offensive,
    /// Tight stance, less damage in and out.
    Defensive,
    /// Envelopment of the enemy line.
    Encircle,
    /// Withdrawal, weak fire but faster movement.
    Retreat,
}

impl Formation {
    /// Movement speed multiplier for this formation.
    #[must_use]
    pub fn speed_multiplier(self) -> Fixed {
        match self {
            Self::Standard | Self::Offensive => Fixed::ONE,
            Self::Defensive => percent(80),
            Self::Encircle => percent(90),
            Self::Retreat => percent(120),
        }
    }
}

/// Lifecycle status of a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FleetStatus {
    /// Stationary on the strategic grid.
    #[default]
    Idle,
    /// Following a strategic path.
    Moving,
    /// Enrolled in a tactical encounter.
    Combat,
    /// Withdrawing from a tactical encounter.
    Retreating,
    /// Berthed at a base; excluded from collision checks.
    Docked,
    /// No ships left.
    Destroyed,
}

// ============================================================================
// Spatial state
// ============================================================================

/// Where a fleet is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// A strategic grid cell.
    Cell(GridCell),
    /// A point on the tactical plane.
    Point(Vec2Fixed),
}

/// An in-progress move: where the fleet is going and the waypoints left.
///
/// Waypoints are consumed front to back and are in the coordinate space
/// of the fleet's current [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPlan {
    /// Final destination.
    pub destination: Destination,
    /// Remaining waypoints; never empty while the plan exists.
    pub path: VecDeque<Vec2Fixed>,
}

impl MovementPlan {
    /// Next waypoint, if any.
    #[must_use]
    pub fn next_waypoint(&self) -> Option<Vec2Fixed> {
        self.path.front().copied()
    }
}

/// Spatial state of a fleet on a tactical plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TacticalState {
    /// Encounter whose plane this point belongs to.
    pub encounter: EncounterId,
    /// Strategic cell the encounter was spawned from.
    pub origin: GridCell,
    /// Position on the plane.
    pub point: Vec2Fixed,
    /// Unit direction of travel (zero when stationary).
    pub velocity: Vec2Fixed,
    /// Facing in degrees, `[0, 360)`.
    #[serde(with = "fixed_serde")]
    pub heading: Fixed,
}

/// A fleet's spatial representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    /// On the strategic grid, in continuous cell coordinates while in
    /// transit and exactly on a cell centre otherwise.
    Strategic(Vec2Fixed),
    /// On a tactical plane.
    Tactical(TacticalState),
}

impl Position {
    /// Position exactly on a strategic cell.
    #[must_use]
    pub fn at_cell(cell: GridCell) -> Self {
        Self::Strategic(cell.to_point())
    }
}

/// Transient per-fleet combat bookkeeping.
///
/// Cleared whenever a fleet enters or leaves a tactical plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransientCombatState {
    /// Fleet is turning in place before it can move.
    pub is_turning: bool,
    /// When the current turn started.
    pub turn_started_at: SimTime,
    /// How long the current turn takes.
    pub turn_duration_ms: u64,
    /// Fractional damage not yet applied (always in `[0, 1)`).
    #[serde(with = "fixed_serde")]
    pub damage_carry: Fixed,
}

// ============================================================================
// Fleet
// ============================================================================

/// A faction-owned military unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    /// Fleet identifier, unique within the session.
    pub id: FleetId,
    /// Owning session.
    pub session: SessionId,
    /// Owning faction.
    pub faction: Faction,
    /// Commanding officer, if assigned.
    pub commander: Option<CommanderId>,
    /// Display name.
    pub name: String,
    /// Ship groups, front line first.
    pub groups: Vec<ShipGroup>,
    /// Spatial state.
    pub position: Position,
    /// Current move order.
    pub plan: Option<MovementPlan>,
    /// Strategic speed in cells per second.
    #[serde(with = "fixed_serde")]
    pub strategic_speed: Fixed,
    /// Tactical speed in units per second.
    #[serde(with = "fixed_serde")]
    pub tactical_speed: Fixed,
    /// Lifecycle status.
    pub status: FleetStatus,
    /// Fleet currently engaged.
    pub combat_target: Option<FleetId>,
    /// Weapon range on the tactical plane.
    #[serde(with = "fixed_serde")]
    pub combat_range: Fixed,
    /// Combat stance.
    pub formation: Formation,
    /// Morale, 0 to 100.
    pub morale: u8,
    /// Supplies on board.
    pub supplies: u32,
    /// Fuel on board.
    pub fuel: u32,
    /// Transient combat bookkeeping.
    pub transient: TransientCombatState,
}

impl Fleet {
    /// Create an idle fleet on `cell` with default speeds and stores.
    #[must_use]
    pub fn new(id: FleetId, session: SessionId, faction: Faction, cell: GridCell) -> Self {
        Self {
            id,
            session,
            faction,
            commander: None,
            name: format!("{} fleet {id}", faction.short_name()),
            groups: Vec::new(),
            position: Position::at_cell(cell),
            plan: None,
            strategic_speed: Fixed::from_num(2),
            tactical_speed: Fixed::from_num(50),
            status: FleetStatus::Idle,
            combat_target: None,
            combat_range: Fixed::from_num(100),
            formation: Formation::Standard,
            morale: MAX_MORALE,
            supplies: 500,
            fuel: 500,
            transient: TransientCombatState::default(),
        }
    }

    /// Builder: add a ship group at the back of the line.
    #[must_use]
    pub fn with_group(mut self, group: ShipGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Builder: assign a commander.
    #[must_use]
    pub fn with_commander(mut self, commander: CommanderId) -> Self {
        self.commander = Some(commander);
        self
    }

    /// Builder: set the formation.
    #[must_use]
    pub fn with_formation(mut self, formation: Formation) -> Self {
        self.formation = formation;
        self
    }

    /// Builder: set morale (clamped to 100).
    #[must_use]
    pub fn with_morale(mut self, morale: u8) -> Self {
        self.morale = morale.min(MAX_MORALE);
        self
    }

    /// Builder: set both speeds.
    #[must_use]
    pub fn with_speeds(mut self, strategic: Fixed, tactical: Fixed) -> Self {
        self.strategic_speed = strategic;
        self.tactical_speed = tactical;
        self
    }

    /// Builder: set supplies and fuel.
    #[must_use]
    pub fn with_stores(mut self, supplies: u32, fuel: u32) -> Self {
        self.supplies = supplies;
        self.fuel = fuel;
        self
    }

    /// Number of ships across all groups.
    #[must_use]
    pub fn total_ships(&self) -> u32 {
        self.groups
            .iter()
            .fold(0, |acc: u32, g| acc.saturating_add(g.count))
    }

    /// Effective strength across all groups.
    #[must_use]
    pub fn total_strength(&self) -> Fixed {
        self.groups
            .iter()
            .fold(Fixed::ZERO, |acc, g| acc.saturating_add(g.strength()))
    }

    /// Whether a move order is active.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        self.plan.is_some()
    }

    /// Whether the fleet is on a tactical plane.
    #[must_use]
    pub fn is_in_combat(&self) -> bool {
        matches!(self.position, Position::Tactical(_))
    }

    /// Whether the fleet has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.status == FleetStatus::Destroyed
    }

    /// Tactical state, if on a plane.
    #[must_use]
    pub fn tactical(&self) -> Option<&TacticalState> {
        match &self.position {
            Position::Tactical(state) => Some(state),
            Position::Strategic(_) => None,
        }
    }

    /// Mutable tactical state, if on a plane.
    pub fn tactical_mut(&mut self) -> Option<&mut TacticalState> {
        match &mut self.position {
            Position::Tactical(state) => Some(state),
            Position::Strategic(_) => None,
        }
    }

    /// Encounter the fleet is enrolled in, if any.
    #[must_use]
    pub fn encounter(&self) -> Option<EncounterId> {
        self.tactical().map(|t| t.encounter)
    }

    /// Strategic cell the fleet occupies (its origin cell while in combat).
    #[must_use]
    pub fn cell(&self) -> GridCell {
        match &self.position {
            Position::Strategic(point) => GridCell::from_point(*point),
            Position::Tactical(state) => state.origin,
        }
    }

    /// Add supplies, fuel and morale, each capped at its maximum.
    pub fn replenish(&mut self, supplies: u32, fuel: u32, morale: u8) {
        self.supplies = self.supplies.saturating_add(supplies).min(MAX_SUPPLIES);
        self.fuel = self.fuel.saturating_add(fuel).min(MAX_FUEL);
        self.morale = self.morale.saturating_add(morale).min(MAX_MORALE);
    }

    /// Restore `health` points of per-ship health to every group.
    pub fn repair(&mut self, health: u32) {
        let full = Fixed::from_num(FULL_HEALTH);
        for group in &mut self.groups {
            group.health = (group.health + Fixed::from_num(health)).min(full);
        }
    }

    /// Cancel any move order.
    ///
    /// A strategic fleet caught between cells settles on the nearest cell
    /// centre; a tactical fleet keeps its point and loses its velocity.
    pub fn stop(&mut self) {
        self.plan = None;
        if let Some(state) = self.tactical_mut() {
            state.velocity = Vec2Fixed::ZERO;
        } else {
            self.position = Position::at_cell(self.cell());
        }
        if self.status == FleetStatus::Moving {
            self.status = FleetStatus::Idle;
        }
    }

    /// Drop tactical state and return the fleet to `cell` on the grid.
    ///
    /// Status becomes [`FleetStatus::Destroyed`] if no ships remain and
    /// [`FleetStatus::Idle`] otherwise.
    pub fn return_to_strategic(&mut self, cell: GridCell) {
        self.position = Position::at_cell(cell);
        self.plan = None;
        self.combat_target = None;
        self.transient = TransientCombatState::default();
        if self.formation == Formation::Retreat {
            self.formation = Formation::Standard;
        }
        self.status = if self.total_ships() == 0 {
            FleetStatus::Destroyed
        } else {
            FleetStatus::Idle
        };
    }

    /// Check the fleet's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] describing the first broken
    /// invariant.
    pub fn validate(&self) -> Result<()> {
        let tactical_status = matches!(self.status, FleetStatus::Combat | FleetStatus::Retreating);
        if self.is_in_combat() != tactical_status {
            return Err(EngineError::InvalidState(format!(
                "fleet {} has status {:?} but tactical position present = {}",
                self.id,
                self.status,
                self.is_in_combat()
            )));
        }
        if let Some(plan) = &self.plan {
            if plan.path.is_empty() {
                return Err(EngineError::InvalidState(format!(
                    "fleet {} has a movement plan with no waypoints",
                    self.id
                )));
            }
        }
        if self.status == FleetStatus::Moving && self.plan.is_none() {
            return Err(EngineError::InvalidState(format!(
                "fleet {} is marked moving without a plan",
                self.id
            )));
        }
        if self.is_destroyed() && self.total_ships() > 0 {
            return Err(EngineError::InvalidState(format!(
                "fleet {} is destroyed but still has {} ships",
                self.id,
                self.total_ships()
            )));
        }
        if let Position::Strategic(point) = self.position {
            if self.plan.is_none() && point != self.cell().to_point() {
                return Err(EngineError::InvalidState(format!(
                    "fleet {} is stationary between cells at {point:?}",
                    self.id
                )));
            }
        }
        if self.morale > MAX_MORALE {
            return Err(EngineError::InvalidState(format!(
                "fleet {} morale {} exceeds {MAX_MORALE}",
                self.id, self.morale
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fleet() -> Fleet {
        Fleet::new(1, 1, Faction::Empire, GridCell::new(3, 4))
            .with_group(ShipGroup::new(ShipType::Battleship, 10))
            .with_group(ShipGroup::new(ShipType::Destroyer, 20).with_health(50))
    }

    #[test]
    fn test_group_strength() {
        let group = ShipGroup::new(ShipType::Battleship, 10);
        assert_eq!(group.strength(), Fixed::from_num(100));

        let damaged = ShipGroup::new(ShipType::Destroyer, 20).with_health(50);
        // 20 ships × 50% × 4
        assert_eq!(damaged.strength(), Fixed::from_num(40));
        assert_eq!(damaged.damage_pool(), Fixed::from_num(1000));
    }

    #[test]
    fn test_fleet_totals() {
        let fleet = sample_fleet();
        assert_eq!(fleet.total_ships(), 30);
        assert_eq!(fleet.total_strength(), Fixed::from_num(140));
    }

    #[test]
    fn test_new_fleet_is_idle_on_cell() {
        let fleet = sample_fleet();
        assert_eq!(fleet.cell(), GridCell::new(3, 4));
        assert!(!fleet.is_moving());
        assert!(!fleet.is_in_combat());
        assert!(fleet.validate().is_ok());
    }

    #[test]
    fn test_validate_catches_status_mismatch() {
        let mut fleet = sample_fleet();
        fleet.status = FleetStatus::Combat;
        assert!(fleet.validate().is_err());
    }

    #[test]
    fn test_return_to_strategic_clears_tactical() {
        let mut fleet = sample_fleet().with_formation(Formation::Retreat);
        fleet.position = Position::Tactical(TacticalState {
            encounter: 9,
            origin: GridCell::new(3, 4),
            point: Vec2Fixed::from_ints(100, 100),
            velocity: Vec2Fixed::from_ints(1, 0),
            heading: Fixed::ZERO,
        });
        fleet.status = FleetStatus::Retreating;
        fleet.combat_target = Some(2);
        assert!(fleet.validate().is_ok());

        fleet.return_to_strategic(GridCell::new(2, 4));

        assert_eq!(fleet.status, FleetStatus::Idle);
        assert_eq!(fleet.cell(), GridCell::new(2, 4));
        assert_eq!(fleet.formation, Formation::Standard);
        assert_eq!(fleet.combat_target, None);
        assert!(fleet.validate().is_ok());
    }

    #[test]
    fn test_return_to_strategic_without_ships_is_destroyed() {
        let mut fleet = Fleet::new(2, 1, Faction::Alliance, GridCell::new(0, 0));
        fleet.return_to_strategic(GridCell::new(0, 0));
        assert_eq!(fleet.status, FleetStatus::Destroyed);
    }

    #[test]
    fn test_replenish_caps() {
        let mut fleet = sample_fleet().with_stores(990, 10).with_morale(95);
        fleet.replenish(50, 50, 50);
        assert_eq!(fleet.supplies, MAX_SUPPLIES);
        assert_eq!(fleet.fuel, 60);
        assert_eq!(fleet.morale, MAX_MORALE);
    }

    #[test]
    fn test_repair_caps_at_full_health() {
        let mut fleet = sample_fleet();
        fleet.repair(30);
        assert_eq!(fleet.groups[0].health, Fixed::from_num(100));
        assert_eq!(fleet.groups[1].health, Fixed::from_num(80));
    }

    #[test]
    fn test_stop_cancels_move() {
        let mut fleet = sample_fleet();
        fleet.plan = Some(MovementPlan {
            destination: Destination::Cell(GridCell::new(5, 4)),
            path: VecDeque::from(vec![GridCell::new(4, 4).to_point()]),
        });
        fleet.status = FleetStatus::Moving;

        fleet.stop();

        assert!(!fleet.is_moving());
        assert_eq!(fleet.status, FleetStatus::Idle);
    }

    #[test]
    fn test_stop_mid_transit_settles_on_nearest_cell() {
        let mut fleet = sample_fleet();
        fleet.position = Position::Strategic(Vec2Fixed::new(
            Fixed::from_num(4.7),
            Fixed::from_num(4.2),
        ));
        fleet.plan = Some(MovementPlan {
            destination: Destination::Cell(GridCell::new(6, 4)),
            path: VecDeque::from(vec![GridCell::new(5, 4).to_point()]),
        });
        fleet.status = FleetStatus::Moving;

        fleet.stop();

        assert_eq!(fleet.position, Position::at_cell(GridCell::new(5, 4)));
        assert_eq!(fleet.status, FleetStatus::Idle);
        assert!(fleet.validate().is_ok());
    }

    #[test]
    fn test_stationary_fleet_between_cells_is_invalid() {
        let mut fleet = sample_fleet();
        fleet.position = Position::Strategic(Vec2Fixed::new(
            Fixed::from_num(3.5),
            Fixed::from_num(4),
        ));
        assert!(fleet.validate().is_err());
    }

    #[test]
    fn test_huge_groups_saturate_instead_of_overflowing() {
        let group = ShipGroup::new(ShipType::Battleship, u32::MAX);
        assert_eq!(group.strength(), Fixed::MAX);
        assert_eq!(group.damage_pool(), Fixed::MAX);

        // 300 000 battleships still fit: 3 000 000 strength
        let large = ShipGroup::new(ShipType::Battleship, 300_000);
        assert_eq!(large.strength(), Fixed::from_num(3_000_000));

        let fleet = sample_fleet()
            .with_group(ShipGroup::new(ShipType::Battleship, u32::MAX))
            .with_group(ShipGroup::new(ShipType::Battleship, u32::MAX));
        assert_eq!(fleet.total_ships(), u32::MAX);
        assert_eq!(fleet.total_strength(), Fixed::MAX);
    }
}
