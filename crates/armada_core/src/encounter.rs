//! Tactical encounters: detection, deployment, per-tick combat,
//! conclusion and retreat.
//!
//! An encounter moves through *active* → *concluded*. It is created when
//! idle fleets of two or more factions share a strategic cell that has no
//! active encounter, and concludes when at most one faction still has
//! ships on its plane.
//!
//! # Tick order inside an encounter
//!
//! 1. Tactical movement for every participant with a move order.
//! 2. Targeting and damage, computed for every attacker from the same
//!    pre-damage snapshot and then applied, so mutual destruction is a draw.
//! 3. Fleets left without ships are withdrawn and marked destroyed.
//!
//! Conclusion and retreat exits are separate calls so the scheduler can
//! sequence them.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::combat::{apply_damage, AttackKind, CombatResolver, RangedOutcome};
use crate::components::{
    EncounterId, Fleet, FleetId, FleetStatus, Formation, Position, SessionId, SimTime,
    TacticalState, TransientCombatState,
};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::factions::Faction;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::movement::{distance_to_boundary, MovementController, PlaneEdge};
use crate::pathfinding::GridCell;

/// Fleets loaded for one tick, keyed and iterated by id.
pub type Roster = BTreeMap<FleetId, Fleet>;

/// Lifecycle of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncounterStatus {
    /// Fighting in progress.
    Active,
    /// Ended; kept for the record.
    Concluded,
}

/// How an encounter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// One faction still had ships.
    Victory(Faction),
    /// No faction had ships left.
    Draw,
}

/// Final result of an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterResult {
    /// Winner or draw.
    pub outcome: Outcome,
    /// Ships lost per faction.
    pub casualties: BTreeMap<Faction, u32>,
}

/// One localized battle on its own tactical plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TacticalEncounter {
    /// Encounter identifier.
    pub id: EncounterId,
    /// Owning session.
    pub session: SessionId,
    /// Strategic cell the encounter was spawned from.
    pub origin: GridCell,
    /// Side length of the square plane.
    #[serde(with = "fixed_serde")]
    pub plane_size: Fixed,
    /// Fleets still on the plane, by faction.
    pub participants: BTreeMap<Faction, Vec<FleetId>>,
    /// Factions in the order they were first deployed.
    pub deployment_order: Vec<Faction>,
    /// Lifecycle status.
    pub status: EncounterStatus,
    /// Simulated start time.
    pub started_at: SimTime,
    /// Simulated end time.
    pub ended_at: Option<SimTime>,
    /// Result once concluded.
    pub result: Option<EncounterResult>,
    /// Ships lost so far, per faction.
    pub casualties: BTreeMap<Faction, u32>,
}

impl TacticalEncounter {
    /// Create an empty active encounter.
    #[must_use]
    pub fn new(
        id: EncounterId,
        session: SessionId,
        origin: GridCell,
        plane_size: Fixed,
        started_at: SimTime,
    ) -> Self {
        Self {
            id,
            session,
            origin,
            plane_size,
            participants: BTreeMap::new(),
            deployment_order: Vec::new(),
            status: EncounterStatus::Active,
            started_at,
            ended_at: None,
            result: None,
            casualties: BTreeMap::new(),
        }
    }

    /// Whether the encounter is still being fought.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EncounterStatus::Active
    }

    /// All fleets on the plane, in id order.
    #[must_use]
    pub fn participant_ids(&self) -> Vec<FleetId> {
        let mut ids: Vec<FleetId> = self.participants.values().flatten().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether `fleet` is on the plane.
    #[must_use]
    pub fn contains(&self, fleet: FleetId) -> bool {
        self.participants.values().any(|ids| ids.contains(&fleet))
    }

    /// Factions with at least one fleet on the plane.
    #[must_use]
    pub fn factions_present(&self) -> Vec<Faction> {
        self.participants
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(faction, _)| *faction)
            .collect()
    }

    fn enroll(&mut self, faction: Faction, fleet: FleetId) {
        if !self.deployment_order.contains(&faction) {
            self.deployment_order.push(faction);
        }
        self.casualties.entry(faction).or_insert(0);
        let ids = self.participants.entry(faction).or_default();
        if !ids.contains(&fleet) {
            ids.push(fleet);
        }
    }

    /// Take `fleet` off the plane. Returns whether it was there.
    pub fn withdraw(&mut self, fleet: FleetId) -> bool {
        let mut removed = false;
        for ids in self.participants.values_mut() {
            let before = ids.len();
            ids.retain(|id| *id != fleet);
            removed |= ids.len() != before;
        }
        removed
    }
}

/// A strategic cell where idle fleets of several factions meet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Contested cell.
    pub cell: GridCell,
    /// Fleets on the cell, in id order.
    pub fleets: Vec<FleetId>,
}

/// Find contested cells among idle strategic fleets.
///
/// Cells in `engaged` (those with an active encounter) are skipped, which
/// keeps at most one active encounter per cell.
pub fn detect_collisions<'f>(
    fleets: impl IntoIterator<Item = &'f Fleet>,
    engaged: &BTreeSet<GridCell>,
) -> Vec<Collision> {
    let mut by_cell: BTreeMap<GridCell, Vec<&Fleet>> = BTreeMap::new();
    for fleet in fleets {
        if fleet.status != FleetStatus::Idle || fleet.total_ships() == 0 {
            continue;
        }
        let Position::Strategic(_) = fleet.position else {
            continue;
        };
        by_cell.entry(fleet.cell()).or_default().push(fleet);
    }

    by_cell
        .into_iter()
        .filter(|(cell, _)| !engaged.contains(cell))
        .filter_map(|(cell, occupants)| {
            let factions: BTreeSet<Faction> = occupants.iter().map(|f| f.faction).collect();
            if factions.len() < 2 {
                return None;
            }
            let mut fleets: Vec<FleetId> = occupants.iter().map(|f| f.id).collect();
            fleets.sort_unstable();
            Some(Collision { cell, fleets })
        })
        .collect()
}

/// A volley computed from the pre-damage snapshot.
#[derive(Debug, Clone, Copy)]
struct Volley {
    attacker: FleetId,
    target: FleetId,
    damage: u32,
    carry: Fixed,
}

/// Runs encounters for one session.
#[derive(Debug, Clone, Copy)]
pub struct TacticalEncounterManager<'a> {
    movement: MovementController<'a>,
    resolver: CombatResolver<'a>,
}

impl<'a> TacticalEncounterManager<'a> {
    /// Create a manager that moves fleets with `movement`.
    #[must_use]
    pub fn new(movement: MovementController<'a>) -> Self {
        Self {
            movement,
            resolver: CombatResolver::new(movement.rules()),
        }
    }

    /// Combat resolver in use.
    #[must_use]
    pub const fn resolver(&self) -> &CombatResolver<'a> {
        &self.resolver
    }

    /// Create an encounter at `cell` and deploy `fleet_ids` onto it.
    ///
    /// # Errors
    ///
    /// [`EngineError::FleetNotFound`] if an id is missing from the roster,
    /// or any deployment error.
    pub fn begin<R: Rng + ?Sized>(
        &self,
        id: EncounterId,
        session: SessionId,
        cell: GridCell,
        roster: &mut Roster,
        fleet_ids: &[FleetId],
        now: SimTime,
        rng: &mut R,
    ) -> Result<(TacticalEncounter, EngineEvent)> {
        let mut encounter =
            TacticalEncounter::new(id, session, cell, self.movement.rules().plane_size(), now);

        let mut ids = fleet_ids.to_vec();
        ids.sort_unstable();
        for fleet_id in &ids {
            let fleet = roster
                .get_mut(fleet_id)
                .ok_or(EngineError::FleetNotFound(*fleet_id))?;
            self.deploy(&mut encounter, fleet, rng)?;
        }

        tracing::info!(
            session,
            encounter = id,
            ?cell,
            participants = ids.len(),
            "Encounter started"
        );

        let event = EngineEvent::EncounterStarted {
            encounter: id,
            cell,
            participants: ids,
        };
        Ok((encounter, event))
    }

    /// Add a fleet to an encounter already in progress.
    ///
    /// # Errors
    ///
    /// [`EngineError::EncounterNotFound`] if the encounter has concluded,
    /// or any deployment error.
    pub fn reinforce<R: Rng + ?Sized>(
        &self,
        encounter: &mut TacticalEncounter,
        fleet: &mut Fleet,
        rng: &mut R,
    ) -> Result<EngineEvent> {
        if !encounter.is_active() {
            return Err(EngineError::EncounterNotFound(encounter.id));
        }
        self.deploy(encounter, fleet, rng)?;
        tracing::info!(encounter = encounter.id, fleet = fleet.id, "Fleet joined encounter");
        Ok(EngineEvent::Reinforced {
            encounter: encounter.id,
            fleet: fleet.id,
        })
    }

    /// Place a fleet in its faction's deployment zone.
    ///
    /// The first faction deploys in the left third facing east, the second
    /// in the right third facing west, and any others at the centre.
    fn deploy<R: Rng + ?Sized>(
        &self,
        encounter: &mut TacticalEncounter,
        fleet: &mut Fleet,
        rng: &mut R,
    ) -> Result<()> {
        if fleet.is_destroyed() {
            return Err(EngineError::FleetDestroyed(fleet.id));
        }
        if fleet.is_in_combat() {
            return Err(EngineError::FleetInCombat(fleet.id));
        }

        encounter.enroll(fleet.faction, fleet.id);
        let zone = encounter
            .deployment_order
            .iter()
            .position(|f| *f == fleet.faction)
            .unwrap_or(0);

        let plane = encounter.plane_size;
        let six = Fixed::from_num(6);
        let (x, heading) = match zone {
            0 => (plane / six, Fixed::ZERO),
            1 => (plane * Fixed::from_num(5) / six, Fixed::from_num(180)),
            _ => (plane / Fixed::from_num(2), Fixed::ZERO),
        };
        let centre = Vec2Fixed::new(x, plane / Fixed::from_num(2));

        let jitter = self.movement.rules().deployment_jitter as i32;
        let offset = if jitter > 0 {
            Vec2Fixed::from_ints(
                rng.gen_range(-jitter..=jitter),
                rng.gen_range(-jitter..=jitter),
            )
        } else {
            Vec2Fixed::ZERO
        };

        fleet.position = Position::Tactical(TacticalState {
            encounter: encounter.id,
            origin: encounter.origin,
            point: (centre + offset).clamp(Fixed::ZERO, plane),
            velocity: Vec2Fixed::ZERO,
            heading,
        });
        fleet.status = FleetStatus::Combat;
        fleet.plan = None;
        fleet.combat_target = None;
        fleet.transient = TransientCombatState::default();

        #[cfg(feature = "debug-validation")]
        fleet.validate()?;

        Ok(())
    }

    /// Run one tick of movement and combat.
    ///
    /// Fleets missing from the roster are skipped.
    pub fn update(
        &self,
        encounter: &mut TacticalEncounter,
        roster: &mut Roster,
        dt: Fixed,
        now: SimTime,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if !encounter.is_active() {
            return events;
        }
        let ids = encounter.participant_ids();

        // 1. Movement
        for id in &ids {
            if let Some(fleet) = roster.get_mut(id) {
                self.movement.advance_tactical(fleet, dt, now);
            }
        }

        // 2. Targeting and damage from the pre-damage snapshot
        let mut volleys = Vec::new();
        for id in &ids {
            let Some(attacker) = roster.get(id) else {
                continue;
            };
            if attacker.total_ships() == 0 {
                continue;
            }
            let Some(target_id) = self.select_target(encounter, roster, attacker) else {
                continue;
            };
            let Some(target) = roster.get(&target_id) else {
                continue;
            };
            let in_range = self
                .resolver
                .engagement(attacker, target)
                .is_some_and(|e| e.in_range());
            if !in_range {
                volleys.push(Volley {
                    attacker: *id,
                    target: target_id,
                    damage: 0,
                    carry: attacker.transient.damage_carry,
                });
                continue;
            }

            events.push(EngineEvent::Shot {
                encounter: encounter.id,
                attacker: *id,
                target: target_id,
            });
            let raw = self
                .resolver
                .tick_damage(attacker, target, dt)
                .saturating_add(attacker.transient.damage_carry);
            let damage = raw.to_num::<u32>();
            volleys.push(Volley {
                attacker: *id,
                target: target_id,
                damage,
                carry: raw - Fixed::from_num(damage),
            });
        }

        let morale_loss = self.movement.rules().morale_loss_per_group;
        for volley in volleys {
            if let Some(attacker) = roster.get_mut(&volley.attacker) {
                attacker.combat_target = Some(volley.target);
                attacker.transient.damage_carry = volley.carry;
            }
            if volley.damage == 0 {
                continue;
            }
            let Some(target) = roster.get_mut(&volley.target) else {
                continue;
            };
            let report = apply_damage(target, volley.damage, morale_loss);
            if report.absorbed == 0 {
                continue;
            }
            *encounter.casualties.entry(target.faction).or_insert(0) += report.ships_lost;
            events.push(EngineEvent::Hit {
                encounter: encounter.id,
                attacker: volley.attacker,
                target: volley.target,
                damage: report.absorbed,
                ships_lost: report.ships_lost,
            });
        }

        // 3. Withdraw destroyed fleets
        events.extend(self.withdraw_destroyed(encounter, roster, &ids));

        #[cfg(feature = "debug-validation")]
        for id in encounter.participant_ids() {
            if let Some(fleet) = roster.get(&id) {
                if let Err(err) = fleet.validate() {
                    tracing::error!(encounter = encounter.id, fleet = id, %err, "Invariant broken");
                }
            }
        }

        events
    }

    /// Withdraw every fleet in `ids` that has no ships left.
    fn withdraw_destroyed(
        &self,
        encounter: &mut TacticalEncounter,
        roster: &mut Roster,
        ids: &[FleetId],
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for id in ids {
            let Some(fleet) = roster.get_mut(id) else {
                continue;
            };
            if fleet.total_ships() > 0 || !encounter.contains(*id) {
                continue;
            }
            encounter.withdraw(*id);
            fleet.return_to_strategic(encounter.origin);
            tracing::debug!(encounter = encounter.id, fleet = *id, "Fleet destroyed");
            events.push(EngineEvent::Destroy {
                encounter: encounter.id,
                fleet: *id,
                faction: fleet.faction,
            });
        }
        events
    }

    /// Resolve a commander-issued attack between two participants.
    ///
    /// Concentrated fire costs the attacker supplies. The encounter is
    /// concluded if the attack eliminates the last fleet of a side. Nothing
    /// is mutated when validation fails.
    ///
    /// # Errors
    ///
    /// - [`EngineError::EncounterNotFound`] if the encounter has concluded
    /// - [`EngineError::NotInEncounter`] unless both fleets are on the plane
    /// - [`EngineError::FleetDestroyed`] / [`EngineError::TargetNotHostile`]
    /// - [`EngineError::TargetOutOfRange`] beyond the attacker's range
    /// - [`EngineError::InsufficientSupplies`] for unaffordable concentrated fire
    pub fn issue_attack(
        &self,
        encounter: &mut TacticalEncounter,
        roster: &mut Roster,
        attacker_id: FleetId,
        target_id: FleetId,
        kind: AttackKind,
        now: SimTime,
    ) -> Result<Vec<EngineEvent>> {
        if !encounter.is_active() {
            return Err(EngineError::EncounterNotFound(encounter.id));
        }
        for id in [attacker_id, target_id] {
            if !encounter.contains(id) {
                return Err(EngineError::NotInEncounter(id));
            }
        }
        let attacker = roster
            .get(&attacker_id)
            .ok_or(EngineError::FleetNotFound(attacker_id))?;
        let target = roster
            .get(&target_id)
            .ok_or(EngineError::FleetNotFound(target_id))?;
        for fleet in [attacker, target] {
            if fleet.is_destroyed() || fleet.total_ships() == 0 {
                return Err(EngineError::FleetDestroyed(fleet.id));
            }
        }
        if !attacker.faction.is_hostile_to(target.faction) {
            return Err(EngineError::TargetNotHostile {
                attacker: attacker_id,
                target: target_id,
            });
        }
        let damage = match self.resolver.resolve_ranged_attack(attacker, target, kind) {
            RangedOutcome::Hit { damage } => damage,
            RangedOutcome::OutOfRange { distance, range } => {
                return Err(EngineError::TargetOutOfRange { distance, range })
            }
        };
        let cost = match kind {
            AttackKind::Ordinary => 0,
            AttackKind::Concentrated => self.movement.rules().concentrated_fire_supply_cost,
        };
        if attacker.supplies < cost {
            return Err(EngineError::InsufficientSupplies {
                required: cost,
                available: attacker.supplies,
            });
        }

        if let Some(attacker) = roster.get_mut(&attacker_id) {
            attacker.supplies -= cost;
            attacker.combat_target = Some(target_id);
        }
        let mut events = vec![EngineEvent::Shot {
            encounter: encounter.id,
            attacker: attacker_id,
            target: target_id,
        }];
        if let Some(target) = roster.get_mut(&target_id) {
            let report = apply_damage(target, damage, self.movement.rules().morale_loss_per_group);
            *encounter.casualties.entry(target.faction).or_insert(0) += report.ships_lost;
            if report.absorbed > 0 {
                events.push(EngineEvent::Hit {
                    encounter: encounter.id,
                    attacker: attacker_id,
                    target: target_id,
                    damage: report.absorbed,
                    ships_lost: report.ships_lost,
                });
            }
        }

        tracing::debug!(
            encounter = encounter.id,
            attacker = attacker_id,
            target = target_id,
            ?kind,
            damage,
            "Attack resolved"
        );

        events.extend(self.withdraw_destroyed(encounter, roster, &[target_id]));
        events.extend(self.check_conclusion(encounter, roster, now));
        Ok(events)
    }

    /// Keep the current target while it is alive, hostile and on the
    /// plane; otherwise pick the nearest hostile (lower id on ties).
    fn select_target(
        &self,
        encounter: &TacticalEncounter,
        roster: &Roster,
        attacker: &Fleet,
    ) -> Option<FleetId> {
        let valid = |fleet: &Fleet| {
            fleet.faction.is_hostile_to(attacker.faction)
                && fleet.total_ships() > 0
                && encounter.contains(fleet.id)
        };

        if let Some(current) = attacker.combat_target {
            if roster.get(&current).is_some_and(valid) {
                return Some(current);
            }
        }

        let origin = attacker.tactical()?.point;
        encounter
            .participant_ids()
            .into_iter()
            .filter_map(|id| roster.get(&id))
            .filter(|&fleet| valid(fleet))
            .filter_map(|fleet| Some((fleet.tactical()?.point.distance_squared(origin), fleet.id)))
            .min()
            .map(|(_, id)| id)
    }

    /// Conclude the encounter if at most one faction has fleets left.
    pub fn check_conclusion(
        &self,
        encounter: &mut TacticalEncounter,
        roster: &mut Roster,
        now: SimTime,
    ) -> Option<EngineEvent> {
        if !encounter.is_active() {
            return None;
        }
        let present = encounter.factions_present();
        match present.as_slice() {
            [] => Some(self.conclude(encounter, roster, Outcome::Draw, now)),
            [winner] => Some(self.conclude(encounter, roster, Outcome::Victory(*winner), now)),
            _ => None,
        }
    }

    /// End the encounter and return every participant to the grid.
    pub fn conclude(
        &self,
        encounter: &mut TacticalEncounter,
        roster: &mut Roster,
        outcome: Outcome,
        now: SimTime,
    ) -> EngineEvent {
        for id in encounter.participant_ids() {
            if let Some(fleet) = roster.get_mut(&id) {
                if fleet.encounter() == Some(encounter.id) {
                    fleet.return_to_strategic(encounter.origin);
                }
            }
        }
        encounter.participants.clear();
        encounter.status = EncounterStatus::Concluded;
        encounter.ended_at = Some(now);
        encounter.result = Some(EncounterResult {
            outcome,
            casualties: encounter.casualties.clone(),
        });

        tracing::info!(
            session = encounter.session,
            encounter = encounter.id,
            ?outcome,
            casualties = ?encounter.casualties,
            "Encounter concluded"
        );

        EngineEvent::EncounterConcluded {
            encounter: encounter.id,
            cell: encounter.origin,
            outcome,
            casualties: encounter.casualties.clone(),
        }
    }

    /// Order a participant to withdraw toward the nearest plane edge.
    ///
    /// The fleet keeps fighting, at the retreat formation's penalty, until
    /// it reaches the edge.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotInEncounter`] unless the fleet is on this
    /// encounter's plane.
    pub fn begin_retreat(
        &self,
        encounter: &TacticalEncounter,
        fleet: &mut Fleet,
        now: SimTime,
    ) -> Result<()> {
        if !encounter.is_active() || !encounter.contains(fleet.id) {
            return Err(EngineError::NotInEncounter(fleet.id));
        }
        let point = fleet.tactical().ok_or(EngineError::NotInEncounter(fleet.id))?.point;
        let edge = PlaneEdge::nearest(point, encounter.plane_size);
        let exit = edge.boundary_point(point, encounter.plane_size);

        fleet.formation = Formation::Retreat;
        fleet.status = FleetStatus::Retreating;
        self.movement.set_tactical_destination(fleet, exit, now)?;

        tracing::debug!(encounter = encounter.id, fleet = fleet.id, ?edge, "Retreat ordered");
        Ok(())
    }

    /// Remove retreating fleets that reached the plane edge.
    ///
    /// Each is placed on the strategic cell next to the origin in the
    /// direction it left. Concludes the encounter if a side is emptied.
    pub fn retreat_progress(
        &self,
        encounter: &mut TacticalEncounter,
        roster: &mut Roster,
        now: SimTime,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if !encounter.is_active() {
            return events;
        }
        let threshold = self.movement.rules().arrival_threshold();
        let plane = encounter.plane_size;

        for id in encounter.participant_ids() {
            let Some(fleet) = roster.get_mut(&id) else {
                continue;
            };
            if fleet.status != FleetStatus::Retreating {
                continue;
            }
            let Some(point) = fleet.tactical().map(|t| t.point) else {
                continue;
            };
            if distance_to_boundary(point, plane) > threshold {
                continue;
            }

            let edge = PlaneEdge::nearest(point, plane);
            let cell = self.movement.retreat_cell(encounter.origin, edge);
            encounter.withdraw(id);
            fleet.return_to_strategic(cell);

            tracing::info!(encounter = encounter.id, fleet = id, ?cell, "Retreat completed");
            events.push(EngineEvent::RetreatCompleted {
                encounter: encounter.id,
                fleet: id,
                cell,
            });
        }

        if !events.is_empty() {
            events.extend(self.check_conclusion(encounter, roster, now));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::components::{ShipGroup, ShipType};
    use crate::pathfinding::NavGrid;
    use crate::rules::EngineRules;
    use crate::terrain::SectorTerrain;

    struct World {
        grid: NavGrid,
        terrain: SectorTerrain,
        rules: EngineRules,
    }

    impl World {
        fn new() -> Self {
            let grid = NavGrid::new(20, 20);
            let terrain = SectorTerrain::new(Arc::new(grid.clone()));
            Self {
                grid,
                terrain,
                rules: EngineRules::default(),
            }
        }

        fn manager(&self) -> TacticalEncounterManager<'_> {
            TacticalEncounterManager::new(MovementController::new(
                &self.grid,
                &self.terrain,
                &self.rules,
            ))
        }
    }

    fn fleet(id: FleetId, faction: Faction, battleships: u32) -> Fleet {
        Fleet::new(id, 1, faction, GridCell::new(10, 10))
            .with_group(ShipGroup::new(ShipType::Battleship, battleships))
    }

    fn roster(fleets: Vec<Fleet>) -> Roster {
        fleets.into_iter().map(|f| (f.id, f)).collect()
    }

    fn point(roster: &Roster, id: FleetId) -> Vec2Fixed {
        roster[&id].tactical().unwrap().point
    }

    /// Put two fleets within range of each other at the plane centre.
    fn close_in(roster: &mut Roster, a: FleetId, b: FleetId) {
        for (id, x) in [(a, 5000), (b, 5050)] {
            roster.get_mut(&id).unwrap().tactical_mut().unwrap().point =
                Vec2Fixed::from_ints(x, 5000);
        }
    }

    #[test]
    fn test_detect_collisions() {
        let a = fleet(1, Faction::Empire, 5);
        let b = fleet(2, Faction::Alliance, 5);
        let c = Fleet::new(3, 1, Faction::Empire, GridCell::new(3, 3))
            .with_group(ShipGroup::new(ShipType::Cruiser, 2));
        let d = Fleet::new(4, 1, Faction::Empire, GridCell::new(3, 3))
            .with_group(ShipGroup::new(ShipType::Cruiser, 2));

        let collisions = detect_collisions([&a, &b, &c, &d], &BTreeSet::new());
        assert_eq!(
            collisions,
            vec![Collision {
                cell: GridCell::new(10, 10),
                fleets: vec![1, 2]
            }]
        );

        let engaged = BTreeSet::from([GridCell::new(10, 10)]);
        assert!(detect_collisions([&a, &b], &engaged).is_empty());
    }

    #[test]
    fn test_moving_fleets_do_not_collide() {
        let a = fleet(1, Faction::Empire, 5);
        let mut b = fleet(2, Faction::Alliance, 5);
        b.status = FleetStatus::Moving;
        assert!(detect_collisions([&a, &b], &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_begin_deploys_opposite_thirds() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![fleet(1, Faction::Empire, 5), fleet(2, Faction::Alliance, 5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let (encounter, event) = manager
            .begin(7, 1, GridCell::new(10, 10), &mut roster, &[2, 1], 0, &mut rng)
            .unwrap();

        assert!(matches!(event, EngineEvent::EncounterStarted { encounter: 7, .. }));
        assert_eq!(encounter.participant_ids(), vec![1, 2]);

        let third = Fixed::from_num(10_000) / Fixed::from_num(3);
        let left = point(&roster, 1);
        let right = point(&roster, 2);
        assert!(left.x < third);
        assert!(right.x > third * Fixed::from_num(2));

        for id in [1, 2] {
            let fleet = &roster[&id];
            assert_eq!(fleet.status, FleetStatus::Combat);
            assert_eq!(fleet.encounter(), Some(7));
            assert_eq!(fleet.tactical().unwrap().velocity, Vec2Fixed::ZERO);
            assert!(fleet.validate().is_ok());
        }
        assert_eq!(roster[&2].tactical().unwrap().heading, Fixed::from_num(180));
    }

    #[test]
    fn test_deployment_is_seeded() {
        let world = World::new();
        let manager = world.manager();
        let run = |seed| {
            let mut roster =
                roster(vec![fleet(1, Faction::Empire, 5), fleet(2, Faction::Alliance, 5)]);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            manager
                .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
                .unwrap();
            roster
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn test_out_of_range_fleets_do_not_fight() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![fleet(1, Faction::Empire, 100), fleet(2, Faction::Alliance, 50)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();

        let events = manager.update(&mut encounter, &mut roster, Fixed::ONE, 1000);
        assert!(events.is_empty());
        assert_eq!(roster[&1].combat_target, Some(2));
        assert_eq!(roster[&2].total_ships(), 50);
    }

    #[test]
    fn test_update_applies_damage_in_range() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![fleet(1, Faction::Empire, 100), fleet(2, Faction::Alliance, 50)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();
        close_in(&mut roster, 1, 2);

        let events = manager.update(&mut encounter, &mut roster, Fixed::ONE, 1000);

        // 1 hits 2 for 75; 2 (attack 50, vs defense 50) deals nothing.
        assert!(events.contains(&EngineEvent::Hit {
            encounter: 1,
            attacker: 1,
            target: 2,
            damage: 75,
            ships_lost: 0,
        }));
        assert!(events.contains(&EngineEvent::Shot {
            encounter: 1,
            attacker: 2,
            target: 1
        }));
        assert_eq!(roster[&2].groups[0].health, Fixed::from_num(100) - Fixed::from_num(1.5));
        assert_eq!(roster[&1].groups[0].health, Fixed::from_num(100));
    }

    #[test]
    fn test_damage_carry_accumulates() {
        let world = World::new();
        let manager = world.manager();
        // attack 2 × 10 × 0.1 = 2, defense 1 × 10 × 0.05 = 0.5: 1.5 per second
        let mut roster = roster(vec![fleet(1, Faction::Empire, 2), fleet(2, Faction::Alliance, 1)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();
        close_in(&mut roster, 1, 2);

        let half = Fixed::from_num(0.5);
        manager.update(&mut encounter, &mut roster, half, 500);
        // 0.75 carried, nothing applied yet
        assert_eq!(roster[&2].groups[0].health, Fixed::from_num(100));
        assert_eq!(roster[&1].transient.damage_carry, Fixed::from_num(0.75));

        manager.update(&mut encounter, &mut roster, half, 1000);
        // 1.5 total: one point applied, half a point carried
        assert_eq!(roster[&2].groups[0].health, Fixed::from_num(99));
        assert_eq!(roster[&1].transient.damage_carry, Fixed::from_num(0.5));
    }

    #[test]
    fn test_last_group_destroyed_concludes_with_winner() {
        let world = World::new();
        let manager = world.manager();
        let mut weak = fleet(2, Faction::Alliance, 1);
        weak.groups[0].health = Fixed::from_num(1);
        let mut roster = roster(vec![fleet(1, Faction::Empire, 100), weak]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();
        close_in(&mut roster, 1, 2);

        let events = manager.update(&mut encounter, &mut roster, Fixed::ONE, 1000);
        assert!(events.contains(&EngineEvent::Destroy {
            encounter: 1,
            fleet: 2,
            faction: Faction::Alliance
        }));
        assert_eq!(roster[&2].status, FleetStatus::Destroyed);

        let concluded = manager.check_conclusion(&mut encounter, &mut roster, 1000).unwrap();
        assert!(matches!(
            concluded,
            EngineEvent::EncounterConcluded {
                outcome: Outcome::Victory(Faction::Empire),
                ..
            }
        ));
        assert_eq!(encounter.status, EncounterStatus::Concluded);
        assert_eq!(encounter.ended_at, Some(1000));
        assert_eq!(encounter.result.as_ref().unwrap().casualties[&Faction::Alliance], 1);

        let winner = &roster[&1];
        assert_eq!(winner.status, FleetStatus::Idle);
        assert!(winner.tactical().is_none());
        assert_eq!(winner.cell(), GridCell::new(10, 10));
        assert!(winner.validate().is_ok());
    }

    #[test]
    fn test_mutual_destruction_is_a_draw() {
        let world = World::new();
        let manager = world.manager();
        let mut a = fleet(1, Faction::Empire, 100);
        let mut b = fleet(2, Faction::Alliance, 100);
        a.groups[0].health = Fixed::from_num(0.5);
        b.groups[0].health = Fixed::from_num(0.5);
        let mut roster = roster(vec![a, b]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();
        close_in(&mut roster, 1, 2);

        // Strength 5 each: attack 0.5, defense 0.25, so 250 points over
        // 1000 s against a 50 point pool on both sides.
        manager.update(&mut encounter, &mut roster, Fixed::from_num(1000), 1_000_000);
        let concluded = manager.check_conclusion(&mut encounter, &mut roster, 1_000_000);

        assert!(matches!(
            concluded,
            Some(EngineEvent::EncounterConcluded {
                outcome: Outcome::Draw,
                ..
            })
        ));
        assert!(roster.values().all(Fleet::is_destroyed));
    }

    #[test]
    fn test_retreat_exits_to_neighbour_cell() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![
            fleet(1, Faction::Empire, 5),
            fleet(2, Faction::Empire, 5),
            fleet(3, Faction::Alliance, 5),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2, 3], 0, &mut rng)
            .unwrap();

        // Fleet 1 sits near the west edge.
        roster.get_mut(&1).unwrap().tactical_mut().unwrap().point = Vec2Fixed::from_ints(150, 5000);
        manager
            .begin_retreat(&encounter, roster.get_mut(&1).unwrap(), 0)
            .unwrap();
        assert_eq!(roster[&1].status, FleetStatus::Retreating);
        assert_eq!(roster[&1].formation, Formation::Retreat);

        // Not there yet
        assert!(manager.retreat_progress(&mut encounter, &mut roster, 0).is_empty());

        // Turning about takes 2 s, then 60 units/s covers the last 150.
        for t in 1..=4 {
            manager.update(&mut encounter, &mut roster, Fixed::ONE, t * 1000);
        }
        let events = manager.retreat_progress(&mut encounter, &mut roster, 4000);

        assert_eq!(
            events,
            vec![EngineEvent::RetreatCompleted {
                encounter: 1,
                fleet: 1,
                cell: GridCell::new(9, 10)
            }]
        );
        let retreated = &roster[&1];
        assert_eq!(retreated.status, FleetStatus::Idle);
        assert_eq!(retreated.formation, Formation::Standard);
        assert_eq!(retreated.cell(), GridCell::new(9, 10));
        assert!(!encounter.contains(1));
        // Fleet 2 still holds the Empire side.
        assert!(encounter.is_active());
    }

    #[test]
    fn test_retreat_of_last_fleet_concludes() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![fleet(1, Faction::Empire, 5), fleet(2, Faction::Alliance, 5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();

        roster.get_mut(&2).unwrap().tactical_mut().unwrap().point = Vec2Fixed::from_ints(9995, 5000);
        manager
            .begin_retreat(&encounter, roster.get_mut(&2).unwrap(), 0)
            .unwrap();
        let events = manager.retreat_progress(&mut encounter, &mut roster, 0);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            EngineEvent::EncounterConcluded {
                outcome: Outcome::Victory(Faction::Empire),
                ..
            }
        ));
        assert_eq!(roster[&2].cell(), GridCell::new(11, 10));
        assert_eq!(roster[&1].status, FleetStatus::Idle);
    }

    #[test]
    fn test_reinforcement_joins_its_side() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![fleet(1, Faction::Empire, 5), fleet(2, Faction::Alliance, 5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();

        let mut late = fleet(3, Faction::Alliance, 5);
        let event = manager.reinforce(&mut encounter, &mut late, &mut rng).unwrap();
        assert_eq!(event, EngineEvent::Reinforced { encounter: 1, fleet: 3 });
        assert!(late.tactical().unwrap().point.x > Fixed::from_num(6000));
        assert_eq!(encounter.participants[&Faction::Alliance], vec![2, 3]);
    }

    #[test]
    fn test_retreat_requires_participation() {
        let world = World::new();
        let manager = world.manager();
        let encounter = TacticalEncounter::new(1, 1, GridCell::new(0, 0), Fixed::from_num(10_000), 0);
        let mut outsider = fleet(9, Faction::Empire, 1);
        assert_eq!(
            manager.begin_retreat(&encounter, &mut outsider, 0),
            Err(EngineError::NotInEncounter(9))
        );
    }

    #[test]
    fn test_issue_attack_validates_before_mutating() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![
            fleet(1, Faction::Empire, 100),
            fleet(2, Faction::Alliance, 50),
            fleet(3, Faction::Empire, 5),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2, 3], 0, &mut rng)
            .unwrap();
        let before = roster.clone();

        let far = manager.issue_attack(&mut encounter, &mut roster, 1, 2, AttackKind::Ordinary, 0);
        assert!(matches!(far, Err(EngineError::TargetOutOfRange { range: 100, .. })));

        let friendly = manager.issue_attack(&mut encounter, &mut roster, 1, 3, AttackKind::Ordinary, 0);
        assert_eq!(
            friendly,
            Err(EngineError::TargetNotHostile {
                attacker: 1,
                target: 3
            })
        );

        let outsider = manager.issue_attack(&mut encounter, &mut roster, 1, 99, AttackKind::Ordinary, 0);
        assert_eq!(outsider, Err(EngineError::NotInEncounter(99)));

        close_in(&mut roster, 1, 2);
        roster.get_mut(&1).unwrap().supplies = 5;
        let broke = manager.issue_attack(&mut encounter, &mut roster, 1, 2, AttackKind::Concentrated, 0);
        assert_eq!(
            broke,
            Err(EngineError::InsufficientSupplies {
                required: 10,
                available: 5
            })
        );
        assert_eq!(roster[&2].groups, before[&2].groups);
    }

    #[test]
    fn test_concentrated_fire_costs_supplies() {
        let world = World::new();
        let manager = world.manager();
        let mut roster = roster(vec![fleet(1, Faction::Empire, 100), fleet(2, Faction::Alliance, 50)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();
        close_in(&mut roster, 1, 2);

        // 1000 strength × 15% at full morale
        let events = manager
            .issue_attack(&mut encounter, &mut roster, 1, 2, AttackKind::Concentrated, 0)
            .unwrap();
        assert_eq!(
            events,
            vec![
                EngineEvent::Shot {
                    encounter: 1,
                    attacker: 1,
                    target: 2
                },
                EngineEvent::Hit {
                    encounter: 1,
                    attacker: 1,
                    target: 2,
                    damage: 150,
                    ships_lost: 0
                },
            ]
        );
        assert_eq!(roster[&1].supplies, 490);
        assert_eq!(roster[&1].combat_target, Some(2));
        assert_eq!(roster[&2].groups[0].health, Fixed::from_num(97));
    }

    #[test]
    fn test_attack_eliminating_last_fleet_concludes() {
        let world = World::new();
        let manager = world.manager();
        let mut weak = fleet(2, Faction::Alliance, 1);
        weak.groups[0].health = Fixed::from_num(1);
        let mut roster = roster(vec![fleet(1, Faction::Empire, 10), weak]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (mut encounter, _) = manager
            .begin(1, 1, GridCell::new(10, 10), &mut roster, &[1, 2], 0, &mut rng)
            .unwrap();
        close_in(&mut roster, 1, 2);

        let events = manager
            .issue_attack(&mut encounter, &mut roster, 1, 2, AttackKind::Ordinary, 500)
            .unwrap();
        assert!(events.contains(&EngineEvent::Destroy {
            encounter: 1,
            fleet: 2,
            faction: Faction::Alliance
        }));
        assert!(matches!(
            events.last(),
            Some(EngineEvent::EncounterConcluded {
                outcome: Outcome::Victory(Faction::Empire),
                ..
            })
        ));
        assert!(!encounter.is_active());
        assert_eq!(roster[&2].status, FleetStatus::Destroyed);
    }
}
