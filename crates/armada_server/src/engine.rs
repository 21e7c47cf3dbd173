//! Store-backed command and update surface for one or more sessions.
//!
//! Every call loads the entities it needs from the [`SessionStore`], runs
//! the pure `armada_core` components on them and writes them back. Nothing
//! is written when a command fails validation.
//!
//! The per-tick entry points (`update_*`, `check_conclusion`,
//! `retreat_progress`, `regenerate`) keep going past a failing fleet and
//! list it in [`UpdateReport::failures`] for the scheduler to log.
//!
//! Fleets are written before the encounter that references them. When a
//! write fails halfway, the next movement update returns any fleet whose
//! encounter is missing, concluded or no longer lists it to the grid, and
//! encounter updates drop participants whose stored fleet has left.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use armada_core::combat::AttackKind;
use armada_core::commands::{apply_fleet_command, CommandId, CommandKind, TimedCommand};
use armada_core::components::{
    EncounterId, Fleet, FleetId, Formation, Position, SessionId, SimTime,
};
use armada_core::encounter::{
    detect_collisions, Collision, Roster, TacticalEncounter, TacticalEncounterManager,
};
use armada_core::error::{EngineError, Result};
use armada_core::events::EngineEvent;
use armada_core::math::{Fixed, Vec2Fixed};
use armada_core::movement::{MoveOrder, MovementController, StrategicStep};
use armada_core::pathfinding::{GridCell, NavGrid};
use armada_core::rules::EngineRules;
use armada_core::terrain::TerrainAssessor;
use rand::Rng;

use crate::config::RegenerationRules;
use crate::store::SessionStore;

/// Terrain shared across sessions and threads.
pub type SharedTerrain = Arc<dyn TerrainAssessor + Send + Sync>;

/// Entity a per-tick failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    /// A fleet.
    Fleet(FleetId),
    /// An encounter.
    Encounter(EncounterId),
    /// A contested cell where an encounter could not be started.
    Cell(GridCell),
    /// A timed command.
    Command(CommandId),
    /// A whole scheduler step.
    Session(SessionId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fleet(id) => write!(f, "fleet {id}"),
            Self::Encounter(id) => write!(f, "encounter {id}"),
            Self::Cell(cell) => write!(f, "cell ({}, {})", cell.x, cell.y),
            Self::Command(id) => write!(f, "command {id}"),
            Self::Session(id) => write!(f, "session {id}"),
        }
    }
}

/// An entity skipped during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// What failed.
    pub entity: EntityRef,
    /// Why.
    pub error: EngineError,
}

/// Outcome of one per-tick update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Positions written this call: strategic points for grid fleets,
    /// plane points for tactical ones.
    pub positions: Vec<(FleetId, Vec2Fixed)>,
    /// Events emitted.
    pub events: Vec<EngineEvent>,
    /// Entities that were skipped.
    pub failures: Vec<EntityFailure>,
}

impl UpdateReport {
    fn fail(&mut self, entity: EntityRef, error: EngineError) {
        self.failures.push(EntityFailure { entity, error });
    }

    /// Append another report.
    pub fn merge(&mut self, other: Self) {
        self.positions.extend(other.positions);
        self.events.extend(other.events);
        self.failures.extend(other.failures);
    }
}

/// When [`FleetEngine::run_encounter`] writes its entities back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteBack {
    /// After every run.
    Always,
    /// Only when the run emitted events or dropped a participant.
    OnChange,
}

/// The engine's command and update surface.
///
/// Cheap to clone; the grid, terrain and rules are shared read-only.
#[derive(Clone)]
pub struct FleetEngine {
    store: Arc<dyn SessionStore>,
    grid: Arc<NavGrid>,
    terrain: SharedTerrain,
    rules: Arc<EngineRules>,
}

impl fmt::Debug for FleetEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetEngine")
            .field("grid", &(self.grid.width(), self.grid.height()))
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl FleetEngine {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        grid: Arc<NavGrid>,
        terrain: SharedTerrain,
        rules: EngineRules,
    ) -> Self {
        Self {
            store,
            grid,
            terrain,
            rules: Arc::new(rules),
        }
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Navigation grid.
    #[must_use]
    pub fn grid(&self) -> &NavGrid {
        &self.grid
    }

    /// Rules in force.
    #[must_use]
    pub fn rules(&self) -> &EngineRules {
        &self.rules
    }

    fn movement(&self) -> MovementController<'_> {
        MovementController::new(&self.grid, &*self.terrain, &self.rules)
    }

    fn manager(&self) -> TacticalEncounterManager<'_> {
        TacticalEncounterManager::new(self.movement())
    }

    /// Load a fleet.
    pub async fn fleet(&self, session: SessionId, id: FleetId) -> Result<Fleet> {
        self.store
            .find_fleet(session, id)
            .await?
            .ok_or(EngineError::FleetNotFound(id))
    }

    /// Load an encounter.
    pub async fn encounter(&self, session: SessionId, id: EncounterId) -> Result<TacticalEncounter> {
        self.store
            .find_encounter(session, id)
            .await?
            .ok_or(EngineError::EncounterNotFound(id))
    }

    /// Ids of the session's active encounters, in order.
    pub async fn active_encounter_ids(&self, session: SessionId) -> Result<Vec<EncounterId>> {
        Ok(self
            .store
            .list_encounters(session, true)
            .await?
            .into_iter()
            .map(|encounter| encounter.id)
            .collect())
    }

    /// Add a new fleet to its session, on a navigable cell.
    pub async fn spawn_fleet(&self, fleet: Fleet) -> Result<()> {
        let cell = fleet.cell();
        if !self.grid.in_bounds(cell) {
            return Err(EngineError::OutOfBounds(cell));
        }
        if !self.grid.is_navigable(cell) {
            return Err(EngineError::ImpassableDestination(cell));
        }
        fleet.validate()?;
        tracing::debug!(session = fleet.session, fleet = fleet.id, ?cell, "Fleet spawned");
        self.store.insert_fleet(fleet).await
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Plan a strategic move.
    ///
    /// Validation failures and [`EngineError::Unreachable`] leave the fleet
    /// untouched.
    pub async fn set_fleet_destination<R: Rng + Send + ?Sized>(
        &self,
        session: SessionId,
        fleet_id: FleetId,
        destination: GridCell,
        rng: &mut R,
    ) -> Result<MoveOrder> {
        let mut fleet = self.fleet(session, fleet_id).await?;
        let order = self.movement().set_destination(&mut fleet, destination, rng)?;
        self.store.update_fleet(&fleet).await?;

        tracing::debug!(
            session,
            fleet = fleet_id,
            ?destination,
            steps = order.path.len().saturating_sub(1),
            warped = order.warp.is_some(),
            "Move ordered"
        );
        Ok(order)
    }

    /// Redirect a fleet on its tactical plane.
    pub async fn move_fleet_tactical(
        &self,
        session: SessionId,
        fleet_id: FleetId,
        target: Vec2Fixed,
        now: SimTime,
    ) -> Result<()> {
        let mut fleet = self.fleet(session, fleet_id).await?;
        if fleet.encounter().is_none() {
            return Err(EngineError::NotInEncounter(fleet_id));
        }
        self.movement().set_tactical_destination(&mut fleet, target, now)?;
        self.store.update_fleet(&fleet).await
    }

    /// Order a fleet to withdraw from its encounter.
    pub async fn order_retreat(
        &self,
        session: SessionId,
        fleet_id: FleetId,
        now: SimTime,
    ) -> Result<()> {
        let mut fleet = self.fleet(session, fleet_id).await?;
        let encounter_id = fleet
            .encounter()
            .ok_or(EngineError::NotInEncounter(fleet_id))?;
        let encounter = self.encounter(session, encounter_id).await?;
        self.manager().begin_retreat(&encounter, &mut fleet, now)?;
        self.store.update_fleet(&fleet).await
    }

    /// Fire a discrete attack from one participant at another.
    pub async fn issue_attack(
        &self,
        session: SessionId,
        attacker: FleetId,
        target: FleetId,
        kind: AttackKind,
        now: SimTime,
    ) -> Result<UpdateReport> {
        let encounter_id = self
            .fleet(session, attacker)
            .await?
            .encounter()
            .ok_or(EngineError::NotInEncounter(attacker))?;
        self.run_encounter(
            session,
            encounter_id,
            WriteBack::Always,
            |manager, encounter, roster| {
                manager.issue_attack(encounter, roster, attacker, target, kind, now)
            },
        )
        .await
    }

    /// Switch formation immediately.
    pub async fn set_formation(
        &self,
        session: SessionId,
        fleet_id: FleetId,
        formation: Formation,
    ) -> Result<()> {
        let mut fleet = self.fleet(session, fleet_id).await?;
        apply_fleet_command(&mut fleet, CommandKind::ChangeFormation(formation))?;
        self.store.update_fleet(&fleet).await
    }

    /// Cancel a fleet's move order.
    pub async fn stop_fleet(&self, session: SessionId, fleet_id: FleetId) -> Result<()> {
        let mut fleet = self.fleet(session, fleet_id).await?;
        if fleet.is_destroyed() {
            return Err(EngineError::FleetDestroyed(fleet_id));
        }
        fleet.stop();
        self.store.update_fleet(&fleet).await
    }

    /// Apply a timed command that has come due.
    pub async fn apply_timed_command<R: Rng + Send + ?Sized>(
        &self,
        command: &TimedCommand,
        rng: &mut R,
    ) -> Result<EngineEvent> {
        match command.kind {
            CommandKind::Warp { destination } => {
                self.set_fleet_destination(command.session, command.fleet, destination, rng)
                    .await?;
            }
            kind => {
                let mut fleet = self.fleet(command.session, command.fleet).await?;
                apply_fleet_command(&mut fleet, kind)?;
                self.store.update_fleet(&fleet).await?;
            }
        }
        Ok(EngineEvent::CommandCompleted {
            command: command.id,
            fleet: command.fleet,
            kind: command.kind,
        })
    }

    // ------------------------------------------------------------------
    // Per-tick updates
    // ------------------------------------------------------------------

    /// Advance every strategically moving fleet, then let arrivals join
    /// active encounters and start encounters on newly contested cells.
    pub async fn update_all_moving_fleets<R: Rng + Send + ?Sized>(
        &self,
        session: SessionId,
        dt: Fixed,
        now: SimTime,
        rng: &mut R,
    ) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        let mut roster: Roster = self
            .store
            .list_fleets(session)
            .await?
            .into_iter()
            .map(|fleet| (fleet.id, fleet))
            .collect();
        self.release_stranded(session, &mut roster, &mut report).await;

        // 1. Movement
        let mut arrivals = Vec::new();
        let ids: Vec<FleetId> = roster.keys().copied().collect();
        for id in ids {
            let Some(fleet) = roster.get_mut(&id) else {
                continue;
            };
            if !fleet.is_moving() || fleet.is_in_combat() {
                continue;
            }
            let before = fleet.clone();
            let step = self.movement().advance_strategic(fleet, dt);
            if step == StrategicStep::Idle {
                continue;
            }
            if let Err(error) = self.store.update_fleet(fleet).await {
                *fleet = before;
                report.fail(EntityRef::Fleet(id), error);
                continue;
            }
            if let Position::Strategic(point) = fleet.position {
                report.positions.push((id, point));
            }
            if let StrategicStep::Arrived(cell) = step {
                tracing::debug!(session, fleet = id, ?cell, "Fleet arrived");
                report.events.push(EngineEvent::Arrived { fleet: id, cell });
                arrivals.push(id);
            }
        }

        // 2. Reinforcements
        let mut active: BTreeMap<GridCell, TacticalEncounter> = self
            .store
            .list_encounters(session, true)
            .await?
            .into_iter()
            .map(|encounter| (encounter.origin, encounter))
            .collect();
        for id in arrivals {
            let Some(fleet) = roster.get_mut(&id) else {
                continue;
            };
            let Some(encounter) = active.get_mut(&fleet.cell()) else {
                continue;
            };
            match self.reinforce(encounter, fleet, rng).await {
                Ok(event) => report.events.push(event),
                Err(error) => report.fail(EntityRef::Fleet(id), error),
            }
        }

        // 3. New encounters
        let engaged: BTreeSet<GridCell> = active.keys().copied().collect();
        for collision in detect_collisions(roster.values(), &engaged) {
            let cell = collision.cell;
            match self.begin_encounter(session, &collision, &mut roster, now, rng).await {
                Ok(event) => report.events.push(event),
                Err(error) => report.fail(EntityRef::Cell(cell), error),
            }
        }

        Ok(report)
    }

    /// Return to the grid every fleet whose stored encounter is missing,
    /// concluded or no longer lists it.
    async fn release_stranded(
        &self,
        session: SessionId,
        roster: &mut Roster,
        report: &mut UpdateReport,
    ) {
        let mut planes: BTreeMap<EncounterId, Option<TacticalEncounter>> = BTreeMap::new();
        for fleet in roster.values_mut() {
            let Some((encounter_id, origin)) = fleet.tactical().map(|t| (t.encounter, t.origin))
            else {
                continue;
            };
            if !planes.contains_key(&encounter_id) {
                match self.store.find_encounter(session, encounter_id).await {
                    Ok(encounter) => {
                        planes.insert(encounter_id, encounter);
                    }
                    Err(error) => {
                        report.fail(EntityRef::Fleet(fleet.id), error);
                        continue;
                    }
                }
            }
            let enrolled = planes
                .get(&encounter_id)
                .and_then(Option::as_ref)
                .is_some_and(|encounter| encounter.is_active() && encounter.contains(fleet.id));
            if enrolled {
                continue;
            }

            let before = fleet.clone();
            fleet.return_to_strategic(origin);
            if let Err(error) = self.store.update_fleet(fleet).await {
                *fleet = before;
                report.fail(EntityRef::Fleet(fleet.id), error);
                continue;
            }
            tracing::warn!(
                session,
                fleet = fleet.id,
                encounter = encounter_id,
                cell = ?origin,
                "Stranded fleet returned to the grid"
            );
            if let Position::Strategic(point) = fleet.position {
                report.positions.push((fleet.id, point));
            }
        }
    }

    async fn reinforce<R: Rng + Send + ?Sized>(
        &self,
        encounter: &mut TacticalEncounter,
        fleet: &mut Fleet,
        rng: &mut R,
    ) -> Result<EngineEvent> {
        let (encounter_before, fleet_before) = (encounter.clone(), fleet.clone());
        let event = self.manager().reinforce(encounter, fleet, rng);
        let saved = match event {
            Ok(event) => match self.store.update_fleet(fleet).await {
                Ok(()) => self.store.save_encounter(encounter).await.map(|()| event),
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };
        if saved.is_err() {
            *encounter = encounter_before;
            *fleet = fleet_before;
        }
        saved
    }

    async fn begin_encounter<R: Rng + Send + ?Sized>(
        &self,
        session: SessionId,
        collision: &Collision,
        roster: &mut Roster,
        now: SimTime,
        rng: &mut R,
    ) -> Result<EngineEvent> {
        let id = self.store.allocate_encounter_id(session).await?;
        let (encounter, event) =
            self.manager()
                .begin(id, session, collision.cell, roster, &collision.fleets, now, rng)?;
        for fleet_id in &collision.fleets {
            if let Some(fleet) = roster.get(fleet_id) {
                self.store.update_fleet(fleet).await?;
            }
        }
        self.store.save_encounter(&encounter).await?;
        Ok(event)
    }

    /// Run one tick of movement and combat inside an encounter.
    pub async fn update_combat(
        &self,
        session: SessionId,
        encounter_id: EncounterId,
        dt: Fixed,
        now: SimTime,
    ) -> Result<UpdateReport> {
        self.run_encounter(
            session,
            encounter_id,
            WriteBack::Always,
            |manager, encounter, roster| {
                Ok(manager.update(encounter, roster, dt, now))
            },
        )
        .await
    }

    /// Conclude an encounter if at most one faction remains.
    pub async fn check_conclusion(
        &self,
        session: SessionId,
        encounter_id: EncounterId,
        now: SimTime,
    ) -> Result<UpdateReport> {
        self.run_encounter(
            session,
            encounter_id,
            WriteBack::OnChange,
            |manager, encounter, roster| {
                Ok(manager
                    .check_conclusion(encounter, roster, now)
                    .into_iter()
                    .collect())
            },
        )
        .await
    }

    /// Let retreating fleets that reached the plane edge leave.
    pub async fn retreat_progress(
        &self,
        session: SessionId,
        encounter_id: EncounterId,
        now: SimTime,
    ) -> Result<UpdateReport> {
        self.run_encounter(
            session,
            encounter_id,
            WriteBack::OnChange,
            |manager, encounter, roster| {
                Ok(manager.retreat_progress(encounter, roster, now))
            },
        )
        .await
    }

    /// Replenish every surviving fleet that is not in combat.
    pub async fn regenerate(
        &self,
        session: SessionId,
        amounts: &RegenerationRules,
    ) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        let mut replenished = 0;
        for mut fleet in self.store.list_fleets(session).await? {
            if fleet.is_destroyed() || fleet.is_in_combat() {
                continue;
            }
            fleet.replenish(amounts.supplies, amounts.fuel, amounts.morale);
            match self.store.update_fleet(&fleet).await {
                Ok(()) => replenished += 1,
                Err(error) => report.fail(EntityRef::Fleet(fleet.id), error),
            }
        }
        tracing::debug!(session, fleets = replenished, "Resources regenerated");
        report.events.push(EngineEvent::ResourcesRegenerated {
            fleets: replenished,
        });
        Ok(report)
    }

    /// Load an encounter and its participants, run `f`, and write the
    /// fleets back followed by the encounter.
    ///
    /// Participants whose stored fleet is gone or points elsewhere are
    /// dropped before `f` runs. Nothing is written if a participant cannot
    /// be loaded or `f` fails.
    async fn run_encounter<F>(
        &self,
        session: SessionId,
        encounter_id: EncounterId,
        write_back: WriteBack,
        f: F,
    ) -> Result<UpdateReport>
    where
        F: FnOnce(
                &TacticalEncounterManager<'_>,
                &mut TacticalEncounter,
                &mut Roster,
            ) -> Result<Vec<EngineEvent>>
            + Send,
    {
        let mut encounter = self.encounter(session, encounter_id).await?;
        let mut report = UpdateReport::default();

        let mut roster = Roster::new();
        let mut dropped = false;
        for fleet_id in encounter.participant_ids() {
            match self.store.find_fleet(session, fleet_id).await? {
                Some(fleet) if fleet.encounter() == Some(encounter_id) => {
                    roster.insert(fleet_id, fleet);
                }
                stale => {
                    tracing::warn!(
                        session,
                        encounter = encounter_id,
                        fleet = fleet_id,
                        stored = stale.is_some(),
                        "Dropping participant that left the plane"
                    );
                    encounter.withdraw(fleet_id);
                    dropped = true;
                }
            }
        }

        report.events = f(&self.manager(), &mut encounter, &mut roster)?;
        if write_back == WriteBack::OnChange && report.events.is_empty() && !dropped {
            return Ok(report);
        }

        for fleet in roster.values() {
            if let Err(error) = self.store.update_fleet(fleet).await {
                report.fail(EntityRef::Fleet(fleet.id), error);
                continue;
            }
            if let Some(state) = fleet.tactical() {
                report.positions.push((fleet.id, state.point));
            }
        }
        self.store.save_encounter(&encounter).await?;
        Ok(report)
    }
}
