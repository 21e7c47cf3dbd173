//! End-to-end session tests.
//!
//! Drive fleets through the scheduler the way the server loop does and
//! check what ends up in the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use armada_core::components::{EncounterId, Fleet, FleetId, FleetStatus, SessionId};
use armada_core::encounter::{EncounterStatus, Outcome, TacticalEncounter};
use armada_core::error::{EngineError, Result};
use armada_core::events::EngineEvent;
use armada_core::factions::Faction;
use armada_core::math::Fixed;
use armada_core::pathfinding::{GridCell, NavGrid};
use armada_core::terrain::SectorTerrain;
use armada_server::{
    EntityRef, FleetEngine, InMemoryStore, ServerConfig, SessionScheduler, SessionStore,
};
use armada_test_utils::determinism::state_hash;
use armada_test_utils::fixtures::battleship_fleet;
use async_trait::async_trait;

const SESSION: SessionId = 1;
const BATTLE_CELL: GridCell = GridCell::new(10, 10);

fn config() -> ServerConfig {
    ServerConfig {
        tick_rate_hz: 10,
        rng_seed: 42,
        grid_width: 20,
        grid_height: 20,
        ..ServerConfig::default()
    }
}

fn engine_over(store: Arc<dyn SessionStore>, config: &ServerConfig) -> FleetEngine {
    let grid = Arc::new(NavGrid::new(config.grid_width, config.grid_height));
    FleetEngine::new(
        store,
        Arc::clone(&grid),
        Arc::new(SectorTerrain::new(grid)),
        config.rules.clone(),
    )
}

fn scheduler_over(store: Arc<dyn SessionStore>) -> SessionScheduler {
    let config = config();
    SessionScheduler::new(SESSION, engine_over(store, &config), &config)
}

/// Empire and Alliance fleets two cells either side of the battle cell,
/// both ordered onto it.
async fn converge(scheduler: &mut SessionScheduler, empire_ships: u32, alliance_ships: u32) {
    let engine = scheduler.engine().clone();
    engine
        .spawn_fleet(battleship_fleet(1, Faction::Empire, GridCell::new(8, 10), empire_ships))
        .await
        .unwrap();
    engine
        .spawn_fleet(battleship_fleet(2, Faction::Alliance, GridCell::new(12, 10), alliance_ships))
        .await
        .unwrap();
    scheduler.set_fleet_destination(1, BATTLE_CELL).await.unwrap();
    scheduler.set_fleet_destination(2, BATTLE_CELL).await.unwrap();
}

/// Tick until an event matches, returning every event seen.
async fn run_until(
    scheduler: &mut SessionScheduler,
    max_ticks: u32,
    done: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    for _ in 0..max_ticks {
        let report = scheduler.tick().await;
        assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);
        let finished = report.events.iter().any(&done);
        events.extend(report.events);
        if finished {
            return events;
        }
    }
    panic!("condition not reached in {max_ticks} ticks");
}

#[tokio::test]
async fn test_simultaneous_arrival_starts_one_encounter() {
    let store = Arc::new(InMemoryStore::new());
    let mut scheduler = scheduler_over(store.clone());
    converge(&mut scheduler, 5, 5).await;

    let events = run_until(&mut scheduler, 50, |e| {
        matches!(e, EngineEvent::EncounterStarted { .. })
    })
    .await;

    let arrivals: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Arrived { .. }))
        .collect();
    assert_eq!(arrivals.len(), 2);
    let started: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::EncounterStarted { encounter, cell, participants } => {
                Some((*encounter, *cell, participants.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![(1, BATTLE_CELL, vec![1, 2])]);

    let encounters = store.list_encounters(SESSION, true).await.unwrap();
    assert_eq!(encounters.len(), 1);
    assert_eq!(encounters[0].origin, BATTLE_CELL);

    let third = encounters[0].plane_size / Fixed::from_num(3);
    let empire = scheduler.engine().fleet(SESSION, 1).await.unwrap();
    let alliance = scheduler.engine().fleet(SESSION, 2).await.unwrap();
    assert_eq!(empire.status, FleetStatus::Combat);
    assert_eq!(alliance.status, FleetStatus::Combat);
    assert!(empire.tactical().unwrap().point.x < third);
    assert!(alliance.tactical().unwrap().point.x > third * Fixed::from_num(2));
}

#[tokio::test]
async fn test_closing_in_fights_to_a_conclusion() {
    let store = Arc::new(InMemoryStore::new());
    let mut scheduler = scheduler_over(store.clone());
    converge(&mut scheduler, 100, 1).await;
    run_until(&mut scheduler, 50, |e| matches!(e, EngineEvent::EncounterStarted { .. })).await;

    let target = scheduler
        .engine()
        .fleet(SESSION, 2)
        .await
        .unwrap()
        .tactical()
        .unwrap()
        .point;
    scheduler.move_fleet_tactical(1, target).await.unwrap();

    let events = run_until(&mut scheduler, 3000, |e| {
        matches!(e, EngineEvent::EncounterConcluded { .. })
    })
    .await;

    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Destroy { fleet: 2, faction: Faction::Alliance, .. }
    )));
    let outcome = events.iter().find_map(|e| match e {
        EngineEvent::EncounterConcluded { outcome, .. } => Some(*outcome),
        _ => None,
    });
    assert_eq!(outcome, Some(Outcome::Victory(Faction::Empire)));

    let winner = scheduler.engine().fleet(SESSION, 1).await.unwrap();
    assert_eq!(winner.status, FleetStatus::Idle);
    assert!(winner.tactical().is_none());
    assert_eq!(winner.cell(), BATTLE_CELL);
    assert_eq!(
        scheduler.engine().fleet(SESSION, 2).await.unwrap().status,
        FleetStatus::Destroyed
    );

    let encounter = scheduler.engine().encounter(SESSION, 1).await.unwrap();
    assert_eq!(encounter.status, EncounterStatus::Concluded);
    assert!(store.list_encounters(SESSION, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_seed_same_session() {
    async fn play() -> (Vec<EngineEvent>, u64) {
        let store = Arc::new(InMemoryStore::new());
        let mut scheduler = scheduler_over(store.clone());
        converge(&mut scheduler, 20, 15).await;
        let mut events = Vec::new();
        for _ in 0..100 {
            events.extend(scheduler.tick().await.events);
        }
        let fleets = store.list_fleets(SESSION).await.unwrap();
        (events, state_hash(&fleets).unwrap())
    }

    let (first_events, first_hash) = play().await;
    let (second_events, second_hash) = play().await;
    assert!(!first_events.is_empty());
    assert_eq!(first_events, second_events);
    assert_eq!(first_hash, second_hash);
}

/// Store that refuses writes for one fleet once armed.
struct FaultyStore {
    inner: InMemoryStore,
    poisoned: AtomicU64,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            poisoned: AtomicU64::new(0),
        }
    }

    fn poison(&self, fleet: FleetId) {
        self.poisoned.store(fleet, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn find_fleet(&self, session: SessionId, id: FleetId) -> Result<Option<Fleet>> {
        self.inner.find_fleet(session, id).await
    }

    async fn update_fleet(&self, fleet: &Fleet) -> Result<()> {
        if fleet.id == self.poisoned.load(Ordering::SeqCst) {
            return Err(EngineError::Storage(format!("fleet {} is read-only", fleet.id)));
        }
        self.inner.update_fleet(fleet).await
    }

    async fn insert_fleet(&self, fleet: Fleet) -> Result<()> {
        self.inner.insert_fleet(fleet).await
    }

    async fn list_fleets(&self, session: SessionId) -> Result<Vec<Fleet>> {
        self.inner.list_fleets(session).await
    }

    async fn allocate_encounter_id(&self, session: SessionId) -> Result<EncounterId> {
        self.inner.allocate_encounter_id(session).await
    }

    async fn save_encounter(&self, encounter: &TacticalEncounter) -> Result<()> {
        self.inner.save_encounter(encounter).await
    }

    async fn find_encounter(
        &self,
        session: SessionId,
        id: EncounterId,
    ) -> Result<Option<TacticalEncounter>> {
        self.inner.find_encounter(session, id).await
    }

    async fn list_encounters(
        &self,
        session: SessionId,
        active_only: bool,
    ) -> Result<Vec<TacticalEncounter>> {
        self.inner.list_encounters(session, active_only).await
    }
}

#[tokio::test]
async fn test_store_failure_isolated_to_one_fleet() {
    let store = Arc::new(FaultyStore::new());
    let mut scheduler = scheduler_over(store.clone());
    let engine = scheduler.engine().clone();
    engine
        .spawn_fleet(battleship_fleet(1, Faction::Empire, GridCell::new(2, 2), 3))
        .await
        .unwrap();
    engine
        .spawn_fleet(battleship_fleet(2, Faction::Empire, GridCell::new(2, 5), 3))
        .await
        .unwrap();
    scheduler.set_fleet_destination(1, GridCell::new(6, 2)).await.unwrap();
    scheduler.set_fleet_destination(2, GridCell::new(6, 5)).await.unwrap();
    store.poison(1);

    let mut arrived = Vec::new();
    for _ in 0..40 {
        let report = scheduler.tick().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity, EntityRef::Fleet(1));
        arrived.extend(report.events.iter().filter_map(|e| match e {
            EngineEvent::Arrived { fleet, .. } => Some(*fleet),
            _ => None,
        }));
    }

    assert_eq!(arrived, vec![2]);
    assert_eq!(engine.fleet(SESSION, 2).await.unwrap().cell(), GridCell::new(6, 5));
    let stuck = engine.fleet(SESSION, 1).await.unwrap();
    assert_eq!(stuck.cell(), GridCell::new(2, 2));
    assert_eq!(stuck.status, FleetStatus::Moving);
}

#[tokio::test]
async fn test_conclusion_recovers_fleet_whose_write_failed() {
    let store = Arc::new(FaultyStore::new());
    let mut scheduler = scheduler_over(store.clone());
    converge(&mut scheduler, 5, 5).await;
    run_until(&mut scheduler, 50, |e| matches!(e, EngineEvent::EncounterStarted { .. })).await;

    // Fleet 2 leaves; the victor's writes fail while the encounter wraps up.
    scheduler.order_retreat(2).await.unwrap();
    store.poison(1);
    let mut concluded = false;
    for _ in 0..600 {
        let report = scheduler.tick().await;
        if report
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::EncounterConcluded { .. }))
        {
            assert!(report.failures.iter().any(|f| f.entity == EntityRef::Fleet(1)));
            concluded = true;
            break;
        }
    }
    assert!(concluded, "encounter never concluded");
    let engine = scheduler.engine().clone();
    assert_eq!(engine.fleet(SESSION, 1).await.unwrap().status, FleetStatus::Combat);
    assert!(engine.active_encounter_ids(SESSION).await.unwrap().is_empty());

    store.poison(0);
    let report = scheduler.tick().await;
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);

    let victor = engine.fleet(SESSION, 1).await.unwrap();
    assert_eq!(victor.status, FleetStatus::Idle);
    assert!(victor.tactical().is_none());
    assert_eq!(victor.cell(), BATTLE_CELL);
    scheduler
        .set_fleet_destination(1, GridCell::new(5, 5))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_interrupted_encounter_start_is_retried() {
    let store = Arc::new(FaultyStore::new());
    let mut scheduler = scheduler_over(store.clone());
    let engine = scheduler.engine().clone();
    engine
        .spawn_fleet(battleship_fleet(1, Faction::Empire, BATTLE_CELL, 5))
        .await
        .unwrap();
    engine
        .spawn_fleet(battleship_fleet(2, Faction::Alliance, BATTLE_CELL, 5))
        .await
        .unwrap();

    // Fleet 1 is written onto the plane, fleet 2 is not, and the encounter
    // is never saved.
    store.poison(2);
    let report = scheduler.tick().await;
    assert!(report
        .failures
        .iter()
        .any(|f| f.entity == EntityRef::Cell(BATTLE_CELL)));
    assert!(engine.active_encounter_ids(SESSION).await.unwrap().is_empty());
    assert_eq!(engine.fleet(SESSION, 1).await.unwrap().encounter(), Some(1));

    store.poison(0);
    let report = scheduler.tick().await;
    assert!(report.failures.is_empty(), "unexpected failures: {:?}", report.failures);
    assert!(report.events.iter().any(|e| matches!(
        e,
        EngineEvent::EncounterStarted { encounter: 2, participants, .. } if participants == &vec![1, 2]
    )));
    assert_eq!(engine.active_encounter_ids(SESSION).await.unwrap(), vec![2]);
    for id in [1, 2] {
        let fleet = engine.fleet(SESSION, id).await.unwrap();
        assert_eq!(fleet.status, FleetStatus::Combat);
        assert_eq!(fleet.encounter(), Some(2));
    }
}

#[tokio::test]
async fn test_session_resumes_from_snapshot() {
    let store = Arc::new(InMemoryStore::new());
    let mut scheduler = scheduler_over(store.clone());
    converge(&mut scheduler, 5, 5).await;
    run_until(&mut scheduler, 50, |e| matches!(e, EngineEvent::EncounterStarted { .. })).await;
    let bytes = store.snapshot(SESSION).await.unwrap();

    let restored = Arc::new(InMemoryStore::new());
    assert_eq!(restored.restore(&bytes).await.unwrap(), SESSION);
    let mut resumed = scheduler_over(restored.clone());

    assert_eq!(
        restored.list_fleets(SESSION).await.unwrap(),
        store.list_fleets(SESSION).await.unwrap()
    );
    assert_eq!(resumed.engine().active_encounter_ids(SESSION).await.unwrap(), vec![1]);

    // Orders still apply to the restored encounter
    resumed.order_retreat(2).await.unwrap();
    let events = run_until(&mut resumed, 600, |e| {
        matches!(e, EngineEvent::EncounterConcluded { .. })
    })
    .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RetreatCompleted { fleet: 2, .. })));
    assert_eq!(restored.allocate_encounter_id(SESSION).await.unwrap(), 2);
}
