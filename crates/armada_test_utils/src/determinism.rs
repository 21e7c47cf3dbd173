//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the engine produces identical
//! results given identical inputs.
//!
//! # Testing Strategy
//!
//! Sessions are persisted and replayed, so every tick must be
//! reproducible. Sources of non-determinism include:
//!
//! - **Floating-point math**: We use fixed-point arithmetic via
//!   [`armada_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Rosters and participant lists are `BTreeMap`s iterated in id order.
//!
//! - **System randomness**: Warp variance and deployment jitter draw from
//!   a seeded RNG passed in by the caller.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual components (movement, combat, etc.)
//! 2. **Property tests**: Random inputs must still produce deterministic outputs
//! 3. **Scenario tests**: Whole encounters are reproducible
//! 4. **Parallel tests**: Running N scenarios on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread;

use armada_core::components::{Fleet, Position, SimTime};
use armada_core::encounter::{Roster, TacticalEncounter, TacticalEncounterManager};
use armada_core::error::Result;
use armada_core::events::EngineEvent;
use armada_core::math::Fixed;
use armada_core::movement::MovementController;
use armada_core::pathfinding::{GridCell, NavGrid};
use armada_core::rules::EngineRules;
use armada_core::terrain::SectorTerrain;
use serde::Serialize;

use crate::fixtures::seeded_rng;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic run).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Engine is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a scenario multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the scenario
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial state
/// * `step` - Function to advance state by one tick
/// * `hash` - Function to compute state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run `runs` scenarios on scoped threads and collect final hashes.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn verify_parallel_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S + Sync,
    Step: Fn(&mut S) + Sync,
    HashFn: Fn(&S) -> u64 + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..runs)
            .map(|_| {
                s.spawn(|| {
                    let mut state = setup();
                    for _ in 0..ticks {
                        step(&mut state);
                    }
                    hash(&state)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("worker thread panicked"))
            .collect()
    });

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks,
    }
}

/// Compare two runs tick-by-tick, finding the first divergence.
///
/// # Returns
///
/// `None` if the runs are deterministic, `Some(tick)` if they diverge at
/// that tick (0 means the initial states already differ).
pub fn find_first_divergence<S, Setup, Step, HashFn>(
    setup: Setup,
    step: Step,
    hash: HashFn,
    ticks: u64,
) -> Option<u64>
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut first = setup();
    let mut second = setup();

    if hash(&first) != hash(&second) {
        return Some(0);
    }

    for tick in 1..=ticks {
        step(&mut first);
        step(&mut second);
        if hash(&first) != hash(&second) {
            return Some(tick);
        }
    }

    None
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash the bincode encoding of a serializable value.
///
/// # Errors
///
/// Returns the bincode error if the value cannot be encoded.
pub fn state_hash<T: Serialize + ?Sized>(value: &T) -> bincode::Result<u64> {
    bincode::serialize(value).map(|bytes| compute_hash(&bytes))
}

/// A single encounter on a 20×20 open grid, stepped with a fixed `dt`.
///
/// Owns everything the engine borrows so it can be built inside
/// determinism closures.
#[derive(Debug, Clone)]
pub struct EncounterScenario {
    /// Strategic grid.
    pub grid: NavGrid,
    /// Terrain over the grid.
    pub terrain: SectorTerrain,
    /// Rules in force.
    pub rules: EngineRules,
    /// Participating fleets.
    pub roster: Roster,
    /// The encounter under test.
    pub encounter: TacticalEncounter,
    /// Simulated clock in milliseconds.
    pub now: SimTime,
    /// Every event emitted so far.
    pub events: Vec<EngineEvent>,
}

impl EncounterScenario {
    /// Cell every scenario fleet is placed on.
    pub const CELL: GridCell = GridCell::new(10, 10);

    /// Deploy `fleets` into a new encounter at [`Self::CELL`].
    ///
    /// # Errors
    ///
    /// Any deployment error from the encounter manager.
    pub fn new(fleets: Vec<Fleet>, rules: EngineRules, seed: u64) -> Result<Self> {
        let grid = NavGrid::new(20, 20);
        let terrain = SectorTerrain::new(Arc::new(grid.clone()));
        let mut roster: Roster = fleets
            .into_iter()
            .map(|mut fleet| {
                fleet.position = Position::at_cell(Self::CELL);
                (fleet.id, fleet)
            })
            .collect();
        let ids: Vec<_> = roster.keys().copied().collect();

        let mut rng = seeded_rng(seed);
        let manager =
            TacticalEncounterManager::new(MovementController::new(&grid, &terrain, &rules));
        let (encounter, started) =
            manager.begin(1, 1, Self::CELL, &mut roster, &ids, 0, &mut rng)?;

        Ok(Self {
            grid,
            terrain,
            rules,
            roster,
            encounter,
            now: 0,
            events: vec![started],
        })
    }

    /// Advance the encounter by `dt_ms` milliseconds.
    pub fn step(&mut self, dt_ms: u64) {
        let manager = TacticalEncounterManager::new(MovementController::new(
            &self.grid,
            &self.terrain,
            &self.rules,
        ));
        self.now += dt_ms;
        let dt = Fixed::from_num(dt_ms) / Fixed::from_num(1000);

        let mut events = manager.update(&mut self.encounter, &mut self.roster, dt, self.now);
        events.extend(manager.retreat_progress(&mut self.encounter, &mut self.roster, self.now));
        events.extend(manager.check_conclusion(&mut self.encounter, &mut self.roster, self.now));
        self.events.extend(events);
    }

    /// Hash of the roster, the encounter and the event log.
    ///
    /// # Panics
    ///
    /// Panics if the state cannot be bincode-encoded.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        state_hash(&(&self.roster, &self.encounter, events_digest(&self.events)))
            .expect("scenario state is bincode-encodable")
    }
}

/// Events are internally tagged, which bincode cannot encode; hash their
/// debug rendering instead.
fn events_digest(events: &[EngineEvent]) -> u64 {
    compute_hash(&format!("{events:?}"))
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible inputs for
/// property-based testing of the engine.
pub mod strategies {
    use armada_core::components::{Fleet, FleetId, Formation, ShipGroup, ShipType};
    use armada_core::factions::Faction;
    use armada_core::pathfinding::{CellType, GridCell, NavGrid};
    use proptest::prelude::*;

    /// Generate a cell inside a `width × height` grid.
    pub fn arb_cell(width: i32, height: i32) -> impl Strategy<Value = GridCell> {
        (0..width, 0..height).prop_map(|(x, y)| GridCell::new(x, y))
    }

    /// Generate any faction.
    pub fn arb_faction() -> impl Strategy<Value = Faction> {
        prop_oneof![
            Just(Faction::Empire),
            Just(Faction::Alliance),
            Just(Faction::Phezzan),
        ]
    }

    /// Generate any formation.
    pub fn arb_formation() -> impl Strategy<Value = Formation> {
        prop_oneof![
            Just(Formation::Standard),
            Just(Formation::Offensive),
            Just(Formation::Defensive),
            Just(Formation::Encircle),
            Just(Formation::Retreat),
        ]
    }

    /// Generate any ship type.
    pub fn arb_ship_type() -> impl Strategy<Value = ShipType> {
        prop_oneof![
            Just(ShipType::Battleship),
            Just(ShipType::Carrier),
            Just(ShipType::Cruiser),
            Just(ShipType::Destroyer),
            Just(ShipType::Frigate),
            Just(ShipType::Transport),
        ]
    }

    /// Generate a live ship group (1-200 ships, 1-100 health).
    pub fn arb_ship_group() -> impl Strategy<Value = ShipGroup> {
        (arb_ship_type(), 1u32..200, 1u32..=100)
            .prop_map(|(ship_type, count, health)| ShipGroup::new(ship_type, count).with_health(health))
    }

    /// Generate an idle fleet with 1-4 groups on `cell`.
    pub fn arb_fleet(id: FleetId, cell: GridCell) -> impl Strategy<Value = Fleet> {
        (
            arb_faction(),
            arb_formation(),
            proptest::collection::vec(arb_ship_group(), 1..4),
            0u8..=100,
        )
            .prop_map(move |(faction, formation, groups, morale)| {
                groups
                    .into_iter()
                    .fold(Fleet::new(id, 1, faction, cell), Fleet::with_group)
                    .with_formation(formation)
                    .with_morale(morale)
            })
    }

    /// Generate a grid with roughly `blocked_pct`% impassable cells.
    pub fn arb_grid(width: u32, height: u32, blocked_pct: u32) -> impl Strategy<Value = NavGrid> {
        proptest::collection::vec(0u32..100, (width * height) as usize).prop_map(move |rolls| {
            let mut grid = NavGrid::new(width, height);
            for (index, roll) in rolls.into_iter().enumerate() {
                if roll < blocked_pct {
                    let cell = GridCell::new((index as u32 % width) as i32, (index as u32 / width) as i32);
                    grid.set_cell(cell, CellType::Impassable);
                }
            }
            grid
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::battleship_fleet;
    use armada_core::components::Formation;
    use armada_core::factions::Faction;
    use armada_core::pathfinding::find_path;
    use proptest::prelude::*;

    fn duel() -> EncounterScenario {
        let cell = EncounterScenario::CELL;
        EncounterScenario::new(
            vec![
                battleship_fleet(1, Faction::Empire, cell, 100),
                battleship_fleet(2, Faction::Alliance, cell, 80)
                    .with_formation(Formation::Defensive),
                battleship_fleet(3, Faction::Phezzan, cell, 40),
            ],
            EngineRules::default(),
            42,
        )
        .unwrap()
    }

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_encounter_is_deterministic() {
        let result = verify_determinism(4, 200, duel, |s| s.step(100), EncounterScenario::state_hash);
        result.assert_deterministic();
    }

    #[test]
    fn test_encounter_parallel_runs_match() {
        let result =
            verify_parallel_determinism(4, 200, duel, |s| s.step(100), EncounterScenario::state_hash);
        result.assert_deterministic();
    }

    #[test]
    fn test_no_divergence() {
        let divergence =
            find_first_divergence(duel, |s| s.step(250), EncounterScenario::state_hash, 100);
        assert!(divergence.is_none(), "Expected no divergence");
    }

    #[test]
    fn test_divergence_detected() {
        let cell = EncounterScenario::CELL;
        let seed = std::cell::Cell::new(0u64);
        let setup = || {
            seed.set(seed.get() + 1);
            EncounterScenario::new(
                vec![
                    battleship_fleet(1, Faction::Empire, cell, 5),
                    battleship_fleet(2, Faction::Alliance, cell, 5),
                ],
                EngineRules::default(),
                seed.get(),
            )
            .unwrap()
        };

        // Each run deploys with a different seed, so jitter differs from the start.
        let divergence = find_first_divergence(setup, |s| s.step(100), EncounterScenario::state_hash, 10);
        assert_eq!(divergence, Some(0));
    }

    #[test]
    fn test_encounter_state_survives_bincode() {
        let mut scenario = duel();
        for _ in 0..50 {
            scenario.step(100);
        }
        let bytes = bincode::serialize(&(&scenario.roster, &scenario.encounter)).unwrap();
        let (roster, encounter): (Roster, TacticalEncounter) = bincode::deserialize(&bytes).unwrap();
        assert_eq!(roster, scenario.roster);
        assert_eq!(encounter, scenario.encounter);
    }

    proptest! {
        #[test]
        fn prop_ships_never_increase(
            a in strategies::arb_fleet(1, EncounterScenario::CELL),
            b in strategies::arb_fleet(2, EncounterScenario::CELL),
            seed in any::<u64>(),
        ) {
            let Ok(mut scenario) = EncounterScenario::new(vec![a, b], EngineRules::default(), seed) else {
                return Ok(());
            };
            let mut previous: u32 = scenario.roster.values().map(Fleet::total_ships).sum();
            for _ in 0..30 {
                scenario.step(500);
                let now: u32 = scenario.roster.values().map(Fleet::total_ships).sum();
                prop_assert!(now <= previous);
                previous = now;
            }
        }

        #[test]
        fn prop_same_seed_same_outcome(seed in any::<u64>()) {
            let cell = EncounterScenario::CELL;
            let setup = || {
                EncounterScenario::new(
                    vec![
                        battleship_fleet(1, Faction::Empire, cell, 30),
                        battleship_fleet(2, Faction::Alliance, cell, 30),
                    ],
                    EngineRules::default(),
                    seed,
                )
                .unwrap()
            };
            let result = verify_determinism(2, 40, setup, |s| s.step(500), EncounterScenario::state_hash);
            prop_assert!(result.is_deterministic);
        }

        #[test]
        fn prop_paths_avoid_blocked_cells(grid in strategies::arb_grid(12, 12, 25)) {
            let start = GridCell::new(0, 0);
            let goal = GridCell::new(11, 11);
            if let Some(path) = find_path(&grid, start, goal, 10_000) {
                prop_assert!(path.iter().all(|cell| grid.is_navigable(*cell)));
            }
        }
    }
}
