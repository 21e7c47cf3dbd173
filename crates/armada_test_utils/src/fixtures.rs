//! Test fixtures and helpers.
//!
//! Pre-built grids, fleets and RNGs for consistent testing.

use std::sync::Arc;

use armada_core::components::{Fleet, FleetId, SessionId, ShipGroup, ShipType};
use armada_core::factions::Faction;
use armada_core::pathfinding::{CellType, GridCell, NavGrid};
use armada_core::terrain::SectorTerrain;
use fixed::types::I32F32;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Build a grid from ASCII art: `#` is impassable, anything else is open.
///
/// Leading and trailing blank lines are ignored and each row is trimmed,
/// so grids can be written as indented raw strings.
///
/// # Panics
///
/// Panics if the rows have different widths or the art is empty.
#[must_use]
pub fn grid_from_ascii(art: &str) -> NavGrid {
    let rows: Vec<&str> = art
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    assert!(!rows.is_empty(), "grid art is empty");

    let width = rows[0].chars().count();
    let mut grid = NavGrid::new(width as u32, rows.len() as u32);
    for (y, row) in rows.iter().enumerate() {
        assert_eq!(row.chars().count(), width, "row {y} has the wrong width");
        for (x, ch) in row.chars().enumerate() {
            if ch == '#' {
                grid.set_cell(GridCell::new(x as i32, y as i32), CellType::Impassable);
            }
        }
    }
    grid
}

/// Terrain with no features over `grid`.
#[must_use]
pub fn open_terrain(grid: &NavGrid) -> SectorTerrain {
    SectorTerrain::new(Arc::new(grid.clone()))
}

/// Idle fleet of battleships on `cell` (strength `10 × count`).
#[must_use]
pub fn battleship_fleet(id: FleetId, faction: Faction, cell: GridCell, count: u32) -> Fleet {
    Fleet::new(id, 1, faction, cell).with_group(ShipGroup::new(ShipType::Battleship, count))
}

/// Idle mixed fleet on `cell`: a battle line screened by destroyers.
#[must_use]
pub fn line_fleet(id: FleetId, session: SessionId, faction: Faction, cell: GridCell) -> Fleet {
    Fleet::new(id, session, faction, cell)
        .with_group(ShipGroup::new(ShipType::Destroyer, 20))
        .with_group(ShipGroup::new(ShipType::Cruiser, 10))
        .with_group(ShipGroup::new(ShipType::Battleship, 5))
}

/// Deterministic RNG for tests.
#[must_use]
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}
