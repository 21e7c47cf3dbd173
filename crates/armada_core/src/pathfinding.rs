//! Strategic navigation grid and A* pathfinding.
//!
//! The grid is a fixed matrix of navigability flags loaded once per
//! scenario and shared read-only by every session. Paths use
//! 4-directional adjacency with a Manhattan heuristic, so every returned
//! path is a shortest path in step count.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::{Fixed, Vec2Fixed};

/// Default strategic grid width in cells.
pub const DEFAULT_GRID_WIDTH: u32 = 100;

/// Default strategic grid height in cells.
pub const DEFAULT_GRID_HEIGHT: u32 = 50;

/// Integer coordinates of a strategic grid cell.
///
/// Signed so that offsets (warp variance, neighbour probing) can step
/// outside the grid before being bounds-checked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct GridCell {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl GridCell {
    /// Create a new cell reference.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset this cell by `(dx, dy)`.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    /// Manhattan distance in steps.
    #[must_use]
    pub const fn manhattan(self, other: Self) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Centre of this cell in continuous strategic coordinates.
    #[must_use]
    pub fn to_point(self) -> Vec2Fixed {
        Vec2Fixed::from_ints(self.x, self.y)
    }

    /// Nearest cell to a continuous strategic point.
    #[must_use]
    pub fn from_point(point: Vec2Fixed) -> Self {
        Self::new(
            point.x.round().to_num::<i32>(),
            point.y.round().to_num::<i32>(),
        )
    }
}

/// Cell types for the navigation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellType {
    /// Open space a fleet can cross.
    #[default]
    Navigable,
    /// Cannot be entered.
    Impassable,
}

impl CellType {
    /// Decode a navigability flag (`0` = impassable, anything else = navigable).
    #[must_use]
    pub const fn from_flag(flag: u8) -> Self {
        if flag == 0 {
            Self::Impassable
        } else {
            Self::Navigable
        }
    }

    /// Returns true if a fleet can enter this cell.
    #[must_use]
    pub const fn is_navigable(self) -> bool {
        matches!(self, Self::Navigable)
    }
}

/// Precomputed cell counts for a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridStats {
    /// Total number of cells.
    pub total_cells: u32,
    /// Cells a fleet can enter.
    pub navigable_cells: u32,
    /// Cells a fleet cannot enter.
    pub impassable_cells: u32,
}

impl GridStats {
    /// Fraction of navigable cells.
    #[must_use]
    pub fn navigable_ratio(&self) -> Fixed {
        if self.total_cells == 0 {
            return Fixed::ZERO;
        }
        Fixed::from_num(self.navigable_cells) / Fixed::from_num(self.total_cells)
    }
}

/// Navigation grid for strategic pathfinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavGrid {
    /// Grid width in cells.
    width: u32,
    /// Grid height in cells.
    height: u32,
    /// Cell data stored in row-major order.
    cells: Vec<CellType>,
    /// Cached counts, kept in step with `cells`.
    stats: GridStats,
}

impl NavGrid {
    /// Create a new navigation grid with all cells navigable.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0, "NavGrid width must be positive");
        assert!(height > 0, "NavGrid height must be positive");

        let cell_count = width * height;
        Self {
            width,
            height,
            cells: vec![CellType::Navigable; cell_count as usize],
            stats: GridStats {
                total_cells: cell_count,
                navigable_cells: cell_count,
                impassable_cells: 0,
            },
        }
    }

    /// Build a grid from a row-major matrix of navigability flags.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidGrid`] if a dimension is zero or the
    /// flag count does not equal `width * height`.
    pub fn from_flags(width: u32, height: u32, flags: &[u8]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidGrid(format!(
                "dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = (width as usize) * (height as usize);
        if flags.len() != expected {
            return Err(EngineError::InvalidGrid(format!(
                "expected {expected} flags for {width}x{height}, got {}",
                flags.len()
            )));
        }

        let cells: Vec<CellType> = flags.iter().copied().map(CellType::from_flag).collect();
        let stats = Self::compute_stats(&cells);
        Ok(Self {
            width,
            height,
            cells,
            stats,
        })
    }

    fn compute_stats(cells: &[CellType]) -> GridStats {
        let navigable = cells.iter().filter(|c| c.is_navigable()).count() as u32;
        let total = cells.len() as u32;
        GridStats {
            total_cells: total,
            navigable_cells: navigable,
            impassable_cells: total - navigable,
        }
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Precomputed cell counts.
    #[must_use]
    pub const fn stats(&self) -> GridStats {
        self.stats
    }

    #[inline]
    fn index(&self, cell: GridCell) -> usize {
        (cell.y as usize) * (self.width as usize) + (cell.x as usize)
    }

    #[inline]
    fn cell_at(&self, index: usize) -> GridCell {
        let width = self.width as usize;
        GridCell::new((index % width) as i32, (index / width) as i32)
    }

    /// Check if a cell is within grid bounds.
    #[must_use]
    pub fn in_bounds(&self, cell: GridCell) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as u32) < self.width && (cell.y as u32) < self.height
    }

    /// Get cell type at coordinates.
    /// Returns `None` if out of bounds.
    #[must_use]
    pub fn get_cell(&self, cell: GridCell) -> Option<CellType> {
        if self.in_bounds(cell) {
            Some(self.cells[self.index(cell)])
        } else {
            None
        }
    }

    /// Set cell type at coordinates, keeping the stats current.
    /// Returns `false` if out of bounds.
    pub fn set_cell(&mut self, cell: GridCell, cell_type: CellType) -> bool {
        if !self.in_bounds(cell) {
            return false;
        }
        let index = self.index(cell);
        let previous = self.cells[index];
        self.cells[index] = cell_type;
        match (previous.is_navigable(), cell_type.is_navigable()) {
            (true, false) => {
                self.stats.navigable_cells -= 1;
                self.stats.impassable_cells += 1;
            }
            (false, true) => {
                self.stats.navigable_cells += 1;
                self.stats.impassable_cells -= 1;
            }
            _ => {}
        }
        true
    }

    /// Check if a cell is in bounds and navigable.
    #[must_use]
    pub fn is_navigable(&self, cell: GridCell) -> bool {
        self.get_cell(cell).is_some_and(CellType::is_navigable)
    }
}

impl Default for NavGrid {
    /// Create a default NavGrid (100x50 cells, all navigable).
    fn default() -> Self {
        Self::new(DEFAULT_GRID_WIDTH, DEFAULT_GRID_HEIGHT)
    }
}

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    cell: GridCell,
    /// Path cost from start.
    g: u32,
    /// Heuristic estimate to goal.
    h: u32,
}

impl AStarNode {
    const fn f(&self) -> u32 {
        self.g + self.h
    }
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse every comparison so the lowest
        // f, then the lowest h, then the lowest (y, x) pops first.
        other
            .f()
            .cmp(&self.f())
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.cell.y.cmp(&self.cell.y))
            .then_with(|| other.cell.x.cmp(&self.cell.x))
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Direction offsets for 4-directional movement.
const DIRECTIONS: [(i32, i32); 4] = [
    (1, 0),  // East
    (0, 1),  // South
    (-1, 0), // West
    (0, -1), // North
];

/// Find a shortest 4-directional path from `start` to `goal`.
///
/// The returned path includes both endpoints, so a path of `n` cells is
/// `n - 1` steps long. Any node whose cost-so-far plus remaining
/// Manhattan distance exceeds `max_distance` is pruned, which bounds the
/// search on large grids without losing optimality.
///
/// Returns `None` when either endpoint is out of bounds or impassable, or
/// when no path of at most `max_distance` steps exists.
#[must_use]
pub fn find_path(
    grid: &NavGrid,
    start: GridCell,
    goal: GridCell,
    max_distance: u32,
) -> Option<Vec<GridCell>> {
    if !grid.is_navigable(start) || !grid.is_navigable(goal) {
        return None;
    }

    if start == goal {
        return Some(vec![start]);
    }

    if start.manhattan(goal) > max_distance {
        return None;
    }

    let cell_count = grid.cells.len();
    let mut g_score = vec![u32::MAX; cell_count];
    let mut came_from: Vec<Option<usize>> = vec![None; cell_count];
    let mut open_set = BinaryHeap::new();

    g_score[grid.index(start)] = 0;
    open_set.push(AStarNode {
        cell: start,
        g: 0,
        h: start.manhattan(goal),
    });

    while let Some(current) = open_set.pop() {
        let current_index = grid.index(current.cell);

        // Stale entry superseded by a cheaper route.
        if current.g > g_score[current_index] {
            continue;
        }

        if current.cell == goal {
            return Some(reconstruct_path(grid, &came_from, current_index));
        }

        for &(dx, dy) in &DIRECTIONS {
            let neighbor = current.cell.offset(dx, dy);
            if !grid.is_navigable(neighbor) {
                continue;
            }

            let tentative_g = current.g + 1;
            let h = neighbor.manhattan(goal);
            if tentative_g + h > max_distance {
                continue;
            }

            let neighbor_index = grid.index(neighbor);
            if tentative_g < g_score[neighbor_index] {
                g_score[neighbor_index] = tentative_g;
                came_from[neighbor_index] = Some(current_index);
                open_set.push(AStarNode {
                    cell: neighbor,
                    g: tentative_g,
                    h,
                });
            }
        }
    }

    tracing::trace!(?start, ?goal, max_distance, "no path within distance bound");
    None
}

/// Walk `came_from` back from the goal and return the path start-first.
fn reconstruct_path(grid: &NavGrid, came_from: &[Option<usize>], goal_index: usize) -> Vec<GridCell> {
    let mut path = vec![grid.cell_at(goal_index)];
    let mut current = goal_index;

    while let Some(prev) = came_from[current] {
        path.push(grid.cell_at(prev));
        current = prev;
    }

    path.reverse();
    path
}
