//! Terrain assessment for strategic moves.
//!
//! Hazardous terrain makes long-range jumps imprecise (warp variance).
//! The movement controller asks a [`TerrainAssessor`] about a cell before
//! routing to it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pathfinding::{GridCell, NavGrid};

/// Kind of terrain occupying a strategic cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TerrainKind {
    /// Empty space.
    #[default]
    OpenSpace,
    /// Dense gas cloud, mild sensor and drive interference.
    Nebula,
    /// Debris field.
    AsteroidField,
    /// Severe drive interference.
    IonStorm,
    /// Cannot be entered (corridor walls, stars, off-grid).
    Impassable,
}

impl TerrainKind {
    /// Hazard level a feature of this kind carries when none is given.
    #[must_use]
    pub const fn default_hazard(self) -> u8 {
        match self {
            Self::OpenSpace | Self::Impassable => 0,
            Self::Nebula => 1,
            Self::AsteroidField => 2,
            Self::IonStorm => 3,
        }
    }
}

/// What a fleet would face entering a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainReport {
    /// Assessed cell.
    pub cell: GridCell,
    /// Terrain kind.
    pub kind: TerrainKind,
    /// Maximum warp deviation per axis, in cells.
    pub hazard_level: u8,
    /// Whether a fleet can end a move here.
    pub passable: bool,
}

impl TerrainReport {
    /// Report for a cell that cannot be entered.
    #[must_use]
    pub const fn impassable(cell: GridCell) -> Self {
        Self {
            cell,
            kind: TerrainKind::Impassable,
            hazard_level: 0,
            passable: false,
        }
    }
}

/// Source of terrain information for the movement controller.
pub trait TerrainAssessor {
    /// Assess a single cell. Out-of-bounds cells are impassable.
    fn assess(&self, cell: GridCell) -> TerrainReport;
}

/// A terrain feature placed on a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainFeature {
    /// Feature kind.
    pub kind: TerrainKind,
    /// Hazard level (overrides the kind default).
    pub hazard_level: u8,
}

impl TerrainFeature {
    /// Feature with the kind's default hazard.
    #[must_use]
    pub const fn new(kind: TerrainKind) -> Self {
        Self {
            kind,
            hazard_level: kind.default_hazard(),
        }
    }
}

/// Terrain for one scenario: the shared navigation grid plus features.
#[derive(Debug, Clone)]
pub struct SectorTerrain {
    grid: Arc<NavGrid>,
    features: HashMap<GridCell, TerrainFeature>,
}

impl SectorTerrain {
    /// Terrain with no features over `grid`.
    #[must_use]
    pub fn new(grid: Arc<NavGrid>) -> Self {
        Self {
            grid,
            features: HashMap::new(),
        }
    }

    /// Place a feature on a cell, replacing any previous one.
    pub fn set_feature(&mut self, cell: GridCell, feature: TerrainFeature) {
        self.features.insert(cell, feature);
    }

    /// Builder form of [`set_feature`](Self::set_feature).
    #[must_use]
    pub fn with_feature(mut self, cell: GridCell, feature: TerrainFeature) -> Self {
        self.set_feature(cell, feature);
        self
    }

    /// The underlying navigation grid.
    #[must_use]
    pub fn grid(&self) -> &NavGrid {
        &self.grid
    }
}

impl TerrainAssessor for SectorTerrain {
    fn assess(&self, cell: GridCell) -> TerrainReport {
        if !self.grid.is_navigable(cell) {
            return TerrainReport::impassable(cell);
        }

        let feature = self
            .features
            .get(&cell)
            .copied()
            .unwrap_or(TerrainFeature::new(TerrainKind::OpenSpace));

        TerrainReport {
            cell,
            kind: feature.kind,
            hazard_level: feature.hazard_level,
            passable: feature.kind != TerrainKind::Impassable,
        }
    }
}
