//! Faction definitions and identifiers.

use serde::{Deserialize, Serialize};

/// The closed set of factions that can own fleets.
///
/// Ordered so per-faction maps (rosters, casualties) iterate the same way
/// in every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Faction {
    /// The Galactic Empire.
    Empire,
    /// The Free Planets Alliance.
    Alliance,
    /// The Phezzan Dominion - nominally neutral trade power.
    Phezzan,
}

impl Faction {
    /// Every faction.
    pub const ALL: [Faction; 3] = [Faction::Empire, Faction::Alliance, Faction::Phezzan];

    /// Get the display name for this faction.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Empire => "The Galactic Empire",
            Self::Alliance => "The Free Planets Alliance",
            Self::Phezzan => "The Phezzan Dominion",
        }
    }

    /// Get the short name for this faction.
    #[must_use]
    pub const fn short_name(&self) -> &'static str {
        match self {
            Self::Empire => "Empire",
            Self::Alliance => "Alliance",
            Self::Phezzan => "Phezzan",
        }
    }

    /// Whether two factions fight when they share a cell.
    #[must_use]
    pub fn is_hostile_to(self, other: Faction) -> bool {
        self != other
    }
}

impl std::fmt::Display for Faction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}
