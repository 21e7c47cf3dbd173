//! Tunable engine rules.
//!
//! Everything is stored as whole numbers (percentages, units, degrees) so
//! the struct reads naturally from a RON config file; accessors convert to
//! [`Fixed`] for the simulation.
//!
//! # Example RON
//!
//! ```ron
//! (
//!     tactical_plane_size: 10000,
//!     tactical_combat_range: 100,
//!     attack_coefficient_pct: 10,
//! )
//! ```

use serde::{Deserialize, Serialize};

use crate::math::{percent, Fixed};

/// Numeric rules shared by movement, combat and encounters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineRules {
    /// Side length of the square tactical plane, in tactical units.
    pub tactical_plane_size: u32,
    /// Default fleet combat range on the tactical plane.
    pub tactical_combat_range: u32,
    /// Combat range between fleets on the strategic grid, in cells.
    pub strategic_combat_range: u32,
    /// Distance below which a tactical move counts as arrived.
    pub arrival_threshold: u32,
    /// A* search bound, in steps.
    pub max_path_distance: u32,
    /// Attack coefficient for continuous combat (percent of strength).
    pub attack_coefficient_pct: u32,
    /// Defense coefficient for continuous combat (percent of strength).
    pub defense_coefficient_pct: u32,
    /// Weapon coefficient for an ordinary attack command.
    pub ordinary_weapon_pct: u32,
    /// Weapon coefficient for a concentrated fire command.
    pub concentrated_weapon_pct: u32,
    /// Supplies consumed by one concentrated fire command.
    pub concentrated_fire_supply_cost: u32,
    /// Fuel burned per strategic cell travelled.
    pub fuel_per_cell: u32,
    /// Morale lost each time one of the fleet's ship groups is wiped out.
    pub morale_loss_per_group: u8,
    /// Tactical turn rate, in degrees per second.
    pub turn_rate_deg_per_sec: u32,
    /// Heading changes above this many degrees make the fleet stop and turn.
    pub turn_threshold_deg: u32,
    /// Maximum random offset applied to deployment positions.
    pub deployment_jitter: u32,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            tactical_plane_size: 10_000,
            tactical_combat_range: 100,
            strategic_combat_range: 2,
            arrival_threshold: 10,
            max_path_distance: 200,
            attack_coefficient_pct: 10,
            defense_coefficient_pct: 5,
            ordinary_weapon_pct: 10,
            concentrated_weapon_pct: 15,
            concentrated_fire_supply_cost: 10,
            fuel_per_cell: 1,
            morale_loss_per_group: 5,
            turn_rate_deg_per_sec: 90,
            turn_threshold_deg: 90,
            deployment_jitter: 500,
        }
    }
}

impl EngineRules {
    /// Tactical plane side length.
    #[must_use]
    pub fn plane_size(&self) -> Fixed {
        Fixed::from_num(self.tactical_plane_size)
    }

    /// Tactical arrival threshold.
    #[must_use]
    pub fn arrival_threshold(&self) -> Fixed {
        Fixed::from_num(self.arrival_threshold)
    }

    /// Continuous attack coefficient.
    #[must_use]
    pub fn attack_coefficient(&self) -> Fixed {
        percent(self.attack_coefficient_pct)
    }

    /// Continuous defense coefficient.
    #[must_use]
    pub fn defense_coefficient(&self) -> Fixed {
        percent(self.defense_coefficient_pct)
    }

    /// Strategic combat range in cells.
    #[must_use]
    pub fn strategic_range(&self) -> Fixed {
        Fixed::from_num(self.strategic_combat_range)
    }

    /// Check that the rules describe a playable engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`](crate::error::EngineError::InvalidConfig)
    /// naming the first offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::EngineError;

        if self.tactical_plane_size == 0 {
            return Err(EngineError::InvalidConfig(
                "tactical_plane_size must be positive".into(),
            ));
        }
        if self.arrival_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "arrival_threshold must be positive".into(),
            ));
        }
        if self.turn_rate_deg_per_sec == 0 {
            return Err(EngineError::InvalidConfig(
                "turn_rate_deg_per_sec must be positive".into(),
            ));
        }
        if self.deployment_jitter * 4 > self.tactical_plane_size {
            return Err(EngineError::InvalidConfig(
                "deployment_jitter must not exceed a quarter of the plane".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let rules = EngineRules::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.plane_size(), Fixed::from_num(10_000));
        assert_eq!(
            rules.attack_coefficient(),
            Fixed::from_num(10) / Fixed::from_num(100)
        );
    }

    #[test]
    fn test_zero_plane_rejected() {
        let rules = EngineRules {
            tactical_plane_size: 0,
            ..EngineRules::default()
        };
        assert!(rules.validate().is_err());
    }
}
