//! Combat resolution between fleets.
//!
//! Two models share the same strength inputs:
//!
//! - **Continuous** (tactical, per tick):
//!   `max(0, attack − defense) × dt × formation bonus`, where
//!   `attack = strength × attack coefficient × morale%` and
//!   `defense = strength × defense coefficient`.
//! - **Discrete** (attack commands):
//!   `strength × weapon coefficient × morale% × formation bonus`.
//!
//! Damage is counted in health points; one ship at full health absorbs
//! [`FULL_HEALTH`](crate::components::FULL_HEALTH) points.

use serde::{Deserialize, Serialize};

use crate::components::{Fleet, Formation, Position};
use crate::math::{narrow, percent, Fixed, WideFixed};
use crate::rules::EngineRules;

/// Which damage model is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombatMode {
    /// Per-tick attrition inside an encounter.
    Continuous,
    /// One-shot attack commands.
    Discrete,
}

/// Kind of discrete attack command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttackKind {
    /// Standard volley.
    #[default]
    Ordinary,
    /// Concentrated fire; heavier, costs supplies.
    Concentrated,
}

/// Attacker output multiplier for its formation, in percent.
#[must_use]
pub const fn formation_bonus_pct(formation: Formation, mode: CombatMode) -> u32 {
    match (formation, mode) {
        (Formation::Standard, _) => 100,
        (Formation::Offensive, CombatMode::Continuous) => 120,
        (Formation::Offensive, CombatMode::Discrete) => 150,
        (Formation::Defensive, CombatMode::Continuous) => 80,
        (Formation::Defensive, CombatMode::Discrete) | (Formation::Retreat, _) => 50,
        (Formation::Encircle, CombatMode::Continuous) => 110,
        (Formation::Encircle, CombatMode::Discrete) => 120,
    }
}

/// Damage received multiplier for the defender's formation, in percent.
#[must_use]
pub const fn damage_taken_pct(formation: Formation, mode: CombatMode) -> u32 {
    match (formation, mode) {
        (Formation::Defensive, CombatMode::Continuous) => 80,
        _ => 100,
    }
}

/// Multiplier on the attacker's output for its formation.
#[must_use]
pub fn formation_bonus(formation: Formation, mode: CombatMode) -> Fixed {
    percent(formation_bonus_pct(formation, mode))
}

/// Result of a range-gated attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangedOutcome {
    /// Attack landed for `damage` health points.
    Hit {
        /// Damage dealt.
        damage: u32,
    },
    /// Target beyond the attacker's range; nothing happened.
    OutOfRange {
        /// Separation, saturated for fleets on different maps.
        distance: u32,
        /// Attacker range in the applicable units.
        range: u32,
    },
}

/// Separation and applicable range between two fleets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Engagement {
    /// Euclidean distance.
    pub distance: Fixed,
    /// Attacker's range for this mode.
    pub range: Fixed,
}

impl Engagement {
    /// Whether the defender is within range.
    #[must_use]
    pub fn in_range(&self) -> bool {
        self.distance <= self.range
    }
}

/// Stateless damage calculator.
#[derive(Debug, Clone, Copy)]
pub struct CombatResolver<'a> {
    rules: &'a EngineRules,
}

impl<'a> CombatResolver<'a> {
    /// Create a resolver over a rule set.
    #[must_use]
    pub const fn new(rules: &'a EngineRules) -> Self {
        Self { rules }
    }

    /// Effective attack power in the continuous model.
    #[must_use]
    pub fn attack_power(&self, attacker: &Fleet) -> Fixed {
        // Multiply before dividing so whole-number inputs stay exact.
        narrow(
            WideFixed::from_num(attacker.total_strength())
                * WideFixed::from_num(self.rules.attack_coefficient_pct)
                * WideFixed::from_num(attacker.morale)
                / WideFixed::from_num(10_000),
        )
    }

    /// Effective defense power in the continuous model.
    #[must_use]
    pub fn defense_power(&self, defender: &Fleet) -> Fixed {
        narrow(
            WideFixed::from_num(defender.total_strength())
                * WideFixed::from_num(self.rules.defense_coefficient_pct)
                / WideFixed::from_num(100),
        )
    }

    /// Distance and range between two fleets.
    ///
    /// On a tactical plane the attacker's own `combat_range` applies; on
    /// the strategic grid the rule set's range in cells does. Returns
    /// `None` when the fleets are not on the same map.
    #[must_use]
    pub fn engagement(&self, attacker: &Fleet, defender: &Fleet) -> Option<Engagement> {
        match (&attacker.position, &defender.position) {
            (Position::Tactical(a), Position::Tactical(d)) if a.encounter == d.encounter => {
                Some(Engagement {
                    distance: a.point.distance(d.point),
                    range: attacker.combat_range,
                })
            }
            (Position::Strategic(a), Position::Strategic(d)) => Some(Engagement {
                distance: a.distance(*d),
                range: self.rules.strategic_range(),
            }),
            _ => None,
        }
    }

    /// Raw continuous damage for `dt` seconds, ignoring range.
    ///
    /// Never negative. Includes the defender's formation reduction.
    #[must_use]
    pub fn tick_damage(&self, attacker: &Fleet, defender: &Fleet, dt: Fixed) -> Fixed {
        let net = self
            .attack_power(attacker)
            .saturating_sub(self.defense_power(defender))
            .max(Fixed::ZERO);
        let bonus = formation_bonus_pct(attacker.formation, CombatMode::Continuous)
            * damage_taken_pct(defender.formation, CombatMode::Continuous);
        narrow(
            WideFixed::from_num(net) * WideFixed::from_num(dt) * WideFixed::from_num(bonus)
                / WideFixed::from_num(10_000),
        )
    }

    /// Continuous damage for one tick, floored; zero when out of range.
    #[must_use]
    pub fn resolve_tick(&self, attacker: &Fleet, defender: &Fleet, dt: Fixed) -> u32 {
        match self.engagement(attacker, defender) {
            Some(engagement) if engagement.in_range() => {
                self.tick_damage(attacker, defender, dt).saturating_to_num::<u32>()
            }
            _ => 0,
        }
    }

    /// Weapon coefficient for a discrete attack, in percent.
    #[must_use]
    pub const fn weapon_pct(&self, kind: AttackKind) -> u32 {
        match kind {
            AttackKind::Ordinary => self.rules.ordinary_weapon_pct,
            AttackKind::Concentrated => self.rules.concentrated_weapon_pct,
        }
    }

    /// Damage of a discrete attack, ignoring range.
    #[must_use]
    pub fn discrete_damage(&self, attacker: &Fleet, kind: AttackKind) -> u32 {
        let damage = WideFixed::from_num(attacker.total_strength())
            * WideFixed::from_num(self.weapon_pct(kind))
            * WideFixed::from_num(attacker.morale)
            * WideFixed::from_num(formation_bonus_pct(attacker.formation, CombatMode::Discrete))
            / WideFixed::from_num(1_000_000);
        damage.saturating_to_num::<u32>()
    }

    /// Range-gated discrete attack. Has no effect on either fleet.
    #[must_use]
    pub fn resolve_ranged_attack(
        &self,
        attacker: &Fleet,
        defender: &Fleet,
        kind: AttackKind,
    ) -> RangedOutcome {
        match self.engagement(attacker, defender) {
            Some(engagement) if engagement.in_range() => RangedOutcome::Hit {
                damage: self.discrete_damage(attacker, kind),
            },
            Some(engagement) => RangedOutcome::OutOfRange {
                distance: engagement.distance.saturating_to_num::<u32>(),
                range: engagement.range.saturating_to_num::<u32>(),
            },
            None => RangedOutcome::OutOfRange {
                distance: u32::MAX,
                range: attacker.combat_range.saturating_to_num::<u32>(),
            },
        }
    }
}

/// What a damage application did to a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DamageReport {
    /// Health points absorbed (at most the damage dealt).
    pub absorbed: u32,
    /// Ships in groups that were wiped out.
    pub ships_lost: u32,
    /// Number of groups wiped out.
    pub groups_destroyed: u32,
}

/// Apply `damage` health points to a fleet's groups, front line first.
///
/// Each group absorbs up to `count × health`; the absorbed amount lowers
/// per-ship health by `absorbed / count`. Groups left without health are
/// removed and cost the fleet `morale_loss_per_group` morale each.
pub fn apply_damage(fleet: &mut Fleet, damage: u32, morale_loss_per_group: u8) -> DamageReport {
    let mut report = DamageReport::default();
    let mut remaining = WideFixed::from_num(damage);

    for group in &mut fleet.groups {
        if remaining <= WideFixed::ZERO {
            break;
        }
        if group.is_destroyed() {
            continue;
        }
        let pool = WideFixed::from_num(group.count) * WideFixed::from_num(group.health);
        if remaining >= pool {
            remaining -= pool;
            group.health = Fixed::ZERO;
        } else {
            group.health -= narrow(remaining / WideFixed::from_num(group.count));
            remaining = WideFixed::ZERO;
        }
    }

    report.absorbed = (WideFixed::from_num(damage) - remaining).saturating_to_num::<u32>();

    fleet.groups.retain(|group| {
        if group.is_destroyed() {
            report.ships_lost = report.ships_lost.saturating_add(group.count);
            report.groups_destroyed += 1;
            false
        } else {
            true
        }
    });

    if report.groups_destroyed > 0 {
        let loss = u32::from(morale_loss_per_group) * report.groups_destroyed;
        let loss = u8::try_from(loss).unwrap_or(u8::MAX);
        fleet.morale = fleet.morale.saturating_sub(loss);
    }

    report
}
