//! Fleet movement on the strategic grid and on tactical planes.
//!
//! Both modes share one contract: given elapsed time, advance the fleet
//! along its [`MovementPlan`] and report whether it arrived.
//!
//! - **Strategic**: waypoints are cell centres from A*. The fleet covers
//!   `speed × dt` cells per tick, snapping onto a waypoint (and popping it)
//!   once it is within reach, so at most one waypoint is consumed per tick.
//! - **Tactical**: a unit velocity is integrated on the plane until the
//!   fleet is within the arrival threshold of its target. Sharp turns hold
//!   the fleet in place while it comes about.

use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::components::{Destination, Fleet, FleetStatus, MovementPlan, Position, SimTime};
use crate::error::{EngineError, Result};
use crate::math::{heading_delta, Fixed, Vec2Fixed};
use crate::pathfinding::{find_path, GridCell, NavGrid};
use crate::rules::EngineRules;
use crate::terrain::{TerrainAssessor, TerrainReport};

/// How a hazardous destination was perturbed before routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarpOutcome {
    /// Destination the commander asked for.
    pub requested: GridCell,
    /// Random per-axis offset that was drawn.
    pub offset: (i32, i32),
    /// Destination actually routed to.
    pub resolved: GridCell,
    /// Terrain at the requested destination.
    pub terrain: TerrainReport,
    /// True when the perturbed cell was unusable and the request was kept.
    pub fell_back: bool,
}

/// Accepted strategic move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOrder {
    /// Planned route, both endpoints included.
    pub path: Vec<GridCell>,
    /// Warp variance details when the destination was hazardous.
    pub warp: Option<WarpOutcome>,
}

/// Result of advancing a fleet on the strategic grid for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategicStep {
    /// Nothing to do.
    Idle,
    /// Moved toward the next waypoint without reaching it.
    Advanced,
    /// Reached an intermediate waypoint.
    ReachedWaypoint(GridCell),
    /// Reached the final waypoint; the plan is cleared.
    Arrived(GridCell),
}

/// Result of advancing a fleet on a tactical plane for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TacticalStep {
    /// No move order or not on a plane.
    Idle,
    /// Still coming about; position unchanged.
    Turning,
    /// Moved toward the target.
    Advanced(Vec2Fixed),
    /// Within the arrival threshold; velocity zeroed and plan cleared.
    Arrived(Vec2Fixed),
}

/// Edge of a tactical plane, used to leave an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneEdge {
    /// `x = 0`.
    West,
    /// `x = plane size`.
    East,
    /// `y = 0`.
    North,
    /// `y = plane size`.
    South,
}

impl PlaneEdge {
    /// Edge closest to `point`. Ties resolve West, East, North, South.
    #[must_use]
    pub fn nearest(point: Vec2Fixed, plane: Fixed) -> Self {
        let candidates = [
            (Self::West, point.x),
            (Self::East, plane - point.x),
            (Self::North, point.y),
            (Self::South, plane - point.y),
        ];
        let mut best = candidates[0];
        for candidate in &candidates[1..] {
            if candidate.1 < best.1 {
                best = *candidate;
            }
        }
        best.0
    }

    /// Projection of `point` onto this edge.
    #[must_use]
    pub fn boundary_point(self, point: Vec2Fixed, plane: Fixed) -> Vec2Fixed {
        match self {
            Self::West => Vec2Fixed::new(Fixed::ZERO, point.y),
            Self::East => Vec2Fixed::new(plane, point.y),
            Self::North => Vec2Fixed::new(point.x, Fixed::ZERO),
            Self::South => Vec2Fixed::new(point.x, plane),
        }
    }

    /// Distance from `point` to this edge.
    #[must_use]
    pub fn distance(self, point: Vec2Fixed, plane: Fixed) -> Fixed {
        match self {
            Self::West => point.x,
            Self::East => plane - point.x,
            Self::North => point.y,
            Self::South => plane - point.y,
        }
    }

    /// Strategic step in the direction of this edge.
    #[must_use]
    pub const fn cell_offset(self) -> (i32, i32) {
        match self {
            Self::West => (-1, 0),
            Self::East => (1, 0),
            Self::North => (0, -1),
            Self::South => (0, 1),
        }
    }
}

/// Distance from `point` to the nearest plane boundary.
#[must_use]
pub fn distance_to_boundary(point: Vec2Fixed, plane: Fixed) -> Fixed {
    PlaneEdge::nearest(point, plane).distance(point, plane)
}

/// Moves fleets for one session.
///
/// Borrowed per tick; holds no state of its own.
#[derive(Clone, Copy)]
pub struct MovementController<'a> {
    grid: &'a NavGrid,
    terrain: &'a dyn TerrainAssessor,
    rules: &'a EngineRules,
}

impl std::fmt::Debug for MovementController<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovementController")
            .field("grid", &(self.grid.width(), self.grid.height()))
            .field("rules", self.rules)
            .finish_non_exhaustive()
    }
}

impl<'a> MovementController<'a> {
    /// Create a controller over a grid, terrain and rule set.
    #[must_use]
    pub fn new(grid: &'a NavGrid, terrain: &'a dyn TerrainAssessor, rules: &'a EngineRules) -> Self {
        Self {
            grid,
            terrain,
            rules,
        }
    }

    /// Navigation grid.
    #[must_use]
    pub const fn grid(&self) -> &'a NavGrid {
        self.grid
    }

    /// Rule set.
    #[must_use]
    pub const fn rules(&self) -> &'a EngineRules {
        self.rules
    }

    // ------------------------------------------------------------------
    // Strategic
    // ------------------------------------------------------------------

    /// Plan a strategic move to `destination`.
    ///
    /// Hazardous terrain at the destination perturbs it by up to
    /// `±hazard_level` cells per axis. A perturbed cell that is off-grid,
    /// impassable or unreachable is discarded in favour of the request.
    ///
    /// On any error the fleet is left untouched.
    ///
    /// # Errors
    ///
    /// - [`EngineError::FleetDestroyed`] / [`EngineError::FleetInCombat`]
    /// - [`EngineError::OutOfBounds`] before any pathing is attempted
    /// - [`EngineError::ImpassableDestination`]
    /// - [`EngineError::Unreachable`] when A* finds no route in range
    /// - [`EngineError::InsufficientFuel`] when the route is too long
    pub fn set_destination<R: Rng + ?Sized>(
        &self,
        fleet: &mut Fleet,
        destination: GridCell,
        rng: &mut R,
    ) -> Result<MoveOrder> {
        if fleet.is_destroyed() {
            return Err(EngineError::FleetDestroyed(fleet.id));
        }
        if fleet.is_in_combat() {
            return Err(EngineError::FleetInCombat(fleet.id));
        }
        if !self.grid.in_bounds(destination) {
            return Err(EngineError::OutOfBounds(destination));
        }

        let report = self.terrain.assess(destination);
        if !report.passable {
            return Err(EngineError::ImpassableDestination(destination));
        }

        let start = fleet.cell();
        let max = self.rules.max_path_distance;

        let (path, warp) = if report.hazard_level > 0 {
            let hazard = i32::from(report.hazard_level);
            let offset = (
                rng.gen_range(-hazard..=hazard),
                rng.gen_range(-hazard..=hazard),
            );
            let candidate = destination.offset(offset.0, offset.1);
            let candidate_path = if self.grid.in_bounds(candidate)
                && self.terrain.assess(candidate).passable
            {
                find_path(self.grid, start, candidate, max)
            } else {
                None
            };

            let fell_back = candidate_path.is_none();
            let (resolved, path) = match candidate_path {
                Some(path) => (candidate, Some(path)),
                None => (destination, find_path(self.grid, start, destination, max)),
            };
            let warp = WarpOutcome {
                requested: destination,
                offset,
                resolved,
                terrain: report,
                fell_back,
            };
            tracing::debug!(
                fleet = fleet.id,
                ?destination,
                ?resolved,
                hazard = report.hazard_level,
                fell_back,
                "Warp variance applied"
            );
            (path, Some(warp))
        } else {
            (find_path(self.grid, start, destination, max), None)
        };

        let resolved = warp.map_or(destination, |w| w.resolved);
        let path = path.ok_or(EngineError::Unreachable {
            from: start,
            to: resolved,
        })?;

        // Waypoints exclude the start cell unless the fleet is mid-transit
        // and has to re-centre on it first.
        let mut waypoints: VecDeque<Vec2Fixed> = path.iter().skip(1).map(|c| c.to_point()).collect();
        if let Position::Strategic(point) = fleet.position {
            if point != start.to_point() {
                waypoints.push_front(start.to_point());
            }
        }

        let required = waypoints.len() as u32 * self.rules.fuel_per_cell;
        if required > fleet.fuel {
            return Err(EngineError::InsufficientFuel {
                required,
                available: fleet.fuel,
            });
        }

        if waypoints.is_empty() {
            fleet.plan = None;
            fleet.status = FleetStatus::Idle;
        } else {
            fleet.plan = Some(MovementPlan {
                destination: Destination::Cell(resolved),
                path: waypoints,
            });
            fleet.status = FleetStatus::Moving;
        }

        tracing::debug!(
            fleet = fleet.id,
            from = ?start,
            to = ?resolved,
            steps = path.len() - 1,
            "Strategic move planned"
        );

        Ok(MoveOrder { path, warp })
    }

    /// Advance a strategic fleet by `dt` seconds.
    pub fn advance_strategic(&self, fleet: &mut Fleet, dt: Fixed) -> StrategicStep {
        let Position::Strategic(point) = fleet.position else {
            return StrategicStep::Idle;
        };
        let Some(plan) = fleet.plan.as_mut() else {
            return StrategicStep::Idle;
        };
        let Some(waypoint) = plan.next_waypoint() else {
            fleet.plan = None;
            return StrategicStep::Idle;
        };

        let budget = fleet.strategic_speed * fleet.formation.speed_multiplier() * dt;
        let remaining = point.distance(waypoint);

        if remaining > budget {
            let t = budget / remaining;
            fleet.position = Position::Strategic(point.lerp(waypoint, t));
            return StrategicStep::Advanced;
        }

        // Snap exactly onto the waypoint and consume it.
        plan.path.pop_front();
        let finished = plan.path.is_empty();
        fleet.position = Position::Strategic(waypoint);
        fleet.fuel = fleet.fuel.saturating_sub(self.rules.fuel_per_cell);
        let cell = GridCell::from_point(waypoint);

        if finished {
            fleet.plan = None;
            fleet.status = FleetStatus::Idle;
            StrategicStep::Arrived(cell)
        } else {
            StrategicStep::ReachedWaypoint(cell)
        }
    }

    // ------------------------------------------------------------------
    // Tactical
    // ------------------------------------------------------------------

    /// Order a fleet on a tactical plane to `target`.
    ///
    /// The target is clamped into the plane. A heading change sharper than
    /// the turn threshold makes the fleet stop and turn first.
    ///
    /// # Errors
    ///
    /// [`EngineError::FleetDestroyed`], or [`EngineError::NotInEncounter`]
    /// if the fleet is on the strategic grid.
    pub fn set_tactical_destination(
        &self,
        fleet: &mut Fleet,
        target: Vec2Fixed,
        now: SimTime,
    ) -> Result<()> {
        if fleet.is_destroyed() {
            return Err(EngineError::FleetDestroyed(fleet.id));
        }
        let id = fleet.id;
        let target = target.clamp(Fixed::ZERO, self.rules.plane_size());
        let threshold = self.rules.arrival_threshold();
        let turn_threshold = Fixed::from_num(self.rules.turn_threshold_deg);
        let turn_rate = Fixed::from_num(self.rules.turn_rate_deg_per_sec);

        let state = fleet.tactical_mut().ok_or(EngineError::NotInEncounter(id))?;
        let offset = target - state.point;

        if offset.length() < threshold {
            state.velocity = Vec2Fixed::ZERO;
            fleet.plan = None;
            return Ok(());
        }

        let heading = offset.heading_degrees();
        let delta = heading_delta(state.heading, heading);
        state.heading = heading;
        state.velocity = offset.normalize();

        if delta > turn_threshold {
            let duration_ms = (delta * Fixed::from_num(1000) / turn_rate).to_num::<u64>();
            fleet.transient.is_turning = true;
            fleet.transient.turn_started_at = now;
            fleet.transient.turn_duration_ms = duration_ms;
        } else {
            fleet.transient.is_turning = false;
        }

        fleet.plan = Some(MovementPlan {
            destination: Destination::Point(target),
            path: VecDeque::from([target]),
        });
        Ok(())
    }

    /// Advance a tactical fleet by `dt` seconds at simulated time `now`.
    pub fn advance_tactical(&self, fleet: &mut Fleet, dt: Fixed, now: SimTime) -> TacticalStep {
        let speed = fleet.tactical_speed * fleet.formation.speed_multiplier();
        let threshold = self.rules.arrival_threshold();
        let plane = self.rules.plane_size();

        let Some(target) = fleet.plan.as_ref().and_then(MovementPlan::next_waypoint) else {
            return TacticalStep::Idle;
        };
        if fleet.tactical().is_none() {
            return TacticalStep::Idle;
        }

        if fleet.transient.is_turning {
            let done_at = fleet.transient.turn_started_at + fleet.transient.turn_duration_ms;
            if now < done_at {
                return TacticalStep::Turning;
            }
            fleet.transient.is_turning = false;
        }

        let Some(state) = fleet.tactical_mut() else {
            return TacticalStep::Idle;
        };
        let step = speed * dt;
        let remaining = state.point.distance(target);

        state.point = if remaining <= step {
            target
        } else {
            (state.point + state.velocity.scale(step)).clamp(Fixed::ZERO, plane)
        };
        let point = state.point;

        if point.distance(target) < threshold {
            state.velocity = Vec2Fixed::ZERO;
            fleet.plan = None;
            TacticalStep::Arrived(point)
        } else {
            TacticalStep::Advanced(point)
        }
    }

    /// Strategic cell a fleet lands on after leaving a plane by `edge`.
    ///
    /// The neighbour of `origin` in the direction of the edge, or `origin`
    /// itself if that neighbour cannot be entered.
    #[must_use]
    pub fn retreat_cell(&self, origin: GridCell, edge: PlaneEdge) -> GridCell {
        let (dx, dy) = edge.cell_offset();
        let neighbour = origin.offset(dx, dy);
        if self.grid.is_navigable(neighbour) && self.terrain.assess(neighbour).passable {
            neighbour
        } else {
            origin
        }
    }
}
