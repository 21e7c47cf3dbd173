//! Fixed-rate tick loop for one session.
//!
//! # Tick order
//!
//! 1. Strategic movement, reinforcements and new encounters
//! 2. Combat in every active encounter
//! 3. Conclusion checks
//! 4. Retreat exits
//! 5. Resource regeneration, on its own coarser interval
//! 6. Timed commands that have come due
//!
//! Each step is isolated per entity: a failure is logged at `warn`, listed
//! in the [`TickReport`] and the rest of the tick carries on.
//!
//! Simulated time advances by exactly one period per tick, whatever the
//! wall clock does, so a session replays identically from its seed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use armada_core::combat::AttackKind;
use armada_core::commands::{CommandId, CommandKind, TimedCommandQueue};
use armada_core::components::{FleetId, SessionId, SimTime};
use armada_core::error::Result;
use armada_core::events::EngineEvent;
use armada_core::math::{Fixed, Vec2Fixed};
use armada_core::movement::MoveOrder;
use armada_core::pathfinding::GridCell;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::config::{RegenerationRules, ServerConfig};
use crate::engine::{EntityFailure, EntityRef, FleetEngine, UpdateReport};

/// Capacity of each session's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Simulated time at the end of the tick.
    pub now: SimTime,
    /// Wall-clock time spent processing.
    pub elapsed_ms: u64,
    /// Events emitted, in step order.
    pub events: Vec<EngineEvent>,
    /// Entities skipped this tick.
    pub failures: Vec<EntityFailure>,
}

impl TickReport {
    fn absorb(&mut self, step: Result<UpdateReport>, entity: EntityRef) {
        match step {
            Ok(report) => {
                self.events.extend(report.events);
                self.failures.extend(report.failures);
            }
            Err(error) => self.failures.push(EntityFailure { entity, error }),
        }
    }
}

/// Single authority over one session's entities.
#[derive(Debug)]
pub struct SessionScheduler {
    session: SessionId,
    engine: FleetEngine,
    period_ms: u64,
    regeneration_interval_ms: u64,
    regeneration: RegenerationRules,
    rng: ChaCha8Rng,
    tick: u64,
    now: SimTime,
    last_regeneration: SimTime,
    commands: TimedCommandQueue,
    events: broadcast::Sender<EngineEvent>,
}

impl SessionScheduler {
    /// Create a scheduler at tick 0.
    ///
    /// The RNG is seeded from `config.rng_seed` and the session id.
    #[must_use]
    pub fn new(session: SessionId, engine: FleetEngine, config: &ServerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session,
            engine,
            period_ms: config.tick_period_ms(),
            regeneration_interval_ms: config.regeneration_interval_ms(),
            regeneration: config.regeneration,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed ^ session.rotate_left(32)),
            tick: 0,
            now: 0,
            last_regeneration: 0,
            commands: TimedCommandQueue::new(),
            events,
        }
    }

    /// Session this scheduler runs.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Ticks completed.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Current simulated time in milliseconds.
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Tick period in milliseconds.
    #[must_use]
    pub const fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Engine the scheduler drives.
    #[must_use]
    pub fn engine(&self) -> &FleetEngine {
        &self.engine
    }

    /// Receive every event this session emits from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Pending timed commands.
    #[must_use]
    pub fn pending_commands(&self) -> &TimedCommandQueue {
        &self.commands
    }

    // ------------------------------------------------------------------
    // Commands that need the session clock or RNG
    // ------------------------------------------------------------------

    /// Plan a strategic move using the session RNG for warp variance.
    pub async fn set_fleet_destination(
        &mut self,
        fleet: FleetId,
        destination: GridCell,
    ) -> Result<MoveOrder> {
        self.engine
            .set_fleet_destination(self.session, fleet, destination, &mut self.rng)
            .await
    }

    /// Redirect a fleet on its tactical plane.
    pub async fn move_fleet_tactical(&self, fleet: FleetId, target: Vec2Fixed) -> Result<()> {
        self.engine
            .move_fleet_tactical(self.session, fleet, target, self.now)
            .await
    }

    /// Order a fleet out of its encounter.
    pub async fn order_retreat(&self, fleet: FleetId) -> Result<()> {
        self.engine.order_retreat(self.session, fleet, self.now).await
    }

    /// Fire a discrete attack and publish its events.
    pub async fn issue_attack(
        &self,
        attacker: FleetId,
        target: FleetId,
        kind: AttackKind,
    ) -> Result<Vec<EngineEvent>> {
        let report = self
            .engine
            .issue_attack(self.session, attacker, target, kind, self.now)
            .await?;
        for failure in &report.failures {
            tracing::warn!(session = self.session, entity = %failure.entity, error = %failure.error, "Attack write failed");
        }
        self.publish(&report.events);
        Ok(report.events)
    }

    /// Queue a command to complete `delay_ms` from now.
    pub fn schedule_command(&mut self, fleet: FleetId, kind: CommandKind, delay_ms: u64) -> CommandId {
        let completes_at = self.now.saturating_add(delay_ms);
        let id = self.commands.schedule(self.session, fleet, kind, completes_at);
        tracing::debug!(session = self.session, fleet, command = id, completes_at, "Command scheduled");
        id
    }

    /// Cancel a pending command. Returns `false` if it was not pending.
    pub fn cancel_command(&mut self, id: CommandId) -> bool {
        self.commands.cancel(id).is_some()
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run exactly one tick.
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        self.tick += 1;
        self.now += self.period_ms;
        let session = self.session;
        let now = self.now;
        let dt = Fixed::from_num(self.period_ms) / Fixed::from_num(1000);

        let mut report = TickReport {
            tick: self.tick,
            now,
            ..TickReport::default()
        };

        // 1. Strategic movement, reinforcements, new encounters
        let movement = self
            .engine
            .update_all_moving_fleets(session, dt, now, &mut self.rng)
            .await;
        report.absorb(movement, EntityRef::Session(session));

        let encounters = match self.engine.active_encounter_ids(session).await {
            Ok(ids) => ids,
            Err(error) => {
                report.failures.push(EntityFailure {
                    entity: EntityRef::Session(session),
                    error,
                });
                Vec::new()
            }
        };

        // 2. Combat
        for id in &encounters {
            let step = self.engine.update_combat(session, *id, dt, now).await;
            report.absorb(step, EntityRef::Encounter(*id));
        }

        // 3. Conclusion
        for id in &encounters {
            let step = self.engine.check_conclusion(session, *id, now).await;
            report.absorb(step, EntityRef::Encounter(*id));
        }

        // 4. Retreats
        for id in &encounters {
            let step = self.engine.retreat_progress(session, *id, now).await;
            report.absorb(step, EntityRef::Encounter(*id));
        }

        // 5. Regeneration
        if now - self.last_regeneration >= self.regeneration_interval_ms {
            self.last_regeneration = now;
            let step = self.engine.regenerate(session, &self.regeneration).await;
            report.absorb(step, EntityRef::Session(session));
        }

        // 6. Timed commands
        for command in self.commands.drain_due(now) {
            match self.engine.apply_timed_command(&command, &mut self.rng).await {
                Ok(event) => report.events.push(event),
                Err(error) => report.failures.push(EntityFailure {
                    entity: EntityRef::Command(command.id),
                    error,
                }),
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;

        for failure in &report.failures {
            tracing::warn!(
                session,
                tick = report.tick,
                entity = %failure.entity,
                error = %failure.error,
                "Entity skipped this tick"
            );
        }
        tracing::trace!(
            session,
            tick = report.tick,
            events = report.events.len(),
            elapsed_ms = report.elapsed_ms,
            "Tick complete"
        );

        self.publish(&report.events);
        report
    }

    fn publish(&self, events: &[EngineEvent]) {
        // No subscribers is not an error.
        for event in events {
            let _ = self.events.send(event.clone());
        }
    }
}

/// Drive `scheduler` on a `tokio` interval until `stop` flips to `true`
/// or its sender is dropped.
pub async fn run_loop(
    scheduler: Arc<Mutex<SessionScheduler>>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let session = scheduler.lock().await.session();
    tracing::info!(session, period_ms = period.as_millis() as u64, "Session loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = scheduler.lock().await.tick().await;
                if report.tick % 300 == 0 {
                    tracing::debug!(session, tick = report.tick, now = report.now, "Session heartbeat");
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(session, "Session loop stopped");
}
