//! Running sessions.
//!
//! Each session gets its own [`SessionScheduler`] behind a mutex and, once
//! started, its own `tokio` task. Starting or stopping twice is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use armada_core::components::SessionId;
use armada_core::error::Result;
use armada_core::events::EngineEvent;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::engine::FleetEngine;
use crate::scheduler::{run_loop, SessionScheduler};

/// Point-in-time view of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    /// Session id.
    pub session: SessionId,
    /// Whether the tick loop is running.
    pub running: bool,
    /// Ticks completed.
    pub tick: u64,
    /// Configured tick rate.
    pub tick_rate_hz: u32,
    /// Encounters currently active.
    pub active_encounters: usize,
}

struct SessionEntry {
    scheduler: Arc<Mutex<SessionScheduler>>,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

/// Owns every session's scheduler and loop task.
pub struct SessionRegistry {
    engine: FleetEngine,
    config: ServerConfig,
    sessions: Mutex<BTreeMap<SessionId, SessionEntry>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("engine", &self.engine)
            .field("tick_rate_hz", &self.config.tick_rate_hz)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(engine: FleetEngine, config: ServerConfig) -> Self {
        Self {
            engine,
            config,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Shared engine.
    #[must_use]
    pub fn engine(&self) -> &FleetEngine {
        &self.engine
    }

    /// Scheduler for `session`, created on first use without starting it.
    pub async fn scheduler(&self, session: SessionId) -> Arc<Mutex<SessionScheduler>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(&self.entry(&mut sessions, session).scheduler)
    }

    /// Start the session's tick loop. Returns `false` if it was already running.
    pub async fn start(&self, session: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let period = Duration::from_millis(self.config.tick_period_ms());
        let entry = self.entry(&mut sessions, session);
        if entry.running.is_some() {
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(Arc::clone(&entry.scheduler), period, stop_rx));
        entry.running = Some((stop_tx, handle));
        tracing::info!(session, "Session started");
        true
    }

    /// Stop the session's tick loop and wait for it to exit.
    ///
    /// Returns `false` if it was not running.
    pub async fn stop(&self, session: SessionId) -> bool {
        let running = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .get_mut(&session)
                .and_then(|entry| entry.running.take())
        };
        let Some((stop_tx, handle)) = running else {
            return false;
        };

        // The loop may already have exited; either way it is joined below.
        let _ = stop_tx.send(true);
        if let Err(err) = handle.await {
            tracing::error!(session, error = %err, "Session loop panicked");
        }
        tracing::info!(session, "Session stopped");
        true
    }

    /// Stop every running session.
    pub async fn stop_all(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().await.keys().copied().collect();
        for id in ids {
            self.stop(id).await;
        }
    }

    /// Status of a known session.
    pub async fn status(&self, session: SessionId) -> Result<Option<SessionStatus>> {
        let (scheduler, running) = {
            let sessions = self.sessions.lock().await;
            let Some(entry) = sessions.get(&session) else {
                return Ok(None);
            };
            (Arc::clone(&entry.scheduler), entry.running.is_some())
        };
        let tick = scheduler.lock().await.tick_count();
        let active_encounters = self.engine.active_encounter_ids(session).await?.len();
        Ok(Some(SessionStatus {
            session,
            running,
            tick,
            tick_rate_hz: self.config.tick_rate_hz,
            active_encounters,
        }))
    }

    /// Subscribe to a session's events.
    pub async fn subscribe(&self, session: SessionId) -> broadcast::Receiver<EngineEvent> {
        self.scheduler(session).await.lock().await.subscribe()
    }

    fn entry<'a>(
        &self,
        sessions: &'a mut BTreeMap<SessionId, SessionEntry>,
        session: SessionId,
    ) -> &'a mut SessionEntry {
        sessions.entry(session).or_insert_with(|| SessionEntry {
            scheduler: Arc::new(Mutex::new(SessionScheduler::new(
                session,
                self.engine.clone(),
                &self.config,
            ))),
            running: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use armada_core::pathfinding::NavGrid;
    use armada_core::terrain::SectorTerrain;

    fn registry() -> SessionRegistry {
        let config = ServerConfig {
            tick_rate_hz: 10,
            ..ServerConfig::default()
        };
        let grid = Arc::new(NavGrid::new(10, 10));
        let engine = FleetEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::clone(&grid),
            Arc::new(SectorTerrain::new(grid)),
            config.rules.clone(),
        );
        SessionRegistry::new(engine, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_are_idempotent() {
        let registry = registry();
        assert!(registry.status(1).await.unwrap().is_none());

        assert!(registry.start(1).await);
        assert!(!registry.start(1).await);
        tokio::time::sleep(Duration::from_millis(350)).await;

        let status = registry.status(1).await.unwrap().unwrap();
        assert!(status.running);
        assert!(status.tick >= 3);
        assert_eq!(status.tick_rate_hz, 10);
        assert_eq!(status.active_encounters, 0);

        assert!(registry.stop(1).await);
        assert!(!registry.stop(1).await);
        let stopped = registry.status(1).await.unwrap().unwrap();
        assert!(!stopped.running);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.status(1).await.unwrap().unwrap().tick, stopped.tick);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_tick_independently() {
        let registry = registry();
        registry.start(1).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        registry.start(2).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        registry.stop_all().await;

        let first = registry.status(1).await.unwrap().unwrap();
        let second = registry.status(2).await.unwrap().unwrap();
        assert!(!first.running && !second.running);
        assert!(first.tick > second.tick);
    }
}
