//! Repository seam for persisted session entities.
//!
//! The engine only needs find/update-by-id semantics; [`InMemoryStore`]
//! is the reference implementation and can snapshot a session with
//! `bincode` so a stopped loop can be restored elsewhere.

use std::collections::BTreeMap;

use armada_core::components::{EncounterId, Fleet, FleetId, SessionId};
use armada_core::encounter::TacticalEncounter;
use armada_core::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Storage for fleets and encounters, keyed by session.
///
/// Calls are awaited one at a time per entity by the scheduler.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a fleet.
    async fn find_fleet(&self, session: SessionId, id: FleetId) -> Result<Option<Fleet>>;

    /// Overwrite an existing fleet.
    ///
    /// Fails with [`EngineError::FleetNotFound`] if it was never inserted.
    async fn update_fleet(&self, fleet: &Fleet) -> Result<()>;

    /// Insert or replace a fleet.
    async fn insert_fleet(&self, fleet: Fleet) -> Result<()>;

    /// Every fleet in the session, in id order.
    async fn list_fleets(&self, session: SessionId) -> Result<Vec<Fleet>>;

    /// Reserve the next encounter id for a session.
    async fn allocate_encounter_id(&self, session: SessionId) -> Result<EncounterId>;

    /// Insert or replace an encounter.
    async fn save_encounter(&self, encounter: &TacticalEncounter) -> Result<()>;

    /// Load an encounter.
    async fn find_encounter(
        &self,
        session: SessionId,
        id: EncounterId,
    ) -> Result<Option<TacticalEncounter>>;

    /// Encounters in the session, in id order.
    async fn list_encounters(
        &self,
        session: SessionId,
        active_only: bool,
    ) -> Result<Vec<TacticalEncounter>>;
}

/// Everything stored for one session, as written by
/// [`InMemoryStore::snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session the entities belong to.
    pub session: SessionId,
    /// Fleets in id order.
    pub fleets: Vec<Fleet>,
    /// Encounters in id order.
    pub encounters: Vec<TacticalEncounter>,
    /// Last allocated encounter id.
    pub last_encounter_id: EncounterId,
}

#[derive(Debug, Default)]
struct StoreState {
    fleets: BTreeMap<(SessionId, FleetId), Fleet>,
    encounters: BTreeMap<(SessionId, EncounterId), TacticalEncounter>,
    last_encounter_id: BTreeMap<SessionId, EncounterId>,
}

/// Process-local store behind a `tokio` read/write lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one session's entities with `bincode`.
    pub async fn snapshot(&self, session: SessionId) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        let snapshot = SessionSnapshot {
            session,
            fleets: state
                .fleets
                .range((session, FleetId::MIN)..=(session, FleetId::MAX))
                .map(|(_, fleet)| fleet.clone())
                .collect(),
            encounters: state
                .encounters
                .range((session, EncounterId::MIN)..=(session, EncounterId::MAX))
                .map(|(_, encounter)| encounter.clone())
                .collect(),
            last_encounter_id: state.last_encounter_id.get(&session).copied().unwrap_or(0),
        };
        bincode::serialize(&snapshot).map_err(|err| EngineError::Storage(err.to_string()))
    }

    /// Replace a session's entities with a decoded snapshot.
    ///
    /// Returns the restored session id.
    pub async fn restore(&self, bytes: &[u8]) -> Result<SessionId> {
        let snapshot: SessionSnapshot =
            bincode::deserialize(bytes).map_err(|err| EngineError::Storage(err.to_string()))?;
        let session = snapshot.session;

        let mut state = self.state.write().await;
        state.fleets.retain(|(s, _), _| *s != session);
        state.encounters.retain(|(s, _), _| *s != session);
        for fleet in snapshot.fleets {
            state.fleets.insert((session, fleet.id), fleet);
        }
        for encounter in snapshot.encounters {
            state.encounters.insert((session, encounter.id), encounter);
        }
        state
            .last_encounter_id
            .insert(session, snapshot.last_encounter_id);

        tracing::info!(session, "Session restored from snapshot");
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn find_fleet(&self, session: SessionId, id: FleetId) -> Result<Option<Fleet>> {
        Ok(self.state.read().await.fleets.get(&(session, id)).cloned())
    }

    async fn update_fleet(&self, fleet: &Fleet) -> Result<()> {
        let mut state = self.state.write().await;
        let slot = state
            .fleets
            .get_mut(&(fleet.session, fleet.id))
            .ok_or(EngineError::FleetNotFound(fleet.id))?;
        *slot = fleet.clone();
        Ok(())
    }

    async fn insert_fleet(&self, fleet: Fleet) -> Result<()> {
        self.state
            .write()
            .await
            .fleets
            .insert((fleet.session, fleet.id), fleet);
        Ok(())
    }

    async fn list_fleets(&self, session: SessionId) -> Result<Vec<Fleet>> {
        let state = self.state.read().await;
        Ok(state
            .fleets
            .range((session, FleetId::MIN)..=(session, FleetId::MAX))
            .map(|(_, fleet)| fleet.clone())
            .collect())
    }

    async fn allocate_encounter_id(&self, session: SessionId) -> Result<EncounterId> {
        let mut state = self.state.write().await;
        let last = state.last_encounter_id.entry(session).or_insert(0);
        *last += 1;
        Ok(*last)
    }

    async fn save_encounter(&self, encounter: &TacticalEncounter) -> Result<()> {
        self.state
            .write()
            .await
            .encounters
            .insert((encounter.session, encounter.id), encounter.clone());
        Ok(())
    }

    async fn find_encounter(
        &self,
        session: SessionId,
        id: EncounterId,
    ) -> Result<Option<TacticalEncounter>> {
        Ok(self
            .state
            .read()
            .await
            .encounters
            .get(&(session, id))
            .cloned())
    }

    async fn list_encounters(
        &self,
        session: SessionId,
        active_only: bool,
    ) -> Result<Vec<TacticalEncounter>> {
        let state = self.state.read().await;
        Ok(state
            .encounters
            .range((session, EncounterId::MIN)..=(session, EncounterId::MAX))
            .map(|(_, encounter)| encounter)
            .filter(|encounter| !active_only || encounter.is_active())
            .cloned()
            .collect())
    }
}
