//! Durable registry of open conflicts
//!
//! Backed by the state store so open conflicts survive restarts. The
//! registry keeps one record per path: re-detecting a conflict on a path that
//! already has one refreshes the record but keeps its id, so a host holding
//! that id can still resolve it.
//!
//! Resolution is two-phase. [`ConflictRegistry::claim`] reserves a conflict
//! while its actions run; [`ConflictRegistry::complete`] removes it and
//! [`ConflictRegistry::release`] hands it back after a failure. A second
//! claim on the same id fails with [`ConflictError::AlreadyResolved`].

use std::collections::HashSet;
use std::sync::Arc;

use oxisync_core::domain::SyncConflict;
use oxisync_core::ports::IStateStore;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ConflictError;

/// Open conflicts, persisted through an [`IStateStore`]
pub struct ConflictRegistry {
    store: Arc<dyn IStateStore>,
    in_flight: Mutex<HashSet<String>>,
    resolved: Mutex<HashSet<String>>,
}

impl ConflictRegistry {
    pub fn new(store: Arc<dyn IStateStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
            resolved: Mutex::new(HashSet::new()),
        }
    }

    /// Records a newly detected conflict.
    ///
    /// When the path already has an open conflict, its id and detection time
    /// are kept and the remaining fields are refreshed. Returns the stored record.
    pub async fn record(&self, conflict: SyncConflict) -> Result<SyncConflict, ConflictError> {
        let stored = match self.store.get_conflict_by_path(&conflict.item_path).await? {
            Some(existing) => SyncConflict {
                id: existing.id,
                detected_at: existing.detected_at,
                ..conflict
            },
            None => conflict,
        };
        self.store.save_conflict(&stored).await?;
        info!(
            conflict_id = %stored.id,
            path = %stored.item_path,
            conflict_type = %stored.conflict_type,
            "Conflict recorded"
        );
        Ok(stored)
    }

    /// All open conflicts, oldest first.
    pub async fn list(&self) -> Result<Vec<SyncConflict>, ConflictError> {
        Ok(self.store.list_conflicts().await?)
    }

    /// Paths that later passes must leave alone.
    pub async fn open_paths(&self) -> Result<HashSet<String>, ConflictError> {
        Ok(self
            .store
            .list_conflicts()
            .await?
            .into_iter()
            .map(|c| c.item_path)
            .collect())
    }

    pub async fn count(&self) -> Result<usize, ConflictError> {
        Ok(self.store.list_conflicts().await?.len())
    }

    /// Reserves a conflict for resolution.
    pub async fn claim(&self, id: &str) -> Result<SyncConflict, ConflictError> {
        if self.resolved.lock().await.contains(id) {
            return Err(ConflictError::AlreadyResolved(id.to_string()));
        }

        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(id) {
            return Err(ConflictError::AlreadyResolved(id.to_string()));
        }
        let conflict = self
            .store
            .get_conflict(id)
            .await?
            .ok_or_else(|| ConflictError::NotFound(id.to_string()))?;
        in_flight.insert(id.to_string());
        debug!(conflict_id = %id, path = %conflict.item_path, "Conflict claimed");
        Ok(conflict)
    }

    /// Removes a claimed conflict after its actions succeeded.
    pub async fn complete(&self, id: &str) -> Result<(), ConflictError> {
        let removed = self.store.remove_conflict(id).await;
        self.in_flight.lock().await.remove(id);
        if !removed? {
            return Err(ConflictError::NotFound(id.to_string()));
        }
        self.resolved.lock().await.insert(id.to_string());
        info!(conflict_id = %id, "Conflict resolved");
        Ok(())
    }

    /// Returns a claimed conflict to the open set, optionally refreshed.
    pub async fn release(
        &self,
        id: &str,
        refreshed: Option<SyncConflict>,
    ) -> Result<(), ConflictError> {
        self.in_flight.lock().await.remove(id);
        if let Some(conflict) = refreshed {
            self.store.save_conflict(&conflict).await?;
        }
        debug!(conflict_id = %id, "Conflict released");
        Ok(())
    }
}
