// ============================================================================
// Mutation Coordinator
// ============================================================================
//
// Orchestrates create/update/delete/move/reorder against the collection, the
// pending-write registry and the gateway. Structural operations follow one
// uniform shape: optimistic apply, persist, confirm or rollback. Debounced
// updates are the deliberate exception: a failed payload write is surfaced
// but never rolled back, because discarding typed text is the worse failure.

use crate::collection::{CollectionSnapshot, EntityCollection};
use crate::config::SyncConfig;
use crate::core::{
    Direction, Entity, EntityId, Payload, Result, SyncError, payload_fingerprint,
};
use crate::gateway::PersistenceGateway;
use crate::pending::PendingWriteRegistry;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::status::{EntityWriteState, SaveStatus, SaveStatusTracker};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Point-in-time counters for the engine, for status bars and diagnostics.
#[derive(Debug, Clone)]
pub struct SyncStats {
    /// Entities currently in the collection.
    pub entity_count: usize,
    /// Coalesced writes scheduled but not yet fired.
    pub pending_writes: usize,
    /// Gateway operations currently in flight.
    pub in_flight: usize,
    /// The derived save indicator.
    pub status: SaveStatus,
}

/// Records server-held payloads as the acknowledged baseline, so
/// re-submitting exactly what the store already has is a no-op save.
fn seed_acked<P: Payload>(registry: &mut PendingWriteRegistry<P>, entities: &[Entity<P>]) {
    for entity in entities {
        match payload_fingerprint(&entity.payload) {
            Ok(fingerprint) => registry.record_acked(entity.id.clone(), fingerprint),
            Err(err) => {
                warn!(
                    "payload fingerprint failed: entity='{}' error='{}'",
                    entity.id, err
                );
            }
        }
    }
}

struct CoordinatorInner<P: Payload> {
    weak: Weak<CoordinatorInner<P>>,
    gateway: Arc<dyn PersistenceGateway<P>>,
    scheduler: Arc<dyn Scheduler>,
    config: SyncConfig,
    collection: Mutex<EntityCollection<P>>,
    registry: Mutex<PendingWriteRegistry<P>>,
    status: SaveStatusTracker,
    closed: AtomicBool,
}

/// The synchronization engine for one open document.
///
/// Owns the ordered collection, the debounce registry and the save-status
/// tracker; every mutation of the collection goes through here. Cheap to
/// clone; clones share the same engine state.
///
/// # Examples
///
/// ```
/// use optisync::{InMemoryGateway, SyncConfig, SyncCoordinator};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> optisync::Result<()> {
///     let gateway = Arc::new(InMemoryGateway::<String>::new());
///     let engine = SyncCoordinator::open(gateway, SyncConfig::new()).await?;
///
///     let block = engine.create("# Untitled".to_string(), 0).await?;
///     engine.update(&block.id, "# Draft outline".to_string())?;
///
///     engine.close().await?;
///     Ok(())
/// }
/// ```
pub struct SyncCoordinator<P: Payload> {
    inner: Arc<CoordinatorInner<P>>,
}

impl<P: Payload> Clone for SyncCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> SyncCoordinator<P> {
    /// Opens a document: fetches the collection once and starts the engine
    /// with the production tokio scheduler.
    pub async fn open(
        gateway: Arc<dyn PersistenceGateway<P>>,
        config: SyncConfig,
    ) -> Result<Self> {
        Self::open_with_scheduler(gateway, Arc::new(TokioScheduler::new()), config).await
    }

    /// Opens a document with an injected scheduler.
    ///
    /// Tests drive debounce time deterministically by passing a
    /// [`ManualScheduler`](crate::scheduler::ManualScheduler).
    pub async fn open_with_scheduler(
        gateway: Arc<dyn PersistenceGateway<P>>,
        scheduler: Arc<dyn Scheduler>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate().map_err(SyncError::Validation)?;
        let saved_display_window = config.saved_display_window;

        let entities = gateway.fetch().await?;
        let collection = EntityCollection::from_entities(entities);

        // The fetched payloads are what the store holds right now; they are
        // the baseline for the no-op-save comparison.
        let mut registry = PendingWriteRegistry::new();
        seed_acked(&mut registry, collection.entities());

        let inner = Arc::new_cyclic(|weak| CoordinatorInner {
            weak: weak.clone(),
            gateway,
            scheduler,
            config,
            collection: Mutex::new(collection),
            registry: Mutex::new(registry),
            status: SaveStatusTracker::new(saved_display_window),
            closed: AtomicBool::new(false),
        });
        Ok(Self { inner })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The current ordered entities, as the UI should display them.
    pub fn entities(&self) -> Result<Vec<Entity<P>>> {
        Ok(self.inner.collection.lock()?.entities().to_vec())
    }

    pub fn get(&self, id: &EntityId) -> Result<Option<Entity<P>>> {
        Ok(self.inner.collection.lock()?.get_by_id(id).cloned())
    }

    pub fn ordered_ids(&self) -> Result<Vec<EntityId>> {
        Ok(self.inner.collection.lock()?.ordered_ids())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.collection.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.inner.collection.lock()?.is_empty())
    }

    pub fn status(&self) -> Result<SaveStatus> {
        self.inner.status.status()
    }

    pub fn entity_state(&self, id: &EntityId) -> Result<EntityWriteState> {
        self.inner.status.entity_state(id)
    }

    pub fn dismiss_error(&self) -> Result<()> {
        self.inner.status.dismiss_error()
    }

    /// Wall-clock time of the last fully settled save, for "saved Nm ago".
    pub fn last_saved_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.status.last_saved_time()
    }

    pub fn stats(&self) -> Result<SyncStats> {
        Ok(SyncStats {
            entity_count: self.inner.collection.lock()?.len(),
            pending_writes: self.inner.registry.lock()?.len(),
            in_flight: self.inner.status.in_flight()?,
            status: self.inner.status.status()?,
        })
    }

    // ------------------------------------------------------------------
    // Create (non-optimistic by design)
    // ------------------------------------------------------------------

    /// Creates an entity at the given insertion index.
    ///
    /// The new entity is not visible locally until the server responds with
    /// its assigned id; the UI shows a loading affordance meanwhile. On
    /// success the entity is inserted at the caller's position and siblings
    /// are renumbered locally. Nothing to roll back on failure.
    pub async fn create(&self, payload: P, index: usize) -> Result<Entity<P>> {
        self.ensure_open()?;
        self.inner.status.op_started()?;
        match self.inner.gateway.create(payload, index).await {
            Ok(entity) => {
                let inserted = {
                    let mut collection = self.inner.collection.lock()?;
                    collection.insert_at(index, entity.clone());
                    collection.get_by_id(&entity.id).cloned()
                };
                // The store acknowledged this payload; it is the entity's
                // no-op-save baseline.
                seed_acked(
                    &mut *self.inner.registry.lock()?,
                    std::slice::from_ref(&entity),
                );
                self.inner.status.op_finished(true)?;
                inserted.ok_or_else(|| {
                    SyncError::Internal(format!(
                        "created entity '{}' missing after insert",
                        entity.id
                    ))
                })
            }
            Err(err) => {
                warn!("create failed: error='{}'", err);
                self.inner.status.op_finished(false)?;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Update (optimistic, debounced, coalesced, never rolled back)
    // ------------------------------------------------------------------

    /// Applies an edit to an entity's payload.
    ///
    /// The collection reflects the edit immediately; the write to the
    /// gateway is debounced, and rapid edits coalesce into one call carrying
    /// the latest payload. If the entity's serialized payload is unchanged
    /// since the last acknowledged write, no call is issued at all.
    pub fn update(&self, id: &EntityId, payload: P) -> Result<()> {
        self.ensure_open()?;
        {
            let mut collection = self.inner.collection.lock()?;
            if !collection.set_payload(id, payload.clone()) {
                return Err(SyncError::NotFound(id.to_string()));
            }
        }
        self.inner.schedule_write(id.clone(), payload)
    }

    // ------------------------------------------------------------------
    // Delete (optimistic, rollback on failure)
    // ------------------------------------------------------------------

    /// Deletes an entity optimistically.
    ///
    /// Returns the id of the entity that should receive focus afterwards:
    /// the one now occupying the deleted entity's former index (clamped to
    /// the last entity), or `None` if the collection emptied. An id absent
    /// locally is a no-op. On gateway failure the pre-delete snapshot is
    /// restored exactly.
    pub async fn delete(&self, id: &EntityId) -> Result<Option<EntityId>> {
        self.ensure_open()?;
        let (snapshot, focus) = {
            let mut collection = self.inner.collection.lock()?;
            let Some(former_index) = collection.position_of(id) else {
                return Ok(None);
            };
            let snapshot = collection.snapshot();
            collection.remove_by_id(id);
            let focus = if collection.is_empty() {
                None
            } else {
                let index = former_index.min(collection.len() - 1);
                collection.get(index).map(|entity| entity.id.clone())
            };
            (snapshot, focus)
        };

        self.inner.status.op_started()?;
        match self.inner.gateway.delete(id).await {
            Ok(()) => {
                // The entity is gone for good; drop its pending write and
                // per-entity bookkeeping.
                let dropped = self.inner.registry.lock()?.forget(id);
                if let Some(entry) = dropped {
                    self.inner.scheduler.cancel(&entry.timer);
                }
                self.inner.status.clear_entity(id)?;
                self.inner.status.op_finished(true)?;
                Ok(focus)
            }
            Err(err) => {
                warn!("delete failed: entity='{}' error='{}'", id, err);
                self.inner.status.op_finished(false)?;
                if matches!(err, SyncError::NotFound(_)) {
                    // Deleted by another session: the store diverged, so
                    // resync instead of restoring a stale snapshot.
                    if let Err(refetch_err) = self.inner.refetch().await {
                        warn!("refetch after divergence failed: error='{}'", refetch_err);
                    }
                } else {
                    self.inner.collection.lock()?.restore(snapshot);
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Move / Reorder (optimistic, rollback on failure)
    // ------------------------------------------------------------------

    /// Swaps an entity with its neighbor in `direction`.
    ///
    /// Returns false without touching the gateway when the move is a
    /// boundary no-op or the id is absent.
    pub async fn move_entity(&self, id: &EntityId, direction: Direction) -> Result<bool> {
        self.ensure_open()?;
        let (snapshot, ordered_ids) = {
            let mut collection = self.inner.collection.lock()?;
            let snapshot = collection.snapshot();
            if !collection.move_adjacent(id, direction) {
                return Ok(false);
            }
            (snapshot, collection.ordered_ids())
        };
        self.persist_order(snapshot, ordered_ids).await?;
        Ok(true)
    }

    /// Applies an arbitrary-position reorder given the full permutation of
    /// current ids.
    ///
    /// A malformed permutation is a programmer error: it is logged, surfaced
    /// and leaves both the collection and the gateway untouched.
    pub async fn reorder(&self, ordered_ids: Vec<EntityId>) -> Result<()> {
        self.ensure_open()?;
        let snapshot = {
            let mut collection = self.inner.collection.lock()?;
            let snapshot = collection.snapshot();
            if let Err(err) = collection.replace_order(&ordered_ids) {
                error!("reorder rejected: {}", err);
                self.inner.status.record_local_failure()?;
                return Err(err);
            }
            snapshot
        };
        self.persist_order(snapshot, ordered_ids).await
    }

    async fn persist_order(
        &self,
        snapshot: CollectionSnapshot<P>,
        ordered_ids: Vec<EntityId>,
    ) -> Result<()> {
        self.inner.status.op_started()?;
        match self.inner.gateway.reorder(&ordered_ids).await {
            Ok(()) => {
                self.inner.status.op_finished(true)?;
                Ok(())
            }
            Err(err) => {
                warn!("reorder failed: error='{}'", err);
                self.inner.status.op_finished(false)?;
                if matches!(err, SyncError::NotFound(_)) {
                    if let Err(refetch_err) = self.inner.refetch().await {
                        warn!("refetch after divergence failed: error='{}'", refetch_err);
                    }
                } else {
                    self.inner.collection.lock()?.restore(snapshot);
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Fires every pending coalesced write immediately, without waiting for
    /// debounce windows to elapse.
    pub fn flush(&self) -> Result<()> {
        let ids = self.inner.registry.lock()?.pending_ids();
        for id in ids {
            self.inner.fire_pending(&id);
        }
        Ok(())
    }

    /// Waits until no gateway operation is in flight.
    pub async fn wait_idle(&self) -> Result<()> {
        self.inner.status.wait_idle().await
    }

    /// Tears the engine down: flushes every pending write so no edit is
    /// silently lost, then waits for in-flight operations to settle. Further
    /// mutations are rejected.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.flush()?;
        self.wait_idle().await
    }

    /// Discards local state and reloads the collection from the gateway.
    pub async fn refetch(&self) -> Result<()> {
        self.inner.refetch().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Internal("coordinator is closed".to_string()));
        }
        Ok(())
    }
}

impl<P: Payload> CoordinatorInner<P> {
    fn schedule_write(&self, id: EntityId, payload: P) -> Result<()> {
        let weak = self.weak.clone();
        let fire_id = id.clone();
        let timer = self.scheduler.schedule(
            self.config.debounce_window,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_pending(&fire_id);
                }
            }),
        );
        let superseded = self.registry.lock()?.insert(id, payload, timer);
        if let Some(old) = superseded {
            self.scheduler.cancel(&old.timer);
        }
        Ok(())
    }

    /// Takes the pending write for `id` and issues its gateway call.
    ///
    /// Called by the debounce timer and by `flush`; whichever runs first
    /// wins, the other finds no entry and does nothing.
    fn fire_pending(&self, id: &EntityId) {
        let prepared = match self.prepare_fire(id) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!("pending write dropped: entity='{}' error='{}'", id, err);
                return;
            }
        };
        let Some((payload, fingerprint, sequence)) = prepared else {
            return;
        };

        if self.status.op_started().is_err() {
            return;
        }
        let _ = self
            .status
            .set_entity_state(id.clone(), EntityWriteState::Saving);

        let Some(inner) = self.weak.upgrade() else {
            let _ = self.status.op_finished_ignored();
            return;
        };
        let id = id.clone();
        tokio::spawn(async move {
            inner.run_update(id, payload, fingerprint, sequence).await;
        });
    }

    fn prepare_fire(
        &self,
        id: &EntityId,
    ) -> Result<Option<(P, Option<serde_json::Value>, u64)>> {
        let mut registry = self.registry.lock()?;
        let Some(entry) = registry.take(id) else {
            return Ok(None);
        };
        self.scheduler.cancel(&entry.timer);

        let fingerprint = match payload_fingerprint(&entry.payload) {
            Ok(fingerprint) => {
                if registry.is_acked(id, &fingerprint) {
                    debug!("no-op save skipped: entity='{}'", id);
                    return Ok(None);
                }
                Some(fingerprint)
            }
            Err(err) => {
                // The write still goes out; only the no-op comparison and
                // acknowledgment bookkeeping are lost for this payload.
                warn!("payload fingerprint failed: entity='{}' error='{}'", id, err);
                None
            }
        };

        let sequence = registry.next_sequence(id);
        Ok(Some((entry.payload, fingerprint, sequence)))
    }

    async fn run_update(
        &self,
        id: EntityId,
        payload: P,
        fingerprint: Option<serde_json::Value>,
        sequence: u64,
    ) {
        let result = self.gateway.update(&id, payload).await;

        let latest = self
            .registry
            .lock()
            .map(|registry| registry.is_latest(&id, sequence))
            .unwrap_or(false);
        if !latest {
            debug!(
                "stale acknowledgment ignored: entity='{}' sequence={}",
                id, sequence
            );
            let _ = self.status.op_finished_ignored();
            return;
        }

        match result {
            Ok(()) => {
                if let Some(fingerprint) = fingerprint {
                    if let Ok(mut registry) = self.registry.lock() {
                        registry.record_acked(id.clone(), fingerprint);
                    }
                }
                let _ = self
                    .status
                    .set_entity_state(id, EntityWriteState::Saved { at: Utc::now() });
                let _ = self.status.op_finished(true);
            }
            Err(err) => {
                warn!("update failed: entity='{}' error='{}'", id, err);
                let _ = self
                    .status
                    .set_entity_state(id.clone(), EntityWriteState::Error);
                let _ = self.status.op_finished(false);
                if matches!(err, SyncError::NotFound(_)) {
                    if let Err(refetch_err) = self.refetch().await {
                        warn!("refetch after divergence failed: error='{}'", refetch_err);
                    }
                }
            }
        }
    }

    async fn refetch(&self) -> Result<()> {
        let entities = self.gateway.fetch().await?;
        let collection = EntityCollection::from_entities(entities);
        let live = collection.ordered_ids();

        // Edits queued for entities that vanished server-side have nowhere
        // to go; drop them with their timers. Surviving entities get their
        // no-op baseline reset to what the store just returned.
        let dropped = {
            let mut registry = self.registry.lock()?;
            let dropped = registry.retain_ids(&live);
            seed_acked(&mut registry, collection.entities());
            dropped
        };
        for entry in dropped {
            self.scheduler.cancel(&entry.timer);
        }

        *self.collection.lock()? = collection;
        Ok(())
    }
}
