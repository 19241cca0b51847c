// ============================================================================
// Pending Write Registry
// ============================================================================

use crate::core::{EntityId, Payload};
use crate::scheduler::TimerHandle;
use std::collections::HashMap;

/// A queued, not-yet-fired coalesced write for one entity.
///
/// At most one exists per entity; a newer edit replaces the payload and the
/// timer, so the latest value wins and the debounce window restarts.
pub struct PendingWrite<P> {
    pub payload: P,
    pub timer: TimerHandle,
}

/// Owns the debounce timers and queued payloads, keyed by entity id.
///
/// One registry instance exists per coordinator and dies with it; nothing
/// here is process-wide. Besides the pending queue it keeps the per-entity
/// write bookkeeping: the sequence number of the latest issued write (stale
/// acknowledgments are detected against it) and the fingerprint of the last
/// acknowledged payload (the no-op-save comparison).
pub struct PendingWriteRegistry<P> {
    entries: HashMap<EntityId, PendingWrite<P>>,
    issued: HashMap<EntityId, u64>,
    acked: HashMap<EntityId, serde_json::Value>,
}

impl<P: Payload> Default for PendingWriteRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> PendingWriteRegistry<P> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            issued: HashMap::new(),
            acked: HashMap::new(),
        }
    }

    /// Replaces any existing pending write for `id`.
    ///
    /// Returns the superseded entry so the caller can cancel its timer.
    pub fn insert(&mut self, id: EntityId, payload: P, timer: TimerHandle) -> Option<PendingWrite<P>> {
        self.entries.insert(id, PendingWrite { payload, timer })
    }

    /// Removes and returns the pending write for `id`, if any.
    pub fn take(&mut self, id: &EntityId) -> Option<PendingWrite<P>> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids with a pending (scheduled, not yet fired) write.
    pub fn pending_ids(&self) -> Vec<EntityId> {
        self.entries.keys().cloned().collect()
    }

    /// Allocates the sequence number for a write about to be fired.
    pub fn next_sequence(&mut self, id: &EntityId) -> u64 {
        let counter = self.issued.entry(id.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Whether `sequence` is the latest write issued for `id`.
    pub fn is_latest(&self, id: &EntityId, sequence: u64) -> bool {
        self.issued.get(id).copied() == Some(sequence)
    }

    /// Records the payload fingerprint the gateway last acknowledged.
    pub fn record_acked(&mut self, id: EntityId, fingerprint: serde_json::Value) {
        self.acked.insert(id, fingerprint);
    }

    /// Whether `fingerprint` equals the last acknowledged payload for `id`.
    pub fn is_acked(&self, id: &EntityId, fingerprint: &serde_json::Value) -> bool {
        self.acked.get(id) == Some(fingerprint)
    }

    /// Drops all bookkeeping for an entity that no longer exists.
    ///
    /// Returns the pending entry, if one was queued, so its timer can be
    /// cancelled by the caller.
    pub fn forget(&mut self, id: &EntityId) -> Option<PendingWrite<P>> {
        self.issued.remove(id);
        self.acked.remove(id);
        self.entries.remove(id)
    }

    /// Keeps only bookkeeping for ids in `live`, returning the pending
    /// entries that were dropped. Used after a refetch replaces the
    /// collection.
    pub fn retain_ids(&mut self, live: &[EntityId]) -> Vec<PendingWrite<P>> {
        let dead: Vec<EntityId> = self
            .entries
            .keys()
            .filter(|id| !live.contains(id))
            .cloned()
            .collect();
        let mut dropped = Vec::with_capacity(dead.len());
        for id in &dead {
            if let Some(entry) = self.entries.remove(id) {
                dropped.push(entry);
            }
        }
        self.issued.retain(|id, _| live.contains(id));
        self.acked.retain(|id, _| live.contains(id));
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualScheduler, Scheduler};
    use std::time::Duration;

    fn timer(scheduler: &ManualScheduler) -> TimerHandle {
        scheduler.schedule(Duration::from_millis(500), Box::new(|| {}))
    }

    #[test]
    fn test_latest_value_wins() {
        let scheduler = ManualScheduler::new();
        let mut registry: PendingWriteRegistry<String> = PendingWriteRegistry::new();
        let id = EntityId::from("blk-1");

        assert!(registry
            .insert(id.clone(), "first".to_string(), timer(&scheduler))
            .is_none());
        let superseded = registry
            .insert(id.clone(), "second".to_string(), timer(&scheduler))
            .unwrap();
        assert_eq!(superseded.payload, "first");
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.take(&id).unwrap().payload, "second");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sequence_numbers_are_per_entity_monotonic() {
        let mut registry: PendingWriteRegistry<String> = PendingWriteRegistry::new();
        let a = EntityId::from("a");
        let b = EntityId::from("b");

        assert_eq!(registry.next_sequence(&a), 1);
        assert_eq!(registry.next_sequence(&a), 2);
        assert_eq!(registry.next_sequence(&b), 1);

        assert!(registry.is_latest(&a, 2));
        assert!(!registry.is_latest(&a, 1));
        assert!(!registry.is_latest(&EntityId::from("ghost"), 1));
    }

    #[test]
    fn test_acked_fingerprint_roundtrip() {
        let mut registry: PendingWriteRegistry<String> = PendingWriteRegistry::new();
        let id = EntityId::from("a");
        let fp = serde_json::json!("hello");

        assert!(!registry.is_acked(&id, &fp));
        registry.record_acked(id.clone(), fp.clone());
        assert!(registry.is_acked(&id, &fp));
        assert!(!registry.is_acked(&id, &serde_json::json!("other")));
    }

    #[test]
    fn test_forget_and_retain() {
        let scheduler = ManualScheduler::new();
        let mut registry: PendingWriteRegistry<String> = PendingWriteRegistry::new();
        let a = EntityId::from("a");
        let b = EntityId::from("b");

        registry.insert(a.clone(), "pa".to_string(), timer(&scheduler));
        registry.insert(b.clone(), "pb".to_string(), timer(&scheduler));
        registry.next_sequence(&a);
        registry.record_acked(a.clone(), serde_json::json!("pa"));

        assert!(registry.forget(&a).is_some());
        assert!(!registry.contains(&a));
        assert!(!registry.is_latest(&a, 1));

        let dropped = registry.retain_ids(&[]);
        assert_eq!(dropped.len(), 1);
        assert!(registry.is_empty());
    }
}
