// ============================================================================
// In-Memory Gateway
// ============================================================================
//
// A complete in-process implementation of the persistence contract: a
// server-side ordered store with id minting, per-operation call counters and
// queued fault injection. Production code talks to a real remote store; this
// implementation backs demos and every integration test.

use crate::core::{Entity, EntityId, Payload, Result, SyncError};
use crate::gateway::PersistenceGateway;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

/// Gateway operation kinds, used to target fault injection and read counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Fetch,
    Create,
    Update,
    Delete,
    Reorder,
}

struct GatewayState<P> {
    rows: Vec<Entity<P>>,
    faults: HashMap<GatewayOp, VecDeque<SyncError>>,
    calls: HashMap<GatewayOp, usize>,
}

pub struct InMemoryGateway<P> {
    state: Mutex<GatewayState<P>>,
}

impl<P: Payload> Default for InMemoryGateway<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> InMemoryGateway<P> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GatewayState {
                rows: Vec::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
            }),
        }
    }

    /// Seeds the store with entities, assigning contiguous orders.
    pub fn seeded(payloads: Vec<P>) -> Self {
        let gateway = Self::new();
        {
            let mut state = gateway
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for (order, payload) in payloads.into_iter().enumerate() {
                state
                    .rows
                    .push(Entity::new(Uuid::new_v4().to_string(), order, payload));
            }
        }
        gateway
    }

    /// Queues an error for the next call of the given operation.
    ///
    /// Errors are consumed in FIFO order, one per call.
    pub fn fail_next(&self, op: GatewayOp, err: SyncError) -> Result<()> {
        let mut state = self.state.lock()?;
        state.faults.entry(op).or_default().push_back(err);
        Ok(())
    }

    /// Number of calls made so far for the given operation.
    pub fn calls(&self, op: GatewayOp) -> Result<usize> {
        let state = self.state.lock()?;
        Ok(state.calls.get(&op).copied().unwrap_or(0))
    }

    /// Current server-side rows in order.
    pub fn rows(&self) -> Result<Vec<Entity<P>>> {
        let state = self.state.lock()?;
        Ok(state.rows.clone())
    }

    fn enter(&self, op: GatewayOp) -> Result<Option<SyncError>> {
        let mut state = self.state.lock()?;
        *state.calls.entry(op).or_insert(0) += 1;
        Ok(state.faults.get_mut(&op).and_then(VecDeque::pop_front))
    }
}

impl<P> GatewayState<P> {
    fn renumber(&mut self) {
        for (index, row) in self.rows.iter_mut().enumerate() {
            row.order = index;
        }
    }

    fn position_of(&self, id: &EntityId) -> Option<usize> {
        self.rows.iter().position(|row| &row.id == id)
    }
}

#[async_trait]
impl<P: Payload> PersistenceGateway<P> for InMemoryGateway<P> {
    async fn fetch(&self) -> Result<Vec<Entity<P>>> {
        if let Some(err) = self.enter(GatewayOp::Fetch)? {
            return Err(err);
        }
        self.rows()
    }

    async fn create(&self, payload: P, position: usize) -> Result<Entity<P>> {
        if let Some(err) = self.enter(GatewayOp::Create)? {
            return Err(err);
        }
        let mut state = self.state.lock()?;
        let index = position.min(state.rows.len());
        let entity = Entity::new(Uuid::new_v4().to_string(), index, payload);
        state.rows.insert(index, entity.clone());
        state.renumber();
        Ok(entity)
    }

    async fn update(&self, id: &EntityId, payload: P) -> Result<()> {
        if let Some(err) = self.enter(GatewayOp::Update)? {
            return Err(err);
        }
        let mut state = self.state.lock()?;
        let Some(index) = state.position_of(id) else {
            return Err(SyncError::NotFound(id.to_string()));
        };
        state.rows[index].payload = payload;
        state.rows[index].updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: &EntityId) -> Result<()> {
        if let Some(err) = self.enter(GatewayOp::Delete)? {
            return Err(err);
        }
        let mut state = self.state.lock()?;
        let Some(index) = state.position_of(id) else {
            return Err(SyncError::NotFound(id.to_string()));
        };
        state.rows.remove(index);
        state.renumber();
        Ok(())
    }

    async fn reorder(&self, ordered_ids: &[EntityId]) -> Result<()> {
        if let Some(err) = self.enter(GatewayOp::Reorder)? {
            return Err(err);
        }
        let mut state = self.state.lock()?;
        if ordered_ids.len() != state.rows.len() {
            return Err(SyncError::InvalidPermutation(format!(
                "expected {} ids, got {}",
                state.rows.len(),
                ordered_ids.len()
            )));
        }
        let mut reordered = Vec::with_capacity(ordered_ids.len());
        for id in ordered_ids {
            let Some(index) = state.position_of(id) else {
                return Err(SyncError::InvalidPermutation(format!(
                    "id '{}' is not part of the collection",
                    id
                )));
            };
            if reordered.iter().any(|&seen| seen == index) {
                return Err(SyncError::InvalidPermutation(format!(
                    "id '{}' appears more than once",
                    id
                )));
            }
            reordered.push(index);
        }
        let rows: Vec<Entity<P>> = reordered
            .into_iter()
            .map(|index| state.rows[index].clone())
            .collect();
        state.rows = rows;
        state.renumber();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_mints_id_and_keeps_orders_contiguous() {
        let gateway = InMemoryGateway::<String>::new();
        let a = gateway.create("a".to_string(), 0).await.unwrap();
        let b = gateway.create("b".to_string(), 0).await.unwrap();
        assert_ne!(a.id, b.id);

        let rows = gateway.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload, "b");
        assert_eq!(rows[0].order, 0);
        assert_eq!(rows[1].order, 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let gateway = InMemoryGateway::<String>::new();
        let err = gateway
            .update(&"ghost".into(), "x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fault_injection_fires_once_per_call() {
        let gateway = InMemoryGateway::<String>::seeded(vec!["a".to_string()]);
        let id = gateway.rows().unwrap()[0].id.clone();

        gateway
            .fail_next(GatewayOp::Update, SyncError::Transport("offline".into()))
            .unwrap();

        let err = gateway.update(&id, "x".to_string()).await.unwrap_err();
        assert!(err.is_retryable());

        // The queue is drained; the follow-up call succeeds.
        gateway.update(&id, "x".to_string()).await.unwrap();
        assert_eq!(gateway.calls(GatewayOp::Update).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reorder_validates_permutation() {
        let gateway = InMemoryGateway::<String>::seeded(vec!["a".to_string(), "b".to_string()]);
        let ids: Vec<EntityId> = gateway
            .rows()
            .unwrap()
            .iter()
            .map(|row| row.id.clone())
            .collect();

        let reversed: Vec<EntityId> = ids.iter().rev().cloned().collect();
        gateway.reorder(&reversed).await.unwrap();
        assert_eq!(gateway.rows().unwrap()[0].payload, "b");

        let err = gateway.reorder(&reversed[..1]).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidPermutation(_)));
    }
}
