pub mod memory;

pub use memory::{GatewayOp, InMemoryGateway};

use crate::core::{Entity, EntityId, Payload, Result};
use async_trait::async_trait;

/// The contract to the remote persistent store.
///
/// This trait is the seam between the synchronization engine and whatever
/// actually persists entities (an HTTP client in production, `InMemoryGateway`
/// in tests and demos). All calls are asynchronous and may complete in any
/// order relative to issuance; the engine assumes nothing beyond "the call it
/// awaited has now settled".
#[async_trait]
pub trait PersistenceGateway<P: Payload>: Send + Sync {
    /// Loads the full ordered collection. Called once when a document opens
    /// and again when the coordinator detects structural divergence.
    async fn fetch(&self) -> Result<Vec<Entity<P>>>;

    /// Creates an entity at the given insertion index and returns it with its
    /// server-assigned id and order.
    async fn create(&self, payload: P, position: usize) -> Result<Entity<P>>;

    /// Replaces an entity's payload with the full new value.
    async fn update(&self, id: &EntityId, payload: P) -> Result<()>;

    /// Deletes an entity.
    async fn delete(&self, id: &EntityId) -> Result<()>;

    /// Applies a full permutation of the collection's ids.
    async fn reorder(&self, ordered_ids: &[EntityId]) -> Result<()>;
}
