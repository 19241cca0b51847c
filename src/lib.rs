// ============================================================================
// OptiSync Library
// ============================================================================

//! Optimistic synchronization engine for ordered entity collections.
//!
//! Keeps an in-memory ordered collection of user-editable entities (page
//! blocks, storyboard frames, form responses) consistent with a remote store
//! while the UI stays responsive: edits apply locally at keystroke speed,
//! writes are debounced and coalesced, ordering stays contiguous under
//! insert/delete/move/reorder, and failed structural operations roll back to
//! an exact snapshot.
//!
//! The engine is generic over a serializable opaque payload; callers model
//! their concrete content shapes as a closed enum at the boundary.

pub mod collection;
pub mod config;
pub mod core;
pub mod coordinator;
pub mod gateway;
pub mod pending;
pub mod scheduler;
pub mod status;

// Re-export main types for convenience
pub use collection::{CollectionSnapshot, EntityCollection};
pub use config::SyncConfig;
pub use crate::core::{Direction, Entity, EntityId, Payload, Result, SyncError};
pub use coordinator::{SyncCoordinator, SyncStats};
pub use gateway::{GatewayOp, InMemoryGateway, PersistenceGateway};
pub use scheduler::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
pub use status::{EntityWriteState, SaveStatus, SaveStatusTracker};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_create_and_close() {
        let gateway = Arc::new(InMemoryGateway::<String>::new());
        let engine = SyncCoordinator::open(gateway.clone(), SyncConfig::new())
            .await
            .unwrap();

        let block = engine.create("intro".to_string(), 0).await.unwrap();
        assert_eq!(engine.len().unwrap(), 1);
        assert_eq!(block.order, 0);

        engine.close().await.unwrap();
        assert!(engine.create("late".to_string(), 0).await.is_err());
    }

    #[tokio::test]
    async fn test_open_loads_existing_collection() {
        let gateway = Arc::new(InMemoryGateway::seeded(vec![
            "a".to_string(),
            "b".to_string(),
        ]));
        let engine = SyncCoordinator::open(gateway, SyncConfig::new())
            .await
            .unwrap();

        let entities = engine.entities().unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].payload, "a");
        assert_eq!(entities[0].order, 0);
        assert_eq!(entities[1].order, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let gateway = Arc::new(InMemoryGateway::<String>::new());
        let config = SyncConfig::new().debounce_window(std::time::Duration::ZERO);
        let result = SyncCoordinator::open(gateway, config).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }
}
