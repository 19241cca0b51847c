//! Shared helpers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use optisync::{
    Entity, EntityId, InMemoryGateway, ManualScheduler, Payload, PersistenceGateway, Result,
    SyncConfig, SyncCoordinator,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// The closed set of content shapes a page-block editor would sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BlockPayload {
    Markdown(String),
    Image { url: String, caption: String },
}

pub fn markdown(text: &str) -> BlockPayload {
    BlockPayload::Markdown(text.to_string())
}

/// Opens a coordinator backed by a manual scheduler so tests control time.
pub async fn open_manual<P: Payload>(
    gateway: Arc<InMemoryGateway<P>>,
) -> (SyncCoordinator<P>, Arc<ManualScheduler>) {
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = SyncCoordinator::open_with_scheduler(
        gateway,
        Arc::clone(&scheduler) as Arc<dyn optisync::Scheduler>,
        SyncConfig::new(),
    )
    .await
    .unwrap();
    (engine, scheduler)
}

/// Polls until `condition` holds, yielding to the runtime between checks.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached after 1000 yields");
}

/// A gateway whose `update` calls park until the test releases them, so
/// round-trip completion order can be scripted. Other operations pass
/// straight through to the wrapped in-memory store.
pub struct GatedGateway<P> {
    pub inner: InMemoryGateway<P>,
    waiting: Mutex<Vec<oneshot::Sender<()>>>,
}

impl<P: Payload> GatedGateway<P> {
    pub fn new(inner: InMemoryGateway<P>) -> Self {
        Self {
            inner,
            waiting: Mutex::new(Vec::new()),
        }
    }

    /// Number of update calls currently parked.
    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    /// Lets the parked update call at `index` (issuance order) proceed.
    pub fn release(&self, index: usize) {
        let sender = self.waiting.lock().unwrap().remove(index);
        let _ = sender.send(());
    }
}

#[async_trait]
impl<P: Payload> PersistenceGateway<P> for GatedGateway<P> {
    async fn fetch(&self) -> Result<Vec<Entity<P>>> {
        self.inner.fetch().await
    }

    async fn create(&self, payload: P, position: usize) -> Result<Entity<P>> {
        self.inner.create(payload, position).await
    }

    async fn update(&self, id: &EntityId, payload: P) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.waiting.lock().unwrap().push(sender);
        let _ = receiver.await;
        self.inner.update(id, payload).await
    }

    async fn delete(&self, id: &EntityId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn reorder(&self, ordered_ids: &[EntityId]) -> Result<()> {
        self.inner.reorder(ordered_ids).await
    }
}
