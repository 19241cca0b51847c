use crate::core::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque payload carried by an entity.
///
/// The engine never inspects the payload beyond comparing its serialized form
/// for the no-op-save rule. Callers are expected to model their concrete
/// content shapes as a closed enum (block content, frame fields, response
/// value) and hand it in here; any `Clone + Serialize` type qualifies.
pub trait Payload: Clone + Serialize + Send + Sync + 'static {}

impl<T: Clone + Serialize + Send + Sync + 'static> Payload for T {}

/// Server-assigned identifier of an entity. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One item in an ordered, user-editable collection.
///
/// `order` is the zero-based display position; the collection keeps the
/// multiset of orders exactly contiguous at every quiescent point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity<P> {
    pub id: EntityId,
    pub order: usize,
    pub payload: P,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<P> Entity<P> {
    pub fn new(id: impl Into<EntityId>, order: usize, payload: P) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            order,
            payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Direction of a single-step move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Serialized form of a payload, used for the no-op-save comparison.
///
/// Two payloads are "the same write" exactly when their fingerprints match.
pub fn payload_fingerprint<P: Payload>(payload: &P) -> Result<serde_json::Value> {
    serde_json::to_value(payload).map_err(|err| SyncError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_display_and_eq() {
        let a = EntityId::from("blk-1");
        let b = EntityId::new("blk-1");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "blk-1");
    }

    #[test]
    fn test_fingerprint_matches_for_equal_payloads() {
        let a = payload_fingerprint(&"hello".to_string()).unwrap();
        let b = payload_fingerprint(&"hello".to_string()).unwrap();
        assert_eq!(a, b);

        let c = payload_fingerprint(&"world".to_string()).unwrap();
        assert_ne!(a, c);
    }
}
