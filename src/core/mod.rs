pub mod entity;
pub mod error;

pub use entity::{Direction, Entity, EntityId, Payload, payload_fingerprint};
pub use error::{Result, SyncError};
