//! Remote store adapter: typed list/get/create/update/delete calls scoped to
//! the caller, with ownership enforced on every keyed operation.

pub mod http;
pub mod sqlite;
#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::identity::Identity;
use crate::models::{Entity, EntityId};

pub use http::HttpStore;
pub use sqlite::SqliteStore;

/// Keys a client may never set; they are stripped from incoming payloads.
pub const RESERVED_KEYS: [&str; 6] = [
    "id",
    "owner_id",
    "ownerId",
    "user_id",
    "created_at",
    "updated_at",
];

#[async_trait]
pub trait RemoteStore<E: Entity>: Send + Sync {
    /// All entities owned by the caller, newest first.
    async fn list(&self, caller: &Identity) -> StoreResult<Vec<E>>;

    async fn get(&self, caller: &Identity, id: &EntityId) -> StoreResult<E>;

    /// The store assigns `id` and timestamps; the owner is always the caller.
    async fn create(&self, caller: &Identity, draft: E::Draft) -> StoreResult<E>;

    /// Applies only when `id` exists and belongs to the caller.
    async fn update(&self, caller: &Identity, id: &EntityId, patch: E::Patch) -> StoreResult<E>;

    /// Returns the entity as it was just before removal.
    async fn delete(&self, caller: &Identity, id: &EntityId) -> StoreResult<E>;
}

/// Removes reserved keys from a JSON object payload, returning the ones found.
pub fn strip_reserved(payload: &mut Value) -> StoreResult<Vec<String>> {
    let map = payload
        .as_object_mut()
        .ok_or_else(|| StoreError::Validation("payload must be a JSON object".to_string()))?;
    let stripped: Vec<String> = RESERVED_KEYS
        .iter()
        .filter(|key| map.remove(**key).is_some())
        .map(|key| key.to_string())
        .collect();
    if !stripped.is_empty() {
        tracing::warn!(keys = ?stripped, "ignored reserved keys in payload");
    }
    Ok(stripped)
}

fn decode<T: DeserializeOwned>(mut payload: Value) -> StoreResult<T> {
    strip_reserved(&mut payload)?;
    serde_json::from_value(payload).map_err(|e| StoreError::Validation(e.to_string()))
}

/// Parses an untrusted create body into a validated draft.
pub fn decode_draft<E: Entity>(payload: Value) -> StoreResult<E::Draft> {
    let draft: E::Draft = decode(payload)?;
    E::validate_draft(&draft)?;
    Ok(draft)
}

/// Parses an untrusted update body into a non-empty patch.
pub fn decode_patch<E: Entity>(payload: Value) -> StoreResult<E::Patch> {
    let patch: E::Patch = decode(payload)?;
    E::validate_patch(&patch)?;
    Ok(patch)
}
