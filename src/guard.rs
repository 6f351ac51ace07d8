use crate::error::{StoreError, StoreResult};
use crate::identity::Identity;
use crate::models::{Entity, EntityId};

/// Decides whether `candidate` is visible to `caller`.
///
/// The candidate must have been fetched by id alone. Absent and foreign
/// entities both come back as `NotFound`; there is no forbidden signal.
pub fn check_owned<E: Entity>(
    caller: &Identity,
    id: &EntityId,
    candidate: Option<E>,
) -> StoreResult<E> {
    let caller_id = caller.require_authenticated()?;
    match candidate {
        Some(entity) if entity.owner_id() == caller_id => Ok(entity),
        Some(entity) => {
            tracing::warn!(
                caller = %caller_id,
                resource = E::RESOURCE,
                %id,
                owner = %entity.owner_id(),
                "ownership check denied access"
            );
            Err(StoreError::not_found(E::RESOURCE, id))
        }
        None => Err(StoreError::not_found(E::RESOURCE, id)),
    }
}

/// Drops every entity the caller does not own.
pub fn retain_owned<E: Entity>(caller: &Identity, entities: Vec<E>) -> StoreResult<Vec<E>> {
    let caller_id = caller.require_authenticated()?;
    let total = entities.len();
    let owned: Vec<E> = entities
        .into_iter()
        .filter(|e| e.owner_id() == caller_id)
        .collect();
    if owned.len() != total {
        tracing::warn!(
            caller = %caller_id,
            resource = E::RESOURCE,
            dropped = total - owned.len(),
            "dropped foreign entities from listing"
        );
    }
    Ok(owned)
}
