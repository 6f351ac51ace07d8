//! Optimistic mutations against the entity cache.
//!
//! Each mutation captures a snapshot, applies its change to the cache
//! before the store is called, then either confirms with the value the
//! store returned or rolls the cache back to the snapshot. Mutations on
//! the same id run one at a time; different ids proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{NaiveDate, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::cache::{self, Applied, EntityCache, Snapshot};
use crate::error::{StoreError, StoreResult};
use crate::guard;
use crate::identity::Identity;
use crate::models::{Company, CompanyPatch, Entity, EntityId, Job, JobPatch, Stage};
use crate::store::RemoteStore;

/// How an in-flight mutation ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    RolledBack,
    /// The session ended first; the outcome was not applied.
    Discarded,
}

/// One async lock per entity id with a mutation in flight.
#[derive(Default)]
struct EntityLocks {
    locks: Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    async fn acquire(&self, id: &EntityId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Entries only the map still references are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Coordinator<E: Entity> {
    store: Arc<dyn RemoteStore<E>>,
    cache: Arc<EntityCache<E>>,
    identity: RwLock<Option<Identity>>,
    locks: EntityLocks,
}

impl<E: Entity> Coordinator<E> {
    pub fn new(store: Arc<dyn RemoteStore<E>>) -> Self {
        Self {
            store,
            cache: Arc::new(EntityCache::new()),
            identity: RwLock::new(None),
            locks: EntityLocks::default(),
        }
    }

    /// Read-only handle for the presentation layer.
    pub fn cache(&self) -> &Arc<EntityCache<E>> {
        &self.cache
    }

    /// Starts a fresh session for `identity`; anything cached is dropped.
    pub fn begin(&self, identity: Identity) {
        *self.identity.write().unwrap_or_else(|p| p.into_inner()) = Some(identity);
        self.cache.clear();
    }

    /// Ends the session. Pending mutations resolve into a dead epoch.
    pub fn end(&self) {
        *self.identity.write().unwrap_or_else(|p| p.into_inner()) = None;
        self.cache.clear();
    }

    fn caller(&self) -> StoreResult<Identity> {
        let identity = self.identity.read().unwrap_or_else(|p| p.into_inner());
        match identity.as_ref() {
            Some(identity) if identity.is_authenticated => Ok(identity.clone()),
            _ => Err(StoreError::unauthenticated()),
        }
    }

    /// Replaces the cache with the caller's entities from the store.
    pub async fn reload(&self) -> StoreResult<usize> {
        let caller = self.caller()?;
        let epoch = self.cache.epoch();
        let entities = guard::retain_owned(&caller, self.store.list(&caller).await?)?;
        let count = entities.len();
        if self.cache.load(epoch, entities) == Applied::Stale {
            tracing::debug!(resource = E::RESOURCE, "discarded listing from an ended session");
            return Ok(0);
        }
        Ok(count)
    }

    /// Looks an entity up in the cache, subject to the ownership guard.
    pub fn get(&self, id: &EntityId) -> StoreResult<E> {
        let caller = self.caller()?;
        guard::check_owned(&caller, id, self.cache.get(id))
    }

    pub async fn create(&self, draft: E::Draft) -> StoreResult<E> {
        E::validate_draft(&draft)?;
        let caller = self.caller()?;

        let tentative = E::from_draft(
            EntityId::tentative(),
            caller.caller_id.clone(),
            Utc::now(),
            draft.clone(),
        );
        let tmp_id = tentative.id().clone();
        let _lock = self.locks.acquire(&tmp_id).await;

        let snapshot = self.cache.snapshot();
        let applied = self.apply(&snapshot, |entries| cache::insert_at(entries, 0, tentative))?;

        match self.store.create(&caller, draft).await {
            Ok(entity) => {
                let confirmed = entity.clone();
                self.confirm(&snapshot, &tmp_id, |entries| {
                    cache::replace(entries, &tmp_id, confirmed)
                });
                Ok(entity)
            }
            Err(err) => {
                self.roll_back(&snapshot, applied, &tmp_id, &err, |entries| {
                    cache::remove(entries, &tmp_id);
                });
                Err(err)
            }
        }
    }

    pub async fn update(&self, id: &EntityId, patch: E::Patch) -> StoreResult<E> {
        E::validate_patch(&patch)?;
        self.update_with(id, move |_| patch).await
    }

    /// Like `update`, but the patch is built from the cached entity once
    /// this id's lock is held, so it sees every earlier mutation resolved.
    pub async fn update_with(
        &self,
        id: &EntityId,
        build: impl FnOnce(&E) -> E::Patch,
    ) -> StoreResult<E> {
        let caller = self.caller()?;
        let _lock = self.locks.acquire(id).await;

        let snapshot = self.cache.snapshot();
        let current = guard::check_owned(&caller, id, snapshot.get(id).cloned())?;
        let patch = build(&current);
        E::validate_patch(&patch)?;
        let mut optimistic = current.clone();
        optimistic.apply_patch(&patch);
        let applied = self.apply(&snapshot, |entries| cache::upsert(entries, optimistic))?;

        match self.store.update(&caller, id, patch).await {
            Ok(entity) => {
                let confirmed = entity.clone();
                self.confirm(&snapshot, id, |entries| cache::replace(entries, id, confirmed));
                Ok(entity)
            }
            Err(err) => {
                self.roll_back(&snapshot, applied, id, &err, |entries| {
                    cache::upsert(entries, current)
                });
                Err(err)
            }
        }
    }

    pub async fn delete(&self, id: &EntityId) -> StoreResult<E> {
        let caller = self.caller()?;
        let _lock = self.locks.acquire(id).await;

        let snapshot = self.cache.snapshot();
        let current = guard::check_owned(&caller, id, snapshot.get(id).cloned())?;
        let index = snapshot.position(id).unwrap_or(0);
        let applied = self.apply(&snapshot, |entries| {
            cache::remove(entries, id);
        })?;

        match self.store.delete(&caller, id).await {
            Ok(deleted) => {
                self.confirm(&snapshot, id, |entries| {
                    cache::remove(entries, id);
                });
                Ok(deleted)
            }
            Err(err) => {
                self.roll_back(&snapshot, applied, id, &err, |entries| {
                    cache::insert_at(entries, index, current)
                });
                Err(err)
            }
        }
    }

    fn apply(&self, snapshot: &Snapshot<E>, f: impl FnOnce(&mut Vec<E>)) -> StoreResult<u64> {
        match self.cache.write(snapshot.epoch(), f) {
            Applied::Yes(revision) => Ok(revision),
            Applied::Stale => Err(StoreError::Unauthorized("session ended".to_string())),
        }
    }

    fn confirm(
        &self,
        snapshot: &Snapshot<E>,
        id: &EntityId,
        f: impl FnOnce(&mut Vec<E>),
    ) -> Resolution {
        match self.cache.write(snapshot.epoch(), f) {
            Applied::Yes(_) => Resolution::Confirmed,
            Applied::Stale => {
                tracing::debug!(resource = E::RESOURCE, %id, "discarded confirmation from an ended session");
                Resolution::Discarded
            }
        }
    }

    fn roll_back(
        &self,
        snapshot: &Snapshot<E>,
        applied: u64,
        id: &EntityId,
        err: &StoreError,
        undo: impl FnOnce(&mut Vec<E>),
    ) -> Resolution {
        match self.cache.roll_back(snapshot, applied, undo) {
            Applied::Yes(_) => {
                tracing::warn!(
                    resource = E::RESOURCE,
                    %id,
                    kind = %err.kind(),
                    "rolled back optimistic change: {}",
                    err
                );
                Resolution::RolledBack
            }
            Applied::Stale => {
                tracing::debug!(resource = E::RESOURCE, %id, "discarded rollback from an ended session");
                Resolution::Discarded
            }
        }
    }
}

impl Coordinator<Job> {
    /// Moves a card to another pipeline column.
    pub async fn move_to(&self, id: &EntityId, stage: Stage) -> StoreResult<Job> {
        self.update(id, JobPatch::stage(stage)).await
    }
}

impl Coordinator<Company> {
    pub async fn toggle_star(&self, id: &EntityId) -> StoreResult<Company> {
        self.update_with(id, |company| CompanyPatch {
            starred: Some(!company.starred),
            ..Default::default()
        })
        .await
    }

    /// Records that the company's openings were checked on `day`.
    pub async fn touch(&self, id: &EntityId, day: NaiveDate) -> StoreResult<Company> {
        self.update(
            id,
            CompanyPatch {
                last_updated: Some(day),
                ..Default::default()
            },
        )
        .await
    }
}
