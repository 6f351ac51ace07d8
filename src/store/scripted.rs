//! Test double around an in-memory `SqliteStore` whose mutations can be
//! held pending, failed wholesale (offline), or failed once per id.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::MutexGuard;

use crate::error::{StoreError, StoreResult};
use crate::identity::Identity;
use crate::models::EntityId;
use crate::store::sqlite::SqlRecord;
use crate::store::{RemoteStore, SqliteStore};

pub struct ScriptedStore {
    inner: SqliteStore,
    offline: AtomicBool,
    calls: AtomicUsize,
    hold: tokio::sync::Mutex<()>,
    fail_once: Mutex<HashSet<EntityId>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().expect("in-memory sqlite"),
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            hold: tokio::sync::Mutex::new(()),
            fail_once: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Mutations that arrive while the guard lives wait for it to drop.
    pub async fn hold(&self) -> MutexGuard<'_, ()> {
        self.hold.lock().await
    }

    pub fn fail_next_for(&self, id: &EntityId) {
        self.fail_once.lock().unwrap().insert(id.clone());
    }

    /// Mutation calls that reached the store so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn gate(&self, id: Option<&EntityId>) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        drop(self.hold.lock().await);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("store unreachable".to_string()));
        }
        if let Some(id) = id {
            if self.fail_once.lock().unwrap().remove(id) {
                return Err(StoreError::Transport(format!("injected failure for {}", id)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<E: SqlRecord> RemoteStore<E> for ScriptedStore {
    async fn list(&self, caller: &Identity) -> StoreResult<Vec<E>> {
        RemoteStore::<E>::list(&self.inner, caller).await
    }

    async fn get(&self, caller: &Identity, id: &EntityId) -> StoreResult<E> {
        RemoteStore::<E>::get(&self.inner, caller, id).await
    }

    async fn create(&self, caller: &Identity, draft: E::Draft) -> StoreResult<E> {
        self.gate(None).await?;
        RemoteStore::<E>::create(&self.inner, caller, draft).await
    }

    async fn update(&self, caller: &Identity, id: &EntityId, patch: E::Patch) -> StoreResult<E> {
        self.gate(Some(id)).await?;
        RemoteStore::<E>::update(&self.inner, caller, id, patch).await
    }

    async fn delete(&self, caller: &Identity, id: &EntityId) -> StoreResult<E> {
        self.gate(Some(id)).await?;
        RemoteStore::<E>::delete(&self.inner, caller, id).await
    }
}
