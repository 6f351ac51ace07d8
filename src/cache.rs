//! Session-scoped collection of entities, observed read-only by the CLI.
//!
//! Every write carries the epoch it was started under. `clear` bumps the
//! epoch, so completions that outlive a session are dropped instead of
//! resurrecting entities into the next one.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use crate::models::{Company, Entity, EntityId, Job, Stage};

#[derive(Debug)]
struct CacheState<E> {
    entries: Vec<E>,
    epoch: u64,
    revision: u64,
}

/// Full copy of the cache taken before an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<E> {
    entries: Vec<E>,
    epoch: u64,
    revision: u64,
}

impl<E: Entity> Snapshot<E> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&E> {
        self.entries.iter().find(|e| e.id() == id)
    }
}

/// Result of a write attempted under a given epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The write landed; carries the revision it produced.
    Yes(u64),
    /// The session ended since the epoch was captured.
    Stale,
}

pub struct EntityCache<E: Entity> {
    state: Mutex<CacheState<E>>,
    watch: watch::Sender<Vec<E>>,
}

impl<E: Entity> Default for EntityCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> EntityCache<E> {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(Vec::new());
        Self {
            state: Mutex::new(CacheState {
                entries: Vec::new(),
                epoch: 0,
                revision: 0,
            }),
            watch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<E>> {
        // Every write leaves the entries consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &CacheState<E>) {
        self.watch.send_replace(state.entries.clone());
    }

    /// Read-only view that updates on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<E>> {
        self.watch.subscribe()
    }

    pub fn entries(&self) -> Vec<E> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: &EntityId) -> Option<E> {
        self.lock().entries.iter().find(|e| e.id() == id).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn snapshot(&self) -> Snapshot<E> {
        let state = self.lock();
        Snapshot {
            entries: state.entries.clone(),
            epoch: state.epoch,
            revision: state.revision,
        }
    }

    /// Drops everything and starts a new epoch.
    pub fn clear(&self) -> u64 {
        let mut state = self.lock();
        state.entries.clear();
        state.epoch += 1;
        state.revision += 1;
        self.publish(&state);
        state.epoch
    }

    /// Replaces the whole collection with a fresh listing, deduplicated by id.
    pub fn load(&self, epoch: u64, entities: Vec<E>) -> Applied {
        self.write(epoch, |entries| {
            entries.clear();
            for entity in entities {
                upsert(entries, entity);
            }
        })
    }

    /// Runs `f` against the entries if `epoch` is still current.
    pub fn write(&self, epoch: u64, f: impl FnOnce(&mut Vec<E>)) -> Applied {
        let mut state = self.lock();
        if state.epoch != epoch {
            return Applied::Stale;
        }
        f(&mut state.entries);
        state.revision += 1;
        self.publish(&state);
        Applied::Yes(state.revision)
    }

    /// Puts the cache back to `snapshot`.
    ///
    /// When nothing else wrote since `applied_revision` the snapshot is
    /// restored verbatim. Otherwise another entity's write is interleaved
    /// and only `undo` runs, leaving that write in place.
    pub fn roll_back(
        &self,
        snapshot: &Snapshot<E>,
        applied_revision: u64,
        undo: impl FnOnce(&mut Vec<E>),
    ) -> Applied {
        let mut state = self.lock();
        if state.epoch != snapshot.epoch {
            return Applied::Stale;
        }
        if state.revision == applied_revision {
            state.entries = snapshot.entries.clone();
        } else {
            undo(&mut state.entries);
        }
        state.revision += 1;
        self.publish(&state);
        Applied::Yes(state.revision)
    }
}

// --- Entry helpers, keeping ids unique ---

pub fn position_of<E: Entity>(entries: &[E], id: &EntityId) -> Option<usize> {
    entries.iter().position(|e| e.id() == id)
}

/// Replaces in place when the id exists, appends otherwise.
pub fn upsert<E: Entity>(entries: &mut Vec<E>, entity: E) {
    match position_of(entries, entity.id()) {
        Some(idx) => entries[idx] = entity,
        None => entries.push(entity),
    }
}

/// Swaps the entry keyed by `id` for `entity`, which may carry a new id.
pub fn replace<E: Entity>(entries: &mut Vec<E>, id: &EntityId, entity: E) {
    if entity.id() != id {
        // The new id must not end up twice
        entries.retain(|e| e.id() != entity.id());
    }
    match position_of(entries, id) {
        Some(idx) => entries[idx] = entity,
        None => entries.push(entity),
    }
}

pub fn remove<E: Entity>(entries: &mut Vec<E>, id: &EntityId) -> Option<E> {
    position_of(entries, id).map(|idx| entries.remove(idx))
}

/// Re-inserts at `index`, clamped to the current length.
pub fn insert_at<E: Entity>(entries: &mut Vec<E>, index: usize, entity: E) {
    entries.retain(|e| e.id() != entity.id());
    let index = index.min(entries.len());
    entries.insert(index, entity);
}

// --- Display orderings ---

impl EntityCache<Company> {
    /// Starred companies first, otherwise in cache order.
    pub fn starred_first(&self) -> Vec<Company> {
        let mut companies = self.entries();
        companies.sort_by_key(|c| !c.starred);
        companies
    }
}

impl EntityCache<Job> {
    /// Jobs grouped into board columns, in pipeline order.
    pub fn by_stage(&self) -> Vec<(Stage, Vec<Job>)> {
        let jobs = self.entries();
        Stage::ALL
            .iter()
            .map(|stage| {
                let column = jobs.iter().filter(|j| j.status == *stage).cloned().collect();
                (*stage, column)
            })
            .collect()
    }
}
