use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::guard;
use crate::identity::Identity;
use crate::models::{Company, Entity, EntityId, Job, Position, Stage};
use crate::store::RemoteStore;

/// Authoritative store kept in a SQLite file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: None,
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_path() -> PathBuf {
        // XDG data directory, or the working directory as a fallback
        match directories::ProjectDirs::from("", "", "jobboard") {
            Some(proj_dirs) => proj_dirs.data_dir().join("jobboard.db"),
            None => PathBuf::from("jobboard.db"),
        }
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'wishlist'
                    CHECK (status IN ('wishlist', 'applied', 'interview', 'offer', 'rejected')),
                notes TEXT NOT NULL DEFAULT '',
                pos_x REAL NOT NULL DEFAULT 0,
                pos_y REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS companies (
                id TEXT PRIMARY KEY NOT NULL,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                custom_name TEXT,
                starred INTEGER NOT NULL DEFAULT 0,
                last_updated TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner_id);
            CREATE INDEX IF NOT EXISTS idx_companies_owner ON companies(owner_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let conn = self.conn()?;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('jobs', 'companies')",
            [],
            |row| row.get(0),
        )?;
        if tables < 2 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobboard init' first."
            ));
        }
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Runs `op` on the blocking pool with the connection locked.
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> StoreResult<T> {
            let guard = lock(&conn)?;
            op(&guard)
        })
            .await
            .map_err(|e| StoreError::Transport(format!("database task failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::Transport("database lock poisoned".to_string()))
}

// --- Row operations, shared by every entity type ---

fn list_rows<E: SqlRecord>(conn: &Connection, caller: &Identity) -> StoreResult<Vec<E>> {
    let owner = caller.require_authenticated()?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE owner_id = ?1 ORDER BY created_at DESC",
        E::SELECT
    ))?;
    let rows = stmt.query_map([owner.as_str()], E::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Fetches by id alone so the guard sees foreign rows too.
fn find_row<E: SqlRecord>(conn: &Connection, id: &EntityId) -> StoreResult<Option<E>> {
    let result = conn.query_row(
        &format!("{} WHERE id = ?1", E::SELECT),
        [id.as_str()],
        E::from_row,
    );
    match result {
        Ok(entity) => Ok(Some(entity)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn get_row<E: SqlRecord>(conn: &Connection, caller: &Identity, id: &EntityId) -> StoreResult<E> {
    caller.require_authenticated()?;
    guard::check_owned(caller, id, find_row::<E>(conn, id)?)
}

fn insert_row<E: SqlRecord>(
    conn: &Connection,
    caller: &Identity,
    draft: E::Draft,
) -> StoreResult<E> {
    let owner = caller.require_authenticated()?.clone();
    E::validate_draft(&draft)?;

    let entity = E::from_draft(EntityId::generate(), owner, Utc::now(), draft);
    match E::insert(conn, &entity) {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            tracing::error!(resource = E::RESOURCE, id = %entity.id(), "id collision on insert");
            return Err(StoreError::Transport(format!(
                "id collision on {} {}",
                E::RESOURCE,
                entity.id()
            )));
        }
        Err(e) => return Err(e.into()),
    }
    find_row::<E>(conn, entity.id())?.ok_or_else(|| {
        StoreError::Transport(format!("failed to create {}, no row returned", E::RESOURCE))
    })
}

fn update_row<E: SqlRecord>(
    conn: &Connection,
    caller: &Identity,
    id: &EntityId,
    patch: E::Patch,
) -> StoreResult<E> {
    caller.require_authenticated()?;
    E::validate_patch(&patch)?;

    let mut entity = guard::check_owned(caller, id, find_row::<E>(conn, id)?)?;
    entity.apply_patch(&patch);
    entity.stamp_updated(Utc::now());

    // Owner is matched again in the WHERE clause
    if E::write(conn, &entity)? == 0 {
        return Err(StoreError::not_found(E::RESOURCE, id));
    }
    find_row::<E>(conn, id)?.ok_or_else(|| StoreError::not_found(E::RESOURCE, id))
}

fn delete_row<E: SqlRecord>(conn: &Connection, caller: &Identity, id: &EntityId) -> StoreResult<E> {
    caller.require_authenticated()?;
    let snapshot = guard::check_owned(caller, id, find_row::<E>(conn, id)?)?;
    let removed = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1 AND owner_id = ?2", E::RESOURCE),
        params![id.as_str(), snapshot.owner_id().as_str()],
    )?;
    if removed == 0 {
        return Err(StoreError::not_found(E::RESOURCE, id));
    }
    Ok(snapshot)
}

#[async_trait]
impl<E: SqlRecord> RemoteStore<E> for SqliteStore {
    async fn list(&self, caller: &Identity) -> StoreResult<Vec<E>> {
        let caller = caller.clone();
        self.run(move |conn| list_rows(conn, &caller)).await
    }

    async fn get(&self, caller: &Identity, id: &EntityId) -> StoreResult<E> {
        let (caller, id) = (caller.clone(), id.clone());
        self.run(move |conn| get_row(conn, &caller, &id)).await
    }

    async fn create(&self, caller: &Identity, draft: E::Draft) -> StoreResult<E> {
        let caller = caller.clone();
        self.run(move |conn| insert_row::<E>(conn, &caller, draft)).await
    }

    async fn update(&self, caller: &Identity, id: &EntityId, patch: E::Patch) -> StoreResult<E> {
        let (caller, id) = (caller.clone(), id.clone());
        self.run(move |conn| update_row::<E>(conn, &caller, &id, patch)).await
    }

    async fn delete(&self, caller: &Identity, id: &EntityId) -> StoreResult<E> {
        let (caller, id) = (caller.clone(), id.clone());
        self.run(move |conn| delete_row(conn, &caller, &id)).await
    }
}

/// Column mapping for an entity table named after `Entity::RESOURCE`.
pub trait SqlRecord: Entity {
    const SELECT: &'static str;

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self>;

    fn insert(conn: &Connection, entity: &Self) -> rusqlite::Result<usize>;

    /// Writes every mutable column, matching on both id and owner.
    fn write(conn: &Connection, entity: &Self) -> rusqlite::Result<usize>;
}

impl SqlRecord for Job {
    const SELECT: &'static str = "SELECT id, owner_id, title, company, status, notes, pos_x, pos_y,
                created_at, updated_at
         FROM jobs";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Job {
            id: EntityId::new(row.get::<_, String>(0)?),
            owner_id: crate::models::UserId::new(row.get::<_, String>(1)?),
            title: row.get(2)?,
            company: row.get(3)?,
            status: row.get(4)?,
            notes: row.get(5)?,
            position: Position {
                x: row.get(6)?,
                y: row.get(7)?,
            },
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(conn: &Connection, job: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO jobs (id, owner_id, title, company, status, notes, pos_x, pos_y,
                               created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id.as_str(),
                job.owner_id.as_str(),
                job.title,
                job.company,
                job.status,
                job.notes,
                job.position.x,
                job.position.y,
                job.created_at,
                job.updated_at,
            ],
        )
    }

    fn write(conn: &Connection, job: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE jobs SET title = ?1, company = ?2, status = ?3, notes = ?4,
                             pos_x = ?5, pos_y = ?6, updated_at = ?7
             WHERE id = ?8 AND owner_id = ?9",
            params![
                job.title,
                job.company,
                job.status,
                job.notes,
                job.position.x,
                job.position.y,
                job.updated_at,
                job.id.as_str(),
                job.owner_id.as_str(),
            ],
        )
    }
}

impl SqlRecord for Company {
    const SELECT: &'static str = "SELECT id, owner_id, name, custom_name, starred, last_updated,
                created_at, updated_at
         FROM companies";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Company {
            id: EntityId::new(row.get::<_, String>(0)?),
            owner_id: crate::models::UserId::new(row.get::<_, String>(1)?),
            name: row.get(2)?,
            custom_name: row.get(3)?,
            starred: row.get(4)?,
            last_updated: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn insert(conn: &Connection, company: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO companies (id, owner_id, name, custom_name, starred, last_updated,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                company.id.as_str(),
                company.owner_id.as_str(),
                company.name,
                company.custom_name,
                company.starred,
                company.last_updated,
                company.created_at,
                company.updated_at,
            ],
        )
    }

    fn write(conn: &Connection, company: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE companies SET name = ?1, custom_name = ?2, starred = ?3, last_updated = ?4,
                                  updated_at = ?5
             WHERE id = ?6 AND owner_id = ?7",
            params![
                company.name,
                company.custom_name,
                company.starred,
                company.last_updated,
                company.updated_at,
                company.id.as_str(),
                company.owner_id.as_str(),
            ],
        )
    }
}

impl ToSql for Stage {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Stage {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<Stage>()
            .map_err(|e| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{CompanyDraft, CompanyPatch, JobDraft, JobPatch, UserId};

    fn alice() -> Identity {
        Identity::authenticated(UserId::new("alice"), "token-a")
    }

    fn bob() -> Identity {
        Identity::authenticated(UserId::new("bob"), "token-b")
    }

    fn draft(title: &str) -> JobDraft {
        JobDraft {
            title: title.to_string(),
            company: "Acme".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_owner_and_defaults() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job: Job = store.create(&alice(), draft("Engineer")).await.unwrap();

        assert!(!job.id.as_str().is_empty());
        assert!(!job.id.is_tentative());
        assert_eq!(job.owner_id, UserId::new("alice"));
        assert_eq!(job.status, Stage::Wishlist);
        assert_eq!(job.created_at, job.updated_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_calls_from_spawned_tasks() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let job: Job = store
                        .create(&alice(), draft(&format!("Job {}", i)))
                        .await
                        .unwrap();
                    let patch = JobPatch::stage(Stage::Applied);
                    RemoteStore::<Job>::update(store.as_ref(), &alice(), &job.id, patch)
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().status, Stage::Applied);
        }
        let mine: Vec<Job> = store.list(&alice()).await.unwrap();
        assert_eq!(mine.len(), 8);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let store = SqliteStore::open_in_memory().unwrap();
        let _: Job = store.create(&alice(), draft("Engineer")).await.unwrap();
        let _: Job = store.create(&alice(), draft("Manager")).await.unwrap();
        let _: Job = store.create(&bob(), draft("Designer")).await.unwrap();

        let mine: Vec<Job> = store.list(&alice()).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|j| j.owner_id == UserId::new("alice")));
        // Newest first
        assert_eq!(mine[0].title, "Manager");
    }

    #[tokio::test]
    async fn test_foreign_entity_is_not_found_everywhere() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job: Job = store.create(&alice(), draft("Engineer")).await.unwrap();

        let get = RemoteStore::<Job>::get(&store, &bob(), &job.id).await.unwrap_err();
        let update = RemoteStore::<Job>::update(&store, &bob(), &job.id, JobPatch::stage(Stage::Offer))
            .await
            .unwrap_err();
        let delete = RemoteStore::<Job>::delete(&store, &bob(), &job.id).await.unwrap_err();
        let missing = RemoteStore::<Job>::get(&store, &bob(), &EntityId::new("nope"))
            .await
            .unwrap_err();

        for err in [&get, &update, &delete, &missing] {
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        assert_eq!(get.message().replace(job.id.as_str(), "X"), missing.message().replace("nope", "X"));

        // Untouched for the owner
        let still: Job = store.get(&alice(), &job.id).await.unwrap();
        assert_eq!(still, job);
    }

    #[tokio::test]
    async fn test_update_merges_and_restamps() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job: Job = store.create(&alice(), draft("Engineer")).await.unwrap();

        let updated: Job = store
            .update(&alice(), &job.id, JobPatch::stage(Stage::Interview))
            .await
            .unwrap();
        assert_eq!(updated.status, Stage::Interview);
        assert_eq!(updated.title, "Engineer");
        assert_eq!(updated.created_at, job.created_at);
        assert!(updated.updated_at >= job.updated_at);
        assert_eq!(updated.owner_id, job.owner_id);
    }

    #[tokio::test]
    async fn test_empty_update_is_validation_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job: Job = store.create(&alice(), draft("Engineer")).await.unwrap();
        let err = RemoteStore::<Job>::update(&store, &alice(), &job.id, JobPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_returns_snapshot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job: Job = store.create(&alice(), draft("Engineer")).await.unwrap();

        let deleted: Job = store.delete(&alice(), &job.id).await.unwrap();
        assert_eq!(deleted, job);

        let err = RemoteStore::<Job>::get(&store, &alice(), &job.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unauthenticated_calls_are_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let signed_out = Identity::signed_out(UserId::new("alice"));
        let err = RemoteStore::<Job>::list(&store, &signed_out).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        let err = RemoteStore::<Job>::create(&store, &signed_out, draft("Engineer"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_company_round_trip_through_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let company: Company = store
            .create(
                &alice(),
                CompanyDraft {
                    name: "Acme".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let today = Utc::now().date_naive();
        let updated: Company = store
            .update(
                &alice(),
                &company.id,
                CompanyPatch {
                    starred: Some(true),
                    last_updated: Some(today),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.starred);
        assert_eq!(updated.last_updated, Some(today));
        assert_eq!(updated.display_name(), "Acme");
    }

    #[test]
    fn test_ensure_initialized_on_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("nested/jobboard.db")).unwrap();
        assert!(store.ensure_initialized().is_err());
        store.init().unwrap();
        assert!(store.ensure_initialized().is_ok());
        assert!(store.path().is_some());
    }
}
