//! HTTP API over the SQLite store: `/api/jobs` and `/api/companies`.

use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{ErrorKind, StoreError};
use crate::identity::{Identity, TokenRegistry};
use crate::models::{Company, EntityId, Job};
use crate::store::http::{DeleteResponse, ErrorBody};
use crate::store::sqlite::SqlRecord;
use crate::store::{self, RemoteStore, SqliteStore};

pub struct AppState {
    store: Arc<SqliteStore>,
    tokens: TokenRegistry,
}

type SharedState = Arc<AppState>;

pub fn router(store: Arc<SqliteStore>, tokens: TokenRegistry) -> Router {
    let state = Arc::new(AppState { store, tokens });
    Router::new()
        .route("/", get(|| async { "jobboard API" }))
        .merge(resource_routes::<Job>())
        .merge(resource_routes::<Company>())
        .with_state(state)
}

fn resource_routes<E: SqlRecord>() -> Router<SharedState> {
    let collection = format!("/api/{}", E::RESOURCE);
    let item = format!("/api/{}/:id", E::RESOURCE);
    Router::new()
        .route(&collection, get(list::<E>).post(create::<E>))
        .route(&item, get(fetch::<E>).put(update::<E>).delete(remove::<E>))
}

pub async fn serve(store: Arc<SqliteStore>, tokens: TokenRegistry, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind))?;
    if tokens.is_empty() {
        tracing::warn!("no tokens configured; every request will be rejected");
    }
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    println!("jobboard API listening on http://{}", addr);
    axum::serve(listener, router(store, tokens)).await?;
    Ok(())
}

/// The authenticated caller, resolved from the bearer token.
pub struct Caller(Identity);

#[async_trait]
impl FromRequestParts<SharedState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        Ok(Caller(state.tokens.resolve(header)?))
    }
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Transport => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::debug!(%status, "request rejected: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn list<E: SqlRecord>(
    State(state): State<SharedState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<E>>, ApiError> {
    let entities = RemoteStore::<E>::list(state.store.as_ref(), &caller).await?;
    Ok(Json(entities))
}

async fn create<E: SqlRecord>(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<E>), ApiError> {
    let draft = store::decode_draft::<E>(body)?;
    let entity = RemoteStore::<E>::create(state.store.as_ref(), &caller, draft).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

async fn fetch<E: SqlRecord>(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<E>, ApiError> {
    let id = EntityId::new(id);
    let entity = RemoteStore::<E>::get(state.store.as_ref(), &caller, &id).await?;
    Ok(Json(entity))
}

async fn update<E: SqlRecord>(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<E>, ApiError> {
    let id = EntityId::new(id);
    let patch = store::decode_patch::<E>(body)?;
    let entity = RemoteStore::<E>::update(state.store.as_ref(), &caller, &id, patch).await?;
    Ok(Json(entity))
}

async fn remove<E: SqlRecord>(
    State(state): State<SharedState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse<E>>, ApiError> {
    let id = EntityId::new(id);
    let deleted = RemoteStore::<E>::delete(state.store.as_ref(), &caller, &id).await?;
    Ok(Json(DeleteResponse {
        message: format!("{} {} deleted successfully", E::RESOURCE, id),
        deleted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDraft, JobPatch, Stage, UserId};
    use crate::session::Session;
    use crate::store::HttpStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn spawn_server() -> String {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut tokens = BTreeMap::new();
        tokens.insert("token-a".to_string(), "alice".to_string());
        tokens.insert("token-b".to_string(), "bob".to_string());
        let app = router(store, TokenRegistry::new(tokens));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn alice() -> Identity {
        Identity::authenticated(UserId::new("alice"), "token-a")
    }

    fn bob() -> Identity {
        Identity::authenticated(UserId::new("bob"), "token-b")
    }

    fn draft() -> JobDraft {
        JobDraft {
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_crud_over_http() {
        let base = spawn_server().await;
        let store = HttpStore::new(&base);

        let job: Job = store.create(&alice(), draft()).await.unwrap();
        assert_eq!(job.owner_id, UserId::new("alice"));
        assert_eq!(job.status, Stage::Wishlist);

        let listed: Vec<Job> = store.list(&alice()).await.unwrap();
        assert_eq!(listed, vec![job.clone()]);

        let moved: Job = store
            .update(&alice(), &job.id, JobPatch::stage(Stage::Interview))
            .await
            .unwrap();
        assert_eq!(moved.status, Stage::Interview);

        let deleted: Job = store.delete(&alice(), &job.id).await.unwrap();
        assert_eq!(deleted, moved);
        let err = RemoteStore::<Job>::get(&store, &alice(), &job.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_other_users_get_not_found() {
        let base = spawn_server().await;
        let store = HttpStore::new(&base);
        let job: Job = store.create(&alice(), draft()).await.unwrap();

        let get = RemoteStore::<Job>::get(&store, &bob(), &job.id).await.unwrap_err();
        let missing = RemoteStore::<Job>::get(&store, &bob(), &EntityId::new("missing"))
            .await
            .unwrap_err();
        let update = RemoteStore::<Job>::update(&store, &bob(), &job.id, JobPatch::stage(Stage::Offer))
            .await
            .unwrap_err();
        let delete = RemoteStore::<Job>::delete(&store, &bob(), &job.id).await.unwrap_err();
        for err in [get, missing, update, delete] {
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        let bobs: Vec<Job> = store.list(&bob()).await.unwrap();
        assert!(bobs.is_empty());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_unauthorized() {
        let base = spawn_server().await;
        let store = HttpStore::new(&base);
        let forged = Identity::authenticated(UserId::new("alice"), "forged");
        let err = RemoteStore::<Job>::list(&store, &forged).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let response = reqwest::get(format!("{}/api/jobs", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        let body: ErrorBody = response.json().await.unwrap();
        assert!(body.error.contains("no token"));
    }

    #[tokio::test]
    async fn test_client_supplied_ids_and_owner_are_ignored() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let created: Job = client
            .post(format!("{}/api/jobs", base))
            .bearer_auth("token-a")
            .json(&json!({
                "id": "mine",
                "owner_id": "bob",
                "title": "Engineer",
                "company": "Acme"
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_ne!(created.id, EntityId::new("mine"));
        assert_eq!(created.owner_id, UserId::new("alice"));

        let updated: Job = client
            .put(format!("{}/api/jobs/{}", base, created.id))
            .bearer_auth("token-a")
            .json(&json!({"owner_id": "bob", "id": "other", "status": "offer"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.owner_id, UserId::new("alice"));
        assert_eq!(updated.status, Stage::Offer);

        let response = client
            .put(format!("{}/api/jobs/{}", base, created.id))
            .bearer_auth("token-a")
            .json(&json!({"owner_id": "bob"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_requires_fields() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/api/companies", base))
            .bearer_auth("token-a")
            .json(&json!({"starred": true}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_response_carries_snapshot() {
        let base = spawn_server().await;
        let store = HttpStore::new(&base);
        let company: Company = store
            .create(
                &alice(),
                crate::models::CompanyDraft {
                    name: "Acme".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let body: Value = reqwest::Client::new()
            .delete(format!("{}/api/companies/{}", base, company.id))
            .bearer_auth("token-a")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(body["message"].as_str().unwrap().contains("deleted"));
        assert_eq!(body["deleted"]["name"], "Acme");
    }

    #[tokio::test]
    async fn test_session_over_http() {
        let base = spawn_server().await;
        let session = Session::new(Arc::new(HttpStore::new(&base)));
        session.on_identity(alice()).await.unwrap();

        let job = session.jobs.create(draft()).await.unwrap();
        let moved = session.jobs.move_to(&job.id, Stage::Applied).await.unwrap();
        assert_eq!(session.jobs.get(&job.id).unwrap(), moved);

        // A fresh session sees the same state from the store
        let other = Session::new(Arc::new(HttpStore::new(&base)));
        other.on_identity(alice()).await.unwrap();
        assert_eq!(other.jobs.cache().entries(), vec![moved]);
    }
}
