use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::guard;
use crate::identity::Identity;
use crate::models::{Entity, EntityId};
use crate::store::RemoteStore;

/// Error body returned by the API for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Body of a successful delete.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse<E> {
    pub message: String,
    pub deleted: E,
}

/// Client for the jobboard HTTP API.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url<E: Entity>(&self) -> String {
        format!("{}/api/{}", self.base_url, E::RESOURCE)
    }

    fn item_url<E: Entity>(&self, id: &EntityId) -> String {
        format!("{}/api/{}/{}", self.base_url, E::RESOURCE, id)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        caller: &Identity,
        request: RequestBuilder,
    ) -> StoreResult<T> {
        caller.require_authenticated()?;
        let response = request
            .bearer_auth(&caller.bearer_token)
            .send()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to reach store: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            return Err(error_for_status(status, message));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to parse store response: {}", e)))
    }
}

pub fn error_for_status(status: StatusCode, message: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED => StoreError::Unauthorized(message),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            StoreError::Validation(message)
        }
        _ => StoreError::Transport(format!(
            "store request failed with status {}: {}",
            status, message
        )),
    }
}

#[async_trait]
impl<E: Entity> RemoteStore<E> for HttpStore {
    async fn list(&self, caller: &Identity) -> StoreResult<Vec<E>> {
        let request = self.client.get(self.collection_url::<E>());
        let entities: Vec<E> = self.send(caller, request).await?;
        guard::retain_owned(caller, entities)
    }

    async fn get(&self, caller: &Identity, id: &EntityId) -> StoreResult<E> {
        let request = self.client.get(self.item_url::<E>(id));
        let entity: E = self.send(caller, request).await?;
        guard::check_owned(caller, id, Some(entity))
    }

    async fn create(&self, caller: &Identity, draft: E::Draft) -> StoreResult<E> {
        E::validate_draft(&draft)?;
        let request = self.client.post(self.collection_url::<E>()).json(&draft);
        let entity: E = self.send(caller, request).await?;
        let id = entity.id().clone();
        guard::check_owned(caller, &id, Some(entity))
    }

    async fn update(&self, caller: &Identity, id: &EntityId, patch: E::Patch) -> StoreResult<E> {
        E::validate_patch(&patch)?;
        let request = self.client.put(self.item_url::<E>(id)).json(&patch);
        let entity: E = self.send(caller, request).await?;
        guard::check_owned(caller, id, Some(entity))
    }

    async fn delete(&self, caller: &Identity, id: &EntityId) -> StoreResult<E> {
        let request = self.client.delete(self.item_url::<E>(id));
        let response: DeleteResponse<E> = self.send(caller, request).await?;
        guard::check_owned(caller, id, Some(response.deleted))
    }
}
