use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};
use crate::models::UserId;

/// Who is calling, as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub caller_id: UserId,
    pub bearer_token: String,
    pub is_authenticated: bool,
}

impl Identity {
    pub fn authenticated(caller_id: UserId, bearer_token: impl Into<String>) -> Self {
        Self {
            caller_id,
            bearer_token: bearer_token.into(),
            is_authenticated: true,
        }
    }

    #[cfg(test)]
    pub fn signed_out(caller_id: UserId) -> Self {
        Self {
            caller_id,
            bearer_token: String::new(),
            is_authenticated: false,
        }
    }

    pub fn require_authenticated(&self) -> StoreResult<&UserId> {
        if self.is_authenticated {
            Ok(&self.caller_id)
        } else {
            Err(StoreError::unauthenticated())
        }
    }
}

/// Bearer token -> caller id lookup used by the HTTP server.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: BTreeMap<String, UserId>,
}

impl TokenRegistry {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token, UserId::new(user)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Resolves an `Authorization` header value.
    pub fn resolve(&self, header: Option<&str>) -> StoreResult<Identity> {
        let header = header.ok_or_else(|| {
            StoreError::Unauthorized("no token provided or incorrect format".to_string())
        })?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                StoreError::Unauthorized("no token provided or incorrect format".to_string())
            })?;
        let caller = self
            .tokens
            .get(token)
            .ok_or_else(|| StoreError::Unauthorized("invalid token".to_string()))?;
        Ok(Identity::authenticated(caller.clone(), token))
    }
}
