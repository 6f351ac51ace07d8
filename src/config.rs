use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::identity::{Identity, TokenRegistry};
use crate::models::UserId;
use crate::store::SqliteStore;

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
const LOCAL_USER: &str = "local";

/// Settings from `config.json`, overridden by `JOBBOARD_*` environment variables.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the jobboard API, e.g. `http://127.0.0.1:3001`.
    pub api_url: Option<String>,
    /// Bearer credential issued to this user.
    pub token: Option<String>,
    pub user_id: Option<String>,
    /// Listen address for `jobboard serve`.
    pub bind: Option<String>,
    pub db_path: Option<PathBuf>,
    /// Server side: bearer token -> user id.
    pub tokens: BTreeMap<String, String>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "jobboard")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("JOBBOARD_API_URL") {
            self.api_url = Some(url);
        }
        if let Some(token) = lookup("JOBBOARD_TOKEN") {
            self.token = Some(token);
        }
        if let Some(user) = lookup("JOBBOARD_USER") {
            self.user_id = Some(user);
        }
        if let Some(bind) = lookup("JOBBOARD_BIND") {
            self.bind = Some(bind);
        }
        if let Some(db) = lookup("JOBBOARD_DB") {
            self.db_path = Some(PathBuf::from(db));
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(SqliteStore::default_path)
    }

    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND)
    }

    pub fn api_url(&self) -> Result<&str> {
        self.api_url.as_deref().ok_or_else(|| {
            anyhow!("No API URL configured. Set JOBBOARD_API_URL or use --local.")
        })
    }

    /// Identity presented to a remote API.
    pub fn identity(&self) -> Result<Identity> {
        let user = self
            .user_id
            .as_deref()
            .context("No user configured. Set it with: export JOBBOARD_USER=your-user-id")?;
        let token = self
            .token
            .as_deref()
            .context("No token configured. Set it with: export JOBBOARD_TOKEN=your-token")?;
        Ok(Identity::authenticated(UserId::new(user), token))
    }

    /// Identity for the on-disk store, which trusts the configured user.
    pub fn local_identity(&self) -> Identity {
        let user = self.user_id.as_deref().unwrap_or(LOCAL_USER);
        Identity::authenticated(UserId::new(user), self.token.clone().unwrap_or_default())
    }

    pub fn token_registry(&self) -> TokenRegistry {
        TokenRegistry::new(self.tokens.clone())
    }
}
