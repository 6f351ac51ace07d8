use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::error::StoreResult;
use crate::identity::Identity;
use crate::models::{Company, Job};
use crate::store::RemoteStore;

/// Caches and coordinators for one signed-in user.
pub struct Session {
    pub jobs: Coordinator<Job>,
    pub companies: Coordinator<Company>,
}

impl Session {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: RemoteStore<Job> + RemoteStore<Company> + 'static,
    {
        Self {
            jobs: Coordinator::new(store.clone()),
            companies: Coordinator::new(store),
        }
    }

    /// Reacts to an identity transition from the identity provider.
    ///
    /// Authenticated: clear both caches and reload them from the store.
    /// Anything else: clear both caches.
    pub async fn on_identity(&self, identity: Identity) -> StoreResult<()> {
        if !identity.is_authenticated {
            self.sign_out();
            return Ok(());
        }

        tracing::info!(caller = %identity.caller_id, "session started");
        self.jobs.begin(identity.clone());
        self.companies.begin(identity);
        let (jobs, companies) = tokio::join!(self.jobs.reload(), self.companies.reload());
        tracing::debug!(jobs = ?jobs, companies = ?companies, "session caches loaded");
        jobs?;
        companies?;
        Ok(())
    }

    pub fn sign_out(&self) {
        tracing::info!("session ended");
        self.jobs.end();
        self.companies.end();
    }
}
