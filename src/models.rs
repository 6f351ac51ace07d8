use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

const TENTATIVE_PREFIX: &str = "tmp-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Server-side id for a freshly inserted row.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Placeholder id for an optimistic create; never sent to the store.
    pub fn tentative() -> Self {
        Self(format!("{}{}", TENTATIVE_PREFIX, uuid::Uuid::new_v4()))
    }

    #[cfg(test)]
    pub fn is_tentative(&self) -> bool {
        self.0.starts_with(TENTATIVE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Pipeline stage of a job card, in board order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Wishlist,
    Applied,
    Interview,
    Offer,
    Rejected,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Wishlist,
        Stage::Applied,
        Stage::Interview,
        Stage::Offer,
        Stage::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Wishlist => "wishlist",
            Stage::Applied => "applied",
            Stage::Interview => "interview",
            Stage::Offer => "offer",
            Stage::Rejected => "rejected",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Stage::Wishlist => "Wishlist",
            Stage::Applied => "Applied",
            Stage::Interview => "Interview",
            Stage::Offer => "Offer",
            Stage::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown stage '{}' (expected wishlist, applied, interview, offer, rejected)",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Shared shape of every record kept in sync with the store.
pub trait Entity:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Draft: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Patch: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Collection name on the wire and table name in the store.
    const RESOURCE: &'static str;

    fn id(&self) -> &EntityId;
    fn owner_id(&self) -> &UserId;

    fn validate_draft(draft: &Self::Draft) -> StoreResult<()>;
    fn validate_patch(patch: &Self::Patch) -> StoreResult<()>;

    fn from_draft(id: EntityId, owner_id: UserId, now: DateTime<Utc>, draft: Self::Draft) -> Self;

    /// Merges the provided fields; `id`, owner and `created_at` are untouched.
    fn apply_patch(&mut self, patch: &Self::Patch);

    fn stamp_updated(&mut self, now: DateTime<Utc>);
}

// --- Jobs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: EntityId,
    pub owner_id: UserId,
    pub title: String,
    pub company: String,
    pub status: Stage,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDraft {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub status: Stage,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl JobPatch {
    pub fn stage(stage: Stage) -> Self {
        Self {
            status: Some(stage),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.company.is_none()
            && self.status.is_none()
            && self.notes.is_none()
            && self.position.is_none()
    }
}

impl Entity for Job {
    type Draft = JobDraft;
    type Patch = JobPatch;

    const RESOURCE: &'static str = "jobs";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    fn validate_draft(draft: &JobDraft) -> StoreResult<()> {
        if draft.title.trim().is_empty() || draft.company.trim().is_empty() {
            return Err(StoreError::Validation(
                "title and company are required".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_patch(patch: &JobPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(StoreError::Validation(
                "update payload cannot be empty".to_string(),
            ));
        }
        if matches!(&patch.title, Some(t) if t.trim().is_empty())
            || matches!(&patch.company, Some(c) if c.trim().is_empty())
        {
            return Err(StoreError::Validation(
                "title and company cannot be blank".to_string(),
            ));
        }
        Ok(())
    }

    fn from_draft(id: EntityId, owner_id: UserId, now: DateTime<Utc>, draft: JobDraft) -> Self {
        Job {
            id,
            owner_id,
            title: draft.title,
            company: draft.company,
            status: draft.status,
            notes: draft.notes,
            position: draft.position,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &JobPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(company) = &patch.company {
            self.company = company.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
    }

    fn stamp_updated(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

// --- Companies ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: EntityId,
    pub owner_id: UserId,
    pub name: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub last_updated: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn display_name(&self) -> &str {
        match self.custom_name.as_deref() {
            Some(custom) if !custom.trim().is_empty() => custom,
            _ => &self.name,
        }
    }

    pub fn is_stale(&self, frequency: UpdateFrequency, today: NaiveDate) -> bool {
        match (self.last_updated, frequency) {
            (None, _) => true,
            (Some(last), UpdateFrequency::Daily) => last != today,
            (Some(last), UpdateFrequency::Weekly) => last < today - Duration::days(7),
        }
    }
}

/// How often the careers page of a tracked company should be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFrequency {
    Daily,
    Weekly,
}

impl FromStr for UpdateFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(UpdateFrequency::Daily),
            "weekly" => Ok(UpdateFrequency::Weekly),
            other => Err(format!("unknown frequency '{}' (expected daily or weekly)", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<NaiveDate>,
}

impl CompanyPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.custom_name.is_none()
            && self.starred.is_none()
            && self.last_updated.is_none()
    }
}

impl Entity for Company {
    type Draft = CompanyDraft;
    type Patch = CompanyPatch;

    const RESOURCE: &'static str = "companies";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    fn validate_draft(draft: &CompanyDraft) -> StoreResult<()> {
        let has_custom = draft
            .custom_name
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if draft.name.trim().is_empty() && !has_custom {
            return Err(StoreError::Validation(
                "a company name or custom name is required".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_patch(patch: &CompanyPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(StoreError::Validation(
                "update payload cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn from_draft(id: EntityId, owner_id: UserId, now: DateTime<Utc>, draft: CompanyDraft) -> Self {
        Company {
            id,
            owner_id,
            name: draft.name,
            custom_name: draft.custom_name.filter(|c| !c.trim().is_empty()),
            starred: draft.starred,
            last_updated: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &CompanyPatch) {
        // Picking a listed name and typing a custom one are mutually exclusive.
        if let Some(name) = &patch.name {
            self.name = name.clone();
            if patch.custom_name.is_none() {
                self.custom_name = None;
            }
        }
        if let Some(custom) = &patch.custom_name {
            self.custom_name = Some(custom.clone()).filter(|c| !c.trim().is_empty());
            if patch.name.is_none() {
                self.name.clear();
            }
        }
        if let Some(starred) = patch.starred {
            self.starred = starred;
        }
        if let Some(date) = patch.last_updated {
            self.last_updated = Some(date);
        }
    }

    fn stamp_updated(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
