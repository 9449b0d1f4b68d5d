use crate::model::{CheckIn, CheckinFilter, CheckinUpsert, Goal, Kid};
use crate::retry::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0} is inactive")]
    Inactive(String),
    #[error("stored data is malformed: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Protocol error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Invalid(_) => "bad_params",
            Self::Inactive(_) => "inactive",
            Self::Corrupt(_) | Self::Sqlite(_) | Self::Json(_) => "store_failed",
            Self::Io(_) => "io_failed",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Sheet,
}

impl Backend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "sheet" | "sheets" => Some(Self::Sheet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Sheet => "sheet",
        }
    }
}

/// Persistence for kids, goals, check-ins and workspace settings.
///
/// Listing methods return rows in store order. `upsert_checkin` must apply
/// only the flags the request carries and always bump `updated_at`; rows that
/// already exist keep their name/title/points snapshots.
pub trait PointsStore {
    fn backend(&self) -> Backend;

    /// Applies remote-call tuning. Backends without remote calls ignore it.
    fn tune(&mut self, _policy: RetryPolicy, _cache_ttl: Duration) {}

    fn list_kids(&mut self) -> StoreResult<Vec<Kid>>;
    fn insert_kid(&mut self, kid: &Kid) -> StoreResult<()>;
    fn set_kid_active(&mut self, kid_id: &str, active: bool) -> StoreResult<()>;

    fn list_goals(&mut self) -> StoreResult<Vec<Goal>>;
    fn insert_goal(&mut self, goal: &Goal) -> StoreResult<()>;
    /// Replaces every field of the goal with the same id.
    fn update_goal(&mut self, goal: &Goal) -> StoreResult<()>;

    fn list_checkins(&mut self, filter: &CheckinFilter) -> StoreResult<Vec<CheckIn>>;
    fn upsert_checkin(&mut self, up: &CheckinUpsert) -> StoreResult<CheckIn>;

    fn setting_get(&mut self, key: &str) -> StoreResult<Option<serde_json::Value>>;
    fn setting_set(&mut self, key: &str, value: &serde_json::Value) -> StoreResult<()>;
}
