use crate::error::ForkscanError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// `owner/name` identifier of a hosted repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    /// Filesystem-safe stem, `owner_name`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = ForkscanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('/').trim_end_matches(".git");
        let trimmed = trimmed
            .strip_prefix("https://github.com/")
            .unwrap_or(trimmed);
        match trimmed.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(ForkscanError::InvalidRepoId(s.to_string())),
        }
    }
}

/// The upstream repository, resolved once per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryRef {
    pub id: RepoId,
    pub default_branch: String,
}

/// A repository as the host reports it; used for the upstream and for forks.
#[derive(Clone, Debug)]
pub struct RemoteRepo {
    pub id: RepoId,
    pub html_url: String,
    pub stars: u32,
    pub forks: u32,
    pub description: Option<String>,
    pub default_branch: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteRepo {
    pub fn full_name(&self) -> String {
        self.id.to_string()
    }

    pub fn to_ref(&self) -> RepositoryRef {
        RepositoryRef {
            id: self.id.clone(),
            default_branch: self.default_branch.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateBudget {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateBudget {
    /// Snapshot reported when the budget cannot be queried.
    pub fn exhausted() -> Self {
        Self {
            remaining: 0,
            reset_at: Utc::now(),
        }
    }

    pub fn until_reset(&self) -> Duration {
        (self.reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Clone, Debug)]
pub struct CommitSummary {
    pub sha: String,
    pub authored_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Comparison {
    pub ahead_by: u32,
    pub behind_by: u32,
}

/// Every way a remote call can fail. Callers match on this exhaustively.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("transient error: {0}")]
    Transient(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
