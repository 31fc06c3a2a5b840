use crate::engine::retry::RetryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForkscanError {
    #[error("github error: {0}")]
    GitHub(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("missing GitHub token: set GITHUB_TOKEN or github_token in the config file")]
    MissingToken,

    #[error("invalid repository {0:?}: expected owner/name")]
    InvalidRepoId(String),

    #[error("repository {0} does not exist or is not accessible")]
    RepoNotFound(String),

    #[error("remote call failed: {0}")]
    Remote(#[from] RetryError),
}

pub type Result<T> = std::result::Result<T, ForkscanError>;
