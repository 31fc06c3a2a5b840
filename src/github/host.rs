use crate::github::types::{
    CommitSummary, Comparison, RateBudget, RemoteRepo, RemoteResult, RepoId, RepositoryRef,
};
use async_trait::async_trait;

/// Remote repository host the engine talks to.
///
/// Implementations classify every failure into [`RemoteError`] so the retry
/// layer never has to inspect transport details.
///
/// [`RemoteError`]: crate::github::types::RemoteError
#[async_trait]
pub trait ForkHost: Send + Sync {
    async fn resolve_repository(&self, id: &RepoId) -> RemoteResult<RemoteRepo>;

    async fn rate_budget(&self) -> RemoteResult<RateBudget>;

    /// Lists forks of `repo`, stopping once `limit` forks were collected.
    async fn list_forks(
        &self,
        repo: &RepositoryRef,
        limit: Option<usize>,
    ) -> RemoteResult<Vec<RemoteRepo>>;

    async fn list_branches(&self, id: &RepoId) -> RemoteResult<Vec<String>>;

    /// One page (1-based) of the most recent commits on the default branch.
    async fn recent_commits(&self, id: &RepoId, page: u32) -> RemoteResult<Vec<CommitSummary>>;

    /// Compares `head` (`owner:branch`) against `base` in the upstream repository.
    async fn compare_refs(
        &self,
        upstream: &RepositoryRef,
        base: &str,
        head: &str,
    ) -> RemoteResult<Comparison>;
}
