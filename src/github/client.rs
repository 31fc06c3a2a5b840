use crate::error::{ForkscanError, Result};
use crate::github::host::ForkHost;
use crate::github::types::{
    CommitSummary, Comparison, RateBudget, RemoteError, RemoteRepo, RemoteResult, RepoId,
    RepositoryRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;

const PER_PAGE: u8 = 100;
const RECENT_COMMITS_PER_PAGE: u8 = 10;

#[derive(Clone)]
pub struct GitHubClient {
    octo: Octocrab,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(ForkscanError::MissingToken);
        }
        let octo = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| ForkscanError::GitHub(e.to_string()))?;

        Ok(Self { octo })
    }
}

#[async_trait]
impl ForkHost for GitHubClient {
    async fn resolve_repository(&self, id: &RepoId) -> RemoteResult<RemoteRepo> {
        let repo = self
            .octo
            .repos(&id.owner, &id.name)
            .get()
            .await
            .map_err(classify)?;
        Ok(to_remote_repo(repo, id))
    }

    async fn rate_budget(&self) -> RemoteResult<RateBudget> {
        let limits = self.octo.ratelimit().get().await.map_err(classify)?;
        let reset_at = DateTime::<Utc>::from_timestamp(limits.rate.reset as i64, 0)
            .unwrap_or_else(Utc::now);
        Ok(RateBudget {
            remaining: limits.rate.remaining as u32,
            reset_at,
        })
    }

    async fn list_forks(
        &self,
        repo: &RepositoryRef,
        limit: Option<usize>,
    ) -> RemoteResult<Vec<RemoteRepo>> {
        let mut forks = Vec::new();
        let mut page = 1u32;
        let reached = |n: usize| limit.is_some_and(|max| n >= max);

        loop {
            let result = self
                .octo
                .repos(&repo.id.owner, &repo.id.name)
                .list_forks()
                .per_page(PER_PAGE)
                .page(page)
                .send()
                .await
                .map_err(classify)?;

            if result.items.is_empty() {
                break;
            }

            for fork in result.items {
                let owner = fork
                    .owner
                    .as_ref()
                    .map(|o| o.login.clone())
                    .unwrap_or_default();
                let fallback = RepoId::new(&owner, &fork.name);
                forks.push(to_remote_repo(fork, &fallback));
                if reached(forks.len()) {
                    break;
                }
            }

            if reached(forks.len()) || result.next.is_none() {
                break;
            }
            page += 1;
        }

        Ok(forks)
    }

    async fn list_branches(&self, id: &RepoId) -> RemoteResult<Vec<String>> {
        let mut branches = Vec::new();
        let mut page = 1u32;

        loop {
            let result = self
                .octo
                .repos(&id.owner, &id.name)
                .list_branches()
                .per_page(PER_PAGE)
                .page(page)
                .send()
                .await
                .map_err(classify)?;

            if result.items.is_empty() {
                break;
            }
            branches.extend(result.items.into_iter().map(|b| b.name));

            if result.next.is_none() {
                break;
            }
            page += 1;
        }

        Ok(branches)
    }

    async fn recent_commits(&self, id: &RepoId, page: u32) -> RemoteResult<Vec<CommitSummary>> {
        let result = self
            .octo
            .repos(&id.owner, &id.name)
            .list_commits()
            .per_page(RECENT_COMMITS_PER_PAGE)
            .page(page.max(1))
            .send()
            .await
            .map_err(classify)?;

        Ok(result
            .items
            .into_iter()
            .map(|c| CommitSummary {
                authored_at: c
                    .commit
                    .author
                    .as_ref()
                    .and_then(|a| a.date.as_ref())
                    .cloned(),
                sha: c.sha,
            })
            .collect())
    }

    async fn compare_refs(
        &self,
        upstream: &RepositoryRef,
        base: &str,
        head: &str,
    ) -> RemoteResult<Comparison> {
        let cmp = self
            .octo
            .commits(&upstream.id.owner, &upstream.id.name)
            .compare(base, head)
            .send()
            .await
            .map_err(classify)?;

        Ok(Comparison {
            ahead_by: u32::try_from(cmp.ahead_by).unwrap_or(0),
            behind_by: u32::try_from(cmp.behind_by).unwrap_or(0),
        })
    }
}

fn to_remote_repo(repo: octocrab::models::Repository, fallback: &RepoId) -> RemoteRepo {
    let id = repo
        .full_name
        .as_deref()
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| fallback.clone());
    let html_url = repo
        .html_url
        .as_ref()
        .map(|u| u.to_string())
        .unwrap_or_else(|| format!("https://github.com/{id}"));

    RemoteRepo {
        id,
        html_url,
        stars: repo.stargazers_count.unwrap_or(0),
        forks: repo.forks_count.unwrap_or(0),
        description: repo.description.filter(|d| !d.trim().is_empty()),
        default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
        updated_at: repo.updated_at,
    }
}

fn classify(err: octocrab::Error) -> RemoteError {
    match &err {
        octocrab::Error::GitHub { source, .. } => {
            classify_status(source.status_code.as_u16(), &source.message)
        }
        _ => RemoteError::Transient(err.to_string()),
    }
}

/// Maps an HTTP status and GitHub's error message onto the remote taxonomy.
///
/// GitHub reports an exhausted primary or secondary limit as 403 (or 429)
/// with a message mentioning the rate limit; any other 403 is a real denial.
fn classify_status(status: u16, message: &str) -> RemoteError {
    let lowered = message.to_lowercase();
    match status {
        404 => RemoteError::NotFound(message.to_string()),
        429 => RemoteError::RateLimitExceeded(message.to_string()),
        403 if lowered.contains("rate limit") => {
            RemoteError::RateLimitExceeded(message.to_string())
        }
        403 => RemoteError::Forbidden(message.to_string()),
        _ => RemoteError::Transient(format!("HTTP {status}: {message}")),
    }
}
