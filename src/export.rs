//! Writes finished fork records to a Markdown file and a SQLite database.

use crate::engine::types::ForkRecord;
use crate::error::Result;
use crate::github::types::RepoId;
use crate::report::activity_time;
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// `<owner>_<name>_forks.db`, or the output file's stem with a `.db` extension.
pub fn db_path_for(repo: &RepoId, output: Option<&Path>) -> PathBuf {
    match output {
        Some(out) => out.with_extension("db"),
        None => PathBuf::from(format!("{}_forks.db", repo.file_stem())),
    }
}

pub fn render_markdown(records: &[ForkRecord]) -> String {
    let mut out = String::from("# Fork analysis\n\n");
    let _ = writeln!(
        out,
        "Generated: {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "{} forks found\n", records.len());

    for fork in records {
        let _ = writeln!(out, "## {}\n", fork.name);
        let _ = writeln!(out, "- URL: {}", fork.url);
        let _ = writeln!(out, "- Stars: {}", fork.stars);
        let _ = writeln!(out, "- Forks: {}", fork.forks);
        let _ = writeln!(out, "- Last updated: {}", activity_time(fork.last_updated));
        if let (Some(ahead), Some(behind)) = (fork.ahead_by, fork.behind_by) {
            let _ = writeln!(out, "- Ahead of upstream: {ahead} commits");
            let _ = writeln!(out, "- Behind upstream: {behind} commits");
        }
        let _ = writeln!(
            out,
            "- Description: {}\n",
            fork.description.as_deref().unwrap_or("No description")
        );
        out.push_str("---\n\n");
    }
    out
}

pub fn save_markdown(records: &[ForkRecord], path: &Path) -> Result<()> {
    std::fs::write(path, render_markdown(records))?;
    info!(path = %path.display(), "results written");
    Ok(())
}

/// Upserts every record into the `forks` table, keyed by fork name.
pub async fn save_to_sqlite(records: &[ForkRecord], path: &Path) -> Result<usize> {
    if records.is_empty() {
        info!("no records to store");
        return Ok(0);
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS forks (
            name TEXT PRIMARY KEY,
            url TEXT,
            stars INTEGER,
            forks_count INTEGER,
            last_updated TEXT,
            description TEXT,
            default_branch TEXT,
            ahead_by INTEGER,
            behind_by INTEGER,
            branches TEXT,
            branch_comparisons TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let mut tx = pool.begin().await?;
    for fork in records {
        let branches = serde_json::to_string(&fork.branches)?;
        let comparisons = serde_json::to_string(&fork.branch_comparisons)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO forks (
                name, url, stars, forks_count, last_updated, description,
                default_branch, ahead_by, behind_by, branches, branch_comparisons
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fork.name)
        .bind(&fork.url)
        .bind(i64::from(fork.stars))
        .bind(i64::from(fork.forks))
        .bind(
            fork.last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        )
        .bind(&fork.description)
        .bind(&fork.default_branch)
        .bind(fork.ahead_by.map(i64::from))
        .bind(fork.behind_by.map(i64::from))
        .bind(branches)
        .bind(comparisons)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    pool.close().await;

    info!(count = records.len(), path = %path.display(), "records saved to database");
    Ok(records.len())
}
