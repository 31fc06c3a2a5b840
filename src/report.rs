use crate::engine::orchestrator::RunReport;
use crate::engine::types::ForkRecord;
use crate::github::types::RateBudget;
use chrono::{DateTime, Local, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt::Write;

/// Rough request cost of one fork with branch comparisons enabled.
pub const REQUESTS_PER_FORK: u32 = 15;

/// Newest activity first, unknown activity last; equal timestamps keep
/// discovery order, and records not in `discovery` (restored from an older
/// checkpoint) go after those that are.
pub fn sort_by_activity(mut records: Vec<ForkRecord>, discovery: &[String]) -> Vec<ForkRecord> {
    let rank: HashMap<&str, usize> = discovery
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    records.sort_by_key(|r| {
        (
            Reverse(r.last_updated),
            rank.get(r.name.as_str()).copied().unwrap_or(usize::MAX),
        )
    });
    records
}

pub fn local_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn activity_time(t: Option<DateTime<Utc>>) -> String {
    t.map(local_time).unwrap_or_else(|| "unknown".to_string())
}

pub fn render_fork(fork: &ForkRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Repository: {}", fork.name);
    let _ = writeln!(out, "URL: {}", fork.url);
    let _ = writeln!(out, "Stars: {}", fork.stars);
    let _ = writeln!(out, "Forks: {}", fork.forks);
    let _ = writeln!(out, "Last updated: {}", activity_time(fork.last_updated));
    let _ = writeln!(out, "Branches: {}", fork.branches.join(", "));

    if !fork.branch_comparisons.is_empty() {
        let _ = writeln!(out, "Branch comparison:");
        for (branch, cmp) in &fork.branch_comparisons {
            let _ = writeln!(
                out,
                "  - {branch}: ahead {} commits, behind {} commits",
                cmp.ahead_by, cmp.behind_by
            );
        }
    } else if let (Some(ahead), Some(behind)) = (fork.ahead_by, fork.behind_by) {
        let _ = writeln!(
            out,
            "Default branch: ahead {ahead} commits, behind {behind} commits"
        );
    }

    let _ = writeln!(
        out,
        "Description: {}",
        fork.description.as_deref().unwrap_or("No description")
    );
    out.push_str(&"-".repeat(50));
    out
}

/// Console listing of a finished run, optionally limited to the first `top` forks.
pub fn render_report(report: &RunReport, top: Option<usize>) -> String {
    let mut out = String::new();
    if report.records.is_empty() {
        out.push_str("No matching forks found.\n");
        return out;
    }

    let shown = top
        .filter(|&n| n < report.records.len())
        .unwrap_or(report.records.len());
    if shown < report.records.len() {
        let _ = writeln!(out, "=== Fork analysis for {} (top {shown}) ===", report.upstream.id);
    } else {
        let _ = writeln!(out, "=== Fork analysis for {} ===", report.upstream.id);
    }
    let _ = writeln!(
        out,
        "{} forks discovered, {} recorded, showing {shown}\n",
        report.discovered,
        report.records.len()
    );

    for fork in report.records.iter().take(shown) {
        out.push_str(&render_fork(fork));
        out.push('\n');
    }
    out
}

pub fn render_rate_status(budget: &RateBudget) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== GitHub API rate limit ===");
    let _ = writeln!(out, "Remaining requests: {}", budget.remaining);
    let _ = writeln!(out, "Resets at: {}", local_time(budget.reset_at));

    let secs = (budget.reset_at - Utc::now()).num_seconds();
    if secs > 0 {
        let _ = writeln!(
            out,
            "Time until reset: {}h {}m {}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        );
    } else {
        let _ = writeln!(out, "The rate limit has already reset");
    }

    if budget.remaining > 0 {
        let _ = writeln!(
            out,
            "Roughly {} forks can be processed (about {REQUESTS_PER_FORK} requests per fork)",
            budget.remaining / REQUESTS_PER_FORK
        );
    }
    out
}
