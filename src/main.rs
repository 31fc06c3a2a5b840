mod checkpoint;
mod config;
mod engine;
mod error;
mod export;
mod github;
mod report;
#[cfg(test)]
mod test_utils;

use checkpoint::CheckpointStore;
use clap::Parser;
use config::{Config, Overrides};
use engine::orchestrator::Orchestrator;
use error::{ForkscanError, Result};
use github::client::GitHubClient;
use github::host::ForkHost;
use github::types::RepoId;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "forkscan",
    about = "Find every fork of a GitHub repository and measure how far each one has drifted"
)]
struct Cli {
    /// Repository as owner/name or a github.com URL
    #[arg(required_unless_present = "check_rate")]
    repo: Option<String>,

    /// Process at most this many forks
    #[arg(long = "max", short = 'm')]
    max_forks: Option<usize>,

    #[arg(long, short, help = "Number of concurrent workers")]
    workers: Option<usize>,

    #[arg(long, short, help = "Only print the first N forks")]
    top: Option<usize>,

    #[arg(long, short, help = "Also write the results to this Markdown file")]
    output: Option<PathBuf>,

    #[arg(long, help = "Skip ahead/behind comparisons")]
    no_compare: bool,

    #[arg(long, short, help = "Drop forks whose default branch matches upstream")]
    skip_no_diff: bool,

    #[arg(long, short, help = "Continue from the saved checkpoint")]
    resume: bool,

    #[arg(long, help = "Skip branch listing and compare only the default branch")]
    no_branches: bool,

    #[arg(long, short = 'c', help = "Show the API rate budget and exit")]
    check_rate: bool,

    #[arg(long, help = "Do not write the SQLite database")]
    no_db: bool,

    #[arg(long, help = "Directory for checkpoint files")]
    checkpoint_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            workers: self.workers,
            max_forks: self.max_forks,
            show_comparison: self.no_compare.then_some(false),
            skip_no_diff: self.skip_no_diff.then_some(true),
            resume: self.resume.then_some(true),
            check_branches: self.no_branches.then_some(false),
            checkpoint_dir: self.checkpoint_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forkscan=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.overrides());

    match run(&cli, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, config: &Config) -> Result<u8> {
    let token = config.github_token.as_deref().unwrap_or_default();
    let client = GitHubClient::new(token)?;

    if cli.check_rate {
        let budget = client
            .rate_budget()
            .await
            .map_err(|e| ForkscanError::GitHub(e.to_string()))?;
        print!("{}", report::render_rate_status(&budget));
        return Ok(0);
    }

    let target: RepoId = cli
        .repo
        .as_deref()
        .ok_or_else(|| ForkscanError::InvalidRepoId(String::new()))?
        .parse()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing up");
                cancel.cancel();
            }
        });
    }

    let orchestrator = Orchestrator::new(
        Arc::new(client),
        config.to_run_options(),
        CheckpointStore::new(&config.checkpoint_dir),
    );
    let report = orchestrator.run(&target, cancel).await?;

    print!("{}", report::render_report(&report, cli.top));

    if let Some(path) = &cli.output {
        if let Err(e) = export::save_markdown(&report.records, path) {
            error!(error = %e, path = %path.display(), "could not write results file");
        }
    }
    if !cli.no_db {
        let db = export::db_path_for(&target, cli.output.as_deref());
        if let Err(e) = export::save_to_sqlite(&report.records, &db).await {
            error!(error = %e, path = %db.display(), "could not write database");
        }
    }

    info!(
        status = ?report.status,
        processed = report.counters.processed,
        elapsed_secs = report.elapsed.as_secs(),
        "done"
    );
    Ok(report.status.exit_code())
}
