use crate::engine::orchestrator::RunOptions;
use crate::engine::retry::RetryPolicy;
use crate::engine::task::TaskOptions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub github_token: Option<String>,
    pub workers: usize,
    pub max_forks: Option<usize>,
    pub show_comparison: bool,
    pub skip_no_diff: bool,
    pub resume: bool,
    pub check_branches: bool,
    pub checkpoint_dir: PathBuf,
    pub safety_threshold: u32,
    pub hard_floor: u32,
    pub recheck_every: u64,
    pub checkpoint_interval_secs: u64,
    pub max_attempts: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &self.github_token.as_ref().map(|_| "[REDACTED]"))
            .field("workers", &self.workers)
            .field("max_forks", &self.max_forks)
            .field("show_comparison", &self.show_comparison)
            .field("skip_no_diff", &self.skip_no_diff)
            .field("resume", &self.resume)
            .field("check_branches", &self.check_branches)
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("safety_threshold", &self.safety_threshold)
            .field("hard_floor", &self.hard_floor)
            .field("recheck_every", &self.recheck_every)
            .field("checkpoint_interval_secs", &self.checkpoint_interval_secs)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: None,
            workers: 10,
            max_forks: None,
            show_comparison: true,
            skip_no_diff: false,
            resume: false,
            check_branches: true,
            checkpoint_dir: PathBuf::from("."),
            safety_threshold: 100,
            hard_floor: 50,
            recheck_every: 3,
            checkpoint_interval_secs: 300,
            max_attempts: 5,
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_forks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_comparison: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_no_diff: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_branches: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Config {
    /// Defaults, then the config file, then `FORKSCAN_*` and `GITHUB_TOKEN`,
    /// then the command line.
    pub fn load(overrides: Overrides) -> Self {
        let config_file = config_dir().join("forkscan").join("config.toml");

        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if config_file.exists() {
            figment = figment.merge(Toml::file(&config_file));
        }

        figment = figment
            .merge(Env::prefixed("FORKSCAN_"))
            .merge(
                Env::raw()
                    .only(&["GITHUB_TOKEN"])
                    .map(|_| "github_token".into()),
            )
            .merge(Serialized::defaults(overrides));

        match figment.extract() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config parse error, using defaults");
                Config::default()
            }
        }
    }

    pub fn to_run_options(&self) -> RunOptions {
        RunOptions {
            max_forks: self.max_forks,
            workers: self.workers.max(1),
            resume: self.resume,
            task: TaskOptions {
                show_comparison: self.show_comparison,
                skip_no_diff: self.skip_no_diff,
                check_branches: self.check_branches,
            },
            safety_threshold: self.safety_threshold,
            hard_floor: self.hard_floor,
            recheck_every: self.recheck_every,
            checkpoint_interval: Duration::from_secs(self.checkpoint_interval_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from("."))
}
