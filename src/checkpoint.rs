use crate::engine::types::ForkRecord;
use crate::error::Result;
use crate::github::types::RepoId;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Durable snapshot of a run, one file per target repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub repo_path: String,
    pub forks_info: Vec<ForkRecord>,
    pub processed_fork_names: BTreeSet<String>,
    pub timestamp: String,
}

impl Checkpoint {
    pub fn new(
        repo: &RepoId,
        forks_info: Vec<ForkRecord>,
        processed_fork_names: BTreeSet<String>,
    ) -> Self {
        Self {
            repo_path: repo.to_string(),
            forks_info,
            processed_fork_names,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.dir.join(format!("{}_progress.json", repo.file_stem()))
    }

    /// Replaces the checkpoint file in one rename so readers never see a partial write.
    pub fn save(&self, repo: &RepoId, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.path_for(repo);
        std::fs::create_dir_all(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, checkpoint)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        info!(
            path = %path.display(),
            records = checkpoint.forks_info.len(),
            processed = checkpoint.processed_fork_names.len(),
            "progress saved"
        );
        Ok(path)
    }

    /// Loads the checkpoint for `repo`. A missing, unreadable or foreign file
    /// yields `None` and the run starts clean.
    pub fn load(&self, repo: &RepoId) -> Option<Checkpoint> {
        let path = self.path_for(repo);
        if !path.exists() {
            return None;
        }
        match read_checkpoint(&path) {
            Ok(cp) if cp.repo_path == repo.to_string() => {
                info!(
                    saved_at = %cp.timestamp,
                    processed = cp.processed_fork_names.len(),
                    records = cp.forks_info.len(),
                    "loaded previous progress"
                );
                Some(cp)
            }
            Ok(cp) => {
                warn!(
                    path = %path.display(),
                    found = %cp.repo_path,
                    expected = %repo,
                    "checkpoint belongs to another repository, starting over"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read checkpoint, starting over");
                None
            }
        }
    }
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
