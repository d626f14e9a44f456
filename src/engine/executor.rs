//! Applies proposal diffs to a git working tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{ApplyLocation, ApplyOptions, Diff, Repository};
use tracing::{debug, info};

use super::traits::Executor;
use crate::models::{ExecutionResult, Proposal};

/// `root` must be the top of a git working tree. Staged patches are kept
/// under `work_dir` until the proposal is applied or cleaned up.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    root: PathBuf,
    work_dir: PathBuf,
}

impl GitExecutor {
    pub fn new(root: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn patch_path(&self, proposal: &Proposal) -> PathBuf {
        self.work_dir.join(format!("{}.patch", proposal.id))
    }

    async fn run<F>(&self, f: F) -> Result<ExecutionResult>
    where
        F: FnOnce(&GitExecutor) -> Result<ExecutionResult> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .context("Executor task panicked")?
    }
}

/// Apply `diff` to the working tree of `root`. `check` only verifies.
fn apply_diff(root: &Path, diff: &str, check: bool) -> Result<ExecutionResult> {
    let repo = Repository::open(root)
        .with_context(|| format!("{} is not a git repository", root.display()))?;
    let diff = match Diff::from_buffer(diff.as_bytes()) {
        Ok(d) => d,
        Err(e) => return Ok(ExecutionResult::failed(format!("Malformed diff: {}", e.message()))),
    };
    let mut opts = ApplyOptions::new();
    opts.check(check);
    match repo.apply(&diff, ApplyLocation::WorkDir, Some(&mut opts)) {
        Ok(()) => Ok(ExecutionResult::succeeded(if check {
            "Diff applies cleanly"
        } else {
            "Diff applied"
        })),
        Err(e) => Ok(ExecutionResult::failed(format!(
            "Diff does not apply: {}",
            e.message()
        ))),
    }
}

#[async_trait]
impl Executor for GitExecutor {
    async fn stage(&self, proposal: &Proposal) -> Result<ExecutionResult> {
        let proposal = proposal.clone();
        self.run(move |ex| {
            let result = apply_diff(&ex.root, &proposal.diff, true)?;
            if result.success {
                std::fs::create_dir_all(&ex.work_dir).with_context(|| {
                    format!("Failed to create {}", ex.work_dir.display())
                })?;
                let path = ex.patch_path(&proposal);
                std::fs::write(&path, &proposal.diff)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                debug!(proposal = %proposal.id, path = %path.display(), "Staged patch");
            }
            Ok(result)
        })
        .await
    }

    async fn apply(&self, proposal: &Proposal) -> Result<ExecutionResult> {
        let proposal = proposal.clone();
        self.run(move |ex| {
            let result = apply_diff(&ex.root, &proposal.diff, false)?;
            if result.success {
                info!(proposal = %proposal.id, file = %proposal.file_path, "Applied diff");
                let path = ex.patch_path(&proposal);
                if path.exists() {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("Failed to remove {}", path.display()))?;
                }
            }
            Ok(result)
        })
        .await
    }

    async fn cleanup(&self, proposal: &Proposal) -> Result<()> {
        let path = self.patch_path(proposal);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
