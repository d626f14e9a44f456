//! Improvement jobs: individually reviewable changes with an explicit
//! approval step.
//!
//! ```text
//! pending ──approve──> approved ──execute──> running ──> completed ──apply──> applied
//!    │                                            │            │
//!    └──reject──> rejected                        └──> failed  └──cancel──> cancelled
//! ```
//!
//! Pending, approved and failed jobs can be cancelled too.
//!
//! `execute` runs the council, the architect and a staged (non-authoritative)
//! apply in the background. `apply` is the only operation that touches the
//! target. Execution, apply, cancel and cleanup take a per-file lock, so
//! work against the same file is serialized while work against different
//! files proceeds concurrently.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::engine::{Collaborators, call_phase, metrics, panic_message};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::models::{Decision, ImprovementJob, JobStatus, Mode, Opportunity, Phase, Proposal};
use crate::stats::StatsAggregator;
use crate::store::DbHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PREVIEW_LINES: usize = 20;

/// Reason recorded on jobs found running at startup.
pub const INTERRUPTED: &str = "interrupted: process restarted";

/// One async mutex per file path.
#[derive(Clone, Default)]
pub struct FileLockMap {
    locks: Arc<tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FileLockMap {
    pub async fn lock(&self, file_path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(file_path.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Removes a job from the in-process execution set when dropped, even if
/// the run panics.
struct ExecutionSlot {
    executing: Arc<Mutex<HashSet<String>>>,
    job_id: String,
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        if let Ok(mut executing) = self.executing.lock() {
            executing.remove(&self.job_id);
        }
    }
}

#[derive(Clone)]
pub struct ImprovementJobStore {
    db: DbHandle,
    collab: Collaborators,
    stats: StatsAggregator,
    events: EventBus,
    target_dir: PathBuf,
    default_mode: Mode,
    phase_timeout: Duration,
    file_locks: FileLockMap,
    executing: Arc<Mutex<HashSet<String>>>,
}

impl ImprovementJobStore {
    pub fn new(
        db: DbHandle,
        collab: Collaborators,
        stats: StatsAggregator,
        events: EventBus,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            collab,
            stats,
            events,
            target_dir,
            default_mode: Mode::default(),
            phase_timeout: Duration::from_secs(crate::engine::DEFAULT_PHASE_TIMEOUT_SECS),
            file_locks: FileLockMap::default(),
            executing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_default_mode(mut self, mode: Mode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    // ── Creation ──────────────────────────────────────────────────────

    /// Scan the target and create one pending job per opportunity that a
    /// diff could be generated for.
    pub async fn analyze(&self, scope: &str, mode: Option<Mode>) -> EngineResult<Vec<ImprovementJob>> {
        let mode = mode.unwrap_or(self.default_mode);
        let opportunities =
            call_phase(Phase::Introspecting, self.phase_timeout, self.collab.detector.scan()).await?;

        let mut jobs = Vec::new();
        for opportunity in opportunities {
            let proposal = match call_phase(
                Phase::Predicting,
                self.phase_timeout,
                self.collab.generator.generate(&opportunity),
            )
            .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(file = %opportunity.file_path, error = %e, "Skipping opportunity: no diff");
                    continue;
                }
            };
            jobs.push(self.new_job(scope, mode, &opportunity, proposal));
        }

        let rows = jobs.clone();
        self.db
            .call(move |db| {
                for job in &rows {
                    db.insert_job(job)?;
                }
                Ok(())
            })
            .await
            .map_err(EngineError::Storage)?;

        info!(scope, mode = %mode, jobs = jobs.len(), "Analysis created jobs");
        self.events.publish(&EngineEvent::JobsCreated {
            job_ids: jobs.iter().map(|j| j.id.clone()).collect(),
        });
        Ok(jobs)
    }

    fn new_job(&self, scope: &str, mode: Mode, opportunity: &Opportunity, proposal: Proposal) -> ImprovementJob {
        let path = self.target_dir.join(&opportunity.file_path);
        let metrics_before = metrics::measure_file(&path).unwrap_or_else(|e| {
            debug!(file = %path.display(), error = %e, "No baseline metrics");
            Default::default()
        });
        let diff_preview = proposal
            .diff
            .lines()
            .take(PREVIEW_LINES)
            .collect::<Vec<_>>()
            .join("\n");
        let now = Utc::now();
        ImprovementJob {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            mode,
            improvement_type: opportunity.improvement_type.clone(),
            file_path: opportunity.file_path.clone(),
            description: opportunity.description.clone(),
            rationale: opportunity.rationale.clone(),
            success_criteria: vec![
                format!("Diff applies cleanly to {}", opportunity.file_path),
                format!(
                    "Council and architect approve under {} mode (threshold {:.2})",
                    mode,
                    self.collab.architect.threshold(mode)
                ),
            ],
            status: JobStatus::Pending,
            metrics_before,
            metrics_after: None,
            diff_preview: Some(diff_preview),
            proposal,
            council: None,
            architect: None,
            execution: None,
            error: None,
            executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub async fn get(&self, id: &str) -> EngineResult<ImprovementJob> {
        let key = id.to_string();
        self.db
            .call(move |db| db.get_job(&key))
            .await
            .map_err(EngineError::Storage)?
            .ok_or_else(|| EngineError::job_not_found(id))
    }

    pub async fn list(&self, scope: Option<&str>) -> EngineResult<Vec<ImprovementJob>> {
        let scope = scope.map(str::to_string);
        self.db
            .call(move |db| db.list_jobs(scope.as_deref()))
            .await
            .map_err(EngineError::Storage)
    }

    // ── Status transitions ────────────────────────────────────────────

    /// Check-and-set inside one database call, so concurrent callers see
    /// exactly one winner.
    async fn transition(
        &self,
        id: &str,
        operation: &'static str,
        allowed: fn(JobStatus) -> bool,
        to: JobStatus,
    ) -> EngineResult<ImprovementJob> {
        let key = id.to_string();
        let job = self
            .db
            .call(move |db| {
                let Some(mut job) = db.get_job(&key)? else {
                    return Ok(Err(EngineError::job_not_found(key)));
                };
                if !allowed(job.status) {
                    return Ok(Err(invalid(&job, operation)));
                }
                job.status = to;
                job.updated_at = Utc::now();
                db.update_job(&job)?;
                Ok(Ok(job))
            })
            .await
            .map_err(EngineError::Storage)??;
        debug!(job = %job.id, status = %job.status, operation, "Job transitioned");
        self.events.publish(&EngineEvent::job_status(&job));
        Ok(job)
    }

    pub async fn approve(&self, id: &str) -> EngineResult<ImprovementJob> {
        self.transition(id, "approve", |s| s == JobStatus::Pending, JobStatus::Approved)
            .await
    }

    pub async fn reject(&self, id: &str) -> EngineResult<ImprovementJob> {
        self.transition(
            id,
            "reject",
            |s| s == JobStatus::Pending,
            JobStatus::Rejected,
        )
        .await
    }

    /// Waits out any execute or apply holding the job's file.
    pub async fn cancel(&self, id: &str) -> EngineResult<ImprovementJob> {
        let file_path = self.get(id).await?.file_path;
        let _file = self.file_locks.lock(&file_path).await;
        self.transition(id, "cancel", |s| s.is_cancellable(), JobStatus::Cancelled)
            .await
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Move an approved job to `running` and evaluate it in the background.
    pub async fn execute(&self, id: &str) -> EngineResult<ImprovementJob> {
        let slot = self.claim(id)?;
        let job = self
            .transition(id, "execute", |s| s == JobStatus::Approved, JobStatus::Running)
            .await?;

        let store = self.clone();
        let run = job.clone();
        tokio::spawn(async move {
            let _slot = slot;
            let id = run.id.clone();
            let driver = tokio::spawn({
                let store = store.clone();
                async move { store.run_job(run).await }
            });
            if let Err(e) = driver.await {
                let reason = match e.try_into_panic() {
                    Ok(payload) => format!("job run panicked: {}", panic_message(payload.as_ref())),
                    Err(e) => format!("job run failed: {}", e),
                };
                match store.fail_running(&id, &reason).await {
                    Ok(Some(_)) => error!(job = %id, reason, "Job run abandoned"),
                    Ok(None) => {}
                    Err(e) => error!(job = %id, error = %e, "Failed to mark abandoned job"),
                }
            }
        });
        Ok(job)
    }

    fn claim(&self, id: &str) -> EngineResult<ExecutionSlot> {
        let mut executing = self.executing.lock().map_err(|_| EngineError::LockPoisoned)?;
        if !executing.insert(id.to_string()) {
            return Err(EngineError::InvalidState {
                kind: "Job",
                id: id.to_string(),
                status: JobStatus::Running.to_string(),
                operation: "execute",
            });
        }
        Ok(ExecutionSlot {
            executing: self.executing.clone(),
            job_id: id.to_string(),
        })
    }

    fn is_executing(&self, id: &str) -> bool {
        self.executing
            .lock()
            .map(|e| e.contains(id))
            .unwrap_or(false)
    }

    async fn run_job(&self, mut job: ImprovementJob) {
        let _file = self.file_locks.lock(&job.file_path).await;
        info!(job = %job.id, file = %job.file_path, "Executing job");

        let council = self.collab.council.review(&job.proposal).await;
        let architect = self
            .collab
            .architect
            .decide(&job.proposal, &council, job.mode);
        job.council = Some(council);

        if architect.decision != Decision::Approve {
            job.status = JobStatus::Failed;
            job.error = Some(format!(
                "Architect decided {}: {}",
                architect.decision, architect.reasoning
            ));
        } else {
            match call_phase(Phase::Executing, self.phase_timeout, self.collab.executor.stage(&job.proposal)).await {
                Ok(result) => {
                    if result.success {
                        job.status = JobStatus::Completed;
                        job.metrics_after = Some(metrics::project(job.metrics_before, &job.proposal));
                    } else {
                        job.status = JobStatus::Failed;
                        job.error = Some(result.message.clone());
                    }
                    job.execution = Some(result);
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                }
            }
        }
        job.architect = Some(architect);

        let now = Utc::now();
        job.executed_at = Some(now);
        job.updated_at = now;

        let row = job.clone();
        match self
            .db
            .call(move |db| db.update_job_from(&row, JobStatus::Running))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(job = %job.id, "Job left running before its result was written");
                return;
            }
            Err(e) => {
                error!(job = %job.id, error = %e, "Failed to persist job result");
                return;
            }
        }
        if let Err(e) = self.stats.record_job(&job) {
            warn!(error = %e, "Failed to update running stats");
        }
        info!(job = %job.id, status = %job.status, "Job settled");
        self.events.publish(&EngineEvent::job_status(&job));
    }

    /// Merge a completed job's diff into the target.
    ///
    /// On failure the job stays `completed` and the error is returned.
    pub async fn apply(&self, id: &str) -> EngineResult<ImprovementJob> {
        let file_path = self.get(id).await?.file_path;
        let _file = self.file_locks.lock(&file_path).await;

        let mut job = self.get(id).await?;
        if job.status != JobStatus::Completed {
            return Err(invalid(&job, "apply"));
        }

        let result =
            call_phase(Phase::Executing, self.phase_timeout, self.collab.executor.apply(&job.proposal)).await?;
        if !result.success {
            warn!(job = %job.id, message = %result.message, "Apply failed");
            return Err(EngineError::phase(Phase::Executing, result.message));
        }

        job.proposal.applied = true;
        job.proposal.outcome = Some(result.message.clone());
        job.execution = Some(result);
        job.status = JobStatus::Applied;
        job.updated_at = Utc::now();
        let row = job.clone();
        let written = self
            .db
            .call(move |db| db.update_job_from(&row, JobStatus::Completed))
            .await
            .map_err(EngineError::Storage)?;
        if !written {
            error!(job = %job.id, file = %job.file_path, "Job moved on while its diff was applied");
            return Err(invalid(&self.get(id).await?, "apply"));
        }

        info!(job = %job.id, file = %job.file_path, "Applied job");
        self.events.publish(&EngineEvent::job_status(&job));
        Ok(job)
    }

    /// Remove a finished job's artifacts and hide it from listings.
    pub async fn cleanup(&self, id: &str) -> EngineResult<()> {
        let file_path = self.get(id).await?.file_path;
        let _file = self.file_locks.lock(&file_path).await;

        let job = self.get(id).await?;
        if !job.status.is_terminal() {
            return Err(invalid(&job, "clean up"));
        }
        self.collab
            .executor
            .cleanup(&job.proposal)
            .await
            .map_err(EngineError::Other)?;

        let key = id.to_string();
        let archived = self
            .db
            .call(move |db| db.archive_job(&key))
            .await
            .map_err(EngineError::Storage)?;
        if !archived {
            return Err(EngineError::job_not_found(id));
        }
        info!(job = %id, "Cleaned up job");
        self.events.publish(&EngineEvent::JobArchived {
            job_id: id.to_string(),
        });
        Ok(())
    }

    /// Fail a job stored as `running` that no task in this process is
    /// driving.
    pub async fn resolve_stuck(&self, id: &str, reason: &str) -> EngineResult<ImprovementJob> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Running {
            return Err(invalid(&job, "resolve"));
        }
        if self.is_executing(id) {
            return Err(EngineError::InvalidState {
                kind: "Job",
                id: id.to_string(),
                status: "executing".to_string(),
                operation: "resolve",
            });
        }

        let Some(job) = self.fail_running(id, reason).await? else {
            return Err(invalid(&self.get(id).await?, "resolve"));
        };
        warn!(job = %id, reason, "Resolved stuck job");
        Ok(job)
    }

    /// Move a `running` job to `failed` with `reason`. Returns `None` when
    /// the job had already left `running`.
    async fn fail_running(&self, id: &str, reason: &str) -> EngineResult<Option<ImprovementJob>> {
        let key = id.to_string();
        let reason = reason.to_string();
        let failed = self
            .db
            .call(move |db| {
                let Some(mut job) = db.get_job(&key)? else {
                    return Ok(None);
                };
                if job.status != JobStatus::Running {
                    return Ok(None);
                }
                job.status = JobStatus::Failed;
                job.error = Some(reason);
                job.updated_at = Utc::now();
                Ok(db.update_job_from(&job, JobStatus::Running)?.then_some(job))
            })
            .await
            .map_err(EngineError::Storage)?;
        if let Some(job) = &failed {
            self.events.publish(&EngineEvent::job_status(job));
        }
        Ok(failed)
    }

    /// Resolve every job left `running` by a previous process.
    pub async fn recover(&self) -> EngineResult<Vec<String>> {
        let stuck: Vec<String> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.id)
            .collect();
        for id in &stuck {
            self.resolve_stuck(id, INTERRUPTED).await?;
        }
        Ok(stuck)
    }

    /// Wait until `id` is no longer running.
    pub async fn wait_until_settled(&self, id: &str) -> EngineResult<ImprovementJob> {
        loop {
            let job = self.get(id).await?;
            if job.status != JobStatus::Running && !self.is_executing(id) {
                return Ok(job);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn invalid(job: &ImprovementJob, operation: &'static str) -> EngineError {
    EngineError::InvalidState {
        kind: "Job",
        id: job.id.clone(),
        status: job.status.to_string(),
        operation,
    }
}
