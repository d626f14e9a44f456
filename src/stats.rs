//! Global statistics over sessions, iterations and jobs.
//!
//! [`StatsFold`] is the single place counting happens. The live
//! [`StatsAggregator`] feeds it incrementally as work finishes, and
//! [`StatsFold::from_history`] replays stored records through the same
//! methods, so a running fold and a recomputation always agree.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::errors::{EngineError, EngineResult};
use crate::models::{GlobalStats, ImprovementJob, Iteration, Mode, Session, ratio};
use crate::store::DbHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    attempted: u64,
    succeeded: u64,
}

impl Tally {
    fn add(&mut self, success: bool) {
        self.attempted += 1;
        if success {
            self.succeeded += 1;
        }
    }

    fn rate(&self) -> f64 {
        ratio(self.succeeded, self.attempted)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsFold {
    overall: Tally,
    by_type: BTreeMap<String, Tally>,
    by_mode: BTreeMap<String, Tally>,
    finished_sessions: u64,
    finished_session_iterations: u64,
}

impl StatsFold {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_attempt(&mut self, improvement_type: &str, mode: Mode, success: bool) {
        self.overall.add(success);
        self.by_type
            .entry(improvement_type.to_string())
            .or_default()
            .add(success);
        self.by_mode
            .entry(mode.as_str().to_string())
            .or_default()
            .add(success);
    }

    /// Count an iteration once it is recorded.
    pub fn record_iteration(&mut self, iteration: &Iteration, mode: Mode) {
        if !iteration.attempted {
            return;
        }
        let improvement_type = iteration
            .proposal
            .as_ref()
            .map(|p| p.improvement_type.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.record_attempt(&improvement_type, mode, iteration.success);
    }

    /// Count a session once it leaves `running`.
    pub fn record_session(&mut self, session: &Session) {
        if session.is_running() {
            return;
        }
        self.finished_sessions += 1;
        self.finished_session_iterations += session.iterations_run as u64;
    }

    /// Count a job once its execute run has settled.
    pub fn record_job(&mut self, job: &ImprovementJob) {
        if !job.counts_as_attempt() {
            return;
        }
        self.record_attempt(
            job.improvement_type.as_str(),
            job.mode,
            job.execution_succeeded(),
        );
    }

    /// Rebuild the fold from raw stored history.
    pub fn from_history(
        sessions: &[Session],
        iterations: &[Iteration],
        jobs: &[ImprovementJob],
    ) -> Self {
        let modes: HashMap<&str, Mode> = sessions.iter().map(|s| (s.id.as_str(), s.mode)).collect();
        let mut fold = Self::new();
        for session in sessions {
            fold.record_session(session);
        }
        for iteration in iterations {
            let mode = modes
                .get(iteration.session_id.as_str())
                .copied()
                .unwrap_or_default();
            fold.record_iteration(iteration, mode);
        }
        for job in jobs {
            fold.record_job(job);
        }
        fold
    }

    pub fn snapshot(&self) -> GlobalStats {
        GlobalStats {
            total_sessions: self.finished_sessions,
            total_attempted: self.overall.attempted,
            total_succeeded: self.overall.succeeded,
            success_rate: self.overall.rate(),
            success_rate_by_type: self
                .by_type
                .iter()
                .map(|(k, t)| (k.clone(), t.rate()))
                .collect(),
            success_rate_by_mode: self
                .by_mode
                .iter()
                .map(|(k, t)| (k.clone(), t.rate()))
                .collect(),
            average_iterations_per_session: if self.finished_sessions == 0 {
                0.0
            } else {
                self.finished_session_iterations as f64 / self.finished_sessions as f64
            },
        }
    }
}

/// Shared running fold, updated by the engine and the job store.
#[derive(Clone, Default)]
pub struct StatsAggregator {
    fold: Arc<Mutex<StatsFold>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_fold<R>(&self, f: impl FnOnce(&mut StatsFold) -> R) -> EngineResult<R> {
        let mut fold = self.fold.lock().map_err(|_| EngineError::LockPoisoned)?;
        Ok(f(&mut fold))
    }

    pub fn record_iteration(&self, iteration: &Iteration, mode: Mode) -> EngineResult<()> {
        self.with_fold(|f| f.record_iteration(iteration, mode))
    }

    pub fn record_session(&self, session: &Session) -> EngineResult<()> {
        self.with_fold(|f| f.record_session(session))
    }

    pub fn record_job(&self, job: &ImprovementJob) -> EngineResult<()> {
        self.with_fold(|f| f.record_job(job))
    }

    pub fn snapshot(&self) -> EngineResult<GlobalStats> {
        self.with_fold(|f| f.snapshot())
    }

    /// Replace the running fold with one rebuilt from the database.
    pub async fn seed(&self, db: &DbHandle) -> EngineResult<()> {
        let fold = recompute_fold(db).await?;
        self.with_fold(|f| *f = fold)
    }
}

async fn recompute_fold(db: &DbHandle) -> EngineResult<StatsFold> {
    db.call(|db| {
        let sessions = db.list_sessions(None)?;
        let iterations = db.list_all_iterations()?;
        let jobs = db.list_job_history()?;
        Ok(StatsFold::from_history(&sessions, &iterations, &jobs))
    })
    .await
    .map_err(EngineError::Storage)
}

/// Recompute global stats from the full stored history.
pub async fn recompute(db: &DbHandle) -> EngineResult<GlobalStats> {
    Ok(recompute_fold(db).await?.snapshot())
}
