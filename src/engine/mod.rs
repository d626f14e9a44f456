//! The improvement engine and its collaborators.
//!
//! ## Module Map
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `traits`    | `OpportunityDetector`, `ProposalGenerator`, `Executor`  |
//! | `iteration` | `IterationEngine`: the six-phase loop for one session   |
//! | `rules`     | Line rewrite rules shared by detector and generator     |
//! | `detector`  | `CodebaseDetector`: walks the target tree               |
//! | `generator` | `DiffGenerator`: renders single-hunk git diffs          |
//! | `executor`  | `GitExecutor`: stages and applies diffs with libgit2    |
//! | `metrics`   | Lines-of-code and branch-count snapshots                |
//! | `testing`   | Scripted collaborators (tests, `testing` feature)       |

pub mod detector;
pub mod executor;
pub mod generator;
pub mod iteration;
pub mod metrics;
pub mod rules;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;

pub use detector::CodebaseDetector;
pub use executor::GitExecutor;
pub use generator::DiffGenerator;
pub use iteration::{DEFAULT_PHASE_TIMEOUT_SECS, IterationEngine};
pub use traits::{Executor, OpportunityDetector, ProposalGenerator};

use crate::architect::ArchitectSupervisor;
use crate::config::KaizenConfig;
use crate::council::ReviewCouncil;
use crate::errors::EngineError;
use crate::models::Phase;

/// Everything one iteration or job run delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn OpportunityDetector>,
    pub generator: Arc<dyn ProposalGenerator>,
    pub executor: Arc<dyn Executor>,
    pub council: Arc<ReviewCouncil>,
    pub architect: Arc<ArchitectSupervisor>,
}

impl Collaborators {
    /// The built-in set: scan the configured target directory, rewrite
    /// it through git, and review with the heuristic council.
    pub fn codebase(config: &KaizenConfig) -> Result<Self> {
        let target = config.target_dir();
        let detector = CodebaseDetector::new(&target, &config.toml.detector)?;
        let generator = DiffGenerator::with_rules(&target, detector.rules());
        Ok(Self {
            detector: Arc::new(detector),
            generator: Arc::new(generator),
            executor: Arc::new(GitExecutor::new(&target, config.work_dir())),
            council: Arc::new(
                ReviewCouncil::heuristic()?.with_review_timeout(config.toml.engine.phase_timeout()),
            ),
            architect: Arc::new(
                ArchitectSupervisor::new().with_thresholds(config.toml.architect.thresholds.clone()),
            ),
        })
    }
}

/// Run one collaborator call for `phase` under `timeout`.
///
/// An error, a timeout and a panic inside the call all come back as
/// [`EngineError::PhaseExecution`].
pub(crate) async fn call_phase<T>(
    phase: Phase,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(EngineError::phase(phase, format!("{:#}", e))),
        Ok(Err(payload)) => Err(EngineError::phase(
            phase,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
        Err(_) => Err(EngineError::phase(phase, format!("timed out after {:?}", timeout))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
