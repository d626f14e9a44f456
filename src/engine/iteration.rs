//! The iteration engine: drives one session through its phases until it
//! reaches its iteration cap, is stopped, or hits a fatal storage error.
//!
//! Each iteration walks introspecting → predicting → council_review →
//! architect_review → executing → learning. The stop signal is polled
//! at phase boundaries up to and including architect review. A call that
//! is already in flight finishes first. Once an iteration enters
//! `executing` it runs to completion.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Collaborators, call_phase};
use crate::errors::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::models::{
    CurrentIteration, Decision, Iteration, IterationOutcome, Phase, Session, SessionStatus,
};
use crate::stats::StatsAggregator;
use crate::store::DbHandle;

/// Default bound on one collaborator call.
pub const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 300;

/// Why an iteration ended before reaching a normal outcome.
enum Interrupt {
    Cancelled,
    Failed(EngineError),
}

pub struct IterationEngine {
    collab: Collaborators,
    db: DbHandle,
    stats: StatsAggregator,
    events: EventBus,
    phase_timeout: Duration,
    iteration_delay: Duration,
}

impl IterationEngine {
    pub fn new(
        collab: Collaborators,
        db: DbHandle,
        stats: StatsAggregator,
        events: EventBus,
    ) -> Self {
        Self {
            collab,
            db,
            stats,
            events,
            phase_timeout: Duration::from_secs(DEFAULT_PHASE_TIMEOUT_SECS),
            iteration_delay: Duration::ZERO,
        }
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Pause between iterations. The pause is cut short by a stop.
    pub fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    /// Run `session` to a terminal status and return its final state.
    ///
    /// The session row must already exist in the database.
    pub async fn run(&self, mut session: Session, cancel: CancellationToken) -> Session {
        info!(
            session = %session.id,
            scope = %session.scope,
            mode = %session.mode,
            max_iterations = session.max_iterations,
            "Session started"
        );

        let mut stopped = false;
        let mut fatal = false;
        let first = session.iterations_run + 1;

        for number in first..=session.max_iterations {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            let iteration = self.run_iteration(&mut session, number, &cancel).await;
            session.record(&iteration);

            let persisted = {
                let it = iteration.clone();
                let snapshot = session.clone();
                self.db
                    .call(move |db| db.record_iteration(&it, &snapshot))
                    .await
            };
            if let Err(e) = persisted {
                error!(session = %session.id, iteration = number, error = %e, "Failed to record iteration");
                session
                    .errors
                    .push(format!("iteration {}: failed to record: {:#}", number, e));
                fatal = true;
                break;
            }
            if let Err(e) = self.stats.record_iteration(&iteration, session.mode) {
                warn!(error = %e, "Failed to update running stats");
            }

            info!(
                session = %session.id,
                iteration = number,
                outcome = iteration.outcome.as_str(),
                "Iteration recorded"
            );
            let cancelled = iteration.outcome == IterationOutcome::Cancelled;
            self.events
                .publish(&EngineEvent::IterationRecorded { iteration });
            if cancelled {
                stopped = true;
                break;
            }

            if !self.iteration_delay.is_zero() && number < session.max_iterations {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        stopped = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.iteration_delay) => {}
                }
            }
        }

        session.status = if fatal {
            SessionStatus::Failed
        } else if stopped {
            SessionStatus::Stopped
        } else {
            SessionStatus::Completed
        };
        session.current_iteration = None;
        session.finished_at = Some(Utc::now());

        let snapshot = session.clone();
        if let Err(e) = self.db.call(move |db| db.update_session(&snapshot)).await {
            error!(session = %session.id, error = %e, "Failed to persist final session state");
        }
        if let Err(e) = self.stats.record_session(&session) {
            warn!(error = %e, "Failed to update running stats");
        }

        info!(
            session = %session.id,
            status = %session.status,
            attempted = session.attempted,
            succeeded = session.succeeded,
            "Session finished"
        );
        self.events.publish(&EngineEvent::SessionFinished {
            session_id: session.id.clone(),
            status: session.status,
            attempted: session.attempted,
            succeeded: session.succeeded,
        });
        session
    }

    /// Fail a session whose run ended without finalizing it. A session
    /// that already left `running` is left alone.
    pub async fn abandon(&self, session_id: &str, reason: &str) {
        let id = session_id.to_string();
        let error = reason.to_string();
        let finished = self
            .db
            .call(move |db| db.finish_running_session(&id, SessionStatus::Failed, Some(error.as_str())))
            .await;
        let session = match finished {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                error!(session = %session_id, error = %e, "Failed to mark abandoned session");
                return;
            }
        };
        error!(session = %session.id, reason, "Session abandoned");
        if let Err(e) = self.stats.record_session(&session) {
            warn!(error = %e, "Failed to update running stats");
        }
        self.events.publish(&EngineEvent::SessionFinished {
            session_id: session.id.clone(),
            status: session.status,
            attempted: session.attempted,
            succeeded: session.succeeded,
        });
    }

    async fn run_iteration(
        &self,
        session: &mut Session,
        number: u32,
        cancel: &CancellationToken,
    ) -> Iteration {
        let mut it = Iteration {
            session_id: session.id.clone(),
            number,
            outcome: IterationOutcome::NoOpportunity,
            last_phase: Phase::Introspecting,
            attempted: false,
            opportunity: None,
            proposal: None,
            council: None,
            architect: None,
            execution: None,
            success: false,
            error: None,
            timestamp: Utc::now(),
        };

        match self.drive(session, &mut it, cancel).await {
            Ok(outcome) => it.outcome = outcome,
            Err(Interrupt::Cancelled) => {
                debug!(session = %session.id, iteration = number, phase = %it.last_phase, "Iteration cancelled");
                it.outcome = IterationOutcome::Cancelled;
                return it;
            }
            Err(Interrupt::Failed(e)) => {
                warn!(session = %session.id, iteration = number, error = %e, "Iteration failed");
                it.outcome = IterationOutcome::PhaseFailed;
                it.success = false;
                it.error = Some(e.to_string());
            }
        }

        self.enter(session, &it, Phase::Learning).await;
        it
    }

    async fn drive(
        &self,
        session: &mut Session,
        it: &mut Iteration,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome, Interrupt> {
        self.step(session, it, Phase::Introspecting, cancel).await?;
        let detected = call_phase(Phase::Introspecting, self.phase_timeout, self.collab.detector.detect())
            .await
            .map_err(Interrupt::Failed)?;
        let Some(opportunity) = detected else {
            return Ok(IterationOutcome::NoOpportunity);
        };
        it.opportunity = Some(opportunity.clone());

        self.step(session, it, Phase::Predicting, cancel).await?;
        let proposal = call_phase(
            Phase::Predicting,
            self.phase_timeout,
            self.collab.generator.generate(&opportunity),
        )
        .await
        .map_err(Interrupt::Failed)?;
        it.proposal = Some(proposal.clone());

        self.step(session, it, Phase::CouncilReview, cancel).await?;
        let council = self.collab.council.review(&proposal).await;
        it.council = Some(council.clone());

        self.step(session, it, Phase::ArchitectReview, cancel).await?;
        let architect = self
            .collab
            .architect
            .decide(&proposal, &council, session.mode);
        let approved = architect.decision == Decision::Approve;
        it.architect = Some(architect);
        // A ruled-on proposal counts as an attempt whether or not it runs.
        it.attempted = true;
        if !approved {
            return Ok(IterationOutcome::NotApproved);
        }

        // Past this point a stop waits for the iteration to finish.
        it.last_phase = Phase::Executing;
        self.enter(session, it, Phase::Executing).await;
        let execution = call_phase(
            Phase::Executing,
            self.phase_timeout,
            self.collab.executor.apply(&proposal),
        )
        .await
        .map_err(Interrupt::Failed)?;

        let mut proposal = proposal;
        proposal.applied = execution.success;
        proposal.outcome = Some(execution.message.clone());
        it.proposal = Some(proposal);
        it.success = execution.success;
        let outcome = if execution.success {
            IterationOutcome::Succeeded
        } else {
            IterationOutcome::ExecutionFailed
        };
        it.execution = Some(execution);
        Ok(outcome)
    }

    /// Observe the stop signal, then enter `phase`.
    async fn step(
        &self,
        session: &mut Session,
        it: &mut Iteration,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        it.last_phase = phase;
        self.enter(session, it, phase).await;
        Ok(())
    }

    /// Publish the live snapshot for `phase`. Persisting it is best effort.
    async fn enter(&self, session: &mut Session, it: &Iteration, phase: Phase) {
        let current = CurrentIteration {
            number: it.number,
            phase,
            opportunity: it.opportunity.clone(),
            proposal: it.proposal.clone(),
            council: it.council.clone(),
            architect: it.architect.clone(),
            started_at: it.timestamp,
        };
        session.current_iteration = Some(current.clone());

        let id = session.id.clone();
        if let Err(e) = self
            .db
            .call(move |db| db.update_current_iteration(&id, Some(&current)))
            .await
        {
            warn!(session = %session.id, error = %e, "Failed to persist current iteration");
        }

        debug!(session = %session.id, iteration = it.number, phase = %phase, "Entering phase");
        self.events.publish(&EngineEvent::PhaseChanged {
            session_id: session.id.clone(),
            iteration: it.number,
            phase,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::architect::ArchitectSupervisor;
    use crate::council::ReviewCouncil;
    use crate::engine::testing::*;
    use crate::models::{ImprovementType, Mode};

    fn council_of(confidence: f64) -> Arc<ReviewCouncil> {
        Arc::new(ReviewCouncil::new(
            Arc::new(FixedReviewer::approving(confidence)),
            Arc::new(FixedReviewer::approving(confidence)),
            Arc::new(FixedReviewer::approving(confidence)),
        ))
    }

    fn collaborators(
        detector: ScriptedDetector,
        executor: ScriptedExecutor,
        confidence: f64,
    ) -> Collaborators {
        Collaborators {
            detector: Arc::new(detector),
            generator: Arc::new(ScriptedGenerator::new()),
            executor: Arc::new(executor),
            council: council_of(confidence),
            architect: Arc::new(ArchitectSupervisor::new()),
        }
    }

    async fn run(collab: Collaborators, mode: Mode, max: u32) -> (Session, DbHandle) {
        let db = DbHandle::in_memory().unwrap();
        let engine = IterationEngine::new(collab, db.clone(), StatsAggregator::new(), EventBus::new());
        let session = Session::new("default", mode, max);
        let row = session.clone();
        db.call(move |db| db.insert_session(&row)).await.unwrap();
        let finished = engine.run(session, CancellationToken::new()).await;
        (finished, db)
    }

    // =========================================
    // Outcome tests
    // =========================================

    #[tokio::test]
    async fn test_successful_iteration() {
        let collab = collaborators(
            ScriptedDetector::one(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ScriptedExecutor::succeeding(),
            0.9,
        );
        let (session, db) = run(collab, Mode::Conservative, 1).await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.attempted, 1);
        assert_eq!(session.succeeded, 1);
        assert!(session.current_iteration.is_none());

        let its = db
            .call({
                let id = session.id.clone();
                move |db| db.list_iterations(&id)
            })
            .await
            .unwrap();
        assert_eq!(its.len(), 1);
        assert_eq!(its[0].outcome, IterationOutcome::Succeeded);
        assert!(its[0].proposal.as_ref().unwrap().applied);
        assert_eq!(its[0].last_phase, Phase::Executing);
    }

    #[tokio::test]
    async fn test_low_confidence_is_attempted_but_not_executed() {
        let collab = collaborators(
            ScriptedDetector::one(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ScriptedExecutor::succeeding(),
            0.5,
        );
        let (session, db) = run(collab, Mode::Conservative, 1).await;
        assert_eq!(session.attempted, 1);
        assert_eq!(session.succeeded, 0);
        assert_eq!(session.success_rate(), 0.0);
        assert_eq!(session.iterations_run, 1);
        let stored = db
            .call({
                let id = session.id.clone();
                move |db| db.get_session(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.attempted, 1);
        assert_eq!(stored.failed, 1);
    }

    #[tokio::test]
    async fn test_no_opportunity_completes_quietly() {
        let collab = collaborators(ScriptedDetector::new(vec![]), ScriptedExecutor::succeeding(), 1.0);
        let (session, _db) = run(collab, Mode::Balanced, 3).await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.iterations_run, 3);
        assert_eq!(session.attempted, 0);
        assert!(session.errors.is_empty());
    }

    #[tokio::test]
    async fn test_detector_error_is_recorded_and_session_continues() {
        let collab = collaborators(
            ScriptedDetector::new(vec![
                Step::Fail("disk on fire".into()),
                Step::Found(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ]),
            ScriptedExecutor::succeeding(),
            1.0,
        );
        let (session, _db) = run(collab, Mode::Balanced, 2).await;
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.errors.len(), 1);
        assert!(session.errors[0].contains("introspecting"));
        assert!(session.errors[0].contains("disk on fire"));
        assert_eq!(session.succeeded, 1);
    }

    #[tokio::test]
    async fn test_failed_execution_counts_as_attempt() {
        let collab = collaborators(
            ScriptedDetector::one(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ScriptedExecutor::failing(),
            1.0,
        );
        let (session, _db) = run(collab, Mode::Balanced, 1).await;
        assert_eq!(session.attempted, 1);
        assert_eq!(session.failed, 1);
        assert_eq!(session.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_phase_timeout_fails_iteration() {
        let collab = collaborators(
            ScriptedDetector::one(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ScriptedExecutor::succeeding().with_delay(Duration::from_millis(200)),
            1.0,
        );
        let db = DbHandle::in_memory().unwrap();
        let engine = IterationEngine::new(collab, db.clone(), StatsAggregator::new(), EventBus::new())
            .with_phase_timeout(Duration::from_millis(20));
        let session = Session::new("default", Mode::Balanced, 1);
        let row = session.clone();
        db.call(move |db| db.insert_session(&row)).await.unwrap();

        let finished = engine.run(session, CancellationToken::new()).await;
        assert_eq!(finished.failed, 1);
        assert!(finished.errors[0].contains("timed out"));
    }

    // =========================================
    // Stop tests
    // =========================================

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let collab = collaborators(
            ScriptedDetector::endless(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ScriptedExecutor::succeeding(),
            1.0,
        );
        let db = DbHandle::in_memory().unwrap();
        let engine = IterationEngine::new(collab, db.clone(), StatsAggregator::new(), EventBus::new());
        let session = Session::new("default", Mode::Balanced, 5);
        let row = session.clone();
        db.call(move |db| db.insert_session(&row)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let finished = engine.run(session, cancel).await;
        assert_eq!(finished.status, SessionStatus::Stopped);
        assert_eq!(finished.iterations_run, 0);
    }

    #[tokio::test]
    async fn test_stop_inside_council_lets_the_review_finish() {
        let gate = Arc::new(GatedReviewer::new(1.0));
        let collab = Collaborators {
            detector: Arc::new(ScriptedDetector::endless(opportunity(
                "src/lib.rs",
                ImprovementType::Refactor,
            ))),
            generator: Arc::new(ScriptedGenerator::new()),
            executor: Arc::new(ScriptedExecutor::succeeding()),
            council: Arc::new(ReviewCouncil::new(
                gate.clone(),
                Arc::new(FixedReviewer::approving(1.0)),
                Arc::new(FixedReviewer::approving(1.0)),
            )),
            architect: Arc::new(ArchitectSupervisor::new()),
        };
        let db = DbHandle::in_memory().unwrap();
        let engine = Arc::new(IterationEngine::new(
            collab,
            db.clone(),
            StatsAggregator::new(),
            EventBus::new(),
        ));
        let session = Session::new("default", Mode::Balanced, 10);
        let row = session.clone();
        db.call(move |db| db.insert_session(&row)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let engine = engine.clone();
            let cancel = cancel.clone();
            async move { engine.run(session, cancel).await }
        });

        gate.wait_entered().await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "stop must wait for the council");

        gate.release();
        let finished = handle.await.unwrap();

        assert_eq!(finished.status, SessionStatus::Stopped);
        assert_eq!(finished.iterations_run, 1);
        assert_eq!(finished.attempted, 0);
        let its = db
            .call({
                let id = finished.id.clone();
                move |db| db.list_iterations(&id)
            })
            .await
            .unwrap();
        assert_eq!(its.len(), 1);
        assert_eq!(its[0].outcome, IterationOutcome::Cancelled);
        assert_eq!(its[0].last_phase, Phase::CouncilReview);
        assert!(its[0].council.is_some());
        assert!(its[0].architect.is_none());
    }

    #[tokio::test]
    async fn test_phase_events_are_published_in_order() {
        let collab = collaborators(
            ScriptedDetector::one(opportunity("src/lib.rs", ImprovementType::Refactor)),
            ScriptedExecutor::succeeding(),
            1.0,
        );
        let db = DbHandle::in_memory().unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let engine = IterationEngine::new(collab, db.clone(), StatsAggregator::new(), events);
        let session = Session::new("default", Mode::Balanced, 1);
        let row = session.clone();
        db.call(move |db| db.insert_session(&row)).await.unwrap();
        engine.run(session, CancellationToken::new()).await;

        let mut phases = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let event: EngineEvent = serde_json::from_str(&msg).unwrap();
            if let EngineEvent::PhaseChanged { phase, .. } = event {
                phases.push(phase);
            }
        }
        assert_eq!(
            phases,
            vec![
                Phase::Introspecting,
                Phase::Predicting,
                Phase::CouncilReview,
                Phase::ArchitectReview,
                Phase::Executing,
                Phase::Learning,
            ]
        );
    }
}
