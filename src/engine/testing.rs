//! Scripted collaborators for exercising the engine without a real
//! codebase. Used by unit tests and the scenario suites in `tests/`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Notify;

use super::traits::{Executor, OpportunityDetector, ProposalGenerator};
use crate::architect::RiskHeuristic;
use crate::council::{Reviewer, ReviewerKind};
use crate::models::{
    Decision, ExecutionResult, ImprovementType, Opportunity, Proposal, ReviewVerdict, RiskLevel,
};

pub fn opportunity(file_path: &str, improvement_type: ImprovementType) -> Opportunity {
    Opportunity {
        file_path: file_path.to_string(),
        line: Some(1),
        improvement_type,
        description: format!("improve {}", file_path),
        rationale: "scripted".to_string(),
    }
}

/// Item a [`ScriptedDetector`] hands out on one `detect()` call.
pub enum Step {
    Found(Opportunity),
    Nothing,
    Fail(String),
    Panic(String),
}

/// Yields a fixed script of results, then `None` forever.
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Step>>,
    surface: Vec<Opportunity>,
    repeat: Option<Opportunity>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(steps: Vec<Step>) -> Self {
        let surface = steps
            .iter()
            .filter_map(|s| match s {
                Step::Found(o) => Some(o.clone()),
                _ => None,
            })
            .collect();
        Self {
            script: Mutex::new(steps.into()),
            surface,
            repeat: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn one(opportunity: Opportunity) -> Self {
        Self::new(vec![Step::Found(opportunity)])
    }

    /// Hands out the same opportunity on every call.
    pub fn endless(opportunity: Opportunity) -> Self {
        let mut detector = Self::new(Vec::new());
        detector.surface = vec![opportunity.clone()];
        detector.repeat = Some(opportunity);
        detector
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpportunityDetector for ScriptedDetector {
    async fn detect(&self) -> Result<Option<Opportunity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(o) = &self.repeat {
            return Ok(Some(o.clone()));
        }
        let step = self
            .script
            .lock()
            .map_err(|_| anyhow::anyhow!("script lock poisoned"))?
            .pop_front();
        match step {
            Some(Step::Found(o)) => Ok(Some(o)),
            Some(Step::Nothing) | None => Ok(None),
            Some(Step::Fail(msg)) => bail!(msg),
            Some(Step::Panic(msg)) => panic!("{}", msg),
        }
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        Ok(self.surface.clone())
    }
}

/// Produces a small fixed diff for any opportunity.
#[derive(Default)]
pub struct ScriptedGenerator {
    fail_with: Option<String>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ProposalGenerator for ScriptedGenerator {
    async fn generate(&self, opportunity: &Opportunity) -> Result<Proposal> {
        if let Some(msg) = &self.fail_with {
            bail!(msg.clone());
        }
        let diff = format!(
            "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1,1 +1,1 @@\n-old line\n+new line\n",
            p = opportunity.file_path
        );
        Ok(Proposal::new(opportunity, diff))
    }
}

/// Executor with a fixed outcome that records what it was asked to do.
pub struct ScriptedExecutor {
    success: bool,
    error: Option<String>,
    pub staged: Mutex<Vec<String>>,
    pub applied: Mutex<Vec<String>>,
    pub cleaned: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self {
            success: true,
            error: None,
            staged: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            success: false,
            ..Self::succeeding()
        }
    }

    /// Every call returns `Err`.
    pub fn erroring(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::succeeding()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn outcome(&self, verb: &str, log: &Mutex<Vec<String>>, proposal: &Proposal) -> Result<ExecutionResult> {
        if let Some(msg) = &self.error {
            bail!(msg.clone());
        }
        log.lock()
            .map_err(|_| anyhow::anyhow!("log lock poisoned"))?
            .push(proposal.id.clone());
        Ok(if self.success {
            ExecutionResult::succeeded(format!("{} {}", verb, proposal.file_path))
        } else {
            ExecutionResult::failed(format!("could not {} {}", verb, proposal.file_path))
        })
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn stage(&self, proposal: &Proposal) -> Result<ExecutionResult> {
        tokio::time::sleep(self.delay).await;
        self.outcome("staged", &self.staged, proposal)
    }

    async fn apply(&self, proposal: &Proposal) -> Result<ExecutionResult> {
        tokio::time::sleep(self.delay).await;
        self.outcome("applied", &self.applied, proposal)
    }

    async fn cleanup(&self, proposal: &Proposal) -> Result<()> {
        self.cleaned
            .lock()
            .map_err(|_| anyhow::anyhow!("log lock poisoned"))?
            .push(proposal.id.clone());
        Ok(())
    }
}

/// Always returns the same verdict.
pub struct FixedReviewer {
    kind: ReviewerKind,
    verdict: ReviewVerdict,
}

impl FixedReviewer {
    pub fn new(verdict: ReviewVerdict) -> Self {
        Self {
            kind: ReviewerKind::Quality,
            verdict,
        }
    }

    pub fn approving(confidence: f64) -> Self {
        Self::new(ReviewVerdict::new(Decision::Approve, confidence))
    }

    pub fn rejecting(confidence: f64) -> Self {
        Self::new(ReviewVerdict::new(Decision::Reject, confidence).with_concern("rejected"))
    }

    pub fn with_kind(mut self, kind: ReviewerKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl Reviewer for FixedReviewer {
    fn kind(&self) -> ReviewerKind {
        self.kind
    }

    async fn review(&self, _proposal: &Proposal) -> Result<ReviewVerdict> {
        Ok(self.verdict.clone())
    }
}

pub struct FailingReviewer {
    message: String,
}

impl FailingReviewer {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Reviewer for FailingReviewer {
    fn kind(&self) -> ReviewerKind {
        ReviewerKind::Performance
    }

    async fn review(&self, _proposal: &Proposal) -> Result<ReviewVerdict> {
        bail!(self.message.clone())
    }
}

/// Approves after sleeping, to exercise timeouts.
pub struct SlowReviewer {
    delay: Duration,
}

impl SlowReviewer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Reviewer for SlowReviewer {
    fn kind(&self) -> ReviewerKind {
        ReviewerKind::Quality
    }

    async fn review(&self, _proposal: &Proposal) -> Result<ReviewVerdict> {
        tokio::time::sleep(self.delay).await;
        Ok(ReviewVerdict::new(Decision::Approve, 1.0))
    }
}

/// Approves only once released, so a test can hold an iteration inside
/// the council phase.
pub struct GatedReviewer {
    entered: Notify,
    release: Notify,
    confidence: f64,
}

impl GatedReviewer {
    pub fn new(confidence: f64) -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            confidence,
        }
    }

    /// Resolves once a review call is waiting at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Reviewer for GatedReviewer {
    fn kind(&self) -> ReviewerKind {
        ReviewerKind::Security
    }

    async fn review(&self, _proposal: &Proposal) -> Result<ReviewVerdict> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ReviewVerdict::new(Decision::Approve, self.confidence))
    }
}

/// Risk heuristic that panics, for exercising code outside the guarded
/// collaborator calls.
pub struct PanickingHeuristic;

impl RiskHeuristic for PanickingHeuristic {
    fn assess(&self, _proposal: &Proposal) -> RiskLevel {
        panic!("risk model unavailable")
    }
}
