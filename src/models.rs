use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

// ── Modes and thresholds ──────────────────────────────────────────────

/// Risk-tolerance profile for a session or job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
    Exploratory,
}

impl Mode {
    pub const ALL: [Mode; 4] = [
        Mode::Conservative,
        Mode::Balanced,
        Mode::Aggressive,
        Mode::Exploratory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
            Self::Exploratory => "exploratory",
        }
    }

    /// Minimum council confidence the architect needs before approving.
    pub fn default_threshold(&self) -> f64 {
        match self {
            Self::Conservative => 0.80,
            Self::Balanced => 0.60,
            Self::Aggressive => 0.40,
            Self::Exploratory => 0.0,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            "exploratory" => Ok(Self::Exploratory),
            _ => Err(format!("Invalid mode: {}", s)),
        }
    }
}

// ── Lifecycle enums ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// The six phases of one iteration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Introspecting,
    Predicting,
    CouncilReview,
    ArchitectReview,
    Executing,
    Learning,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Introspecting => "introspecting",
            Self::Predicting => "predicting",
            Self::CouncilReview => "council_review",
            Self::ArchitectReview => "architect_review",
            Self::Executing => "executing",
            Self::Learning => "learning",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Revise,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Revise => "revise",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "revise" => Ok(Self::Revise),
            "reject" => Ok(Self::Reject),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// Ordered so that `max` yields the more severe level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Improvement category attached to opportunities, proposals and jobs.
///
/// Serialized as a plain string; unrecognised names round-trip as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImprovementType {
    Refactor,
    Performance,
    Security,
    ErrorHandling,
    Documentation,
    Testing,
    Custom(String),
}

impl ImprovementType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Refactor => "refactor",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::ErrorHandling => "error_handling",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for ImprovementType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "refactor" => Self::Refactor,
            "performance" => Self::Performance,
            "security" => Self::Security,
            "error_handling" | "error-handling" => Self::ErrorHandling,
            "documentation" | "docs" => Self::Documentation,
            "testing" | "tests" => Self::Testing,
            _ => Self::Custom(s),
        }
    }
}

impl From<ImprovementType> for String {
    fn from(t: ImprovementType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ImprovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Change records ────────────────────────────────────────────────────

/// A detected candidate for improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub file_path: String,
    /// 1-based line the opportunity points at, when it has one.
    pub line: Option<usize>,
    pub improvement_type: ImprovementType,
    pub description: String,
    #[serde(default)]
    pub rationale: String,
}

/// A concrete diff addressing one opportunity (a.k.a. Improvement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub file_path: String,
    pub improvement_type: ImprovementType,
    pub description: String,
    pub diff: String,
    pub applied: bool,
    pub outcome: Option<String>,
}

impl Proposal {
    pub fn new(opportunity: &Opportunity, diff: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: opportunity.file_path.clone(),
            improvement_type: opportunity.improvement_type.clone(),
            description: opportunity.description.clone(),
            diff: diff.into(),
            applied: false,
            outcome: None,
        }
    }

    /// Lines the diff adds, without the leading `+`.
    pub fn added_lines(&self) -> impl Iterator<Item = &str> {
        self.diff
            .lines()
            .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
            .map(|l| &l[1..])
    }

    /// Lines the diff removes, without the leading `-`.
    pub fn removed_lines(&self) -> impl Iterator<Item = &str> {
        self.diff
            .lines()
            .filter(|l| l.starts_with('-') && !l.starts_with("---"))
            .map(|l| &l[1..])
    }

    pub fn changed_line_count(&self) -> usize {
        self.added_lines().count() + self.removed_lines().count()
    }
}

/// One reviewer's vote on a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub decision: Decision,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub concerns: Vec<String>,
}

impl ReviewVerdict {
    pub fn new(decision: Decision, confidence: f64) -> Self {
        Self {
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            risk_level: RiskLevel::Low,
            concerns: Vec::new(),
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_concern(mut self, concern: impl Into<String>) -> Self {
        self.concerns.push(concern.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilDecision {
    pub security: ReviewVerdict,
    pub performance: ReviewVerdict,
    pub quality: ReviewVerdict,
    pub decision: Decision,
    pub overall_risk_level: RiskLevel,
    pub overall_confidence: f64,
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectDecision {
    pub decision: Decision,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub reasoning: String,
    pub required_changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
}

impl ExecutionResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

// ── Sessions and iterations ───────────────────────────────────────────

/// Live snapshot of the iteration a session is working on.
///
/// Written only by the engine that owns the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentIteration {
    pub number: u32,
    pub phase: Phase,
    pub opportunity: Option<Opportunity>,
    pub proposal: Option<Proposal>,
    pub council: Option<CouncilDecision>,
    pub architect: Option<ArchitectDecision>,
    pub started_at: DateTime<Utc>,
}

impl CurrentIteration {
    pub fn begin(number: u32) -> Self {
        Self {
            number,
            phase: Phase::Introspecting,
            opportunity: None,
            proposal: None,
            council: None,
            architect: None,
            started_at: Utc::now(),
        }
    }
}

/// Serialized with a derived `success_rate` field alongside the stored
/// counters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Session {
    pub id: String,
    pub scope: String,
    pub mode: Mode,
    pub max_iterations: u32,
    pub status: SessionStatus,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub iterations_run: u32,
    pub errors: Vec<String>,
    pub current_iteration: Option<CurrentIteration>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Session", 14)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("scope", &self.scope)?;
        s.serialize_field("mode", &self.mode)?;
        s.serialize_field("max_iterations", &self.max_iterations)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("attempted", &self.attempted)?;
        s.serialize_field("succeeded", &self.succeeded)?;
        s.serialize_field("failed", &self.failed)?;
        s.serialize_field("success_rate", &self.success_rate())?;
        s.serialize_field("iterations_run", &self.iterations_run)?;
        s.serialize_field("errors", &self.errors)?;
        s.serialize_field("current_iteration", &self.current_iteration)?;
        s.serialize_field("started_at", &self.started_at)?;
        s.serialize_field("finished_at", &self.finished_at)?;
        s.end()
    }
}

impl Session {
    pub fn new(scope: &str, mode: Mode, max_iterations: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            mode,
            max_iterations,
            status: SessionStatus::Running,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            iterations_run: 0,
            errors: Vec::new(),
            current_iteration: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.succeeded as u64, self.attempted as u64)
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Fold a finished iteration into the running counters.
    pub fn record(&mut self, iteration: &Iteration) {
        self.iterations_run = iteration.number;
        if iteration.attempted {
            self.attempted += 1;
            if iteration.success {
                self.succeeded += 1;
            } else {
                self.failed += 1;
            }
        }
        if let Some(err) = &iteration.error {
            self.errors
                .push(format!("iteration {}: {}", iteration.number, err));
        }
        self.current_iteration = None;
    }
}

/// How an iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Succeeded,
    ExecutionFailed,
    NotApproved,
    NoOpportunity,
    PhaseFailed,
    Cancelled,
}

impl IterationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::ExecutionFailed => "execution_failed",
            Self::NotApproved => "not_approved",
            Self::NoOpportunity => "no_opportunity",
            Self::PhaseFailed => "phase_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Append-only record of one pass through the phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub session_id: String,
    pub number: u32,
    pub outcome: IterationOutcome,
    /// Last phase the iteration entered before it ended.
    pub last_phase: Phase,
    /// True once the architect ruled on the iteration's proposal.
    pub attempted: bool,
    pub opportunity: Option<Opportunity>,
    pub proposal: Option<Proposal>,
    pub council: Option<CouncilDecision>,
    pub architect: Option<ArchitectDecision>,
    pub execution: Option<ExecutionResult>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ── Improvement jobs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Approved,
    Rejected,
    Running,
    Completed,
    Failed,
    Cancelled,
    Applied,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Applied => "applied",
        }
    }

    /// Statuses a job can be cleaned up from.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Approved | Self::Running)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Approved | Self::Completed | Self::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "applied" => Ok(Self::Applied),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMetrics {
    pub lines_of_code: usize,
    pub complexity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementJob {
    pub id: String,
    pub scope: String,
    pub mode: Mode,
    pub improvement_type: ImprovementType,
    pub file_path: String,
    pub description: String,
    pub rationale: String,
    pub success_criteria: Vec<String>,
    pub status: JobStatus,
    pub metrics_before: CodeMetrics,
    pub metrics_after: Option<CodeMetrics>,
    pub diff_preview: Option<String>,
    pub proposal: Proposal,
    pub council: Option<CouncilDecision>,
    pub architect: Option<ArchitectDecision>,
    pub execution: Option<ExecutionResult>,
    pub error: Option<String>,
    /// Set when an execute run lands on completed or failed.
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImprovementJob {
    /// An execute run counts towards stats once the architect ruled on it,
    /// the same rule sessions use for iterations.
    pub fn counts_as_attempt(&self) -> bool {
        self.executed_at.is_some() && self.architect.is_some()
    }

    pub fn execution_succeeded(&self) -> bool {
        self.execution.as_ref().is_some_and(|e| e.success)
    }
}

// ── Statistics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_sessions: u64,
    pub total_attempted: u64,
    pub total_succeeded: u64,
    pub success_rate: f64,
    pub success_rate_by_type: BTreeMap<String, f64>,
    pub success_rate_by_mode: BTreeMap<String, f64>,
    pub average_iterations_per_session: f64,
}

/// `num / den`, or 0 when `den` is 0.
pub fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_iteration(number: u32, attempted: bool, success: bool) -> Iteration {
        Iteration {
            session_id: "s".into(),
            number,
            outcome: if success {
                IterationOutcome::Succeeded
            } else {
                IterationOutcome::NotApproved
            },
            last_phase: Phase::Learning,
            attempted,
            opportunity: None,
            proposal: None,
            council: None,
            architect: None,
            execution: None,
            success,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_mode_thresholds() {
        assert_eq!(Mode::Conservative.default_threshold(), 0.80);
        assert_eq!(Mode::Balanced.default_threshold(), 0.60);
        assert_eq!(Mode::Aggressive.default_threshold(), 0.40);
        assert_eq!(Mode::Exploratory.default_threshold(), 0.0);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Conservative".parse::<Mode>().unwrap(), Mode::Conservative);
        assert_eq!("exploratory".parse::<Mode>().unwrap(), Mode::Exploratory);
        assert!("reckless".parse::<Mode>().is_err());
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::Low.max(RiskLevel::High), RiskLevel::High);
    }

    #[test]
    fn test_improvement_type_serialization() {
        let json = serde_json::to_string(&ImprovementType::ErrorHandling).unwrap();
        assert_eq!(json, "\"error_handling\"");
        let custom: ImprovementType = serde_json::from_str("\"naming\"").unwrap();
        assert_eq!(custom, ImprovementType::Custom("naming".into()));
        let known: ImprovementType = serde_json::from_str("\"docs\"").unwrap();
        assert_eq!(known, ImprovementType::Documentation);
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::CouncilReview).unwrap(),
            "\"council_review\""
        );
        assert_eq!(Phase::ArchitectReview.to_string(), "architect_review");
    }

    #[test]
    fn test_job_status_terminality() {
        for s in [JobStatus::Pending, JobStatus::Approved, JobStatus::Running] {
            assert!(!s.is_terminal(), "{} should not be terminal", s);
        }
        for s in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Rejected,
            JobStatus::Cancelled,
            JobStatus::Applied,
        ] {
            assert!(s.is_terminal(), "{} should be terminal", s);
        }
    }

    #[test]
    fn test_job_status_round_trips_through_str() {
        for s in [
            JobStatus::Pending,
            JobStatus::Approved,
            JobStatus::Rejected,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Applied,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_session_success_rate_zero_when_nothing_attempted() {
        let session = Session::new("default", Mode::Balanced, 3);
        assert_eq!(session.success_rate(), 0.0);
    }

    #[test]
    fn test_session_record_updates_counters() {
        let mut session = Session::new("default", Mode::Balanced, 3);
        session.record(&sample_iteration(1, true, true));
        session.record(&sample_iteration(2, true, false));
        session.record(&sample_iteration(3, false, false));
        assert_eq!(session.attempted, 2);
        assert_eq!(session.succeeded, 1);
        assert_eq!(session.failed, 1);
        assert_eq!(session.iterations_run, 3);
        assert_eq!(session.success_rate(), 0.5);
    }

    #[test]
    fn test_session_record_appends_errors() {
        let mut session = Session::new("default", Mode::Balanced, 1);
        let mut it = sample_iteration(1, false, false);
        it.error = Some("detector exploded".into());
        session.record(&it);
        assert_eq!(session.errors, vec!["iteration 1: detector exploded"]);
    }

    #[test]
    fn test_proposal_diff_line_counts() {
        let opp = Opportunity {
            file_path: "src/lib.rs".into(),
            line: Some(2),
            improvement_type: ImprovementType::Refactor,
            description: "trim".into(),
            rationale: String::new(),
        };
        let diff = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -2,1 +2,1 @@\n-let x = 1;  \n+let x = 1;\n";
        let proposal = Proposal::new(&opp, diff);
        assert_eq!(proposal.added_lines().collect::<Vec<_>>(), vec!["let x = 1;"]);
        assert_eq!(proposal.changed_line_count(), 2);
        assert!(!proposal.applied);
    }

    #[test]
    fn test_review_verdict_clamps_confidence() {
        assert_eq!(ReviewVerdict::new(Decision::Approve, 1.7).confidence, 1.0);
        assert_eq!(ReviewVerdict::new(Decision::Approve, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_session_json_carries_success_rate() {
        let mut session = Session::new("default", Mode::Balanced, 4);
        session.attempted = 4;
        session.succeeded = 3;
        session.failed = 1;

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["success_rate"], 0.75);
        assert_eq!(value["attempted"], 4);

        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }
}
