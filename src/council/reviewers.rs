//! Council reviewers.
//!
//! Each reviewer examines one proposal from a single angle and returns a
//! [`ReviewVerdict`]. Reviewers are stateless and are invoked independently
//! per proposal, so a council can run all three concurrently.
//!
//! ## Reviewer Kinds
//!
//! - [`ReviewerKind::Security`]: unsafe code, secrets, process spawning
//! - [`ReviewerKind::Performance`]: blocking calls, needless allocation
//! - [`ReviewerKind::Quality`]: leftover debugging, panics, placeholders
//!
//! ## Example
//!
//! ```
//! use kaizen::council::{HeuristicReviewer, Reviewer, ReviewerKind};
//!
//! let reviewer = HeuristicReviewer::new(ReviewerKind::Security).unwrap();
//! assert_eq!(reviewer.kind().display_name(), "Security Reviewer");
//! ```

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Decision, Proposal, ReviewVerdict, RiskLevel};

/// The three council seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerKind {
    Security,
    Performance,
    Quality,
}

impl ReviewerKind {
    pub const ALL: [ReviewerKind; 3] = [
        ReviewerKind::Security,
        ReviewerKind::Performance,
        ReviewerKind::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Quality => "quality",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Security => "Security Reviewer",
            Self::Performance => "Performance Reviewer",
            Self::Quality => "Quality Reviewer",
        }
    }

    /// What this reviewer looks for.
    pub fn focus_areas(&self) -> Vec<&'static str> {
        match self {
            Self::Security => vec![
                "unsafe blocks",
                "hardcoded credentials",
                "process spawning and shell injection",
                "disabled certificate verification",
            ],
            Self::Performance => vec![
                "blocking sleeps",
                "allocation in hot paths",
                "unbounded loops",
                "redundant collection",
            ],
            Self::Quality => vec![
                "leftover debugging output",
                "unimplemented placeholders",
                "panicking error handling",
                "empty or no-op changes",
            ],
        }
    }
}

impl fmt::Display for ReviewerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "security" | "sec" | "security_reviewer" => Ok(Self::Security),
            "performance" | "perf" | "performance_reviewer" => Ok(Self::Performance),
            "quality" | "qa" | "quality_reviewer" => Ok(Self::Quality),
            _ => Err(format!("Invalid reviewer kind: {}", s)),
        }
    }
}

/// One council member.
#[async_trait]
pub trait Reviewer: Send + Sync {
    fn kind(&self) -> ReviewerKind;

    async fn review(&self, proposal: &Proposal) -> Result<ReviewVerdict>;
}

/// How strongly a matched rule weighs on the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recorded as a concern, lowers confidence.
    Note,
    Revise,
    Reject,
}

/// A regex checked against every line the diff adds.
#[derive(Debug, Clone)]
pub struct FocusRule {
    pattern: Regex,
    concern: &'static str,
    risk: RiskLevel,
    severity: Severity,
}

impl FocusRule {
    pub fn new(
        pattern: &str,
        concern: &'static str,
        risk: RiskLevel,
        severity: Severity,
    ) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)
                .with_context(|| format!("Invalid focus rule pattern '{}'", pattern))?,
            concern,
            risk,
            severity,
        })
    }
}

const BASE_CONFIDENCE: f64 = 0.9;
const NOTE_PENALTY: f64 = 0.1;
const MIN_CONFIDENCE: f64 = 0.3;

/// Rule-driven reviewer used when no external judgement is plugged in.
#[derive(Debug, Clone)]
pub struct HeuristicReviewer {
    kind: ReviewerKind,
    rules: Vec<FocusRule>,
}

impl HeuristicReviewer {
    /// Reviewer for `kind` with its default rule set.
    pub fn new(kind: ReviewerKind) -> Result<Self> {
        let rules = match kind {
            ReviewerKind::Security => vec![
                FocusRule::new(
                    r"\bunsafe\s*\{",
                    "introduces an unsafe block",
                    RiskLevel::High,
                    Severity::Reject,
                )?,
                FocusRule::new(
                    r#"(?i)(password|secret|api_key|token)\s*[:=]\s*""#,
                    "hardcodes a credential",
                    RiskLevel::High,
                    Severity::Reject,
                )?,
                FocusRule::new(
                    r"Command::new|std::process::",
                    "spawns an external process",
                    RiskLevel::Medium,
                    Severity::Revise,
                )?,
                FocusRule::new(
                    r"danger_accept_invalid_certs",
                    "disables certificate verification",
                    RiskLevel::High,
                    Severity::Reject,
                )?,
            ],
            ReviewerKind::Performance => vec![
                FocusRule::new(
                    r"thread::sleep",
                    "adds a blocking sleep",
                    RiskLevel::Medium,
                    Severity::Revise,
                )?,
                FocusRule::new(
                    r"collect::<Vec<[^>]*>>\(\)\s*\.len\(\)",
                    "collects only to count",
                    RiskLevel::Low,
                    Severity::Note,
                )?,
                FocusRule::new(
                    r"\.clone\(\)",
                    "adds a clone",
                    RiskLevel::Low,
                    Severity::Note,
                )?,
                FocusRule::new(
                    r"^\s*loop\s*\{",
                    "adds an unbounded loop",
                    RiskLevel::Medium,
                    Severity::Note,
                )?,
            ],
            ReviewerKind::Quality => vec![
                FocusRule::new(
                    r"\b(todo|unimplemented)!\(",
                    "leaves a placeholder macro",
                    RiskLevel::Medium,
                    Severity::Revise,
                )?,
                FocusRule::new(
                    r"\bdbg!\(",
                    "leaves a dbg! call",
                    RiskLevel::Low,
                    Severity::Revise,
                )?,
                FocusRule::new(
                    r"\.unwrap\(\)|\.expect\(",
                    "can panic on error",
                    RiskLevel::Low,
                    Severity::Note,
                )?,
                FocusRule::new(
                    r"\bprintln!\(",
                    "prints to stdout",
                    RiskLevel::Low,
                    Severity::Note,
                )?,
            ],
        };
        Ok(Self { kind, rules })
    }

    pub fn with_rule(mut self, rule: FocusRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Evaluate synchronously; the trait impl just wraps this.
    pub fn evaluate(&self, proposal: &Proposal) -> ReviewVerdict {
        if proposal.changed_line_count() == 0 {
            return ReviewVerdict::new(Decision::Revise, 0.5)
                .with_risk(RiskLevel::Low)
                .with_concern(format!("{}: diff changes nothing", self.kind));
        }

        let mut worst = None;
        let mut risk = RiskLevel::Low;
        let mut notes = 0usize;
        let mut concerns = Vec::new();

        for rule in &self.rules {
            let hits = proposal
                .added_lines()
                .filter(|line| rule.pattern.is_match(line))
                .count();
            if hits == 0 {
                continue;
            }
            risk = risk.max(rule.risk);
            worst = worst.max(Some(rule.severity));
            if rule.severity == Severity::Note {
                notes += hits;
            }
            concerns.push(format!("{}: {}", self.kind, rule.concern));
        }

        let decision = match worst {
            Some(Severity::Reject) => Decision::Reject,
            Some(Severity::Revise) => Decision::Revise,
            _ => Decision::Approve,
        };
        let confidence = (BASE_CONFIDENCE - NOTE_PENALTY * notes as f64).max(MIN_CONFIDENCE);

        ReviewVerdict {
            decision,
            confidence,
            risk_level: risk,
            concerns,
        }
    }
}

#[async_trait]
impl Reviewer for HeuristicReviewer {
    fn kind(&self) -> ReviewerKind {
        self.kind
    }

    async fn review(&self, proposal: &Proposal) -> Result<ReviewVerdict> {
        Ok(self.evaluate(proposal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImprovementType, Opportunity};

    fn proposal_with(added: &[&str]) -> Proposal {
        let opp = Opportunity {
            file_path: "src/lib.rs".into(),
            line: Some(1),
            improvement_type: ImprovementType::Refactor,
            description: "test".into(),
            rationale: String::new(),
        };
        let mut diff = String::from("--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,1 +1,1 @@\n-old\n");
        for line in added {
            diff.push('+');
            diff.push_str(line);
            diff.push('\n');
        }
        Proposal::new(&opp, diff)
    }

    // =========================================
    // ReviewerKind tests
    // =========================================

    #[test]
    fn test_kind_from_str_aliases() {
        assert_eq!("security".parse::<ReviewerKind>().unwrap(), ReviewerKind::Security);
        assert_eq!("PERF".parse::<ReviewerKind>().unwrap(), ReviewerKind::Performance);
        assert_eq!(
            "quality-reviewer".parse::<ReviewerKind>().unwrap(),
            ReviewerKind::Quality
        );
        assert!("style".parse::<ReviewerKind>().is_err());
    }

    #[test]
    fn test_every_kind_has_focus_areas() {
        for kind in ReviewerKind::ALL {
            assert!(!kind.focus_areas().is_empty());
        }
    }

    // =========================================
    // HeuristicReviewer tests
    // =========================================

    #[test]
    fn test_clean_diff_is_approved() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Security).unwrap();
        let verdict = reviewer.evaluate(&proposal_with(&["let x = 1;"]));
        assert_eq!(verdict.decision, Decision::Approve);
        assert_eq!(verdict.confidence, BASE_CONFIDENCE);
        assert_eq!(verdict.risk_level, RiskLevel::Low);
        assert!(verdict.concerns.is_empty());
    }

    #[test]
    fn test_unsafe_block_is_rejected() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Security).unwrap();
        let verdict = reviewer.evaluate(&proposal_with(&["unsafe { ptr.read() }"]));
        assert_eq!(verdict.decision, Decision::Reject);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert_eq!(verdict.concerns, vec!["security: introduces an unsafe block"]);
    }

    #[test]
    fn test_hardcoded_secret_is_rejected() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Security).unwrap();
        let verdict = reviewer.evaluate(&proposal_with(&[r#"let api_key = "abc123";"#]));
        assert_eq!(verdict.decision, Decision::Reject);
    }

    #[test]
    fn test_removed_lines_are_not_judged() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Quality).unwrap();
        // The dbg! only appears on the removed side.
        let opp = Opportunity {
            file_path: "a.rs".into(),
            line: None,
            improvement_type: ImprovementType::Refactor,
            description: String::new(),
            rationale: String::new(),
        };
        let proposal = Proposal::new(&opp, "@@ -1 +1 @@\n-dbg!(x);\n+x;\n");
        assert_eq!(reviewer.evaluate(&proposal).decision, Decision::Approve);
    }

    #[test]
    fn test_notes_lower_confidence_without_blocking() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Performance).unwrap();
        let verdict = reviewer.evaluate(&proposal_with(&["let a = b.clone();", "let c = d.clone();"]));
        assert_eq!(verdict.decision, Decision::Approve);
        assert!((verdict.confidence - 0.7).abs() < 1e-9);
        assert_eq!(verdict.concerns.len(), 1);
    }

    #[test]
    fn test_confidence_has_a_floor() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Performance).unwrap();
        let lines = vec!["x.clone();"; 20];
        let verdict = reviewer.evaluate(&proposal_with(&lines));
        assert_eq!(verdict.confidence, MIN_CONFIDENCE);
    }

    #[test]
    fn test_placeholder_requests_revision() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Quality).unwrap();
        let verdict = reviewer.evaluate(&proposal_with(&["todo!()"]));
        assert_eq!(verdict.decision, Decision::Revise);
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_empty_diff_requests_revision() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Quality).unwrap();
        let opp = Opportunity {
            file_path: "a.rs".into(),
            line: None,
            improvement_type: ImprovementType::Refactor,
            description: String::new(),
            rationale: String::new(),
        };
        let verdict = reviewer.evaluate(&Proposal::new(&opp, ""));
        assert_eq!(verdict.decision, Decision::Revise);
    }

    #[test]
    fn test_custom_rule_is_applied() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Quality)
            .unwrap()
            .with_rule(
                FocusRule::new(r"FIXME", "leaves a FIXME", RiskLevel::Low, Severity::Revise)
                    .unwrap(),
            );
        let verdict = reviewer.evaluate(&proposal_with(&["// FIXME later"]));
        assert_eq!(verdict.decision, Decision::Revise);
    }

    #[tokio::test]
    async fn test_trait_review_matches_evaluate() {
        let reviewer = HeuristicReviewer::new(ReviewerKind::Quality).unwrap();
        let proposal = proposal_with(&["dbg!(value);"]);
        let verdict = reviewer.review(&proposal).await.unwrap();
        assert_eq!(verdict, reviewer.evaluate(&proposal));
    }
}
