//! Architect supervisor: the final, binding decision on a proposal.
//!
//! The rule is applied in order:
//! 1. A council `reject` is a veto, whatever the mode.
//! 2. `approve` requires a non-`revise` council decision and a council
//!    confidence at or above the mode threshold.
//! 3. Anything else is `revise`, with the council's concerns as the
//!    required changes.
//!
//! The risk level starts from the council's and is raised, never lowered,
//! by the pluggable [`RiskHeuristic`].

use tracing::info;

use crate::config::ThresholdOverrides;
use crate::models::{ArchitectDecision, CouncilDecision, Decision, Mode, Proposal, RiskLevel};

/// Architect's own view of how risky a proposal is.
pub trait RiskHeuristic: Send + Sync {
    fn assess(&self, proposal: &Proposal) -> RiskLevel;
}

/// Rates risk by how many lines the diff touches.
#[derive(Debug, Clone)]
pub struct DiffSizeHeuristic {
    pub medium_over: usize,
    pub high_over: usize,
}

impl Default for DiffSizeHeuristic {
    fn default() -> Self {
        Self {
            medium_over: 50,
            high_over: 200,
        }
    }
}

impl RiskHeuristic for DiffSizeHeuristic {
    fn assess(&self, proposal: &Proposal) -> RiskLevel {
        let changed = proposal.changed_line_count();
        if changed > self.high_over {
            RiskLevel::High
        } else if changed > self.medium_over {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

pub struct ArchitectSupervisor {
    thresholds: ThresholdOverrides,
    heuristic: Box<dyn RiskHeuristic>,
}

impl Default for ArchitectSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchitectSupervisor {
    pub fn new() -> Self {
        Self {
            thresholds: ThresholdOverrides::default(),
            heuristic: Box::new(DiffSizeHeuristic::default()),
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdOverrides) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_heuristic(mut self, heuristic: Box<dyn RiskHeuristic>) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Minimum council confidence needed to approve under `mode`.
    pub fn threshold(&self, mode: Mode) -> f64 {
        self.thresholds.threshold(mode)
    }

    pub fn decide(
        &self,
        proposal: &Proposal,
        council: &CouncilDecision,
        mode: Mode,
    ) -> ArchitectDecision {
        let threshold = self.threshold(mode);
        let confidence = council.overall_confidence;
        let risk_level = council
            .overall_risk_level
            .max(self.heuristic.assess(proposal));

        let (decision, reasoning, required_changes) = if council.decision == Decision::Reject {
            (
                Decision::Reject,
                "Council rejected the proposal; the veto is binding".to_string(),
                council.concerns.clone(),
            )
        } else if council.decision != Decision::Revise && confidence >= threshold {
            (
                Decision::Approve,
                format!(
                    "Council approved with confidence {:.2}, meeting the {} threshold of {:.2}",
                    confidence, mode, threshold
                ),
                Vec::new(),
            )
        } else {
            let mut changes = council.concerns.clone();
            let reasoning = if council.decision == Decision::Revise {
                "Council requested revisions".to_string()
            } else {
                format!(
                    "Council confidence {:.2} is below the {} threshold of {:.2}",
                    confidence, mode, threshold
                )
            };
            if changes.is_empty() {
                changes.push(format!(
                    "Raise reviewer confidence to at least {:.2}",
                    threshold
                ));
            }
            (Decision::Revise, reasoning, changes)
        };

        info!(
            proposal = %proposal.id,
            mode = %mode,
            decision = %decision,
            confidence,
            threshold,
            risk = %risk_level,
            "Architect decision"
        );

        ArchitectDecision {
            decision,
            confidence,
            risk_level,
            reasoning,
            required_changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::council::aggregate;
    use crate::models::{ImprovementType, Opportunity, ReviewVerdict};

    fn proposal_with_lines(n: usize) -> Proposal {
        let opp = Opportunity {
            file_path: "src/lib.rs".into(),
            line: Some(1),
            improvement_type: ImprovementType::Refactor,
            description: "tidy".into(),
            rationale: String::new(),
        };
        let mut diff = String::from("@@ -1 +1 @@\n");
        for i in 0..n {
            diff.push_str(&format!("+line {}\n", i));
        }
        Proposal::new(&opp, diff)
    }

    fn council(decision: Decision, confidence: f64) -> CouncilDecision {
        aggregate(
            ReviewVerdict::new(decision, confidence),
            ReviewVerdict::new(Decision::Approve, confidence),
            ReviewVerdict::new(Decision::Approve, confidence),
        )
    }

    // =========================================
    // Threshold rule tests
    // =========================================

    #[test]
    fn test_conservative_approves_high_confidence() {
        let architect = ArchitectSupervisor::new();
        let d = architect.decide(
            &proposal_with_lines(1),
            &council(Decision::Approve, 0.9),
            Mode::Conservative,
        );
        assert_eq!(d.decision, Decision::Approve);
        assert!(d.required_changes.is_empty());
    }

    #[test]
    fn test_conservative_revises_low_confidence() {
        let architect = ArchitectSupervisor::new();
        let d = architect.decide(
            &proposal_with_lines(1),
            &council(Decision::Approve, 0.5),
            Mode::Conservative,
        );
        assert_eq!(d.decision, Decision::Revise);
        assert!(d.reasoning.contains("below"));
        assert_eq!(d.required_changes.len(), 1);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let architect = ArchitectSupervisor::new();
        let mut c = council(Decision::Approve, 0.6);
        c.overall_confidence = 0.60;
        let d = architect.decide(&proposal_with_lines(1), &c, Mode::Balanced);
        assert_eq!(d.decision, Decision::Approve);
    }

    #[test]
    fn test_reject_is_a_veto_in_every_mode() {
        let architect = ArchitectSupervisor::new();
        for mode in Mode::ALL {
            let d = architect.decide(
                &proposal_with_lines(1),
                &council(Decision::Reject, 1.0),
                mode,
            );
            assert_eq!(d.decision, Decision::Reject, "mode {}", mode);
        }
    }

    #[test]
    fn test_never_approves_below_threshold() {
        let architect = ArchitectSupervisor::new();
        for mode in Mode::ALL {
            for step in 0..=20 {
                let confidence = step as f64 / 20.0;
                for council_decision in [Decision::Approve, Decision::Revise, Decision::Reject] {
                    let mut c = council(Decision::Approve, confidence);
                    c.decision = council_decision;
                    let d = architect.decide(&proposal_with_lines(1), &c, mode);
                    if d.decision == Decision::Approve {
                        assert!(confidence >= mode.default_threshold());
                        assert_eq!(council_decision, Decision::Approve);
                    }
                }
            }
        }
    }

    #[test]
    fn test_revise_council_is_not_approved_even_when_confident() {
        let architect = ArchitectSupervisor::new();
        let mut c = council(Decision::Revise, 0.95);
        c.concerns = vec!["quality: leaves a dbg! call".into()];
        let d = architect.decide(&proposal_with_lines(1), &c, Mode::Exploratory);
        assert_eq!(d.decision, Decision::Revise);
        assert_eq!(d.required_changes, vec!["quality: leaves a dbg! call"]);
    }

    #[test]
    fn test_exploratory_approves_zero_confidence() {
        let architect = ArchitectSupervisor::new();
        let d = architect.decide(
            &proposal_with_lines(1),
            &council(Decision::Approve, 0.0),
            Mode::Exploratory,
        );
        assert_eq!(d.decision, Decision::Approve);
    }

    #[test]
    fn test_threshold_overrides_apply() {
        let architect = ArchitectSupervisor::new().with_thresholds(ThresholdOverrides {
            balanced: Some(0.95),
            ..Default::default()
        });
        assert_eq!(architect.threshold(Mode::Balanced), 0.95);
        assert_eq!(architect.threshold(Mode::Aggressive), 0.40);
        let d = architect.decide(
            &proposal_with_lines(1),
            &council(Decision::Approve, 0.9),
            Mode::Balanced,
        );
        assert_eq!(d.decision, Decision::Revise);
    }

    // =========================================
    // Risk tests
    // =========================================

    #[test]
    fn test_risk_copied_from_council_for_small_diffs() {
        let architect = ArchitectSupervisor::new();
        let mut c = council(Decision::Approve, 0.9);
        c.overall_risk_level = RiskLevel::Medium;
        let d = architect.decide(&proposal_with_lines(3), &c, Mode::Balanced);
        assert_eq!(d.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_heuristic_raises_risk_for_large_diffs() {
        let architect = ArchitectSupervisor::new();
        let c = council(Decision::Approve, 0.9);
        assert_eq!(
            architect
                .decide(&proposal_with_lines(60), &c, Mode::Balanced)
                .risk_level,
            RiskLevel::Medium
        );
        assert_eq!(
            architect
                .decide(&proposal_with_lines(250), &c, Mode::Balanced)
                .risk_level,
            RiskLevel::High
        );
    }

    struct AlwaysHigh;

    impl RiskHeuristic for AlwaysHigh {
        fn assess(&self, _proposal: &Proposal) -> RiskLevel {
            RiskLevel::High
        }
    }

    #[test]
    fn test_custom_heuristic_keeps_higher_level() {
        let architect = ArchitectSupervisor::new().with_heuristic(Box::new(AlwaysHigh));
        let d = architect.decide(
            &proposal_with_lines(1),
            &council(Decision::Approve, 0.9),
            Mode::Balanced,
        );
        assert_eq!(d.risk_level, RiskLevel::High);
        // Risk does not change the decision.
        assert_eq!(d.decision, Decision::Approve);
    }
}
