//! Review council: concurrent fan-out to the three reviewers and fan-in of
//! their verdicts into one [`CouncilDecision`].
//!
//! Each reviewer runs in its own tokio task under a bounded timeout. A
//! reviewer that errors, panics or times out is replaced by a fail-safe
//! `revise` vote with zero confidence, so the council call itself never
//! fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::reviewers::{HeuristicReviewer, Reviewer, ReviewerKind};
use crate::models::{CouncilDecision, Decision, Proposal, ReviewVerdict, RiskLevel};

/// Default timeout for a single reviewer.
pub const DEFAULT_REVIEW_TIMEOUT_SECS: u64 = 300;

pub struct ReviewCouncil {
    security: Arc<dyn Reviewer>,
    performance: Arc<dyn Reviewer>,
    quality: Arc<dyn Reviewer>,
    review_timeout: Duration,
}

impl ReviewCouncil {
    pub fn new(
        security: Arc<dyn Reviewer>,
        performance: Arc<dyn Reviewer>,
        quality: Arc<dyn Reviewer>,
    ) -> Self {
        Self {
            security,
            performance,
            quality,
            review_timeout: Duration::from_secs(DEFAULT_REVIEW_TIMEOUT_SECS),
        }
    }

    /// Council seated with the built-in heuristic reviewers.
    pub fn heuristic() -> anyhow::Result<Self> {
        Ok(Self::new(
            Arc::new(HeuristicReviewer::new(ReviewerKind::Security)?),
            Arc::new(HeuristicReviewer::new(ReviewerKind::Performance)?),
            Arc::new(HeuristicReviewer::new(ReviewerKind::Quality)?),
        ))
    }

    pub fn with_review_timeout(mut self, timeout: Duration) -> Self {
        self.review_timeout = timeout;
        self
    }

    /// Review `proposal` with all three seats concurrently.
    pub async fn review(&self, proposal: &Proposal) -> CouncilDecision {
        let start = Instant::now();
        let proposal = Arc::new(proposal.clone());
        let seats = [
            (ReviewerKind::Security, self.security.clone()),
            (ReviewerKind::Performance, self.performance.clone()),
            (ReviewerKind::Quality, self.quality.clone()),
        ];

        let handles: Vec<_> = seats
            .iter()
            .map(|(kind, reviewer)| {
                let reviewer = reviewer.clone();
                let proposal = proposal.clone();
                let timeout = self.review_timeout;
                let kind = *kind;
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, reviewer.review(&proposal)).await {
                        Ok(Ok(verdict)) => sanitize(kind, verdict),
                        Ok(Err(e)) => fail_safe(kind, &format!("{:#}", e)),
                        Err(_) => fail_safe(
                            kind,
                            &format!("timed out after {}s", timeout.as_secs_f64()),
                        ),
                    }
                })
            })
            .collect();

        let mut joined = join_all(handles).await.into_iter();
        let mut collect = |kind: ReviewerKind| {
            let verdict = match joined.next() {
                Some(Ok(verdict)) => verdict,
                Some(Err(e)) => fail_safe(kind, &format!("task aborted: {}", e)),
                None => fail_safe(kind, "no verdict returned"),
            };
            debug!(
                reviewer = %kind,
                decision = %verdict.decision,
                confidence = verdict.confidence,
                "Reviewer verdict"
            );
            verdict
        };
        let security = collect(ReviewerKind::Security);
        let performance = collect(ReviewerKind::Performance);
        let quality = collect(ReviewerKind::Quality);

        let decision = aggregate(security, performance, quality);
        info!(
            proposal = %proposal.id,
            decision = %decision.decision,
            confidence = decision.overall_confidence,
            risk = %decision.overall_risk_level,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Council decision"
        );
        decision
    }
}

/// Vote substituted for a reviewer that could not deliver one.
pub fn fail_safe(kind: ReviewerKind, reason: &str) -> ReviewVerdict {
    warn!(reviewer = %kind, reason, "Reviewer failed, counting as revise");
    ReviewVerdict {
        decision: Decision::Revise,
        confidence: 0.0,
        risk_level: RiskLevel::Medium,
        concerns: vec![format!("{} failed: {}", kind.display_name(), reason)],
    }
}

fn sanitize(kind: ReviewerKind, mut verdict: ReviewVerdict) -> ReviewVerdict {
    if !verdict.confidence.is_finite() {
        return fail_safe(kind, "returned a non-finite confidence");
    }
    verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
    verdict
}

/// Combine three verdicts with the council rule: any reject wins, then any
/// revise, else approve. Confidence is the mean, risk the maximum.
pub fn aggregate(
    security: ReviewVerdict,
    performance: ReviewVerdict,
    quality: ReviewVerdict,
) -> CouncilDecision {
    let all = [&security, &performance, &quality];

    let decision = if all.iter().any(|v| v.decision == Decision::Reject) {
        Decision::Reject
    } else if all.iter().any(|v| v.decision == Decision::Revise) {
        Decision::Revise
    } else {
        Decision::Approve
    };

    let overall_confidence = all.iter().map(|v| v.confidence).sum::<f64>() / all.len() as f64;
    let overall_risk_level = all
        .iter()
        .map(|v| v.risk_level)
        .max()
        .unwrap_or_default();

    let mut concerns: Vec<String> = Vec::new();
    for concern in all.iter().flat_map(|v| v.concerns.iter()) {
        if !concern.trim().is_empty() && !concerns.contains(concern) {
            concerns.push(concern.clone());
        }
    }

    CouncilDecision {
        security,
        performance,
        quality,
        decision,
        overall_risk_level,
        overall_confidence,
        concerns,
    }
}
