use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ExecutionResult, Opportunity, Proposal};

/// Scans a target surface for improvement candidates.
#[async_trait]
pub trait OpportunityDetector: Send + Sync {
    /// One candidate not yielded before, or `None` when nothing is left.
    async fn detect(&self) -> Result<Option<Opportunity>>;

    /// Every candidate on the surface, regardless of what was yielded.
    async fn scan(&self) -> Result<Vec<Opportunity>>;
}

/// Turns one opportunity into one concrete diff.
#[async_trait]
pub trait ProposalGenerator: Send + Sync {
    async fn generate(&self, opportunity: &Opportunity) -> Result<Proposal>;
}

/// Applies diffs to the target surface.
///
/// `Err` means the executor itself could not run. A diff that does not
/// apply is an `Ok` result with `success == false`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Verify the diff applies and stage it as a working artifact, leaving
    /// the authoritative target untouched.
    async fn stage(&self, proposal: &Proposal) -> Result<ExecutionResult>;

    /// Merge the diff into the authoritative target.
    async fn apply(&self, proposal: &Proposal) -> Result<ExecutionResult>;

    /// Remove any working artifacts left for `proposal`.
    async fn cleanup(&self, proposal: &Proposal) -> Result<()>;
}
