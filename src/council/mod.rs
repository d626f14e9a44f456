//! The review council: three specialised reviewers and their aggregation rule.

pub mod dispatcher;
pub mod reviewers;

pub use dispatcher::{DEFAULT_REVIEW_TIMEOUT_SECS, ReviewCouncil, aggregate, fail_safe};
pub use reviewers::{FocusRule, HeuristicReviewer, Reviewer, ReviewerKind, Severity};
