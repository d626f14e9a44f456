//! Rough size and complexity metrics for job before/after snapshots.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::models::{CodeMetrics, Proposal};

static BRANCH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(if|match|for|while|loop)\b|&&|\|\|").unwrap());

fn branches(line: &str) -> usize {
    BRANCH_REGEX.find_iter(line).count()
}

/// Non-blank lines, and one plus the number of branch points.
pub fn measure(source: &str) -> CodeMetrics {
    let mut metrics = CodeMetrics {
        lines_of_code: 0,
        complexity: 1,
    };
    for line in source.lines().filter(|l| !l.trim().is_empty()) {
        metrics.lines_of_code += 1;
        metrics.complexity += branches(line);
    }
    metrics
}

pub fn measure_file(path: &Path) -> Result<CodeMetrics> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(measure(&source))
}

/// Metrics the file would have after `proposal` lands.
pub fn project(before: CodeMetrics, proposal: &Proposal) -> CodeMetrics {
    let mut after = before;
    for line in proposal.added_lines().filter(|l| !l.trim().is_empty()) {
        after.lines_of_code += 1;
        after.complexity += branches(line);
    }
    for line in proposal.removed_lines().filter(|l| !l.trim().is_empty()) {
        after.lines_of_code = after.lines_of_code.saturating_sub(1);
        after.complexity = after.complexity.saturating_sub(branches(line)).max(1);
    }
    after
}
