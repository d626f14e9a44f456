//! Renders a unified diff for a detected opportunity.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::rules::{DetectRule, default_rules};
use super::traits::ProposalGenerator;
use crate::models::{Opportunity, Proposal};

const CONTEXT_LINES: usize = 3;

pub struct DiffGenerator {
    root: PathBuf,
    rules: Arc<Vec<DetectRule>>,
}

impl DiffGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_rules(root, Arc::new(default_rules()?)))
    }

    pub fn with_rules(root: impl Into<PathBuf>, rules: Arc<Vec<DetectRule>>) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }
}

/// Build a single-hunk git diff replacing line `line` (1-based) of `content`
/// with `replacement`, or deleting it when `replacement` is `None`.
pub fn render_diff(
    file_path: &str,
    content: &str,
    line: usize,
    replacement: Option<&str>,
) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();
    if line == 0 || line > lines.len() {
        bail!("{} has no line {}", file_path, line);
    }
    let start = line.saturating_sub(CONTEXT_LINES).max(1);
    let end = (line + CONTEXT_LINES).min(lines.len());
    if end == lines.len() && !content.ends_with('\n') {
        bail!("Cannot patch {}: file has no trailing newline", file_path);
    }

    let old_count = end - start + 1;
    let new_count = if replacement.is_some() {
        old_count
    } else {
        old_count - 1
    };
    let new_start = if new_count == 0 { start - 1 } else { start };

    let mut diff = format!(
        "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -{},{} +{},{} @@\n",
        start,
        old_count,
        new_start,
        new_count,
        p = file_path
    );
    for n in start..=end {
        let text = lines[n - 1];
        if n == line {
            diff.push_str(&format!("-{}\n", text));
            if let Some(new) = replacement {
                diff.push_str(&format!("+{}\n", new));
            }
        } else {
            diff.push_str(&format!(" {}\n", text));
        }
    }
    Ok(diff)
}

#[async_trait]
impl ProposalGenerator for DiffGenerator {
    async fn generate(&self, opportunity: &Opportunity) -> Result<Proposal> {
        let Some(line) = opportunity.line else {
            bail!("Opportunity in {} has no line to rewrite", opportunity.file_path);
        };
        let path = self.root.join(&opportunity.file_path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let Some(text) = line.checked_sub(1).and_then(|i| content.lines().nth(i)) else {
            bail!("{} has no line {}", opportunity.file_path, line);
        };
        let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.improvement_type == opportunity.improvement_type && r.matches(text))
        else {
            bail!(
                "Opportunity at {}:{} no longer applies",
                opportunity.file_path,
                line
            );
        };

        let replacement = rule.rewrite(text);
        let diff = render_diff(&opportunity.file_path, &content, line, replacement.as_deref())?;
        Ok(Proposal::new(opportunity, diff))
    }
}
