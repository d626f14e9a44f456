//! Line-level rewrite rules shared by the codebase detector and the diff
//! generator. The detector reports where a rule matches; the generator
//! re-finds the same rule on that line and renders its fix.

use anyhow::Result;
use regex::Regex;

use crate::models::ImprovementType;

#[derive(Debug, Clone)]
pub enum Fix {
    /// Strip trailing whitespace.
    TrimEnd,
    /// Drop the whole line.
    RemoveLine,
    /// Replace the first match of the rule's pattern.
    Replace(String),
}

#[derive(Debug, Clone)]
pub struct DetectRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub improvement_type: ImprovementType,
    pub description: &'static str,
    pub rationale: &'static str,
    pub fix: Fix,
}

impl DetectRule {
    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    /// The replacement for `line`, or `None` when the line is dropped.
    pub fn rewrite(&self, line: &str) -> Option<String> {
        match &self.fix {
            Fix::TrimEnd => Some(line.trim_end().to_string()),
            Fix::RemoveLine => None,
            Fix::Replace(with) => Some(self.pattern.replace(line, with.as_str()).into_owned()),
        }
    }
}

pub fn default_rules() -> Result<Vec<DetectRule>> {
    Ok(vec![
        DetectRule {
            name: "trailing-whitespace",
            pattern: Regex::new(r"\S[ \t]+$")?,
            improvement_type: ImprovementType::Refactor,
            description: "Remove trailing whitespace",
            rationale: "Trailing whitespace produces noisy diffs",
            fix: Fix::TrimEnd,
        },
        DetectRule {
            name: "leftover-dbg",
            pattern: Regex::new(r"^\s*dbg!\(.*\);\s*$")?,
            improvement_type: ImprovementType::Refactor,
            description: "Remove leftover dbg! call",
            rationale: "dbg! output is debugging residue and should not ship",
            fix: Fix::RemoveLine,
        },
        DetectRule {
            name: "len-zero",
            pattern: Regex::new(r"\.len\(\) == 0")?,
            improvement_type: ImprovementType::Refactor,
            description: "Use is_empty() instead of comparing len() to zero",
            rationale: "is_empty states the intent directly",
            fix: Fix::Replace(".is_empty()".to_string()),
        },
        DetectRule {
            name: "collect-to-count",
            pattern: Regex::new(r"\.collect::<Vec<_>>\(\)\.len\(\)")?,
            improvement_type: ImprovementType::Performance,
            description: "Count iterator items without collecting them",
            rationale: "Collecting into a Vec only to take its length allocates needlessly",
            fix: Fix::Replace(".count()".to_string()),
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> DetectRule {
        default_rules()
            .unwrap()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap()
    }

    #[test]
    fn test_trailing_whitespace_rule() {
        let r = rule("trailing-whitespace");
        assert!(r.matches("let x = 1;   "));
        assert!(!r.matches("let x = 1;"));
        // Whitespace-only lines are left alone.
        assert!(!r.matches("    "));
        assert_eq!(r.rewrite("let x = 1;\t ").as_deref(), Some("let x = 1;"));
    }

    #[test]
    fn test_dbg_rule_removes_line() {
        let r = rule("leftover-dbg");
        assert!(r.matches("    dbg!(&value);"));
        assert!(!r.matches("let y = dbg!(x);"));
        assert_eq!(r.rewrite("    dbg!(&value);"), None);
    }

    #[test]
    fn test_replace_rules() {
        assert_eq!(
            rule("len-zero").rewrite("if items.len() == 0 {").as_deref(),
            Some("if items.is_empty() {")
        );
        assert_eq!(
            rule("collect-to-count")
                .rewrite("let n = it.collect::<Vec<_>>().len();")
                .as_deref(),
            Some("let n = it.count();")
        );
    }
}
