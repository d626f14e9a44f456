//! Opportunity detection over a source tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use tracing::debug;
use walkdir::WalkDir;

use super::rules::{DetectRule, default_rules};
use super::traits::OpportunityDetector;
use crate::config::DetectorSection;
use crate::models::Opportunity;

/// Walks the target directory and reports every line a [`DetectRule`]
/// matches.
pub struct CodebaseDetector {
    plan: Arc<ScanPlan>,
    seen: Mutex<HashSet<String>>,
}

struct ScanPlan {
    root: PathBuf,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    max_candidates: usize,
    rules: Arc<Vec<DetectRule>>,
}

impl CodebaseDetector {
    pub fn new(root: impl Into<PathBuf>, config: &DetectorSection) -> Result<Self> {
        let compile = |globs: &[String]| -> Result<Vec<Pattern>> {
            globs
                .iter()
                .map(|g| Pattern::new(g).with_context(|| format!("Invalid glob '{}'", g)))
                .collect()
        };
        Ok(Self {
            plan: Arc::new(ScanPlan {
                root: root.into(),
                include: compile(&config.include)?,
                exclude: compile(&config.exclude)?,
                max_candidates: config.max_candidates,
                rules: Arc::new(default_rules()?),
            }),
            seen: Mutex::new(HashSet::new()),
        })
    }

    pub fn rules(&self) -> Arc<Vec<DetectRule>> {
        self.plan.rules.clone()
    }
}

impl ScanPlan {
    fn wanted(&self, rel: &str) -> bool {
        self.include.iter().any(|p| p.matches(rel)) && !self.exclude.iter().any(|p| p.matches(rel))
    }

    fn run(&self) -> Vec<Opportunity> {
        let mut found = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file());

        for entry in walker {
            let Some(rel) = relative_path(&self.root, entry.path()) else {
                continue;
            };
            if !self.wanted(&rel) {
                continue;
            }
            // Non-UTF-8 files are skipped.
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                for rule in self.rules.iter() {
                    if !rule.matches(line) {
                        continue;
                    }
                    found.push(Opportunity {
                        file_path: rel.clone(),
                        line: Some(idx + 1),
                        improvement_type: rule.improvement_type.clone(),
                        description: format!("{} at {}:{}", rule.description, rel, idx + 1),
                        rationale: rule.rationale.to_string(),
                    });
                    if found.len() >= self.max_candidates {
                        return found;
                    }
                }
            }
        }
        debug!(root = %self.root.display(), candidates = found.len(), "Scanned codebase");
        found
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn key(o: &Opportunity) -> String {
    format!(
        "{}:{}:{}",
        o.file_path,
        o.line.unwrap_or(0),
        o.improvement_type
    )
}

#[async_trait]
impl OpportunityDetector for CodebaseDetector {
    async fn detect(&self) -> Result<Option<Opportunity>> {
        let candidates = self.scan().await?;
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| anyhow::anyhow!("detector state poisoned"))?;
        Ok(candidates.into_iter().find(|o| seen.insert(key(o))))
    }

    async fn scan(&self) -> Result<Vec<Opportunity>> {
        let plan = self.plan.clone();
        tokio::task::spawn_blocking(move || plan.run())
            .await
            .context("Codebase scan panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImprovementType;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_scan_finds_rule_matches() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "fn a() {}\nlet x = 1;  \n    dbg!(x);\n");
        write(dir.path(), "README.md", "trailing   \n");

        let detector = CodebaseDetector::new(dir.path(), &DetectorSection::default()).unwrap();
        let found = detector.scan().await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].file_path, "src/lib.rs");
        assert_eq!(found[0].line, Some(2));
        assert_eq!(found[1].line, Some(3));
        assert_eq!(found[1].improvement_type, ImprovementType::Refactor);
    }

    #[tokio::test]
    async fn test_scan_respects_exclude() {
        let dir = tempdir().unwrap();
        write(dir.path(), "target/debug/gen.rs", "let x = 1;  \n");
        write(dir.path(), "src/main.rs", "fn main() {}\n");

        let detector = CodebaseDetector::new(dir.path(), &DetectorSection::default()).unwrap();
        assert!(detector.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detect_yields_fresh_opportunities() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "let a = 1;  \nlet b = 2;  \n");

        let detector = CodebaseDetector::new(dir.path(), &DetectorSection::default()).unwrap();
        let first = detector.detect().await.unwrap().unwrap();
        let second = detector.detect().await.unwrap().unwrap();
        assert_ne!(first.line, second.line);
        assert!(detector.detect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_max_candidates_caps_results() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/lib.rs", &"let a = 1;  \n".repeat(10));

        let config = DetectorSection {
            max_candidates: 3,
            ..Default::default()
        };
        let detector = CodebaseDetector::new(dir.path(), &config).unwrap();
        assert_eq!(detector.scan().await.unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        let config = DetectorSection {
            include: vec!["[".into()],
            ..Default::default()
        };
        assert!(CodebaseDetector::new(".", &config).is_err());
    }
}
