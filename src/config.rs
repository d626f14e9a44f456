//! Configuration for kaizen, read from `.kaizen/kaizen.toml`.
//!
//! Layering is file → environment → CLI. Every section is optional and
//! falls back to defaults, so an empty file (or no file) is valid.
//!
//! ```toml
//! [engine]
//! target_dir = "."
//! scope = "default"
//! phase_timeout_secs = 300
//! default_mode = "balanced"
//! default_max_iterations = 10
//!
//! [architect.thresholds]
//! conservative = 0.85
//!
//! [detector]
//! include = ["**/*.rs"]
//! exclude = ["target/**"]
//!
//! [server]
//! port = 4141
//! db_path = ".kaizen/kaizen.db"
//!
//! [logging]
//! format = "json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::models::Mode;

pub const CONFIG_DIR: &str = ".kaizen";
pub const CONFIG_FILE: &str = "kaizen.toml";

/// Root of `kaizen.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaizenToml {
    pub engine: EngineSection,
    pub architect: ArchitectSection,
    pub detector: DetectorSection,
    pub server: ServerSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub target_dir: PathBuf,
    pub scope: String,
    pub phase_timeout_secs: u64,
    pub default_mode: String,
    pub default_max_iterations: u32,
    pub iteration_delay_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("."),
            scope: "default".to_string(),
            phase_timeout_secs: 300,
            default_mode: Mode::Balanced.as_str().to_string(),
            default_max_iterations: 10,
            iteration_delay_ms: 0,
        }
    }
}

impl EngineSection {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    /// Configured default mode, falling back to balanced when unparseable.
    pub fn mode(&self) -> Mode {
        self.default_mode.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectSection {
    pub thresholds: ThresholdOverrides,
}

/// Optional per-mode overrides of the approval threshold table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdOverrides {
    pub conservative: Option<f64>,
    pub balanced: Option<f64>,
    pub aggressive: Option<f64>,
    pub exploratory: Option<f64>,
}

impl ThresholdOverrides {
    pub fn get(&self, mode: Mode) -> Option<f64> {
        match mode {
            Mode::Conservative => self.conservative,
            Mode::Balanced => self.balanced,
            Mode::Aggressive => self.aggressive,
            Mode::Exploratory => self.exploratory,
        }
    }

    pub fn threshold(&self, mode: Mode) -> f64 {
        self.get(mode).unwrap_or_else(|| mode.default_threshold())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_candidates: usize,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            include: vec!["**/*.rs".to_string()],
            exclude: vec![
                "target/**".to_string(),
                ".git/**".to_string(),
                ".kaizen/**".to_string(),
            ],
            max_candidates: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4141,
            db_path: PathBuf::from(".kaizen/kaizen.db"),
        }
    }
}

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format: '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    pub level: String,
    /// Also write JSON logs to `.kaizen/logs/` with daily rotation.
    pub file: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
            file: false,
        }
    }
}

impl KaizenToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kaizen.toml")
    }

    /// Load `<config_dir>/kaizen.toml`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize kaizen.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `KAIZEN_*` variables from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("KAIZEN_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = lookup("KAIZEN_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("KAIZEN_TARGET_DIR") {
            self.engine.target_dir = PathBuf::from(dir);
        }
        if let Some(scope) = lookup("KAIZEN_SCOPE") {
            self.engine.scope = scope;
        }
        if let Some(format) = lookup("KAIZEN_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            self.logging.format = format;
        }
    }

    /// Approval threshold for `mode`, honouring overrides.
    pub fn threshold(&self, mode: Mode) -> f64 {
        self.architect.thresholds.threshold(mode)
    }

    /// Return human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.default_mode.parse::<Mode>().is_err() {
            warnings.push(format!(
                "Unknown default_mode '{}': expected conservative, balanced, aggressive or exploratory",
                self.engine.default_mode
            ));
        }
        if self.engine.phase_timeout_secs == 0 {
            warnings.push("phase_timeout_secs is 0: every phase will time out".to_string());
        }
        if self.engine.default_max_iterations == 0 {
            warnings.push("default_max_iterations is 0: sessions will do nothing".to_string());
        }
        for mode in Mode::ALL {
            if let Some(t) = self.architect.thresholds.get(mode) {
                if !(0.0..=1.0).contains(&t) {
                    warnings.push(format!(
                        "Threshold for {} is {}: must be between 0.0 and 1.0",
                        mode, t
                    ));
                }
            }
        }
        for pattern in self.detector.include.iter().chain(&self.detector.exclude) {
            if glob::Pattern::new(pattern).is_err() {
                warnings.push(format!("Invalid detector glob pattern '{}'", pattern));
            }
        }
        if self.engine.scope.trim().is_empty() {
            warnings.push("engine.scope is empty".to_string());
        }

        warnings
    }
}

/// Resolved runtime configuration: the toml plus CLI overrides and paths.
#[derive(Debug, Clone)]
pub struct KaizenConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: KaizenToml,
    pub verbose: bool,
}

impl KaizenConfig {
    /// Load configuration for `project_dir` (file → env).
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = KaizenToml::load_or_default(&config_dir)?;
        toml.apply_env();
        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.config_dir.join("work")
    }

    /// Relative paths in the toml are resolved against the project dir.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        self.resolve(&self.toml.engine.target_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.toml.server.db_path)
    }
}
