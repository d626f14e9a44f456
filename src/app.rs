//! Wiring: one [`Kaizen`] owns the store, the running stats, the event
//! bus, the session manager and the job store. The server and the CLI
//! both go through it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::KaizenConfig;
use crate::engine::{Collaborators, DEFAULT_PHASE_TIMEOUT_SECS, IterationEngine};
use crate::errors::EngineResult;
use crate::events::EventBus;
use crate::jobs::ImprovementJobStore;
use crate::models::{GlobalStats, Mode};
use crate::session::SessionManager;
use crate::stats::StatsAggregator;
use crate::store::{DbHandle, KaizenDb};

/// Engine knobs resolved from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub target_dir: PathBuf,
    pub default_mode: Mode,
    pub phase_timeout: Duration,
    pub iteration_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from("."),
            default_mode: Mode::default(),
            phase_timeout: Duration::from_secs(DEFAULT_PHASE_TIMEOUT_SECS),
            iteration_delay: Duration::ZERO,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &KaizenConfig) -> Self {
        let engine = &config.toml.engine;
        Self {
            target_dir: config.target_dir(),
            default_mode: engine.mode(),
            phase_timeout: engine.phase_timeout(),
            iteration_delay: Duration::from_millis(engine.iteration_delay_ms),
        }
    }
}

pub struct Kaizen {
    pub db: DbHandle,
    pub stats: StatsAggregator,
    pub events: EventBus,
    pub sessions: SessionManager,
    pub jobs: ImprovementJobStore,
    pub settings: EngineSettings,
}

impl Kaizen {
    /// Open the configured database and seat the built-in collaborators.
    pub async fn open(config: &KaizenConfig) -> Result<Self> {
        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let db = DbHandle::new(
            KaizenDb::new(&db_path)
                .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
        );
        let collab = Collaborators::codebase(config)?;
        info!(db = %db_path.display(), target = %config.target_dir().display(), "Opened kaizen");
        Ok(Self::assemble(db, collab, EngineSettings::from_config(config)).await?)
    }

    /// Build from explicit parts. Recovers interrupted work and seeds the
    /// running stats from history.
    pub async fn assemble(
        db: DbHandle,
        collab: Collaborators,
        settings: EngineSettings,
    ) -> EngineResult<Self> {
        let stats = StatsAggregator::new();
        let events = EventBus::new();
        let engine = IterationEngine::new(collab.clone(), db.clone(), stats.clone(), events.clone())
            .with_phase_timeout(settings.phase_timeout)
            .with_iteration_delay(settings.iteration_delay);
        let sessions = SessionManager::new(db.clone(), Arc::new(engine), stats.clone(), events.clone());
        let jobs = ImprovementJobStore::new(
            db.clone(),
            collab,
            stats.clone(),
            events.clone(),
            settings.target_dir.clone(),
        )
        .with_default_mode(settings.default_mode)
        .with_phase_timeout(settings.phase_timeout);

        sessions.recover().await?;
        jobs.recover().await?;
        stats.seed(&db).await?;

        Ok(Self {
            db,
            stats,
            events,
            sessions,
            jobs,
            settings,
        })
    }

    pub fn global_stats(&self) -> EngineResult<GlobalStats> {
        self.stats.snapshot()
    }
}
