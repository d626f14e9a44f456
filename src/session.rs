//! Session lifecycle: at most one running session per scope.
//!
//! The registry maps a scope to the session currently running in it. The
//! registry lock is held from the conflict check until the new entry is
//! inserted, so two concurrent starts in one scope cannot both succeed.
//! The engine task removes its own entry once the session is finalized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{IterationEngine, panic_message};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::models::{Iteration, Mode, Proposal, Session, SessionStatus};
use crate::stats::StatsAggregator;
use crate::store::DbHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reason recorded on sessions found running at startup.
pub const INTERRUPTED: &str = "interrupted: process restarted";

struct ActiveSession {
    session_id: String,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, ActiveSession>>>;

#[derive(Clone)]
pub struct SessionManager {
    db: DbHandle,
    engine: Arc<IterationEngine>,
    stats: StatsAggregator,
    events: EventBus,
    registry: Registry,
}

impl SessionManager {
    pub fn new(
        db: DbHandle,
        engine: Arc<IterationEngine>,
        stats: StatsAggregator,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            engine,
            stats,
            events,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a session in `scope` and return it in its running state.
    pub async fn start(&self, scope: &str, mode: Mode, max_iterations: u32) -> EngineResult<Session> {
        let mut registry = self.registry.lock().await;
        if let Some(active) = registry.get(scope) {
            return Err(EngineError::Conflict {
                scope: scope.to_string(),
                running_session: active.session_id.clone(),
            });
        }

        let session = Session::new(scope, mode, max_iterations);
        let row = session.clone();
        self.db
            .call(move |db| db.insert_session(&row))
            .await
            .map_err(EngineError::Storage)?;

        let cancel = CancellationToken::new();
        registry.insert(
            scope.to_string(),
            ActiveSession {
                session_id: session.id.clone(),
                cancel: cancel.clone(),
            },
        );

        let engine = self.engine.clone();
        let entries = self.registry.clone();
        let run = session.clone();
        tokio::spawn(async move {
            let (id, scope) = (run.id.clone(), run.scope.clone());
            let driver = tokio::spawn({
                let engine = engine.clone();
                async move { engine.run(run, cancel).await }
            });
            if let Err(e) = driver.await {
                let reason = match e.try_into_panic() {
                    Ok(payload) => format!("engine panicked: {}", panic_message(payload.as_ref())),
                    Err(e) => format!("engine task failed: {}", e),
                };
                engine.abandon(&id, &reason).await;
            }
            let mut entries = entries.lock().await;
            if entries.get(&scope).is_some_and(|a| a.session_id == id) {
                entries.remove(&scope);
            }
        });

        info!(session = %session.id, scope, mode = %mode, max_iterations, "Started session");
        self.events.publish(&EngineEvent::SessionStarted {
            session: session.clone(),
        });
        Ok(session)
    }

    /// Signal a running session to stop. The session finishes on its own
    /// task once its in-flight phase completes; use
    /// [`wait_for`](Self::wait_for) to observe the final state.
    pub async fn stop(&self, id: &str) -> EngineResult<Session> {
        // Held across the read: an engine finalizes its row before it
        // releases its entry.
        let registry = self.registry.lock().await;
        let session = self.get(id).await?;
        if session.status != SessionStatus::Running {
            return Err(not_running(&session));
        }
        if let Some(active) = registry.values().find(|a| a.session_id == id) {
            info!(session = %id, "Stopping session");
            active.cancel.cancel();
            return Ok(session);
        }

        // Marked running in storage, but nothing is driving it.
        warn!(session = %id, "Stopping session with no live engine");
        let key = id.to_string();
        let finished = self
            .db
            .call(move |db| db.finish_running_session(&key, SessionStatus::Stopped, None))
            .await
            .map_err(EngineError::Storage)?;
        drop(registry);

        let Some(session) = finished else {
            return Err(not_running(&self.get(id).await?));
        };
        self.stats.record_session(&session)?;
        self.events.publish(&EngineEvent::SessionFinished {
            session_id: session.id.clone(),
            status: session.status,
            attempted: session.attempted,
            succeeded: session.succeeded,
        });
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> EngineResult<Session> {
        let key = id.to_string();
        self.db
            .call(move |db| db.get_session(&key))
            .await
            .map_err(EngineError::Storage)?
            .ok_or_else(|| EngineError::session_not_found(id))
    }

    /// Sessions newest first, optionally limited to one scope.
    pub async fn list(&self, scope: Option<&str>) -> EngineResult<Vec<Session>> {
        let scope = scope.map(str::to_string);
        self.db
            .call(move |db| db.list_sessions(scope.as_deref()))
            .await
            .map_err(EngineError::Storage)
    }

    pub async fn iterations(&self, id: &str) -> EngineResult<Vec<Iteration>> {
        self.get(id).await?;
        let key = id.to_string();
        self.db
            .call(move |db| db.list_iterations(&key))
            .await
            .map_err(EngineError::Storage)
    }

    /// Proposals the session produced, in iteration order.
    pub async fn improvements(&self, id: &str) -> EngineResult<Vec<Proposal>> {
        Ok(self
            .iterations(id)
            .await?
            .into_iter()
            .filter_map(|it| it.proposal)
            .collect())
    }

    /// Wait until the engine driving `id` has finished, then return the
    /// stored session.
    pub async fn wait_for(&self, id: &str) -> EngineResult<Session> {
        self.get(id).await?;
        loop {
            let active = self
                .registry
                .lock()
                .await
                .values()
                .any(|a| a.session_id == id);
            if !active {
                return self.get(id).await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Id of the session running in `scope`, if any.
    pub async fn running_in(&self, scope: &str) -> Option<String> {
        self.registry
            .lock()
            .await
            .get(scope)
            .map(|a| a.session_id.clone())
    }

    /// Signal every running session to stop and wait for them to finish.
    pub async fn stop_all(&self) -> Vec<String> {
        let ids: Vec<String> = {
            let registry = self.registry.lock().await;
            registry
                .values()
                .map(|a| {
                    a.cancel.cancel();
                    a.session_id.clone()
                })
                .collect()
        };
        for id in &ids {
            if let Err(e) = self.wait_for(id).await {
                warn!(session = %id, error = %e, "Failed waiting for session to stop");
            }
        }
        ids
    }

    /// Mark sessions left running by a previous process as failed.
    pub async fn recover(&self) -> EngineResult<Vec<String>> {
        let ids = self
            .db
            .call(|db| db.fail_stale_sessions(INTERRUPTED))
            .await
            .map_err(EngineError::Storage)?;
        if !ids.is_empty() {
            warn!(count = ids.len(), "Marked interrupted sessions as failed");
        }
        Ok(ids)
    }
}

fn not_running(session: &Session) -> EngineError {
    EngineError::InvalidState {
        kind: "Session",
        id: session.id.clone(),
        status: session.status.to_string(),
        operation: "stop",
    }
}
