//! In-memory run store: templates and runs keyed by id.
//!
//! Each run has its own advancement lock, so `advance` calls on one run queue
//! while unrelated runs proceed concurrently. The maps themselves are guarded
//! by short-lived `RwLock`s that are never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use crate::client::ModelClient;
use crate::config::EngineConfig;
use crate::engine::{Driver, RunEngine, RunSlot, CANCELLED, IDLE_TIMEOUT};
use crate::error::{ArenaError, ArenaResult};
use crate::executor::PhaseExecutor;
use crate::run::{Run, RunMode, RunStatus};
use crate::template::{DebateTemplate, TemplateDraft};
use crate::transcript::Final;

/// Shared reference to a RunStore
pub type SharedRunStore = Arc<RunStore>;

/// Parameters of `create_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub template_id: String,
    pub mode: RunMode,
    /// Replaces the template topic when set and non-blank.
    pub topic: Option<String>,
    /// Replaces the template round count when set.
    pub rounds: Option<u32>,
}

impl RunRequest {
    pub fn new(template_id: impl Into<String>, mode: RunMode) -> Self {
        Self {
            template_id: template_id.into(),
            mode,
            topic: None,
            rounds: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = Some(rounds);
        self
    }
}

pub struct RunStore {
    templates: RwLock<HashMap<String, Arc<DebateTemplate>>>,
    runs: RwLock<HashMap<String, Arc<RunSlot>>>,
    engine: Arc<RunEngine>,
}

impl RunStore {
    /// Build a store around `client`. The config is validated and then fixed
    /// for the lifetime of the store.
    pub fn new(client: Arc<dyn ModelClient>, config: EngineConfig) -> ArenaResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let executor = PhaseExecutor::new(client, Arc::clone(&config));
        Ok(Self {
            templates: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            engine: Arc::new(RunEngine::new(executor, config)),
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedRunStore {
        Arc::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    // ── templates ────────────────────────────────────────────────────────

    pub fn create_template(&self, draft: TemplateDraft) -> ArenaResult<Arc<DebateTemplate>> {
        let template = Arc::new(DebateTemplate::from_draft(draft)?);
        self.templates
            .write()
            .map_err(|_| ArenaError::LockPoisoned)?
            .insert(template.id.clone(), Arc::clone(&template));
        info!(
            template_id = %template.id,
            name = %template.name,
            participants = template.participants.len(),
            phases = template.phases.len(),
            "template created"
        );
        Ok(template)
    }

    pub fn get_template(&self, template_id: &str) -> ArenaResult<Arc<DebateTemplate>> {
        self.templates
            .read()
            .map_err(|_| ArenaError::LockPoisoned)?
            .get(template_id)
            .cloned()
            .ok_or_else(|| ArenaError::TemplateNotFound(template_id.to_string()))
    }

    /// All templates, ordered by name.
    pub fn list_templates(&self) -> ArenaResult<Vec<Arc<DebateTemplate>>> {
        let mut templates: Vec<_> = self
            .templates
            .read()
            .map_err(|_| ArenaError::LockPoisoned)?
            .values()
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(templates)
    }

    /// Remove a template. Runs created from it keep their own reference.
    pub fn delete_template(&self, template_id: &str) -> ArenaResult<()> {
        self.templates
            .write()
            .map_err(|_| ArenaError::LockPoisoned)?
            .remove(template_id)
            .map(|_| ())
            .ok_or_else(|| ArenaError::TemplateNotFound(template_id.to_string()))
    }

    // ── runs ─────────────────────────────────────────────────────────────

    /// Instantiate a run and return its id. Auto-mode runs start driving
    /// before this returns, so it must be called inside a Tokio runtime.
    pub fn create_run(&self, request: RunRequest) -> ArenaResult<String> {
        let template = self.get_template(&request.template_id)?;

        let rounds = request.rounds.unwrap_or(template.rounds);
        if rounds == 0 {
            return Err(ArenaError::TemplateInvalid("rounds must be >= 1".into()));
        }
        let topic = request
            .topic
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| template.topic.clone());

        let mut run = Run::new(&template, request.mode, topic, rounds);
        if request.mode == RunMode::Auto {
            // Running before it is visible, so no external advance can claim it.
            run.transition(RunStatus::Running, "auto drive started")?;
        }
        let run_id = run.id.clone();
        let slot = Arc::new(RunSlot::new(template, run));

        self.runs
            .write()
            .map_err(|_| ArenaError::LockPoisoned)?
            .insert(run_id.clone(), Arc::clone(&slot));

        info!(
            run_id = %run_id,
            template_id = %request.template_id,
            mode = %request.mode,
            total_phases = slot.plan.len(),
            "run created"
        );

        if request.mode == RunMode::Auto {
            tokio::spawn(Arc::clone(&self.engine).drive(slot));
        }

        Ok(run_id)
    }

    /// Snapshot of the most recently committed state. Never waits on an
    /// in-flight advance.
    pub fn get_run(&self, run_id: &str) -> ArenaResult<Run> {
        self.slot(run_id)?.snapshot()
    }

    /// Snapshots of all runs, oldest first.
    pub fn list_runs(&self) -> ArenaResult<Vec<Run>> {
        let mut runs = self
            .slots()?
            .iter()
            .map(|slot| slot.snapshot())
            .collect::<ArenaResult<Vec<_>>>()?;
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    /// Forget a run. A running auto drive is cancelled.
    pub fn delete_run(&self, run_id: &str) -> ArenaResult<()> {
        let slot = self
            .runs
            .write()
            .map_err(|_| ArenaError::LockPoisoned)?
            .remove(run_id)
            .ok_or_else(|| ArenaError::RunNotFound(run_id.to_string()))?;
        slot.cancel.cancel();
        info!(run_id, "run deleted");
        Ok(())
    }

    /// Execute the next phase of a step-mode run (or the first phase of a
    /// created one). Overlapping calls on the same run queue on its lock.
    pub async fn advance(&self, run_id: &str) -> ArenaResult<Run> {
        let slot = self.slot(run_id)?;

        let current = slot.snapshot()?;
        if !current.status.accepts_advance() {
            return Err(ArenaError::not_advanceable(
                run_id,
                current.status,
                match current.status {
                    RunStatus::Running => "a phase is already executing",
                    _ => "run is terminal",
                },
            ));
        }

        let run = {
            let _guard = slot.advance_lock.lock().await;
            self.engine.step(&slot, Driver::External).await?
        };

        if run.status == RunStatus::AwaitingAdvance {
            if let Some(window) = self.engine.config().step_idle_timeout() {
                spawn_idle_watchdog(Arc::clone(&slot), run.phase_index, window);
            }
        }
        Ok(run)
    }

    /// Ask a run to stop. Takes effect now if no phase is executing,
    /// otherwise at the end of the executing phase.
    pub fn cancel_run(&self, run_id: &str) -> ArenaResult<Run> {
        let slot = self.slot(run_id)?;
        let current = slot.snapshot()?;
        if current.is_terminal() {
            return Err(ArenaError::not_advanceable(
                run_id,
                current.status,
                "run is terminal",
            ));
        }

        slot.cancel.cancel();
        if let Ok(_guard) = slot.advance_lock.try_lock() {
            info!(run_id, "run cancelled");
            return slot.fail(CANCELLED);
        }
        info!(run_id, "cancellation deferred to phase boundary");
        slot.snapshot()
    }

    /// Finals of all completed runs, oldest first.
    pub fn list_finals(&self) -> ArenaResult<Vec<Final>> {
        let mut finals: Vec<Final> = self
            .list_runs()?
            .into_iter()
            .filter_map(|run| run.final_record)
            .collect();
        finals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(finals)
    }

    /// Resolve once the run is terminal, or fail after `timeout`.
    pub async fn wait_for_terminal(&self, run_id: &str, timeout: Duration) -> ArenaResult<Run> {
        let slot = self.slot(run_id)?;
        let mut status = slot.subscribe();

        let reached = tokio::time::timeout(timeout, async {
            status.wait_for(|s| s.is_terminal()).await.is_ok()
        })
        .await;

        match reached {
            Ok(_) => slot.snapshot(),
            Err(_) => Err(ArenaError::WaitTimeout {
                run_id: run_id.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn slot(&self, run_id: &str) -> ArenaResult<Arc<RunSlot>> {
        self.runs
            .read()
            .map_err(|_| ArenaError::LockPoisoned)?
            .get(run_id)
            .cloned()
            .ok_or_else(|| ArenaError::RunNotFound(run_id.to_string()))
    }

    fn slots(&self) -> ArenaResult<Vec<Arc<RunSlot>>> {
        Ok(self
            .runs
            .read()
            .map_err(|_| ArenaError::LockPoisoned)?
            .values()
            .cloned()
            .collect())
    }
}

/// Fail a step run still parked at `phase_index` once `window` elapses.
///
/// Whoever holds `advance_lock` when a cancel arrives must honor it, so the
/// watchdog also fails a cancelled run once it gets the lock.
fn spawn_idle_watchdog(slot: Arc<RunSlot>, phase_index: usize, window: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = slot.cancel.cancelled() => {
                let _guard = slot.advance_lock.lock().await;
                let _ = slot.fail(CANCELLED);
                return;
            }
            _ = tokio::time::sleep(window) => {}
        }

        // An advance in flight means the run is not idle.
        let Ok(_guard) = slot.advance_lock.try_lock() else {
            return;
        };
        if slot.cancel.is_cancelled() {
            let _ = slot.fail(CANCELLED);
            return;
        }
        let idle = match slot.snapshot() {
            Ok(run) => run.status == RunStatus::AwaitingAdvance && run.phase_index == phase_index,
            Err(_) => false,
        };
        if idle {
            warn!(phase_index, window_ms = window.as_millis() as u64, "step run idle, failing");
            let _ = slot.fail(IDLE_TIMEOUT);
        }
    });
}
