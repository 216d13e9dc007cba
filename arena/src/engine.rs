//! Run engine: executes one phase of a run per `step` and decides the next
//! status.
//!
//! ```text
//! step(slot, driver)                       caller holds slot.advance_lock
//!   validate status for driver ──► RunNotAdvanceable (no change)
//!   cancelled?            ──► failed("cancelled")
//!   → running, snapshot transcript
//!   PhaseExecutor::run_phase               (no state lock held)
//!   moderator summary if the phase closes a round
//!   record_phase          ──► failed on invariant violation
//!   cancelled?            ──► failed("cancelled")
//!   plan exhausted?       ──► Aggregator::finalize → completed
//!   step mode             ──► awaiting_advance
//!   auto mode             ──► stays running; the driver loops
//! ```
//!
//! The run's `std::sync::RwLock` is only held for the short mutations, never
//! across an await, so snapshot reads see every recorded phase immediately.

use std::sync::{Arc, RwLock};

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::EngineConfig;
use crate::error::{ArenaError, ArenaResult};
use crate::executor::PhaseExecutor;
use crate::prompt;
use crate::run::{Run, RunMode, RunStatus};
use crate::template::{DebateTemplate, ScheduledPhase};

/// Failure reason recorded on cancelled runs.
pub const CANCELLED: &str = "cancelled";
/// Failure reason recorded when a step run waits too long for `advance`.
pub const IDLE_TIMEOUT: &str = "idle timeout";

/// Who is asking for the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// An `advance` call from outside the engine.
    External,
    /// The background loop of an auto-mode run.
    Auto,
}

/// Everything the store keeps per run.
pub(crate) struct RunSlot {
    pub template: Arc<DebateTemplate>,
    pub plan: Vec<ScheduledPhase>,
    state: RwLock<Run>,
    /// Serializes advancement of this run only.
    pub advance_lock: Mutex<()>,
    pub cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
}

impl RunSlot {
    pub fn new(template: Arc<DebateTemplate>, run: Run) -> Self {
        let plan = template.phase_plan(run.rounds);
        let (status_tx, _) = watch::channel(run.status);
        Self {
            template,
            plan,
            state: RwLock::new(run),
            advance_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    /// Most recently committed state.
    pub fn snapshot(&self) -> ArenaResult<Run> {
        self.state
            .read()
            .map(|run| run.clone())
            .map_err(|_| ArenaError::LockPoisoned)
    }

    /// Apply `f` under the write lock and publish the resulting status.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Run) -> ArenaResult<T>) -> ArenaResult<T> {
        let mut run = self.state.write().map_err(|_| ArenaError::LockPoisoned)?;
        let out = f(&mut run);
        self.status_tx.send_replace(run.status);
        out
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// Move to `failed` unless already terminal.
    pub fn fail(&self, reason: &str) -> ArenaResult<Run> {
        self.mutate(|run| {
            if !run.is_terminal() {
                run.fail(reason)?;
                warn!(run_id = %run.id, phase_index = run.phase_index, reason, "run failed");
            }
            Ok(run.clone())
        })
    }
}

pub struct RunEngine {
    executor: PhaseExecutor,
    aggregator: Aggregator,
    config: Arc<EngineConfig>,
}

impl RunEngine {
    pub fn new(executor: PhaseExecutor, config: Arc<EngineConfig>) -> Self {
        let aggregator = Aggregator::new(executor.clone(), Arc::clone(&config));
        Self {
            executor,
            aggregator,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute exactly one phase. The caller must hold `slot.advance_lock`.
    pub(crate) async fn step(&self, slot: &RunSlot, driver: Driver) -> ArenaResult<Run> {
        let started = slot.mutate(|run| {
            let allowed = match driver {
                Driver::External => run.status.accepts_advance(),
                Driver::Auto => run.status == RunStatus::Running,
            };
            if !allowed {
                return Err(ArenaError::not_advanceable(
                    run.id.clone(),
                    run.status,
                    match run.status {
                        RunStatus::Running => "a phase is already executing",
                        RunStatus::Completed | RunStatus::Failed => "run is terminal",
                        _ => "run is not driven by this caller",
                    },
                ));
            }
            if slot.cancel.is_cancelled() {
                run.fail(CANCELLED)?;
                warn!(run_id = %run.id, phase_index = run.phase_index, "run cancelled before phase");
                return Ok(None);
            }
            if run.status != RunStatus::Running {
                run.transition(RunStatus::Running, "advance")?;
            }
            Ok(Some((
                run.id.clone(),
                run.phase_index,
                run.topic.clone(),
                run.transcript.clone(),
            )))
        })?;
        let Some((run_id, index, topic, transcript)) = started else {
            return slot.snapshot();
        };

        let Some(phase) = slot.plan.get(index) else {
            let reason = format!("phase index {} outside plan of {}", index, slot.plan.len());
            error!(run_id = %run_id, %reason, "run invariant violated");
            slot.fail(&reason)?;
            return Err(ArenaError::RunFailed { run_id, reason });
        };

        info!(
            run_id = %run_id,
            phase_index = index,
            phase = %phase.spec.id,
            round = phase.round,
            "phase started"
        );

        let participants = &slot.template.participants;
        let mut result = self
            .executor
            .run_phase(&topic, phase, &transcript, participants)
            .await;

        if let (Some(moderator), true) = (&slot.template.moderator, phase.ends_round) {
            let mut with_phase = transcript;
            with_phase.push(result.clone());
            let request = prompt::moderator_request(
                &topic,
                moderator,
                phase.round,
                &with_phase,
                participants,
                self.config.default_max_tokens,
            );
            let summary = self.executor.call_with_retry(&moderator.id, request).await;
            result.moderator_summary = Some(summary.turn);
        }

        let recorded = slot.mutate(|run| {
            run.record_phase(result)?;
            Ok((run.is_plan_exhausted(), run.transcript.clone()))
        });
        let (exhausted, transcript) = match recorded {
            Ok(r) => r,
            Err(e) => {
                let reason = format!("failed to record phase {}: {}", index, e);
                error!(run_id = %run_id, %reason, "run invariant violated");
                slot.fail(&reason)?;
                return Err(ArenaError::RunFailed { run_id, reason });
            }
        };

        if slot.cancel.is_cancelled() {
            info!(run_id = %run_id, phase_index = index, "cancellation honored at phase boundary");
            return slot.fail(CANCELLED);
        }

        if exhausted {
            let final_record = self
                .aggregator
                .finalize(&run_id, &topic, &transcript, &slot.template)
                .await;
            return slot.mutate(|run| {
                run.complete(final_record)?;
                info!(run_id = %run.id, phases = run.phase_index, "run completed");
                Ok(run.clone())
            });
        }

        slot.mutate(|run| {
            if run.mode == RunMode::Step {
                run.transition(RunStatus::AwaitingAdvance, "phase recorded")?;
            }
            Ok(run.clone())
        })
    }

    /// Background loop of an auto-mode run: step, yield, repeat until terminal.
    pub(crate) async fn drive(self: Arc<Self>, slot: Arc<RunSlot>) {
        let delay = self.config.auto_phase_delay();
        loop {
            let stepped = {
                let _guard = slot.advance_lock.lock().await;
                self.step(&slot, Driver::Auto).await
            };

            match stepped {
                Ok(run) if run.is_terminal() => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "auto drive stopped");
                    break;
                }
            }

            tokio::select! {
                _ = slot.cancel.cancelled() => {
                    let _guard = slot.advance_lock.lock().await;
                    let _ = slot.fail(CANCELLED);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
