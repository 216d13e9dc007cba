//! Phase executor: concurrent fan-out of one phase to all participants.
//!
//! ```text
//! run_phase(phase, transcript, participants)
//!   JoinSet::spawn(call_with_retry(participant_i)) × N   (semaphore-bounded)
//!   join barrier: wait for every call, success or failure
//!   reorder turns by template position → PhaseResult
//! ```
//!
//! ## Partial failure policy
//!
//! A participant whose calls all fail contributes a `Turn::Failed`; the
//! phase itself always completes. Each call is bounded by the configured
//! timeout and retried `retry_count` times before being recorded as failed.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::client::{GenerationRequest, ModelClient};
use crate::config::EngineConfig;
use crate::error::GenerationFailure;
use crate::prompt;
use crate::template::{Participant, ScheduledPhase};
use crate::transcript::{ParticipantTurn, PhaseResult, Turn};

/// Executes single phases against a model client.
#[derive(Clone)]
pub struct PhaseExecutor {
    client: Arc<dyn ModelClient>,
    config: Arc<EngineConfig>,
}

impl PhaseExecutor {
    pub fn new(client: Arc<dyn ModelClient>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }

    /// Run one phase for every participant and collect the result.
    pub async fn run_phase(
        &self,
        topic: &str,
        phase: &ScheduledPhase,
        transcript: &[PhaseResult],
        participants: &[Participant],
    ) -> PhaseResult {
        let start = Instant::now();
        let sem = Arc::new(Semaphore::new(self.config.max_parallel_requests.max(1)));
        let mut join_set: JoinSet<(usize, ParticipantTurn)> = JoinSet::new();

        for (position, participant) in participants.iter().enumerate() {
            let request = prompt::participant_request(
                topic,
                participant,
                phase,
                transcript,
                participants,
                self.config.default_max_tokens,
            );
            let sem = Arc::clone(&sem);
            let caller = self.clone();
            let participant_id = participant.id.clone();

            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let turn = caller.call_with_retry(&participant_id, request).await;
                (position, turn)
            });
        }

        let mut slots: Vec<Option<ParticipantTurn>> = vec![None; participants.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, turn)) => slots[position] = Some(turn),
                Err(e) => warn!(error = %e, phase = %phase.spec.id, "participant task aborted"),
            }
        }

        let turns: Vec<ParticipantTurn> = slots
            .into_iter()
            .zip(participants)
            .map(|(slot, participant)| {
                slot.unwrap_or_else(|| {
                    ParticipantTurn::new(
                        participant.id.clone(),
                        Turn::failed("participant task aborted"),
                        0,
                        0,
                    )
                })
            })
            .collect();

        let result = PhaseResult::new(phase, turns);
        info!(
            phase_index = phase.index,
            phase = %phase.spec.id,
            round = phase.round,
            failed = result.failed_count(),
            total = result.turns.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "phase executed"
        );
        result
    }

    /// One participant call: timeout-bounded, retried on failure.
    pub async fn call_with_retry(
        &self,
        participant_id: &str,
        request: GenerationRequest,
    ) -> ParticipantTurn {
        let start = Instant::now();
        let max_attempts = self.config.retry_count + 1;
        let mut last_failure = GenerationFailure::new("no attempt made");

        for attempt in 1..=max_attempts {
            match self.call_once(request.clone()).await {
                Ok(text) => {
                    debug!(participant = participant_id, attempt, "turn generated");
                    return ParticipantTurn::new(
                        participant_id,
                        Turn::spoken(text),
                        attempt,
                        start.elapsed().as_millis() as u64,
                    );
                }
                Err(failure) => {
                    warn!(
                        participant = participant_id,
                        model = %request.model_id,
                        attempt,
                        max_attempts,
                        reason = %failure.reason,
                        "generation attempt failed"
                    );
                    last_failure = failure;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    }
                }
            }
        }

        ParticipantTurn::new(
            participant_id,
            Turn::failed(last_failure.reason),
            max_attempts,
            start.elapsed().as_millis() as u64,
        )
    }

    async fn call_once(&self, request: GenerationRequest) -> Result<String, GenerationFailure> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.client.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationFailure::timeout(timeout.as_millis() as u64)),
        }
    }
}
