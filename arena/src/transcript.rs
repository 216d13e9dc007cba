//! Transcript records: turns, phase results and the final verdict.
//!
//! All of these are immutable once recorded on a run. A correction means a
//! new phase, never an edit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::template::{PhaseKind, ScheduledPhase, Visibility};
use crate::vote::{VoteOutcome, VoteTally};

/// A participant's contribution to one phase: text or a failure marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Turn {
    Spoken { text: String },
    Failed { reason: String },
}

impl Turn {
    pub fn spoken(text: impl Into<String>) -> Self {
        Self::Spoken { text: text.into() }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Spoken { text } => Some(text),
            Self::Failed { .. } => None,
        }
    }

    /// Rendering used when feeding the turn back into a prompt.
    pub fn render(&self) -> String {
        match self {
            Self::Spoken { text } => text.trim().to_string(),
            Self::Failed { .. } => "(no response)".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantTurn {
    pub participant_id: String,
    pub turn: Turn,
    /// Generation attempts made, including retries.
    pub attempts: u32,
    pub latency_ms: u64,
}

impl ParticipantTurn {
    pub fn new(participant_id: impl Into<String>, turn: Turn, attempts: u32, latency_ms: u64) -> Self {
        Self {
            participant_id: participant_id.into(),
            turn,
            attempts,
            latency_ms,
        }
    }
}

/// The recorded outcome of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_index: usize,
    pub round: u32,
    pub phase_id: String,
    pub kind: PhaseKind,
    pub visible_to: Visibility,
    /// In template participant order, independent of completion order.
    pub turns: Vec<ParticipantTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tally: Option<VoteTally>,
    /// Moderator's summary of the round this phase closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_summary: Option<Turn>,
    pub recorded_at: DateTime<Utc>,
}

impl PhaseResult {
    pub fn new(phase: &ScheduledPhase, turns: Vec<ParticipantTurn>) -> Self {
        let tally = (phase.spec.kind == PhaseKind::Vote).then(|| VoteTally::from_turns(&turns));
        Self {
            phase_index: phase.index,
            round: phase.round,
            phase_id: phase.spec.id.clone(),
            kind: phase.spec.kind,
            visible_to: phase.spec.visible_to,
            turns,
            tally,
            moderator_summary: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn turn(&self, participant_id: &str) -> Option<&Turn> {
        self.turns
            .iter()
            .find(|t| t.participant_id == participant_id)
            .map(|t| &t.turn)
    }

    pub fn failed_count(&self) -> usize {
        self.turns.iter().filter(|t| t.turn.is_failed()).count()
    }
}

/// The aggregated verdict of a completed run. Exists iff the run completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Final {
    pub run_id: String,
    pub title: String,
    pub verdict: String,
    /// Tally outcome of the last vote phase, if the plan had one.
    pub outcome: Option<VoteOutcome>,
    /// False when the verdict is the fallback notice.
    pub synthesized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tally outcome of the most recent vote phase.
pub fn last_vote_outcome(transcript: &[PhaseResult]) -> Option<VoteOutcome> {
    transcript
        .iter()
        .rev()
        .find_map(|phase| phase.tally.as_ref().map(|t| t.outcome))
}
