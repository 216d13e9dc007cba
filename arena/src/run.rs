//! Run lifecycle: status, transitions and the accumulated transcript.
//!
//! ```text
//! created ──► running ──► awaiting_advance ──► running ──► … ──► completed
//!    │           │  ▲            │
//!    │           │  └ auto loop  │
//!    └───────────┴───────────────┴──────────────────────────────► failed
//! ```
//!
//! Invariants kept by every mutator here:
//! - `phase_index` only increases, and `transcript.len() == phase_index`.
//! - `final_record.is_some()` iff `status == Completed`.
//! - `failure_reason.is_some()` iff `status == Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::template::DebateTemplate;
use crate::transcript::{Final, PhaseResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// The engine drives every phase itself.
    #[default]
    Auto,
    /// Each phase waits for an explicit `advance`.
    Step,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Step => write!(f, "step"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "step" => Ok(Self::Step),
            other => Err(format!("unknown run mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    AwaitingAdvance,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses from which an external `advance` is accepted.
    pub fn accepts_advance(self) -> bool {
        matches!(self, Self::Created | Self::AwaitingAdvance)
    }

    pub fn valid_transitions(self) -> &'static [RunStatus] {
        match self {
            Self::Created => &[Self::Running, Self::Failed],
            Self::Running => &[Self::AwaitingAdvance, Self::Completed, Self::Failed],
            Self::AwaitingAdvance => &[Self::Running, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::AwaitingAdvance => write!(f, "awaiting_advance"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A status transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid status transitions or transcript misuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// One executing instance of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub template_id: String,
    pub title: String,
    pub topic: String,
    pub rounds: u32,
    pub mode: RunMode,
    pub status: RunStatus,
    /// Index of the next phase to execute.
    pub phase_index: usize,
    pub total_phases: usize,
    pub transcript: Vec<PhaseResult>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_record: Option<Final>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub transitions: Vec<RunTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(template: &DebateTemplate, mode: RunMode, topic: String, rounds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            template_id: template.id.clone(),
            title: template.name.clone(),
            topic,
            rounds,
            mode,
            status: RunStatus::Created,
            phase_index: 0,
            total_phases: template.phases.len() * rounds as usize,
            transcript: Vec::new(),
            final_record: None,
            failure_reason: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status, recording the transition.
    pub fn transition(&mut self, to: RunStatus, reason: &str) -> Result<(), TransitionError> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.status.valid_transitions()
                ),
            });
        }
        if to == RunStatus::Completed && self.final_record.is_none() {
            return Err(TransitionError {
                from: self.status,
                to,
                reason: "completed requires a final record".into(),
            });
        }

        let now = Utc::now();
        self.transitions.push(RunTransition {
            from: self.status,
            to,
            at: now,
            reason: reason.to_string(),
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Append a phase result at the current index and advance the index.
    pub fn record_phase(&mut self, result: PhaseResult) -> Result<(), TransitionError> {
        if self.status != RunStatus::Running {
            return Err(TransitionError {
                from: self.status,
                to: self.status,
                reason: "phase results can only be recorded while running".into(),
            });
        }
        if result.phase_index != self.phase_index || self.transcript.len() != self.phase_index {
            return Err(TransitionError {
                from: self.status,
                to: self.status,
                reason: format!(
                    "phase {} recorded at index {} (transcript holds {})",
                    result.phase_index,
                    self.phase_index,
                    self.transcript.len()
                ),
            });
        }
        if self.phase_index >= self.total_phases {
            return Err(TransitionError {
                from: self.status,
                to: self.status,
                reason: format!("phase plan has only {} phases", self.total_phases),
            });
        }

        self.transcript.push(result);
        self.phase_index += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Attach the final record and move to `completed`.
    pub fn complete(&mut self, final_record: Final) -> Result<(), TransitionError> {
        if !self.is_plan_exhausted() {
            return Err(TransitionError {
                from: self.status,
                to: RunStatus::Completed,
                reason: format!(
                    "{} of {} phases recorded",
                    self.phase_index, self.total_phases
                ),
            });
        }
        self.final_record = Some(final_record);
        if let Err(e) = self.transition(RunStatus::Completed, "all phases recorded") {
            self.final_record = None;
            return Err(e);
        }
        Ok(())
    }

    /// Move to `failed`, keeping the reason for inspection.
    pub fn fail(&mut self, reason: &str) -> Result<(), TransitionError> {
        self.transition(RunStatus::Failed, reason)?;
        self.failure_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn is_plan_exhausted(&self) -> bool {
        self.phase_index >= self.total_phases
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] phase {}/{} | mode={} | run={}",
            self.status, self.phase_index, self.total_phases, self.mode, self.id
        )
    }
}
