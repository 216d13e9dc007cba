//! Debate Arena Library
//!
//! This library drives multi-participant, multi-round debates against an
//! OpenAI-style chat-completions endpoint:
//! - Templates describing participants, rounds and the per-round phase plan
//! - Runs that walk the phase plan in `auto` or `step` mode
//! - Concurrent per-phase fan-out with per-call timeout and bounded retry
//! - A closing synthesis that always yields a `Final`, even when the endpoint fails
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use arena::{ChatCompletionsClient, EngineConfig, RunMode, RunRequest, RunStore, TemplateDraft};
//!
//! # async fn demo(draft: TemplateDraft) -> arena::ArenaResult<()> {
//! let config = EngineConfig::from_env()?;
//! let client = Arc::new(ChatCompletionsClient::new(&config)?);
//! let store = RunStore::new(client, config)?.shared();
//!
//! let template = store.create_template(draft)?;
//! let run_id = store.create_run(RunRequest::new(&template.id, RunMode::Auto))?;
//! let run = store.wait_for_terminal(&run_id, Duration::from_secs(600)).await?;
//! println!("{}", run.status_line());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod aggregator;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod prompt;
pub mod run;
pub mod store;
pub mod template;
pub mod transcript;
pub mod vote;

pub use aggregator::{Aggregator, FALLBACK_VERDICT};
pub use client::{ChatCompletionsClient, ChatMessage, ChatRole, GenerationRequest, ModelClient};
pub use config::EngineConfig;
pub use engine::{CANCELLED, IDLE_TIMEOUT};
pub use error::{ArenaError, ArenaResult, GenerationFailure};
pub use executor::PhaseExecutor;
pub use run::{Run, RunMode, RunStatus, RunTransition, TransitionError};
pub use store::{RunRequest, RunStore, SharedRunStore};
pub use template::{
    DebateTemplate, Participant, PhaseKind, PhaseSpec, ScheduledPhase, TemplateDraft, Visibility,
    VotingConfig, VotingMode,
};
pub use transcript::{Final, ParticipantTurn, PhaseResult, Turn};
pub use vote::{parse_vote, VoteOutcome, VoteTally, VoteValue};
