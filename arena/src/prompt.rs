//! Prompt construction for participant turns, moderator round summaries and
//! the final synthesis.
//!
//! Participants only see prior phases visible to all participants. The
//! moderator and the aggregator also see moderator-only phases. Audience-only
//! phases are never fed back to a model.

use crate::client::{ChatMessage, GenerationRequest};
use crate::template::{Participant, ScheduledPhase, Visibility};
use crate::transcript::PhaseResult;

const EMPTY_HISTORY: &str = "(no prior responses)";

const MODERATOR_FALLBACK_PROMPT: &str = "You are the impartial moderator of a structured debate. \
Summarise fairly and do not take sides.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are the impartial judge of a structured debate. \
Read the full transcript and write a short closing synthesis: the strongest point made by each \
side, where they agreed, and which position was argued more convincingly overall.";

/// Who a rendered history is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Participant,
    Moderator,
}

impl Audience {
    fn can_see(self, visibility: Visibility) -> bool {
        match (self, visibility) {
            (_, Visibility::AllParticipants) => true,
            (Self::Moderator, Visibility::ModeratorOnly) => true,
            _ => false,
        }
    }
}

/// Render the transcript phases visible to `audience` as plain text.
pub fn render_history(
    transcript: &[PhaseResult],
    participants: &[Participant],
    audience: Audience,
) -> String {
    let mut lines = Vec::new();
    for phase in transcript.iter().filter(|p| audience.can_see(p.visible_to)) {
        lines.push(format!(
            "Round {} / {} ({}):",
            phase.round, phase.phase_id, phase.kind
        ));
        for entry in &phase.turns {
            let name = participants
                .iter()
                .find(|p| p.id == entry.participant_id)
                .map(|p| p.display_name.as_str())
                .unwrap_or(entry.participant_id.as_str());
            lines.push(format!("- {}: {}", name, entry.turn.render()));
        }
        if let Some(tally) = &phase.tally {
            lines.push(format!("- Votes: {}", tally.summary_line()));
        }
        if let Some(summary) = phase.moderator_summary.as_ref().and_then(|t| t.text()) {
            lines.push(format!("- Moderator: {}", summary.trim()));
        }
    }

    if lines.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        lines.join("\n")
    }
}

/// Fill `{topic}`, `{round}`, `{participant}` and `{stance}` slots.
pub fn fill_slots(template: &str, topic: &str, round: u32, participant: &Participant) -> String {
    template
        .replace("{topic}", topic)
        .replace("{round}", &round.to_string())
        .replace("{participant}", &participant.display_name)
        .replace("{stance}", participant.stance.as_deref().unwrap_or("none"))
}

/// Request for one participant's turn in `phase`.
pub fn participant_request(
    topic: &str,
    participant: &Participant,
    phase: &ScheduledPhase,
    transcript: &[PhaseResult],
    participants: &[Participant],
    max_tokens: u32,
) -> GenerationRequest {
    let instruction = if phase.spec.prompt_template.trim().is_empty() {
        phase.spec.kind.default_instruction().to_string()
    } else {
        fill_slots(&phase.spec.prompt_template, topic, phase.round, participant)
    };

    let user = format!(
        "[Round {} - {}]\nDebate topic: {}\nHistory:\n{}\nPhase prompt: {}",
        phase.round,
        phase.spec.id,
        topic,
        render_history(transcript, participants, Audience::Participant),
        instruction
    );

    GenerationRequest::new(
        participant.system_prompt(),
        vec![ChatMessage::user(user)],
        participant.model_id.clone(),
        max_tokens,
    )
}

/// Request for the moderator's summary of `round`.
///
/// `transcript` must already include the phase that closed the round.
pub fn moderator_request(
    topic: &str,
    moderator: &Participant,
    round: u32,
    transcript: &[PhaseResult],
    participants: &[Participant],
    max_tokens: u32,
) -> GenerationRequest {
    let round_phases: Vec<PhaseResult> = transcript
        .iter()
        .filter(|p| p.round == round)
        .cloned()
        .collect();

    let system = moderator
        .persona_prompt
        .clone()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| MODERATOR_FALLBACK_PROMPT.to_string());

    let user = format!(
        "Topic: {}\nRound {} summary requested.\nRound transcript:\n{}",
        topic,
        round,
        render_history(&round_phases, participants, Audience::Moderator)
    );

    GenerationRequest::new(
        system,
        vec![ChatMessage::user(user)],
        moderator.model_id.clone(),
        max_tokens,
    )
}

/// Request for the closing synthesis over the whole transcript.
pub fn synthesis_request(
    topic: &str,
    judge: Option<&Participant>,
    model_id: &str,
    transcript: &[PhaseResult],
    participants: &[Participant],
    max_tokens: u32,
) -> GenerationRequest {
    let system = judge
        .and_then(|j| j.persona_prompt.clone())
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| SYNTHESIS_SYSTEM_PROMPT.to_string());

    let roster = participants
        .iter()
        .map(|p| match p.stance.as_deref() {
            Some(stance) => format!("- {} ({})", p.display_name, stance),
            None => format!("- {}", p.display_name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "Debate topic: {}\nParticipants:\n{}\nFull transcript:\n{}\n\nWrite the final verdict.",
        topic,
        roster,
        render_history(transcript, participants, Audience::Moderator)
    );

    GenerationRequest::new(system, vec![ChatMessage::user(user)], model_id, max_tokens)
}
