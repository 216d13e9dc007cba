//! Debate templates: topic, participants and the per-round phase plan.
//!
//! A template is immutable once created. Several runs may share one
//! template through an `Arc`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, ArenaResult};

/// One debater (or the moderator), bound to a model for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub model_id: String,
    /// Position held for the entire run (e.g. "for", "against").
    #[serde(default)]
    pub stance: Option<String>,
    /// Used verbatim as the system prompt when present.
    #[serde(default)]
    pub persona_prompt: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Participant {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            model_id: model_id.into(),
            stance: None,
            persona_prompt: None,
            color: None,
            icon: None,
        }
    }

    pub fn with_stance(mut self, stance: impl Into<String>) -> Self {
        self.stance = Some(stance.into());
        self
    }

    pub fn with_persona(mut self, prompt: impl Into<String>) -> Self {
        self.persona_prompt = Some(prompt.into());
        self
    }

    /// System prompt for every call this participant makes.
    pub fn system_prompt(&self) -> String {
        if let Some(persona) = self.persona_prompt.as_deref() {
            if !persona.trim().is_empty() {
                return persona.to_string();
            }
        }
        match self.stance.as_deref() {
            Some(stance) => format!(
                "You are {}, a debate participant. Your stance: {}. Argue it consistently and concisely.",
                self.display_name, stance
            ),
            None => format!(
                "You are {}, a debate participant. Reason carefully and answer concisely.",
                self.display_name
            ),
        }
    }
}

/// Kind of a scheduled phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Opening,
    Rebuttal,
    Closing,
    Reaction,
    ArgumentFor,
    ArgumentAgainst,
    /// Turns are parsed as YES/NO votes and tallied.
    Vote,
    Summary,
    Custom,
}

impl PhaseKind {
    /// Instruction used when a phase has an empty prompt template.
    pub fn default_instruction(self) -> &'static str {
        match self {
            Self::Opening => "Give your opening statement on the topic.",
            Self::Rebuttal => "Rebut the strongest points other participants have made so far.",
            Self::Closing => "Give your closing statement, summarising your position.",
            Self::Reaction => "React briefly to the discussion so far.",
            Self::ArgumentFor => "Make the strongest argument in favour of the proposition.",
            Self::ArgumentAgainst => "Make the strongest argument against the proposition.",
            Self::Vote => "Vote on the proposition. Answer with YES or NO on the first line, then one sentence of justification.",
            Self::Summary => "Summarise the debate so far in a few sentences.",
            Self::Custom => "Respond to the topic.",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Rebuttal => write!(f, "rebuttal"),
            Self::Closing => write!(f, "closing"),
            Self::Reaction => write!(f, "reaction"),
            Self::ArgumentFor => write!(f, "argument_for"),
            Self::ArgumentAgainst => write!(f, "argument_against"),
            Self::Vote => write!(f, "vote"),
            Self::Summary => write!(f, "summary"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Who may see the turns of a phase in later prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    AllParticipants,
    ModeratorOnly,
    AudienceOnly,
}

/// One entry of the per-round phase plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub id: String,
    pub kind: PhaseKind,
    /// Slots: `{topic}`, `{round}`, `{participant}`, `{stance}`.
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default)]
    pub visible_to: Visibility,
}

impl PhaseSpec {
    pub fn new(id: impl Into<String>, kind: PhaseKind) -> Self {
        Self {
            id: id.into(),
            kind,
            prompt_template: String::new(),
            visible_to: Visibility::AllParticipants,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_template = prompt.into();
        self
    }

    pub fn with_visibility(mut self, visible_to: Visibility) -> Self {
        self.visible_to = visible_to;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    #[default]
    SimpleMajority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingConfig {
    #[serde(default)]
    pub mode: VotingMode,
}

/// Template as submitted by a caller, before validation and id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub topic: String,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    pub phases: Vec<PhaseSpec>,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub moderator: Option<Participant>,
    #[serde(default)]
    pub voting: VotingConfig,
}

fn default_rounds() -> u32 {
    1
}

/// A validated, immutable debate template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTemplate {
    pub id: String,
    pub name: String,
    pub topic: String,
    pub rounds: u32,
    pub phases: Vec<PhaseSpec>,
    pub participants: Vec<Participant>,
    pub moderator: Option<Participant>,
    pub voting: VotingConfig,
}

impl DebateTemplate {
    /// Validate a draft and assign it a fresh id.
    pub fn from_draft(draft: TemplateDraft) -> ArenaResult<Self> {
        validate_draft(&draft)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: draft.name,
            topic: draft.topic,
            rounds: draft.rounds,
            phases: draft.phases,
            participants: draft.participants,
            moderator: draft.moderator,
            voting: draft.voting,
        })
    }

    /// Full phase plan for `rounds` rounds: the per-round list repeated.
    pub fn phase_plan(&self, rounds: u32) -> Vec<ScheduledPhase> {
        let per_round = self.phases.len();
        (0..rounds)
            .flat_map(|round| {
                self.phases.iter().enumerate().map(move |(pos, spec)| ScheduledPhase {
                    index: round as usize * per_round + pos,
                    round: round + 1,
                    ends_round: pos + 1 == per_round,
                    spec: spec.clone(),
                })
            })
            .collect()
    }
}

/// A phase placed at a concrete position in a run's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPhase {
    /// 0-based position in the run's plan.
    pub index: usize,
    /// 1-based round number.
    pub round: u32,
    /// Last phase of its round.
    pub ends_round: bool,
    pub spec: PhaseSpec,
}

fn validate_draft(draft: &TemplateDraft) -> ArenaResult<()> {
    let invalid = |msg: String| Err(ArenaError::TemplateInvalid(msg));

    if draft.name.trim().is_empty() {
        return invalid("name must not be empty".into());
    }
    if draft.topic.trim().is_empty() {
        return invalid("topic must not be empty".into());
    }
    if draft.rounds == 0 {
        return invalid("rounds must be at least 1".into());
    }
    if draft.participants.is_empty() {
        return invalid("at least one participant is required".into());
    }
    if draft.phases.is_empty() {
        return invalid("phase plan must not be empty".into());
    }

    let mut seen = HashSet::new();
    for p in &draft.participants {
        if p.id.trim().is_empty() {
            return invalid("participant id must not be empty".into());
        }
        if p.model_id.trim().is_empty() {
            return invalid(format!("participant {} has an empty model id", p.id));
        }
        if !seen.insert(p.id.as_str()) {
            return invalid(format!("duplicate participant id: {}", p.id));
        }
    }

    if let Some(moderator) = &draft.moderator {
        if moderator.model_id.trim().is_empty() {
            return invalid("moderator has an empty model id".into());
        }
        if seen.contains(moderator.id.as_str()) {
            return invalid(format!(
                "moderator id {} collides with a participant",
                moderator.id
            ));
        }
    }

    let mut phase_ids = HashSet::new();
    for phase in &draft.phases {
        if phase.id.trim().is_empty() {
            return invalid("phase id must not be empty".into());
        }
        if !phase_ids.insert(phase.id.as_str()) {
            return invalid(format!("duplicate phase id: {}", phase.id));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> TemplateDraft {
        TemplateDraft {
            name: "Regulation".into(),
            topic: "AI regulation".into(),
            rounds: 2,
            phases: vec![
                PhaseSpec::new("opening", PhaseKind::Opening),
                PhaseSpec::new("vote", PhaseKind::Vote),
            ],
            participants: vec![
                Participant::new("a", "Ada", "m1").with_stance("for"),
                Participant::new("b", "Bo", "m2"),
            ],
            moderator: None,
            voting: VotingConfig::default(),
        }
    }

    #[test]
    fn test_from_draft_assigns_id() {
        let t1 = DebateTemplate::from_draft(draft()).unwrap();
        let t2 = DebateTemplate::from_draft(draft()).unwrap();
        assert_eq!(t1.id.len(), 32);
        assert_ne!(t1.id, t2.id);
    }

    #[test]
    fn test_phase_plan_repeats_rounds() {
        let t = DebateTemplate::from_draft(draft()).unwrap();
        let plan = t.phase_plan(t.rounds);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].round, 1);
        assert!(!plan[0].ends_round);
        assert!(plan[1].ends_round);
        assert_eq!(plan[2].round, 2);
        assert_eq!(plan[3].index, 3);
        assert_eq!(plan[3].spec.kind, PhaseKind::Vote);
    }

    #[test]
    fn test_rejects_empty_participants() {
        let mut d = draft();
        d.participants.clear();
        let err = DebateTemplate::from_draft(d).unwrap_err();
        assert!(matches!(err, ArenaError::TemplateInvalid(_)));
    }

    #[test]
    fn test_rejects_zero_rounds() {
        let mut d = draft();
        d.rounds = 0;
        assert!(DebateTemplate::from_draft(d).is_err());
    }

    #[test]
    fn test_rejects_duplicate_participant() {
        let mut d = draft();
        d.participants.push(Participant::new("a", "Again", "m3"));
        let err = DebateTemplate::from_draft(d).unwrap_err();
        assert!(err.to_string().contains("duplicate participant id: a"));
    }

    #[test]
    fn test_rejects_duplicate_phase() {
        let mut d = draft();
        d.phases.push(PhaseSpec::new("opening", PhaseKind::Rebuttal));
        let err = DebateTemplate::from_draft(d).unwrap_err();
        assert!(err.to_string().contains("duplicate phase id: opening"));
    }

    #[test]
    fn test_rejects_empty_phase_plan() {
        let mut d = draft();
        d.phases.clear();
        let err = DebateTemplate::from_draft(d).unwrap_err();
        assert!(matches!(err, ArenaError::TemplateInvalid(_)));
    }

    #[test]
    fn test_rejects_blank_name_and_topic() {
        let mut unnamed = draft();
        unnamed.name = "  ".into();
        let err = DebateTemplate::from_draft(unnamed).unwrap_err();
        assert!(err.to_string().contains("name must not be empty"));

        let mut no_topic = draft();
        no_topic.topic = String::new();
        let err = DebateTemplate::from_draft(no_topic).unwrap_err();
        assert!(err.to_string().contains("topic must not be empty"));
    }

    #[test]
    fn test_rejects_empty_model() {
        let mut d = draft();
        d.participants[1].model_id = " ".into();
        assert!(DebateTemplate::from_draft(d).is_err());
    }

    #[test]
    fn test_rejects_moderator_collision() {
        let mut d = draft();
        d.moderator = Some(Participant::new("b", "Mod", "m9"));
        assert!(DebateTemplate::from_draft(d).is_err());
    }

    #[test]
    fn test_single_participant_allowed() {
        let mut d = draft();
        d.participants.truncate(1);
        assert!(DebateTemplate::from_draft(d).is_ok());
    }

    #[test]
    fn test_system_prompt_fallbacks() {
        let with_persona = Participant::new("a", "Ada", "m1").with_persona("Be terse.");
        assert_eq!(with_persona.system_prompt(), "Be terse.");

        let with_stance = Participant::new("a", "Ada", "m1").with_stance("against");
        assert!(with_stance.system_prompt().contains("Your stance: against"));
    }

    #[test]
    fn test_draft_deserializes_with_defaults() {
        let d: TemplateDraft = serde_json::from_str(
            r#"{
                "name": "n", "topic": "t",
                "phases": [{"id": "p1", "kind": "argument_for"}],
                "participants": [{"id": "a", "display_name": "A", "model_id": "m"}]
            }"#,
        )
        .unwrap();
        assert_eq!(d.rounds, 1);
        assert_eq!(d.phases[0].visible_to, Visibility::AllParticipants);
        assert_eq!(d.phases[0].kind.to_string(), "argument_for");
    }
}
