//! Aggregator: produces the `Final` of a run exactly once, at completion.
//!
//! The synthesis is one more model call. When it fails, the fallback verdict
//! is used instead so that `completed` always carries a `Final`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::executor::PhaseExecutor;
use crate::prompt;
use crate::template::DebateTemplate;
use crate::transcript::{last_vote_outcome, Final, PhaseResult, Turn};

/// Verdict recorded when no synthesis could be produced.
pub const FALLBACK_VERDICT: &str = "No synthesis available.";

pub struct Aggregator {
    executor: PhaseExecutor,
    config: Arc<EngineConfig>,
}

impl Aggregator {
    pub fn new(executor: PhaseExecutor, config: Arc<EngineConfig>) -> Self {
        Self { executor, config }
    }

    /// Model for the synthesis: moderator, then configured model, then the
    /// first participant.
    pub fn synthesis_model<'a>(&'a self, template: &'a DebateTemplate) -> Option<&'a str> {
        template
            .moderator
            .as_ref()
            .map(|m| m.model_id.as_str())
            .or(self.config.synthesis_model.as_deref())
            .or_else(|| template.participants.first().map(|p| p.model_id.as_str()))
            .filter(|m| !m.trim().is_empty())
    }

    pub async fn finalize(
        &self,
        run_id: &str,
        topic: &str,
        transcript: &[PhaseResult],
        template: &DebateTemplate,
    ) -> Final {
        let outcome = last_vote_outcome(transcript);

        let (verdict, synthesized, synthesis_error) = match self.synthesis_model(template) {
            Some(model) => {
                let request = prompt::synthesis_request(
                    topic,
                    template.moderator.as_ref(),
                    model,
                    transcript,
                    &template.participants,
                    self.config.default_max_tokens,
                );
                let reply = self.executor.call_with_retry("aggregator", request).await;
                match reply.turn {
                    Turn::Spoken { text } if !text.trim().is_empty() => (text, true, None),
                    Turn::Spoken { .. } => (
                        FALLBACK_VERDICT.to_string(),
                        false,
                        Some("empty synthesis".to_string()),
                    ),
                    Turn::Failed { reason } => {
                        warn!(run_id, reason = %reason, "synthesis failed, using fallback verdict");
                        (FALLBACK_VERDICT.to_string(), false, Some(reason))
                    }
                }
            }
            None => (
                FALLBACK_VERDICT.to_string(),
                false,
                Some("no synthesis model available".to_string()),
            ),
        };

        info!(
            run_id,
            synthesized,
            outcome = ?outcome,
            "final verdict produced"
        );

        Final {
            run_id: run_id.to_string(),
            title: template.name.clone(),
            verdict,
            outcome,
            synthesized,
            synthesis_error,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::client::{GenerationRequest, ModelClient};
    use crate::error::GenerationFailure;
    use crate::template::{Participant, PhaseKind, PhaseSpec, ScheduledPhase, TemplateDraft};
    use crate::transcript::ParticipantTurn;
    use crate::vote::VoteOutcome;

    struct Fixed(Result<String, GenerationFailure>);

    #[async_trait]
    impl ModelClient for Fixed {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationFailure> {
            self.0.clone()
        }
    }

    fn aggregator(reply: Result<String, GenerationFailure>) -> Aggregator {
        let config = Arc::new(EngineConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        });
        let executor = PhaseExecutor::new(Arc::new(Fixed(reply)), Arc::clone(&config));
        Aggregator::new(executor, config)
    }

    fn template(moderator: Option<Participant>) -> DebateTemplate {
        DebateTemplate::from_draft(TemplateDraft {
            name: "Regulation".into(),
            topic: "AI regulation".into(),
            rounds: 1,
            phases: vec![PhaseSpec::new("vote", PhaseKind::Vote)],
            participants: vec![Participant::new("a", "A", "m1"), Participant::new("b", "B", "m2")],
            moderator,
            voting: Default::default(),
        })
        .unwrap()
    }

    fn vote_phase() -> PhaseResult {
        let plan = ScheduledPhase {
            index: 0,
            round: 1,
            ends_round: true,
            spec: PhaseSpec::new("vote", PhaseKind::Vote),
        };
        PhaseResult::new(
            &plan,
            vec![
                ParticipantTurn::new("a", Turn::spoken("NO"), 1, 0),
                ParticipantTurn::new("b", Turn::spoken("no way"), 1, 0),
            ],
        )
    }

    #[tokio::test]
    async fn test_synthesized_final() {
        let agg = aggregator(Ok("B argued better.".into()));
        let t = template(None);
        let f = agg.finalize("r-1", &t.topic, &[vote_phase()], &t).await;
        assert!(f.synthesized);
        assert_eq!(f.verdict, "B argued better.");
        assert_eq!(f.outcome, Some(VoteOutcome::No));
        assert_eq!(f.title, "Regulation");
    }

    #[tokio::test]
    async fn test_fallback_when_synthesis_fails() {
        let agg = aggregator(Err(GenerationFailure::new("HTTP 502")));
        let t = template(None);
        let f = agg.finalize("r-1", &t.topic, &[vote_phase()], &t).await;
        assert!(!f.synthesized);
        assert_eq!(f.verdict, FALLBACK_VERDICT);
        assert_eq!(f.synthesis_error.as_deref(), Some("HTTP 502"));
        assert_eq!(f.outcome, Some(VoteOutcome::No));
    }

    #[test]
    fn test_synthesis_model_precedence() {
        let agg = aggregator(Ok(String::new()));
        let plain = template(None);
        assert_eq!(agg.synthesis_model(&plain), Some("m1"));

        let moderated = template(Some(Participant::new("mod", "Mod", "judge")));
        assert_eq!(agg.synthesis_model(&moderated), Some("judge"));
    }

    #[tokio::test]
    async fn test_empty_synthesis_falls_back() {
        let agg = aggregator(Ok("   ".into()));
        let t = template(None);
        let f = agg.finalize("r-1", &t.topic, &[], &t).await;
        assert!(!f.synthesized);
        assert!(f.outcome.is_none());
    }
}
