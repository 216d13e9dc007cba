//! Vote parsing and simple-majority tallying for `vote` phases.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::transcript::{ParticipantTurn, Turn};

/// A single parsed vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteValue {
    Yes,
    No,
    Invalid,
}

impl std::fmt::Display for VoteValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Result of tallying one vote phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteOutcome {
    Yes,
    No,
    Tie,
    Invalid,
}

impl std::fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
            Self::Tie => write!(f, "TIE"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVote {
    pub participant_id: String,
    pub vote: VoteValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub votes: Vec<CastVote>,
    pub yes: usize,
    pub no: usize,
    pub invalid: usize,
    pub outcome: VoteOutcome,
}

impl VoteTally {
    /// Tally turns in participant order. Failed turns count as invalid.
    pub fn from_turns(turns: &[ParticipantTurn]) -> Self {
        let votes: Vec<CastVote> = turns
            .iter()
            .map(|t| CastVote {
                participant_id: t.participant_id.clone(),
                vote: match &t.turn {
                    Turn::Spoken { text } => parse_vote(text),
                    Turn::Failed { .. } => VoteValue::Invalid,
                },
            })
            .collect();

        let yes = votes.iter().filter(|v| v.vote == VoteValue::Yes).count();
        let no = votes.iter().filter(|v| v.vote == VoteValue::No).count();
        let invalid = votes.len() - yes - no;

        let outcome = if yes > no {
            VoteOutcome::Yes
        } else if no > yes {
            VoteOutcome::No
        } else if yes > 0 {
            VoteOutcome::Tie
        } else {
            VoteOutcome::Invalid
        };

        Self {
            votes,
            yes,
            no,
            invalid,
            outcome,
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "YES {} / NO {} / INVALID {} => {}",
            self.yes, self.no, self.invalid, self.outcome
        )
    }
}

static VOTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:vote|my vote|i vote)?\s*[:\-]?\s*(yes|no)\b").expect("valid vote regex")
});

/// Parse the first line of a model reply as a YES/NO vote.
pub fn parse_vote(raw: &str) -> VoteValue {
    let Some(first_line) = raw.trim().lines().next() else {
        return VoteValue::Invalid;
    };
    let cleaned = first_line
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•' | '>' | ' ' | '\t'))
        .trim()
        .to_lowercase();

    if let Some(caps) = VOTE_PATTERN.captures(&cleaned) {
        return match &caps[1] {
            "yes" => VoteValue::Yes,
            _ => VoteValue::No,
        };
    }

    if cleaned.starts_with("yes") {
        VoteValue::Yes
    } else if cleaned.starts_with("no") {
        VoteValue::No
    } else {
        VoteValue::Invalid
    }
}
