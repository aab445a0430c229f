//! Core session types
//!
//! Thoughts, endorsements and integration proposals are records in an
//! append-only log. Nothing here is edited after it is accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::EnsembleError;

/// Session-scoped thought identifier, assigned from 1 upwards
pub type ThoughtId = u64;

/// One of the fixed analytical viewpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLens {
    Analytical,
    Skeptical,
    Creative,
    Pragmatic,
    Ethical,
}

impl AgentLens {
    /// Every lens, in vocabulary order
    pub fn all() -> &'static [AgentLens] {
        &[
            AgentLens::Analytical,
            AgentLens::Skeptical,
            AgentLens::Creative,
            AgentLens::Pragmatic,
            AgentLens::Ethical,
        ]
    }

    /// Wire names of every lens
    pub fn names() -> Vec<&'static str> {
        Self::all().iter().map(|lens| lens.as_str()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentLens::Analytical => "analytical",
            AgentLens::Skeptical => "skeptical",
            AgentLens::Creative => "creative",
            AgentLens::Pragmatic => "pragmatic",
            AgentLens::Ethical => "ethical",
        }
    }

    /// What this lens pays attention to
    pub fn focus(&self) -> &'static str {
        match self {
            AgentLens::Analytical => "Data-driven, logical decomposition, systematic analysis",
            AgentLens::Skeptical => "Critical examination, identifying flaws, risk assessment",
            AgentLens::Creative => "Novel solutions, lateral thinking, unconventional approaches",
            AgentLens::Pragmatic => "Feasibility, resources, implementation, real-world constraints",
            AgentLens::Ethical => "Values, fairness, long-term impact, stakeholder effects",
        }
    }

    /// The blind spot this lens should watch for
    pub fn bias_check(&self) -> &'static str {
        match self {
            AgentLens::Analytical => "May overlook human factors and edge cases",
            AgentLens::Skeptical => "May be overly negative, miss opportunities",
            AgentLens::Creative => "May propose impractical or risky ideas",
            AgentLens::Pragmatic => "May be too conservative, miss innovation",
            AgentLens::Ethical => "May prioritize ideals over practicality",
        }
    }
}

impl std::fmt::Display for AgentLens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentLens {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentLens::all()
            .iter()
            .copied()
            .find(|lens| lens.as_str() == s)
            .ok_or_else(|| EnsembleError::UnknownAgentLens {
                lens: s.to_string(),
            })
    }
}

/// Static description of a lens returned when a session starts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LensProfile {
    pub lens: AgentLens,
    pub focus: &'static str,
    pub bias_check: &'static str,
}

impl From<AgentLens> for LensProfile {
    fn from(lens: AgentLens) -> Self {
        Self {
            lens,
            focus: lens.focus(),
            bias_check: lens.bias_check(),
        }
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Session metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque unique identifier
    pub id: String,
    pub problem: String,
    /// Participating lenses in the order they were given
    pub agent_lenses: Vec<AgentLens>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new active session with a fresh v4 UUID
    pub fn new(problem: String, agent_lenses: Vec<AgentLens>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            problem,
            agent_lenses,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn has_lens(&self, lens: AgentLens) -> bool {
        self.agent_lenses.contains(&lens)
    }

    /// Mark completed. Idempotent.
    pub fn complete(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Signed agreement from one lens on one thought
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endorsement {
    pub thought_id: ThoughtId,
    pub agent_lens: AgentLens,
    /// In [-1, 1]; negative values challenge the thought
    pub level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Endorsement {
    /// A negative endorsement that carries an explanation
    pub fn is_challenge(&self) -> bool {
        self.level < 0.0 && self.note.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Challenge view of a negative, annotated endorsement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub from_agent: AgentLens,
    pub concern: String,
    pub level: f64,
}

/// An atomic contribution to a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: ThoughtId,
    pub agent_lens: AgentLens,
    pub content: String,
    /// Strictly earlier thought ids, deduplicated, in caller order
    pub builds_on: Vec<ThoughtId>,
    /// Author confidence in [0, 1]
    pub weight: f64,
    /// Every endorsement in arrival order
    pub endorsements: Vec<Endorsement>,
    pub created_at: DateTime<Utc>,
}

impl Thought {
    /// Latest endorsement per lens, ordered by the lens's first endorsement
    pub fn effective_endorsements(&self) -> Vec<&Endorsement> {
        let mut effective: Vec<&Endorsement> = Vec::new();
        for endorsement in &self.endorsements {
            match effective
                .iter_mut()
                .find(|e| e.agent_lens == endorsement.agent_lens)
            {
                Some(slot) => *slot = endorsement,
                None => effective.push(endorsement),
            }
        }
        effective
    }

    /// Challenges among the effective endorsements
    pub fn challenges(&self) -> Vec<Challenge> {
        self.effective_endorsements()
            .into_iter()
            .filter(|e| e.is_challenge())
            .map(|e| Challenge {
                from_agent: e.agent_lens,
                concern: e.note.clone().unwrap_or_default(),
                level: e.level,
            })
            .collect()
    }
}

/// A statement claiming to reconcile several thoughts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationProposal {
    pub id: u64,
    pub agent_lens: AgentLens,
    pub integration: String,
    /// Existing thought ids, deduplicated, in caller order
    pub reconciles: Vec<ThoughtId>,
    pub created_at: DateTime<Utc>,
}

/// Immutable copy of a session and everything recorded in it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Session,
    pub thoughts: Vec<Thought>,
    pub integrations: Vec<IntegrationProposal>,
    pub total_endorsements: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endorsement(lens: AgentLens, level: f64, note: Option<&str>) -> Endorsement {
        Endorsement {
            thought_id: 1,
            agent_lens: lens,
            level,
            note: note.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_lens_parsing() {
        assert_eq!("skeptical".parse::<AgentLens>().unwrap(), AgentLens::Skeptical);
        assert_eq!("ethical".parse::<AgentLens>().unwrap(), AgentLens::Ethical);
        for near_miss in ["ETHICAL", "Skeptical", " ethical ", ""] {
            let err = near_miss.parse::<AgentLens>().unwrap_err();
            assert_eq!(
                err,
                EnsembleError::UnknownAgentLens {
                    lens: near_miss.to_string()
                }
            );
        }
        let err = "optimistic".parse::<AgentLens>().unwrap_err();
        assert_eq!(err.code(), "unknown_agent_lens");
    }

    #[test]
    fn test_lens_serde_matches_display() {
        for lens in AgentLens::all() {
            let json = serde_json::to_value(lens).unwrap();
            assert_eq!(json, serde_json::json!(lens.to_string()));
        }
        assert_eq!(AgentLens::names().len(), 5);
    }

    #[test]
    fn test_effective_endorsements_keep_latest_per_lens() {
        let thought = Thought {
            id: 1,
            agent_lens: AgentLens::Analytical,
            content: "x".into(),
            builds_on: vec![],
            weight: 0.5,
            endorsements: vec![
                endorsement(AgentLens::Skeptical, 0.9, None),
                endorsement(AgentLens::Creative, 0.2, None),
                endorsement(AgentLens::Skeptical, -0.4, Some("changed my mind")),
            ],
            created_at: Utc::now(),
        };

        let effective = thought.effective_endorsements();
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].agent_lens, AgentLens::Skeptical);
        assert_eq!(effective[0].level, -0.4);

        let challenges = thought.challenges();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].concern, "changed my mind");
    }

    #[test]
    fn test_challenge_requires_note() {
        assert!(!endorsement(AgentLens::Ethical, -0.9, None).is_challenge());
        assert!(!endorsement(AgentLens::Ethical, -0.9, Some("  ")).is_challenge());
        assert!(!endorsement(AgentLens::Ethical, 0.9, Some("fine")).is_challenge());
        assert!(endorsement(AgentLens::Ethical, -0.1, Some("unfair")).is_challenge());
    }

    #[test]
    fn test_session_complete_is_idempotent() {
        let mut session = Session::new("p".into(), vec![AgentLens::Creative]);
        assert!(session.is_active());
        session.complete();
        let first = session.completed_at;
        session.complete();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_at, first);
    }
}
