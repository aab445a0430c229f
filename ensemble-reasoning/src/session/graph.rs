//! Append-only thought graph for one session
//!
//! Thoughts live in an arena indexed by `id - 1`. Edges (`builds_on`,
//! `reconciles`) are stored as ids on the records, so every traversal is a
//! read over immutable data.

use chrono::Utc;
use std::collections::HashMap;

use super::types::{AgentLens, Endorsement, IntegrationProposal, Thought, ThoughtId};
use crate::config::{EnsembleConfig, TextLimits};
use crate::error::{EngineResult, EnsembleError};

/// Caps enforced by a [`ThoughtGraph`]
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLimits {
    pub max_thoughts: usize,
    pub max_thoughts_per_agent: usize,
    pub max_endorsements_per_thought: usize,
    pub text: TextLimits,
}

impl From<&EnsembleConfig> for GraphLimits {
    fn from(config: &EnsembleConfig) -> Self {
        Self {
            max_thoughts: config.max_thoughts_per_session,
            max_thoughts_per_agent: config.max_thoughts_per_agent_per_session,
            max_endorsements_per_thought: config.max_endorsements_per_thought,
            text: config.text_limits.clone(),
        }
    }
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self::from(&EnsembleConfig::default())
    }
}

/// Thoughts, endorsements and integration proposals of one session
#[derive(Debug, Clone)]
pub struct ThoughtGraph {
    limits: GraphLimits,
    thoughts: Vec<Thought>,
    integrations: Vec<IntegrationProposal>,
    by_agent: HashMap<AgentLens, Vec<ThoughtId>>,
    endorsement_count: usize,
}

impl ThoughtGraph {
    pub fn new(limits: GraphLimits) -> Self {
        Self {
            limits,
            thoughts: Vec::new(),
            integrations: Vec::new(),
            by_agent: HashMap::new(),
            endorsement_count: 0,
        }
    }

    /// Id the next accepted thought will receive
    pub fn next_id(&self) -> ThoughtId {
        self.thoughts.len() as ThoughtId + 1
    }

    pub fn get(&self, id: ThoughtId) -> Option<&Thought> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.thoughts.get(index)
    }

    fn get_mut(&mut self, id: ThoughtId) -> Option<&mut Thought> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.thoughts.get_mut(index)
    }

    /// All thoughts in id order
    pub fn thoughts(&self) -> &[Thought] {
        &self.thoughts
    }

    /// All proposals in id order
    pub fn integrations(&self) -> &[IntegrationProposal] {
        &self.integrations
    }

    /// Ids authored by `lens`, oldest first
    pub fn agent_thoughts(&self, lens: AgentLens) -> &[ThoughtId] {
        self.by_agent.get(&lens).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Weight of the most recent thought by `lens`
    pub fn latest_weight(&self, lens: AgentLens) -> Option<f64> {
        let id = *self.agent_thoughts(lens).last()?;
        self.get(id).map(|t| t.weight)
    }

    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    pub fn endorsement_count(&self) -> usize {
        self.endorsement_count
    }

    /// Append a thought. Lens participation is checked by the caller.
    pub fn contribute(
        &mut self,
        agent_lens: AgentLens,
        content: &str,
        builds_on: &[ThoughtId],
        weight: f64,
    ) -> EngineResult<&Thought> {
        check_text("thought", content, "max_thought_length", self.limits.text.max_thought_length)?;
        if !(0.0..=1.0).contains(&weight) {
            return Err(EnsembleError::invalid_range("weight", weight, 0.0, 1.0));
        }
        if self.thoughts.len() >= self.limits.max_thoughts {
            return Err(EnsembleError::LimitExceeded {
                limit: "max_thoughts_per_session",
                max: self.limits.max_thoughts,
            });
        }
        if self.agent_thoughts(agent_lens).len() >= self.limits.max_thoughts_per_agent {
            return Err(EnsembleError::LimitExceeded {
                limit: "max_thoughts_per_agent_per_session",
                max: self.limits.max_thoughts_per_agent,
            });
        }

        // Every existing id is below the new one, so existence is enough
        let mut references = Vec::with_capacity(builds_on.len());
        for &id in builds_on {
            if self.get(id).is_none() {
                return Err(EnsembleError::InvalidReference {
                    field: "buildsOn",
                    thought_id: id as i64,
                });
            }
            if !references.contains(&id) {
                references.push(id);
            }
        }

        let id = self.next_id();
        self.thoughts.push(Thought {
            id,
            agent_lens,
            content: content.to_string(),
            builds_on: references,
            weight,
            endorsements: Vec::new(),
            created_at: Utc::now(),
        });
        self.by_agent.entry(agent_lens).or_default().push(id);

        let index = self.thoughts.len() - 1;
        Ok(&self.thoughts[index])
    }

    /// Append an endorsement (or challenge) to an existing thought
    pub fn endorse(
        &mut self,
        thought_id: ThoughtId,
        agent_lens: AgentLens,
        level: f64,
        note: Option<&str>,
    ) -> EngineResult<&Endorsement> {
        if !(-1.0..=1.0).contains(&level) {
            return Err(EnsembleError::invalid_range("endorsementLevel", level, -1.0, 1.0));
        }
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if let Some(note) = note {
            if note.chars().count() > self.limits.text.max_note_length {
                return Err(EnsembleError::LimitExceeded {
                    limit: "max_note_length",
                    max: self.limits.text.max_note_length,
                });
            }
        }

        let max_endorsements = self.limits.max_endorsements_per_thought;
        let thought = self
            .get_mut(thought_id)
            .ok_or(EnsembleError::InvalidReference {
                field: "thoughtId",
                thought_id: thought_id as i64,
            })?;
        if thought.agent_lens == agent_lens {
            return Err(EnsembleError::SelfEndorsement {
                lens: agent_lens.to_string(),
                thought_id,
            });
        }
        if thought.endorsements.len() >= max_endorsements {
            return Err(EnsembleError::LimitExceeded {
                limit: "max_endorsements_per_thought",
                max: max_endorsements,
            });
        }

        thought.endorsements.push(Endorsement {
            thought_id,
            agent_lens,
            level,
            note: note.map(str::to_string),
            created_at: Utc::now(),
        });
        self.endorsement_count += 1;

        let thought = &self.thoughts[(thought_id - 1) as usize];
        Ok(&thought.endorsements[thought.endorsements.len() - 1])
    }

    /// Record a proposal reconciling existing thoughts
    pub fn propose_integration(
        &mut self,
        agent_lens: AgentLens,
        integration: &str,
        reconciles: &[ThoughtId],
    ) -> EngineResult<&IntegrationProposal> {
        check_text(
            "integration",
            integration,
            "max_integration_length",
            self.limits.text.max_integration_length,
        )?;

        let mut ids = Vec::with_capacity(reconciles.len());
        for &id in reconciles {
            if self.get(id).is_none() {
                return Err(EnsembleError::InvalidReference {
                    field: "reconciles",
                    thought_id: id as i64,
                });
            }
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() > self.limits.text.max_reconciles_per_integration {
            return Err(EnsembleError::LimitExceeded {
                limit: "max_reconciles_per_integration",
                max: self.limits.text.max_reconciles_per_integration,
            });
        }

        let id = self.integrations.len() as u64 + 1;
        self.integrations.push(IntegrationProposal {
            id,
            agent_lens,
            integration: integration.to_string(),
            reconciles: ids,
            created_at: Utc::now(),
        });

        let index = self.integrations.len() - 1;
        Ok(&self.integrations[index])
    }
}

/// Reject blank or over-long text
pub(crate) fn check_text(
    field: &'static str,
    text: &str,
    limit: &'static str,
    max: usize,
) -> EngineResult<()> {
    if text.trim().is_empty() {
        return Err(EnsembleError::invalid_argument(field, "must not be blank"));
    }
    if text.chars().count() > max {
        return Err(EnsembleError::LimitExceeded { limit, max });
    }
    Ok(())
}
