//! Consensus, tension and score derivation

use serde::Serialize;

use super::cycles::find_cycles;
use super::ConvergencePolicy;
use crate::config::EndorsementWeighting;
use crate::session::{AgentLens, Challenge, Session, Thought, ThoughtGraph, ThoughtId};

/// A thought whose combined agreement reached the positive threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusItem {
    pub thought_id: ThoughtId,
    pub agent_lens: AgentLens,
    pub content: String,
    pub agreement: f64,
    pub endorsement_count: usize,
}

/// A thought both supported and opposed by different lenses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tension {
    pub thought_id: ThoughtId,
    pub agent_lens: AgentLens,
    pub content: String,
    pub supporters: Vec<AgentLens>,
    pub challengers: Vec<AgentLens>,
    /// Highest minus lowest effective level
    pub spread: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<Challenge>,
}

/// Per-lens participation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContribution {
    pub agent_lens: AgentLens,
    pub thought_count: usize,
    pub average_weight: f64,
}

/// Everything `synthesize_convergence` reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceReport {
    pub session_id: String,
    /// Consensus thoughts over endorsed thoughts, 0 when nothing is endorsed
    pub convergence_score: f64,
    pub threshold: f64,
    pub converged: bool,
    pub consensus: Vec<ConsensusItem>,
    pub tensions: Vec<Tension>,
    pub cycles: Vec<Vec<ThoughtId>>,
    pub average_agreement: f64,
    pub total_thoughts: usize,
    pub endorsed_thoughts: usize,
    pub total_integrations: usize,
    pub agent_contributions: Vec<AgentContribution>,
}

/// Pure analysis over a session's graph
#[derive(Debug, Clone, Default)]
pub struct ConvergenceEngine {
    policy: ConvergencePolicy,
}

impl ConvergenceEngine {
    pub fn new(policy: ConvergencePolicy) -> Self {
        Self { policy }
    }

    /// Combined agreement for one thought, `None` if it has no endorsements
    pub fn agreement(&self, graph: &ThoughtGraph, thought: &Thought) -> Option<f64> {
        let effective = thought.effective_endorsements();
        if effective.is_empty() {
            return None;
        }
        let plain = effective.iter().map(|e| e.level).sum::<f64>() / effective.len() as f64;

        match self.policy.weighting {
            EndorsementWeighting::Unweighted => Some(plain),
            EndorsementWeighting::LatestContribution => {
                let (weighted, total) = effective.iter().fold((0.0, 0.0), |(sum, total), e| {
                    let w = graph.latest_weight(e.agent_lens).unwrap_or(1.0);
                    (sum + w * e.level, total + w)
                });
                if total > 0.0 {
                    Some(weighted / total)
                } else {
                    Some(plain)
                }
            }
        }
    }

    fn tension(&self, thought: &Thought) -> Option<Tension> {
        let effective = thought.effective_endorsements();
        let supporters: Vec<AgentLens> = effective
            .iter()
            .filter(|e| e.level >= self.policy.positive_threshold)
            .map(|e| e.agent_lens)
            .collect();
        let challengers: Vec<AgentLens> = effective
            .iter()
            .filter(|e| e.level <= self.policy.negative_threshold)
            .map(|e| e.agent_lens)
            .collect();
        if supporters.is_empty() || challengers.is_empty() {
            return None;
        }

        let max = effective.iter().map(|e| e.level).fold(f64::MIN, f64::max);
        let min = effective.iter().map(|e| e.level).fold(f64::MAX, f64::min);
        Some(Tension {
            thought_id: thought.id,
            agent_lens: thought.agent_lens,
            content: thought.content.clone(),
            supporters,
            challengers,
            spread: max - min,
            challenges: thought.challenges(),
        })
    }

    /// Per-lens thought counts for every lens in the session
    pub fn contributions(&self, session: &Session, graph: &ThoughtGraph) -> Vec<AgentContribution> {
        session
            .agent_lenses
            .iter()
            .map(|&lens| {
                let ids = graph.agent_thoughts(lens);
                let total: f64 = ids
                    .iter()
                    .filter_map(|&id| graph.get(id))
                    .map(|t| t.weight)
                    .sum();
                AgentContribution {
                    agent_lens: lens,
                    thought_count: ids.len(),
                    average_weight: if ids.is_empty() {
                        0.0
                    } else {
                        total / ids.len() as f64
                    },
                }
            })
            .collect()
    }

    /// Analyse `graph` and compare the score against `threshold`
    pub fn analyze(&self, session: &Session, graph: &ThoughtGraph, threshold: f64) -> ConvergenceReport {
        let mut consensus = Vec::new();
        let mut tensions = Vec::new();
        let mut endorsed = 0usize;
        let mut agreement_sum = 0.0;

        for thought in graph.thoughts() {
            let Some(agreement) = self.agreement(graph, thought) else {
                continue;
            };
            endorsed += 1;
            agreement_sum += agreement;

            if agreement >= self.policy.positive_threshold {
                consensus.push(ConsensusItem {
                    thought_id: thought.id,
                    agent_lens: thought.agent_lens,
                    content: thought.content.clone(),
                    agreement,
                    endorsement_count: thought.effective_endorsements().len(),
                });
            }
            if let Some(tension) = self.tension(thought) {
                tensions.push(tension);
            }
        }

        let (convergence_score, average_agreement) = if endorsed == 0 {
            (0.0, 0.0)
        } else {
            (
                consensus.len() as f64 / endorsed as f64,
                agreement_sum / endorsed as f64,
            )
        };

        ConvergenceReport {
            session_id: session.id.clone(),
            convergence_score,
            threshold,
            converged: convergence_score >= threshold,
            consensus,
            tensions,
            cycles: find_cycles(graph, self.policy.reconcile_edges),
            average_agreement,
            total_thoughts: graph.len(),
            endorsed_thoughts: endorsed,
            total_integrations: graph.integrations().len(),
            agent_contributions: self.contributions(session, graph),
        }
    }
}
