//! Convergence analysis
//!
//! Everything here is a pure function of a session and its graph: the
//! consensus set, tensions, circular reasoning, the scalar score and the
//! printable convergence map.

mod analysis;
pub mod cycles;
pub mod map;

pub use analysis::{AgentContribution, ConsensusItem, ConvergenceEngine, ConvergenceReport, Tension};
pub use map::render_map;

use crate::config::{EndorsementWeighting, EnsembleConfig, ReconcileEdges};

/// Thresholds and policy points used by [`ConvergenceEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergencePolicy {
    pub positive_threshold: f64,
    pub negative_threshold: f64,
    pub weighting: EndorsementWeighting,
    pub reconcile_edges: ReconcileEdges,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self::from(&EnsembleConfig::default())
    }
}

impl From<&EnsembleConfig> for ConvergencePolicy {
    fn from(config: &EnsembleConfig) -> Self {
        Self {
            positive_threshold: config.positive_endorsement_threshold,
            negative_threshold: config.negative_endorsement_threshold,
            weighting: config.endorsement_weighting,
            reconcile_edges: config.reconcile_edges,
        }
    }
}
