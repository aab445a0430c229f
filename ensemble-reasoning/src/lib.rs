//! Ensemble Reasoning Library
//!
//! A collaborative thinking engine where several agent lenses (analytical,
//! skeptical, creative, pragmatic, ethical) contribute thoughts to a shared
//! session, endorse or challenge each other, and propose integrations. The
//! engine derives consensus, tensions, circular reasoning and a scalar
//! convergence score from the session graph.
//!
//! # Components
//!
//! - [`session`]: append-only thought graph and the process-wide session store
//! - [`convergence`]: pure analysis over a session snapshot
//! - [`rate_limit`]: per-lens sliding window guard for mutating calls
//! - [`metrics`]: per-tool counters, latency statistics and optional export
//! - [`engine`]: the orchestrator composing the above, one pipeline per tool
//! - [`tools`]: request types and the `{status, result|error}` envelope
//!
//! # Tools
//!
//! - `start_collaborative_reasoning`: open a session (archives the previous one)
//! - `contribute_perspective`: add a thought from one lens
//! - `endorse_or_challenge`: signed agreement from another lens
//! - `synthesize_convergence`: consensus, tensions, cycles and score
//! - `propose_integration`: reconcile several thoughts
//! - `get_convergence_map`: printable ASCII overview
//! - `get_active_session` / `get_session_history`: session snapshots
//! - `get_metrics`, `get_rate_status`, `reset_agent_rate`: operational tools
//!
//! # Usage
//!
//! ```ignore
//! use ensemble_reasoning::{EnsembleConfig, EnsembleEngine};
//!
//! let engine = EnsembleEngine::new(EnsembleConfig::default());
//! let started = engine.start_session("Should we adopt a four-day week?", &["analytical", "skeptical"])?;
//! let thought = engine.contribute(&started.session_id, "analytical", "Output per hour rises", &[], Some(0.8))?;
//! engine.endorse(&started.session_id, thought.id, "skeptical", 0.6, None)?;
//! let report = engine.synthesize(&started.session_id, None)?;
//! println!("convergence = {:.2}", report.convergence_score);
//! ```

pub mod config;
pub mod convergence;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod telemetry;
pub mod tools;

pub use config::{
    ConfigError, EndorsementWeighting, EnsembleConfig, MetricsConfig, RateLimitConfig,
    ReconcileEdges, TextLimits,
};
pub use convergence::{ConvergenceEngine, ConvergencePolicy, ConvergenceReport};
pub use engine::{EnsembleEngine, SharedEnsembleEngine, ToolName};
pub use error::{EngineResult, EnsembleError};
pub use metrics::{MetricsBackground, MetricsCollector, MetricsSnapshot};
pub use rate_limit::{RateDecision, RateLimiter, RateWindowStatus};
pub use session::{
    AgentLens, Endorsement, IntegrationProposal, Session, SessionSnapshot, SessionStatus,
    SessionStore, Thought, ThoughtGraph, ThoughtId,
};
pub use tools::{dispatch, ToolResponse};
