//! Ensemble engine - the operation surface behind every tool
//!
//! One method per tool. Each runs a fixed pipeline and stops at the first
//! failure:
//!
//! 1. parse the agent lens
//! 2. rate limit check (mutating calls only)
//! 3. resolve the active session and check participation
//! 4. apply the graph mutation or run the convergence analysis
//! 5. record the call in metrics
//!
//! A rejected call leaves the session exactly as it was.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EnsembleConfig;
use crate::convergence::{render_map, ConvergenceEngine, ConvergencePolicy, ConvergenceReport};
use crate::error::{EngineResult, EnsembleError};
use crate::metrics::{
    MetricsCollector, MetricsSnapshot, AGENT_OPS_TOTAL, RATE_LIMITED_TOTAL,
    SESSIONS_ARCHIVED_TOTAL, SESSIONS_STARTED_TOTAL,
};
use crate::rate_limit::{RateDecision, RateLimiter, RateWindowStatus};
use crate::session::{
    AgentLens, Endorsement, IntegrationProposal, LensProfile, SessionSnapshot, SessionStatus,
    SessionStore, Thought, ThoughtId,
};

/// Tracing target for the append-only session event log
pub const SESSION_LOG_TARGET: &str = "ensemble_reasoning::session_log";

/// Shared reference to EnsembleEngine
pub type SharedEnsembleEngine = Arc<EnsembleEngine>;

/// The closed set of tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    StartCollaborativeReasoning,
    ContributePerspective,
    EndorseOrChallenge,
    SynthesizeConvergence,
    ProposeIntegration,
    GetConvergenceMap,
    GetActiveSession,
    GetSessionHistory,
    GetMetrics,
    GetRateStatus,
    ResetAgentRate,
}

impl ToolName {
    pub fn all() -> &'static [ToolName] {
        &[
            ToolName::StartCollaborativeReasoning,
            ToolName::ContributePerspective,
            ToolName::EndorseOrChallenge,
            ToolName::SynthesizeConvergence,
            ToolName::ProposeIntegration,
            ToolName::GetConvergenceMap,
            ToolName::GetActiveSession,
            ToolName::GetSessionHistory,
            ToolName::GetMetrics,
            ToolName::GetRateStatus,
            ToolName::ResetAgentRate,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::StartCollaborativeReasoning => "start_collaborative_reasoning",
            ToolName::ContributePerspective => "contribute_perspective",
            ToolName::EndorseOrChallenge => "endorse_or_challenge",
            ToolName::SynthesizeConvergence => "synthesize_convergence",
            ToolName::ProposeIntegration => "propose_integration",
            ToolName::GetConvergenceMap => "get_convergence_map",
            ToolName::GetActiveSession => "get_active_session",
            ToolName::GetSessionHistory => "get_session_history",
            ToolName::GetMetrics => "get_metrics",
            ToolName::GetRateStatus => "get_rate_status",
            ToolName::ResetAgentRate => "reset_agent_rate",
        }
    }

    /// Look up a tool by wire name
    pub fn parse(name: &str) -> Option<ToolName> {
        Self::all().iter().copied().find(|t| t.as_str() == name)
    }

    /// Whether calls pass through the rate limiter
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            ToolName::ContributePerspective
                | ToolName::EndorseOrChallenge
                | ToolName::ProposeIntegration
        )
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `start_collaborative_reasoning`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: String,
    pub problem: String,
    pub agent_lenses: Vec<AgentLens>,
    pub lens_descriptions: Vec<LensProfile>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_session_id: Option<String>,
}

/// Result of `endorse_or_challenge`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndorsementReceipt {
    #[serde(flatten)]
    pub endorsement: Endorsement,
    pub is_challenge: bool,
    /// Endorsements now recorded on the thought, including superseded ones
    pub thought_endorsements: usize,
}

/// Result of `get_convergence_map`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceMap {
    pub session_id: String,
    pub map: String,
}

/// Result of `reset_agent_rate`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateReset {
    pub agent_lens: AgentLens,
    pub cleared: usize,
}

/// The session engine
#[derive(Debug)]
pub struct EnsembleEngine {
    config: EnsembleConfig,
    store: Mutex<SessionStore>,
    limiter: RateLimiter,
    convergence: ConvergenceEngine,
    metrics: Arc<MetricsCollector>,
}

impl EnsembleEngine {
    /// Create an engine with its own metrics collector
    pub fn new(config: EnsembleConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new(&config));
        Self::with_metrics(config, metrics)
    }

    /// Create an engine reporting into an existing collector
    pub fn with_metrics(config: EnsembleConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store: Mutex::new(SessionStore::new(&config)),
            limiter: RateLimiter::new(&config.rate_limit),
            convergence: ConvergenceEngine::new(ConvergencePolicy::from(&config)),
            metrics,
            config,
        }
    }

    /// Create a shared reference to this engine
    pub fn shared(self) -> SharedEnsembleEngine {
        Arc::new(self)
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time `op` and record the outcome under `tool`
    fn instrument<T>(&self, tool: ToolName, op: impl FnOnce() -> EngineResult<T>) -> EngineResult<T> {
        let started = Instant::now();
        let result = op();
        self.record(tool, started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            debug!(tool = %tool, code = e.code(), error = %e, "Tool call rejected");
        }
        result
    }

    fn record(&self, tool: ToolName, elapsed: Duration, succeeded: bool) {
        self.metrics
            .record(tool.as_str(), elapsed.as_secs_f64() * 1000.0, succeeded);
    }

    /// Count a call that failed before reaching the engine (bad arguments)
    pub fn record_rejected(&self, tool: ToolName, elapsed: Duration) {
        self.record(tool, elapsed, false);
    }

    /// Parse `lens` and, for mutating tools, charge it one operation
    fn admit(&self, tool: ToolName, lens: &str) -> EngineResult<AgentLens> {
        let lens: AgentLens = lens.parse()?;
        if !tool.is_rate_limited() {
            return Ok(lens);
        }
        match self.limiter.check(lens) {
            RateDecision::Allowed { count } => {
                self.metrics.increment(AGENT_OPS_TOTAL);
                debug!(tool = %tool, agent_lens = %lens, count, "Rate check passed");
                Ok(lens)
            }
            decision @ RateDecision::Limited { .. } => {
                self.metrics.increment(RATE_LIMITED_TOTAL);
                let retry_after_secs = decision.retry_after_secs();
                warn!(tool = %tool, agent_lens = %lens, retry_after_secs, "Agent lens rate limited");
                Err(EnsembleError::RateLimited {
                    lens: lens.to_string(),
                    retry_after_secs,
                    limit: self.limiter.limit(),
                    window_secs: self.limiter.window().as_secs(),
                })
            }
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Open a new session, archiving the current one
    pub fn start_session<S: AsRef<str>>(
        &self,
        problem: &str,
        agent_lenses: &[S],
    ) -> EngineResult<SessionStarted> {
        self.instrument(ToolName::StartCollaborativeReasoning, || {
            let lenses = agent_lenses
                .iter()
                .map(|l| l.as_ref().parse::<AgentLens>())
                .collect::<EngineResult<Vec<_>>>()?;

            let outcome = self.store().start_session(problem, lenses)?;
            self.metrics.increment(SESSIONS_STARTED_TOTAL);

            if let Some(archived) = &outcome.archived {
                self.metrics.increment(SESSIONS_ARCHIVED_TOTAL);
                info!(
                    target: SESSION_LOG_TARGET,
                    event = "archive",
                    session_id = %archived.id,
                    superseded_by = %outcome.session.id,
                    "Session archived"
                );
            }

            let session = outcome.session;
            info!(
                target: SESSION_LOG_TARGET,
                event = "start",
                session_id = %session.id,
                problem = %session.problem,
                agent_lenses = ?session.agent_lenses,
                "Session started"
            );

            Ok(SessionStarted {
                session_id: session.id.clone(),
                problem: session.problem.clone(),
                lens_descriptions: session.agent_lenses.iter().map(|&l| LensProfile::from(l)).collect(),
                agent_lenses: session.agent_lenses,
                status: session.status,
                created_at: session.created_at,
                archived_session_id: outcome.archived.map(|s| s.id),
            })
        })
    }

    /// Snapshot of the active session
    pub fn active_session(&self, session_id: Option<&str>) -> EngineResult<SessionSnapshot> {
        self.instrument(ToolName::GetActiveSession, || {
            Ok(self.store().active(session_id)?.snapshot())
        })
    }

    /// Archived sessions, oldest first
    pub fn session_history(&self) -> EngineResult<Vec<SessionSnapshot>> {
        self.instrument(ToolName::GetSessionHistory, || {
            Ok(self.store().history().map(|r| r.snapshot()).collect())
        })
    }

    // =========================================================================
    // Graph mutations
    // =========================================================================

    /// Add a thought from `agent_lens`
    pub fn contribute(
        &self,
        session_id: &str,
        agent_lens: &str,
        thought: &str,
        builds_on: &[ThoughtId],
        weight: Option<f64>,
    ) -> EngineResult<Thought> {
        let tool = ToolName::ContributePerspective;
        self.instrument(tool, || {
            let lens = self.admit(tool, agent_lens)?;
            let mut store = self.store();
            let record = store.active_mut(session_id)?;
            record.require_participant(lens)?;

            let thought = record
                .graph
                .contribute(lens, thought, builds_on, weight.unwrap_or(1.0))?
                .clone();

            info!(
                target: SESSION_LOG_TARGET,
                event = "contribute",
                session_id,
                agent_lens = %lens,
                thought_id = thought.id,
                builds_on = ?thought.builds_on,
                weight = thought.weight,
                content = %thought.content,
                "Thought contributed"
            );
            Ok(thought)
        })
    }

    /// Endorse (level > 0) or challenge (level < 0) a thought
    pub fn endorse(
        &self,
        session_id: &str,
        thought_id: ThoughtId,
        agent_lens: &str,
        level: f64,
        note: Option<&str>,
    ) -> EngineResult<EndorsementReceipt> {
        let tool = ToolName::EndorseOrChallenge;
        self.instrument(tool, || {
            let lens = self.admit(tool, agent_lens)?;
            let mut store = self.store();
            let record = store.active_mut(session_id)?;
            record.require_participant(lens)?;

            let endorsement = record.graph.endorse(thought_id, lens, level, note)?.clone();
            let thought_endorsements = record
                .graph
                .get(thought_id)
                .map(|t| t.endorsements.len())
                .unwrap_or_default();

            info!(
                target: SESSION_LOG_TARGET,
                event = "endorse",
                session_id,
                agent_lens = %lens,
                thought_id,
                level,
                note = endorsement.note.as_deref().unwrap_or(""),
                "Endorsement recorded"
            );
            Ok(EndorsementReceipt {
                is_challenge: endorsement.is_challenge(),
                endorsement,
                thought_endorsements,
            })
        })
    }

    /// Propose a statement reconciling existing thoughts
    pub fn propose_integration(
        &self,
        session_id: &str,
        agent_lens: &str,
        integration: &str,
        reconciles: &[ThoughtId],
    ) -> EngineResult<IntegrationProposal> {
        let tool = ToolName::ProposeIntegration;
        self.instrument(tool, || {
            let lens = self.admit(tool, agent_lens)?;
            let mut store = self.store();
            let record = store.active_mut(session_id)?;
            record.require_participant(lens)?;

            let proposal = record
                .graph
                .propose_integration(lens, integration, reconciles)?
                .clone();

            info!(
                target: SESSION_LOG_TARGET,
                event = "propose_integration",
                session_id,
                agent_lens = %lens,
                proposal_id = proposal.id,
                reconciles = ?proposal.reconciles,
                integration = %proposal.integration,
                "Integration proposed"
            );
            Ok(proposal)
        })
    }

    // =========================================================================
    // Derived views
    // =========================================================================

    /// Consensus, tensions, cycles and the convergence score
    pub fn synthesize(&self, session_id: &str, threshold: Option<f64>) -> EngineResult<ConvergenceReport> {
        self.instrument(ToolName::SynthesizeConvergence, || {
            let threshold = threshold.unwrap_or(self.config.default_synthesis_threshold);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EnsembleError::invalid_range("threshold", threshold, 0.0, 1.0));
            }

            let store = self.store();
            let record = store.active(Some(session_id))?;
            let report = self
                .convergence
                .analyze(&record.session, &record.graph, threshold);

            info!(
                target: SESSION_LOG_TARGET,
                event = "synthesize",
                session_id,
                convergence_score = report.convergence_score,
                threshold,
                converged = report.converged,
                tensions = report.tensions.len(),
                cycles = report.cycles.len(),
                "Convergence synthesized"
            );
            Ok(report)
        })
    }

    /// Printable ASCII overview of the session
    pub fn convergence_map(&self, session_id: &str) -> EngineResult<ConvergenceMap> {
        self.instrument(ToolName::GetConvergenceMap, || {
            let store = self.store();
            let record = store.active(Some(session_id))?;
            let report = self.convergence.analyze(
                &record.session,
                &record.graph,
                self.config.default_synthesis_threshold,
            );
            Ok(ConvergenceMap {
                session_id: record.session.id.clone(),
                map: render_map(&record.session, &report),
            })
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Metrics snapshot, or `metrics_disabled`
    pub fn get_metrics(&self) -> EngineResult<MetricsSnapshot> {
        self.instrument(ToolName::GetMetrics, || {
            if !self.metrics.is_enabled() {
                return Err(EnsembleError::MetricsDisabled);
            }
            Ok(self.metrics.snapshot())
        })
    }

    /// Rate window of every lens
    pub fn rate_status(&self) -> EngineResult<Vec<RateWindowStatus>> {
        self.instrument(ToolName::GetRateStatus, || Ok(self.limiter.status_all()))
    }

    /// Clear one lens's rate window. Not itself rate limited.
    pub fn reset_agent_rate(&self, agent_lens: &str) -> EngineResult<RateReset> {
        let tool = ToolName::ResetAgentRate;
        self.instrument(tool, || {
            let lens = self.admit(tool, agent_lens)?;
            let cleared = self.limiter.reset(lens);
            info!(agent_lens = %lens, cleared, "Agent rate window reset");
            Ok(RateReset {
                agent_lens: lens,
                cleared,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EnsembleEngine {
        EnsembleEngine::new(EnsembleConfig::default())
    }

    #[test]
    fn test_tool_names_roundtrip() {
        for tool in ToolName::all() {
            assert_eq!(ToolName::parse(tool.as_str()), Some(*tool));
        }
        assert_eq!(ToolName::parse("nope"), None);
        assert!(!ToolName::ResetAgentRate.is_rate_limited());
        assert!(ToolName::EndorseOrChallenge.is_rate_limited());
    }

    #[test]
    fn test_unknown_lens_rejected_before_rate_limit() {
        let e = engine();
        let started = e.start_session("p", &["analytical"]).unwrap();
        let err = e
            .contribute(&started.session_id, "optimist", "t", &[], None)
            .unwrap_err();
        assert_eq!(err.code(), "unknown_agent_lens");
        assert_eq!(e.metrics_collector().snapshot().counters[AGENT_OPS_TOTAL], 0);
    }

    #[test]
    fn test_default_weight_is_one() {
        let e = engine();
        let s = e.start_session("p", &["analytical"]).unwrap();
        let t = e.contribute(&s.session_id, "analytical", "t", &[], None).unwrap();
        assert_eq!(t.weight, 1.0);
    }

    #[test]
    fn test_non_participant_rejected() {
        let e = engine();
        let s = e.start_session("p", &["analytical", "skeptical"]).unwrap();
        let err = e
            .contribute(&s.session_id, "ethical", "t", &[], None)
            .unwrap_err();
        assert_eq!(err.code(), "agent_not_in_session");
        assert!(e.active_session(None).unwrap().thoughts.is_empty());
    }

    #[test]
    fn test_synthesize_threshold_range() {
        let e = engine();
        let s = e.start_session("p", &["analytical"]).unwrap();
        let err = e.synthesize(&s.session_id, Some(1.5)).unwrap_err();
        assert_eq!(err.code(), "invalid_range");

        let report = e.synthesize(&s.session_id, None).unwrap();
        assert_eq!(report.threshold, 0.6);
    }

    #[test]
    fn test_metrics_disabled() {
        let mut config = EnsembleConfig::default();
        config.metrics.enabled = false;
        let e = EnsembleEngine::new(config);
        assert_eq!(e.get_metrics().unwrap_err(), EnsembleError::MetricsDisabled);
    }

    #[test]
    fn test_failures_are_recorded() {
        let e = engine();
        assert!(e.active_session(None).is_err());
        let snap = e.get_metrics().unwrap();
        let stats = &snap.tools["get_active_session"];
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_convergence_map_is_ascii() {
        let e = engine();
        let s = e
            .start_session("Caf\u{e9} pricing", &["analytical", "creative"])
            .unwrap();
        e.contribute(&s.session_id, "analytical", "Raise by 5\u{20ac}", &[], Some(0.7))
            .unwrap();
        // Only endorsed thoughts are listed, so put this one in consensus
        e.endorse(&s.session_id, 1, "creative", 0.9, None).unwrap();

        let map = e.convergence_map(&s.session_id).unwrap();
        assert!(map.map.is_ascii());
        assert!(map.map.contains("Problem: Caf? pricing"));
        assert!(map.map.contains("[#1 analytical] Raise by 5?"));
    }
}
