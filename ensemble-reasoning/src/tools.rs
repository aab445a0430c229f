//! Tool surface
//!
//! Request types for every tool, the `{status, result | error}` envelope,
//! and [`dispatch`] for callers that route by tool name with raw JSON
//! arguments. The MCP binary uses the same request types through
//! `Parameters<T>`.

use std::time::Instant;

use rmcp::schemars;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::{EnsembleEngine, ToolName};
use crate::error::{EngineResult, EnsembleError};
use crate::session::ThoughtId;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartReasoningRequest {
    #[schemars(description = "The problem or question the ensemble should reason about (max 4000 chars)")]
    pub problem: String,
    #[schemars(
        description = "Participating lenses, no duplicates: analytical, skeptical, creative, pragmatic, ethical"
    )]
    pub agent_lenses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContributeRequest {
    #[schemars(description = "Id of the active session")]
    pub session_id: String,
    #[schemars(description = "Lens contributing the thought; must be part of the session")]
    pub agent_lens: String,
    #[schemars(description = "The thought itself (max 4000 chars)")]
    pub thought: String,
    #[schemars(description = "Ids of earlier thoughts this one builds on")]
    #[serde(default)]
    pub builds_on: Vec<i64>,
    #[schemars(description = "Author confidence in [0, 1] (default: 1.0)")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndorseRequest {
    #[schemars(description = "Id of the active session")]
    pub session_id: String,
    #[schemars(description = "Thought being endorsed or challenged")]
    pub thought_id: i64,
    #[schemars(description = "Endorsing lens; cannot be the thought's author")]
    pub agent_lens: String,
    #[schemars(description = "Agreement in [-1, 1]; negative values challenge the thought")]
    pub endorsement_level: f64,
    #[schemars(description = "Optional explanation (max 1000 chars); a note on a negative level is a challenge")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeRequest {
    #[schemars(description = "Id of the active session")]
    pub session_id: String,
    #[schemars(description = "Score in [0, 1] required to report convergence (default: 0.6)")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProposeIntegrationRequest {
    #[schemars(description = "Id of the active session")]
    pub session_id: String,
    #[schemars(description = "Lens proposing the integration")]
    pub agent_lens: String,
    #[schemars(description = "Statement reconciling the referenced thoughts (max 4000 chars)")]
    pub integration: String,
    #[schemars(description = "Ids of existing thoughts this integration reconciles (max 20)")]
    #[serde(default)]
    pub reconciles: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceMapRequest {
    #[schemars(description = "Id of the active session")]
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionRequest {
    #[schemars(description = "Optional: fail with session_mismatch unless this is the active session")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetAgentRateRequest {
    #[schemars(description = "Lens whose rate window should be cleared")]
    pub agent_lens: String,
}

// ============================================================================
// Envelope
// ============================================================================

/// `{status: "success", result}` or `{status: "error", error, message?, details?}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    Success {
        result: Value,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl ToolResponse {
    /// Wrap an engine result
    pub fn from_result<T: Serialize>(result: EngineResult<T>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(result) => ToolResponse::Success { result },
                Err(e) => ToolResponse::Error {
                    error: "serialization_failed".to_string(),
                    message: Some(e.to_string()),
                    details: None,
                },
            },
            Err(e) => e.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResponse::Success { .. })
    }

    /// Machine-readable error code, if this is an error
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ToolResponse::Success { .. } => None,
            ToolResponse::Error { error, .. } => Some(error),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            json!({ "status": "error", "error": "serialization_failed", "message": e.to_string() })
        })
    }

    /// Pretty JSON, as `Ok` for success and `Err` for errors
    pub fn into_result(self) -> Result<String, String> {
        let success = self.is_success();
        let text = serde_json::to_string_pretty(&self.to_value())
            .unwrap_or_else(|e| format!("{{\"status\":\"error\",\"error\":\"serialization_failed\",\"message\":\"{}\"}}", e));
        if success {
            Ok(text)
        } else {
            Err(text)
        }
    }
}

impl From<EnsembleError> for ToolResponse {
    fn from(e: EnsembleError) -> Self {
        ToolResponse::Error {
            error: e.code().to_string(),
            message: Some(e.to_string()),
            details: e.details(),
        }
    }
}

// ============================================================================
// Tools
// ============================================================================

pub fn start_collaborative_reasoning(engine: &EnsembleEngine, req: StartReasoningRequest) -> ToolResponse {
    ToolResponse::from_result(engine.start_session(&req.problem, &req.agent_lenses))
}

pub fn contribute_perspective(engine: &EnsembleEngine, req: ContributeRequest) -> ToolResponse {
    let started = Instant::now();
    let builds_on = match thought_ids("buildsOn", &req.builds_on) {
        Ok(ids) => ids,
        Err(e) => return rejected(engine, ToolName::ContributePerspective, started, e),
    };
    ToolResponse::from_result(engine.contribute(
        &req.session_id,
        &req.agent_lens,
        &req.thought,
        &builds_on,
        req.weight,
    ))
}

pub fn endorse_or_challenge(engine: &EnsembleEngine, req: EndorseRequest) -> ToolResponse {
    let started = Instant::now();
    let thought_id = match thought_id("thoughtId", req.thought_id) {
        Ok(id) => id,
        Err(e) => return rejected(engine, ToolName::EndorseOrChallenge, started, e),
    };
    ToolResponse::from_result(engine.endorse(
        &req.session_id,
        thought_id,
        &req.agent_lens,
        req.endorsement_level,
        req.note.as_deref(),
    ))
}

pub fn synthesize_convergence(engine: &EnsembleEngine, req: SynthesizeRequest) -> ToolResponse {
    ToolResponse::from_result(engine.synthesize(&req.session_id, req.threshold))
}

pub fn propose_integration(engine: &EnsembleEngine, req: ProposeIntegrationRequest) -> ToolResponse {
    let started = Instant::now();
    let reconciles = match thought_ids("reconciles", &req.reconciles) {
        Ok(ids) => ids,
        Err(e) => return rejected(engine, ToolName::ProposeIntegration, started, e),
    };
    ToolResponse::from_result(engine.propose_integration(
        &req.session_id,
        &req.agent_lens,
        &req.integration,
        &reconciles,
    ))
}

pub fn get_convergence_map(engine: &EnsembleEngine, req: ConvergenceMapRequest) -> ToolResponse {
    ToolResponse::from_result(engine.convergence_map(&req.session_id))
}

pub fn get_active_session(engine: &EnsembleEngine, req: ActiveSessionRequest) -> ToolResponse {
    ToolResponse::from_result(engine.active_session(req.session_id.as_deref()))
}

pub fn get_session_history(engine: &EnsembleEngine) -> ToolResponse {
    ToolResponse::from_result(engine.session_history().map(|sessions| {
        json!({
            "count": sessions.len(),
            "sessions": sessions,
        })
    }))
}

pub fn get_metrics(engine: &EnsembleEngine) -> ToolResponse {
    ToolResponse::from_result(engine.get_metrics())
}

pub fn get_rate_status(engine: &EnsembleEngine) -> ToolResponse {
    ToolResponse::from_result(engine.rate_status().map(|status| json!({ "rateStatus": status })))
}

pub fn reset_agent_rate(engine: &EnsembleEngine, req: ResetAgentRateRequest) -> ToolResponse {
    ToolResponse::from_result(engine.reset_agent_rate(&req.agent_lens))
}

/// Route a call by tool name with raw JSON arguments
pub fn dispatch(engine: &EnsembleEngine, name: &str, args: Value) -> ToolResponse {
    let Some(tool) = ToolName::parse(name) else {
        return ToolResponse::Error {
            error: "unknown_tool".to_string(),
            message: Some(format!("Unknown tool: {}", name)),
            details: Some(json!({
                "tool": name,
                "validTools": ToolName::all().iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            })),
        };
    };

    let started = Instant::now();
    let args = if args.is_null() { json!({}) } else { args };

    macro_rules! with_request {
        ($handler:ident) => {
            match parse(args) {
                Ok(req) => $handler(engine, req),
                Err(e) => {
                    engine.record_rejected(tool, started.elapsed());
                    e.into()
                }
            }
        };
    }

    match tool {
        ToolName::StartCollaborativeReasoning => with_request!(start_collaborative_reasoning),
        ToolName::ContributePerspective => with_request!(contribute_perspective),
        ToolName::EndorseOrChallenge => with_request!(endorse_or_challenge),
        ToolName::SynthesizeConvergence => with_request!(synthesize_convergence),
        ToolName::ProposeIntegration => with_request!(propose_integration),
        ToolName::GetConvergenceMap => with_request!(get_convergence_map),
        ToolName::GetActiveSession => with_request!(get_active_session),
        ToolName::ResetAgentRate => with_request!(reset_agent_rate),
        ToolName::GetSessionHistory => get_session_history(engine),
        ToolName::GetMetrics => get_metrics(engine),
        ToolName::GetRateStatus => get_rate_status(engine),
    }
}

fn parse<T: DeserializeOwned>(args: Value) -> EngineResult<T> {
    serde_json::from_value(args).map_err(|e| EnsembleError::invalid_argument("arguments", e.to_string()))
}

/// Negative ids can never name a thought
fn thought_id(field: &'static str, raw: i64) -> EngineResult<ThoughtId> {
    ThoughtId::try_from(raw).map_err(|_| EnsembleError::InvalidReference {
        field,
        thought_id: raw,
    })
}

fn thought_ids(field: &'static str, raw: &[i64]) -> EngineResult<Vec<ThoughtId>> {
    raw.iter().map(|&id| thought_id(field, id)).collect()
}

/// Count a call that failed before reaching the engine
fn rejected(
    engine: &EnsembleEngine,
    tool: ToolName,
    started: Instant,
    error: EnsembleError,
) -> ToolResponse {
    engine.record_rejected(tool, started.elapsed());
    error.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleConfig;

    fn engine() -> EnsembleEngine {
        EnsembleEngine::new(EnsembleConfig::default())
    }

    #[test]
    fn test_envelope_shapes() {
        let ok = ToolResponse::from_result::<u32>(Ok(7)).to_value();
        assert_eq!(ok, json!({ "status": "success", "result": 7 }));

        let err = ToolResponse::from_result::<u32>(Err(EnsembleError::NoActiveSession)).to_value();
        assert_eq!(err["status"], "error");
        assert_eq!(err["error"], "no_active_session");
        assert!(err.get("details").is_none());
        assert!(err["message"].is_string());
    }

    #[test]
    fn test_into_result_splits_on_status() {
        assert!(ToolResponse::from_result::<u32>(Ok(1)).into_result().is_ok());
        let err = ToolResponse::from(EnsembleError::MetricsDisabled)
            .into_result()
            .unwrap_err();
        assert!(err.contains("metrics_disabled"));
    }

    #[test]
    fn test_dispatch_full_flow() {
        let e = engine();
        let started = dispatch(
            &e,
            "start_collaborative_reasoning",
            json!({ "problem": "Adopt Rust?", "agentLenses": ["analytical", "skeptical"] }),
        )
        .to_value();
        assert_eq!(started["status"], "success");
        let session_id = started["result"]["sessionId"].as_str().unwrap().to_string();
        assert_eq!(started["result"]["lensDescriptions"][1]["lens"], "skeptical");

        let thought = dispatch(
            &e,
            "contribute_perspective",
            json!({ "sessionId": session_id, "agentLens": "analytical", "thought": "Fewer crashes", "weight": 0.9 }),
        )
        .to_value();
        assert_eq!(thought["result"]["id"], 1);
        assert_eq!(thought["result"]["buildsOn"], json!([]));

        let endorsed = dispatch(
            &e,
            "endorse_or_challenge",
            json!({ "sessionId": session_id, "thoughtId": 1, "agentLens": "skeptical", "endorsementLevel": -0.6, "note": "hiring cost" }),
        )
        .to_value();
        assert_eq!(endorsed["result"]["isChallenge"], true);
        assert_eq!(endorsed["result"]["agentLens"], "skeptical");

        let synthesis = dispatch(&e, "synthesize_convergence", json!({ "sessionId": session_id })).to_value();
        assert_eq!(synthesis["result"]["endorsedThoughts"], 1);
        assert_eq!(synthesis["result"]["convergenceScore"], 0.0);

        let map = dispatch(&e, "get_convergence_map", json!({ "sessionId": session_id })).to_value();
        assert!(map["result"]["map"].as_str().unwrap().contains("AGENT CONTRIBUTIONS"));

        let active = dispatch(&e, "get_active_session", Value::Null).to_value();
        assert_eq!(active["result"]["session"]["id"], session_id.as_str());
    }

    #[test]
    fn test_dispatch_unknown_tool() {
        let response = dispatch(&engine(), "summon_oracle", json!({}));
        assert_eq!(response.error_code(), Some("unknown_tool"));
    }

    #[test]
    fn test_dispatch_bad_arguments_are_counted() {
        let e = engine();
        let response = dispatch(&e, "contribute_perspective", json!({ "sessionId": 5 }));
        assert_eq!(response.error_code(), Some("invalid_argument"));

        let stats = &e.metrics_collector().snapshot().tools["contribute_perspective"];
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_negative_ids_are_invalid_references() {
        let e = engine();
        let s = e.start_session("p", &["analytical", "skeptical"]).unwrap();
        e.contribute(&s.session_id, "analytical", "t", &[], None).unwrap();

        let endorsed = dispatch(
            &e,
            "endorse_or_challenge",
            json!({ "sessionId": s.session_id, "thoughtId": -1, "agentLens": "skeptical", "endorsementLevel": 0.5 }),
        )
        .to_value();
        assert_eq!(endorsed["error"], "invalid_reference");
        assert_eq!(endorsed["details"], json!({ "field": "thoughtId", "thoughtId": -1 }));

        let built = dispatch(
            &e,
            "contribute_perspective",
            json!({ "sessionId": s.session_id, "agentLens": "skeptical", "thought": "t", "buildsOn": [1, -3] }),
        );
        assert_eq!(built.error_code(), Some("invalid_reference"));
        assert_eq!(built.to_value()["details"]["field"], "buildsOn");

        let merged = dispatch(
            &e,
            "propose_integration",
            json!({ "sessionId": s.session_id, "agentLens": "skeptical", "integration": "m", "reconciles": [-2] }),
        );
        assert_eq!(merged.error_code(), Some("invalid_reference"));

        let snap = e.metrics_collector().snapshot();
        assert_eq!(snap.tools["endorse_or_challenge"].failures, 1);
        assert_eq!(snap.tools["contribute_perspective"].failures, 1);
        assert_eq!(snap.tools["propose_integration"].failures, 1);
        assert_eq!(e.active_session(None).unwrap().thoughts.len(), 1);

        // Zero passes the conversion and fails the lookup
        let zero = dispatch(
            &e,
            "endorse_or_challenge",
            json!({ "sessionId": s.session_id, "thoughtId": 0, "agentLens": "skeptical", "endorsementLevel": 0.5 }),
        );
        assert_eq!(zero.error_code(), Some("invalid_reference"));
    }

    #[test]
    fn test_rate_limited_envelope() {
        let e = engine();
        let s = e.start_session("p", &["analytical"]).unwrap();
        for i in 0..5 {
            let response = dispatch(
                &e,
                "contribute_perspective",
                json!({ "sessionId": s.session_id, "agentLens": "analytical", "thought": format!("t{}", i) }),
            );
            assert!(response.is_success());
        }
        let limited = dispatch(
            &e,
            "contribute_perspective",
            json!({ "sessionId": s.session_id, "agentLens": "analytical", "thought": "t5" }),
        )
        .to_value();
        assert_eq!(limited["error"], "rate_limited");
        assert_eq!(limited["details"]["agentLens"], "analytical");
        assert!(limited["details"]["retryAfterSeconds"].as_u64().unwrap() >= 1);

        let reset = dispatch(&e, "reset_agent_rate", json!({ "agentLens": "analytical" })).to_value();
        assert_eq!(reset["result"]["cleared"], 5);
        assert!(dispatch(
            &e,
            "contribute_perspective",
            json!({ "sessionId": s.session_id, "agentLens": "analytical", "thought": "t6" }),
        )
        .is_success());
    }
}
