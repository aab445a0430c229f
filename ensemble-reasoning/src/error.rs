//! Engine error taxonomy
//!
//! Every rejected tool call maps to exactly one [`EnsembleError`] variant.
//! The variant's [`code`](EnsembleError::code) is the machine-readable `error`
//! field of the tool envelope, [`Display`](std::fmt::Display) is the message,
//! and [`details`](EnsembleError::details) carries the triggering input.
//!
//! A rejected call never mutates session state.

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EnsembleError>;

/// Errors surfaced to tool callers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnsembleError {
    /// No session has been started yet
    #[error("No active session. Call start_collaborative_reasoning first.")]
    NoActiveSession,

    /// The caller named a session other than the active one
    #[error("Session {requested} is not the active session")]
    SessionMismatch { requested: String, active: String },

    /// Lens name outside the fixed vocabulary
    #[error("Unknown agent lens: {lens}")]
    UnknownAgentLens { lens: String },

    /// Lens is valid but was not enrolled when the session started
    #[error("Agent lens '{lens}' is not part of this session")]
    AgentNotInSession { lens: String },

    /// Numeric input outside its documented range
    #[error("{field} must be within [{min}, {max}], got {value}")]
    InvalidRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Reference to a thought that does not exist (or does not exist yet)
    #[error("{field} references unknown thought {thought_id}")]
    InvalidReference {
        field: &'static str,
        thought_id: i64,
    },

    /// One of the session, thought, agent or text caps was reached
    #[error("Limit {limit} ({max}) exceeded")]
    LimitExceeded { limit: &'static str, max: usize },

    /// The lens exhausted its sliding-window operation budget
    #[error("Agent lens '{lens}' is rate limited; retry after {retry_after_secs}s")]
    RateLimited {
        lens: String,
        retry_after_secs: u64,
        limit: usize,
        window_secs: u64,
    },

    /// A lens tried to endorse or challenge its own thought
    #[error("Agent lens '{lens}' cannot endorse its own thought {thought_id}")]
    SelfEndorsement { lens: String, thought_id: u64 },

    /// Structurally invalid input (empty lens list, blank text, bad JSON)
    #[error("Invalid argument {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    /// Metrics were disabled by configuration
    #[error("Metrics collection is disabled")]
    MetricsDisabled,
}

impl EnsembleError {
    /// Create an invalid argument error
    pub fn invalid_argument(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Create an invalid range error
    pub fn invalid_range(field: &'static str, value: f64, min: f64, max: f64) -> Self {
        Self::InvalidRange {
            field,
            value,
            min,
            max,
        }
    }

    /// Machine-readable error code used in the tool envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "no_active_session",
            Self::SessionMismatch { .. } => "session_mismatch",
            Self::UnknownAgentLens { .. } => "unknown_agent_lens",
            Self::AgentNotInSession { .. } => "agent_not_in_session",
            Self::InvalidRange { .. } => "invalid_range",
            Self::InvalidReference { .. } => "invalid_reference",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::SelfEndorsement { .. } => "self_endorsement_not_allowed",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::MetricsDisabled => "metrics_disabled",
        }
    }

    /// Structured detail object, `None` when the code says everything
    pub fn details(&self) -> Option<Value> {
        let details = match self {
            Self::NoActiveSession | Self::MetricsDisabled => return None,
            Self::SessionMismatch { requested, active } => json!({
                "requestedSessionId": requested,
                "activeSessionId": active,
            }),
            Self::UnknownAgentLens { lens } => json!({
                "agentLens": lens,
                "validLenses": crate::session::AgentLens::names(),
            }),
            Self::AgentNotInSession { lens } => json!({ "agentLens": lens }),
            Self::InvalidRange {
                field,
                value,
                min,
                max,
            } => {
                let mut map = Map::new();
                map.insert("field".into(), json!(field));
                // NaN and infinities are not representable in JSON
                if value.is_finite() {
                    map.insert("value".into(), json!(value));
                }
                map.insert("min".into(), json!(min));
                map.insert("max".into(), json!(max));
                Value::Object(map)
            }
            Self::InvalidReference { field, thought_id } => json!({
                "field": field,
                "thoughtId": thought_id,
            }),
            Self::LimitExceeded { limit, max } => json!({
                "limit": limit,
                "max": max,
            }),
            Self::RateLimited {
                lens,
                retry_after_secs,
                limit,
                window_secs,
            } => json!({
                "agentLens": lens,
                "retryAfterSeconds": retry_after_secs,
                "limit": limit,
                "windowSeconds": window_secs,
            }),
            Self::SelfEndorsement { lens, thought_id } => json!({
                "agentLens": lens,
                "thoughtId": thought_id,
            }),
            Self::InvalidArgument { field, .. } => json!({ "field": field }),
        };
        Some(details)
    }

    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EnsembleError::NoActiveSession.code(), "no_active_session");
        assert_eq!(
            EnsembleError::LimitExceeded {
                limit: "max_thoughts_per_session",
                max: 1000
            }
            .code(),
            "limit_exceeded"
        );
        assert_eq!(
            EnsembleError::SelfEndorsement {
                lens: "creative".into(),
                thought_id: 1
            }
            .code(),
            "self_endorsement_not_allowed"
        );
    }

    #[test]
    fn test_rate_limited_details() {
        let err = EnsembleError::RateLimited {
            lens: "skeptical".into(),
            retry_after_secs: 42,
            limit: 5,
            window_secs: 60,
        };
        let details = err.details().unwrap();
        assert_eq!(details["agentLens"], "skeptical");
        assert_eq!(details["retryAfterSeconds"], 42);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_range_omits_nan_value() {
        let err = EnsembleError::invalid_range("weight", f64::NAN, 0.0, 1.0);
        let details = err.details().unwrap();
        assert!(details.get("value").is_none());
        assert_eq!(details["field"], "weight");
    }

    #[test]
    fn test_no_details_for_bare_codes() {
        assert!(EnsembleError::NoActiveSession.details().is_none());
        assert!(EnsembleError::MetricsDisabled.details().is_none());
    }
}
