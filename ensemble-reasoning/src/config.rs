//! Engine configuration
//!
//! Resolution order: built-in defaults, then an optional YAML file, then
//! `MCP_*` environment overrides, then CLI flags applied by the binary.
//! The engine receives the resolved value once at construction and never
//! reads the environment afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How endorsement levels are combined into a thought's agreement score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndorsementWeighting {
    /// Weight each endorsement by the endorsing lens's latest thought weight
    #[default]
    LatestContribution,
    /// Plain arithmetic mean
    Unweighted,
}

/// How `reconciles` lists become edges in the cycle-detection graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileEdges {
    /// Consecutive reconciled ids, earlier id pointing at the later one
    #[default]
    Forward,
    /// Consecutive reconciled ids linked in both directions
    Symmetric,
}

/// Sliding-window rate limit applied per agent lens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum operations per lens inside one window
    pub ops_per_window: usize,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ops_per_window: 5,
            window_seconds: 60,
        }
    }
}

/// Metrics collection and optional export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Master switch; when off nothing is recorded or exported
    pub enabled: bool,
    /// Periodically write a JSON snapshot to `export_path`
    pub export_enabled: bool,
    pub export_path: PathBuf,
    pub export_interval_seconds: u64,
    /// Serve `GET /metrics` in Prometheus text format
    pub prometheus_enabled: bool,
    pub prometheus_addr: String,
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_enabled: false,
            export_path: std::env::temp_dir().join("mcp_metrics.json"),
            export_interval_seconds: 30,
            prometheus_enabled: false,
            prometheus_addr: "127.0.0.1".to_string(),
            prometheus_port: 8000,
        }
    }
}

/// Upper bounds on free-text inputs, in characters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLimits {
    pub max_problem_length: usize,
    pub max_thought_length: usize,
    pub max_note_length: usize,
    pub max_integration_length: usize,
    pub max_reconciles_per_integration: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            max_problem_length: 4000,
            max_thought_length: 4000,
            max_note_length: 1000,
            max_integration_length: 4000,
            max_reconciles_per_integration: 20,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub max_thoughts_per_session: usize,
    pub max_endorsements_per_thought: usize,
    pub max_thoughts_per_agent_per_session: usize,
    /// Default `threshold` for `synthesize_convergence`
    pub default_synthesis_threshold: f64,
    /// Endorsement at or above this level counts as support
    pub positive_endorsement_threshold: f64,
    /// Endorsement at or below this level counts as a challenge
    pub negative_endorsement_threshold: f64,
    pub endorsement_weighting: EndorsementWeighting,
    pub reconcile_edges: ReconcileEdges,
    /// Archived sessions kept for `get_session_history`
    pub max_session_history: usize,
    pub text_limits: TextLimits,
    pub rate_limit: RateLimitConfig,
    pub metrics: MetricsConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            max_thoughts_per_session: 1000,
            max_endorsements_per_thought: 100,
            max_thoughts_per_agent_per_session: 50,
            default_synthesis_threshold: 0.6,
            positive_endorsement_threshold: 0.5,
            negative_endorsement_threshold: -0.5,
            endorsement_weighting: EndorsementWeighting::default(),
            reconcile_edges: ReconcileEdges::default(),
            max_session_history: 10,
            text_limits: TextLimits::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EnsembleConfig {
    /// Load defaults, overlay the YAML file if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document; missing keys keep their defaults
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read and parse a YAML config file
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content, path)
    }

    /// Overlay `MCP_*` environment variables onto this config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "MCP_MAX_THOUGHTS_PER_SESSION", &mut self.max_thoughts_per_session);
        override_parsed(
            &lookup,
            "MCP_MAX_ENDORSEMENTS_PER_THOUGHT",
            &mut self.max_endorsements_per_thought,
        );
        override_parsed(
            &lookup,
            "MCP_MAX_THOUGHTS_PER_AGENT",
            &mut self.max_thoughts_per_agent_per_session,
        );
        override_parsed(
            &lookup,
            "MCP_DEFAULT_SYNTHESIS_THRESHOLD",
            &mut self.default_synthesis_threshold,
        );
        override_parsed(
            &lookup,
            "MCP_POS_ENDORSE_THRESHOLD",
            &mut self.positive_endorsement_threshold,
        );
        override_parsed(
            &lookup,
            "MCP_NEG_ENDORSE_THRESHOLD",
            &mut self.negative_endorsement_threshold,
        );
        override_parsed(&lookup, "MCP_MAX_SESSION_HISTORY", &mut self.max_session_history);

        override_parsed(&lookup, "MCP_RATE_LIMIT_OPS", &mut self.rate_limit.ops_per_window);
        override_parsed(&lookup, "MCP_RATE_LIMIT_WINDOW_S", &mut self.rate_limit.window_seconds);

        override_bool(&lookup, "MCP_ENABLE_METRICS", &mut self.metrics.enabled);
        override_bool(&lookup, "MCP_METRICS_EXPORT", &mut self.metrics.export_enabled);
        if let Some(path) = lookup("MCP_METRICS_EXPORT_PATH") {
            self.metrics.export_path = PathBuf::from(path);
        }
        override_parsed(
            &lookup,
            "MCP_METRICS_EXPORT_INTERVAL",
            &mut self.metrics.export_interval_seconds,
        );
        override_bool(&lookup, "MCP_PROMETHEUS", &mut self.metrics.prometheus_enabled);
        if let Some(addr) = lookup("MCP_PROMETHEUS_ADDR") {
            self.metrics.prometheus_addr = addr;
        }
        override_parsed(&lookup, "MCP_PROMETHEUS_PORT", &mut self.metrics.prometheus_port);
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let caps = [
            ("max_thoughts_per_session", self.max_thoughts_per_session),
            ("max_endorsements_per_thought", self.max_endorsements_per_thought),
            (
                "max_thoughts_per_agent_per_session",
                self.max_thoughts_per_agent_per_session,
            ),
            ("rate_limit.ops_per_window", self.rate_limit.ops_per_window),
        ];
        for (name, value) in caps {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_seconds must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.default_synthesis_threshold) {
            return Err(ConfigError::Invalid(format!(
                "default_synthesis_threshold must be within [0, 1], got {}",
                self.default_synthesis_threshold
            )));
        }
        let pos = self.positive_endorsement_threshold;
        let neg = self.negative_endorsement_threshold;
        if !(-1.0..=1.0).contains(&pos) || !(-1.0..=1.0).contains(&neg) {
            return Err(ConfigError::Invalid(
                "endorsement thresholds must be within [-1, 1]".to_string(),
            ));
        }
        if neg >= pos {
            return Err(ConfigError::Invalid(format!(
                "negative_endorsement_threshold ({}) must be below positive_endorsement_threshold ({})",
                neg, pos
            )));
        }
        if self.metrics.export_enabled && self.metrics.export_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "metrics.export_interval_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable config override"),
        }
    }
}

fn override_bool<F>(lookup: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match parse_bool(&raw) {
            Some(value) => *target = value,
            None => warn!(key, value = %raw, "Ignoring unparsable boolean override"),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EnsembleConfig::default();
        assert_eq!(config.max_thoughts_per_session, 1000);
        assert_eq!(config.max_endorsements_per_thought, 100);
        assert_eq!(config.max_thoughts_per_agent_per_session, 50);
        assert_eq!(config.default_synthesis_threshold, 0.6);
        assert_eq!(config.positive_endorsement_threshold, 0.5);
        assert_eq!(config.negative_endorsement_threshold, -0.5);
        assert_eq!(config.rate_limit.ops_per_window, 5);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert!(config.metrics.enabled);
        assert!(!config.metrics.export_enabled);
        assert!(!config.metrics.prometheus_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EnsembleConfig::default();
        config.apply_overrides(lookup_from(&[
            ("MCP_MAX_THOUGHTS_PER_SESSION", "20"),
            ("MCP_RATE_LIMIT_OPS", "2"),
            ("MCP_ENABLE_METRICS", "false"),
            ("MCP_PROMETHEUS", "ON"),
            ("MCP_PROMETHEUS_PORT", "9191"),
            ("MCP_METRICS_EXPORT_PATH", "/var/tmp/metrics.json"),
        ]));

        assert_eq!(config.max_thoughts_per_session, 20);
        assert_eq!(config.rate_limit.ops_per_window, 2);
        assert!(!config.metrics.enabled);
        assert!(config.metrics.prometheus_enabled);
        assert_eq!(config.metrics.prometheus_port, 9191);
        assert_eq!(
            config.metrics.export_path,
            PathBuf::from("/var/tmp/metrics.json")
        );
    }

    #[test]
    fn test_unparsable_override_is_ignored() {
        let mut config = EnsembleConfig::default();
        config.apply_overrides(lookup_from(&[
            ("MCP_MAX_THOUGHTS_PER_AGENT", "lots"),
            ("MCP_METRICS_EXPORT", "maybe"),
        ]));
        assert_eq!(config.max_thoughts_per_agent_per_session, 50);
        assert!(!config.metrics.export_enabled);
    }

    #[test]
    fn test_yaml_partial_document() {
        let yaml = r#"
max_thoughts_per_session: 10
endorsement_weighting: unweighted
reconcile_edges: symmetric
rate_limit:
  window_seconds: 5
metrics:
  prometheus_enabled: true
"#;
        let config = EnsembleConfig::from_yaml_str(yaml, Path::new("test.yaml")).unwrap();
        assert_eq!(config.max_thoughts_per_session, 10);
        assert_eq!(config.endorsement_weighting, EndorsementWeighting::Unweighted);
        assert_eq!(config.reconcile_edges, ReconcileEdges::Symmetric);
        assert_eq!(config.rate_limit.window_seconds, 5);
        assert_eq!(config.rate_limit.ops_per_window, 5);
        assert!(config.metrics.prometheus_enabled);
        assert_eq!(config.max_endorsements_per_thought, 100);
    }

    #[test]
    fn test_yaml_file_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.yaml");
        std::fs::write(&path, "max_session_history: 3\n").unwrap();

        let config = EnsembleConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.max_session_history, 3);

        let missing = EnsembleConfig::from_yaml_file(&dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = EnsembleConfig {
            positive_endorsement_threshold: -0.6,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let config = EnsembleConfig {
            max_thoughts_per_session: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = EnsembleConfig::default();
        config.rate_limit.window_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool_variants() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("False"), Some(false));
        assert_eq!(parse_bool(" yes "), Some(true));
        assert_eq!(parse_bool("2"), None);
    }
}
