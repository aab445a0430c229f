//! Per-tool call counters and running latency statistics

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EnsembleConfig;

/// Mutating calls that passed the rate limiter
pub const AGENT_OPS_TOTAL: &str = "agent_ops_total";
/// Mutating calls rejected by the rate limiter
pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";
pub const SESSIONS_STARTED_TOTAL: &str = "sessions_started_total";
pub const SESSIONS_ARCHIVED_TOTAL: &str = "sessions_archived_total";

const COUNTERS: [&str; 4] = [
    AGENT_OPS_TOTAL,
    RATE_LIMITED_TOTAL,
    SESSIONS_STARTED_TOTAL,
    SESSIONS_ARCHIVED_TOTAL,
];

/// Running latency aggregate in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub count: u64,
    pub sum_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

impl LatencyStats {
    fn observe(&mut self, duration_ms: f64) {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };
        if self.count == 0 {
            self.min_ms = duration_ms;
            self.max_ms = duration_ms;
        } else {
            self.min_ms = self.min_ms.min(duration_ms);
            self.max_ms = self.max_ms.max(duration_ms);
        }
        self.count += 1;
        self.sum_ms += duration_ms;
        self.avg_ms = self.sum_ms / self.count as f64;
    }
}

/// Counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub latency: LatencyStats,
}

/// Configuration values needed to interpret the counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfigView {
    pub max_thoughts_per_session: usize,
    pub max_endorsements_per_thought: usize,
    pub max_thoughts_per_agent_per_session: usize,
    pub positive_endorsement_threshold: f64,
    pub negative_endorsement_threshold: f64,
    pub rate_limit_ops: usize,
    pub rate_limit_window_seconds: u64,
    pub export_enabled: bool,
    pub export_interval_seconds: u64,
    pub prometheus_enabled: bool,
}

impl From<&EnsembleConfig> for MetricsConfigView {
    fn from(config: &EnsembleConfig) -> Self {
        Self {
            max_thoughts_per_session: config.max_thoughts_per_session,
            max_endorsements_per_thought: config.max_endorsements_per_thought,
            max_thoughts_per_agent_per_session: config.max_thoughts_per_agent_per_session,
            positive_endorsement_threshold: config.positive_endorsement_threshold,
            negative_endorsement_threshold: config.negative_endorsement_threshold,
            rate_limit_ops: config.rate_limit.ops_per_window,
            rate_limit_window_seconds: config.rate_limit.window_seconds,
            export_enabled: config.metrics.export_enabled,
            export_interval_seconds: config.metrics.export_interval_seconds,
            prometheus_enabled: config.metrics.prometheus_enabled,
        }
    }
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub tools: BTreeMap<String, ToolStats>,
    pub counters: BTreeMap<String, u64>,
    pub config: MetricsConfigView,
}

impl MetricsSnapshot {
    /// Calls across all tools.
    pub fn total_calls(&self) -> u64 {
        self.tools.values().map(|t| t.calls).sum()
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    tools: BTreeMap<String, ToolStats>,
    counters: BTreeMap<String, u64>,
}

/// Thread-safe metrics sink.
///
/// When disabled, [`record`](Self::record) and
/// [`increment`](Self::increment) do nothing.
#[derive(Debug)]
pub struct MetricsCollector {
    enabled: bool,
    started_at: DateTime<Utc>,
    started: Instant,
    config: MetricsConfigView,
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new(config: &EnsembleConfig) -> Self {
        let counters = COUNTERS.iter().map(|name| (name.to_string(), 0)).collect();
        Self {
            enabled: config.metrics.enabled,
            started_at: Utc::now(),
            started: Instant::now(),
            config: MetricsConfigView::from(config),
            state: Mutex::new(MetricsState {
                tools: BTreeMap::new(),
                counters,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one invocation of `tool` and fold its latency in.
    pub fn record(&self, tool: &str, duration_ms: f64, succeeded: bool) {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        let stats = state.tools.entry(tool.to_string()).or_default();
        stats.calls += 1;
        if succeeded {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.latency.observe(duration_ms);
    }

    /// Bump a named counter by one.
    pub fn increment(&self, counter: &str) {
        if !self.enabled {
            return;
        }
        *self.lock().counters.entry(counter.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        MetricsSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            tools: state.tools.clone(),
            counters: state.counters.clone(),
            config: self.config.clone(),
        }
    }

    /// Prometheus text exposition format 0.0.4.
    pub fn render_prometheus(&self) -> String {
        render_prometheus(&self.snapshot())
    }
}

/// Render `snapshot` in Prometheus text exposition format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_prometheus(&mut out, snapshot);
    out
}

fn write_prometheus(out: &mut String, snapshot: &MetricsSnapshot) -> std::fmt::Result {
    writeln!(out, "# HELP ensemble_tool_calls_total Tool invocations by outcome.")?;
    writeln!(out, "# TYPE ensemble_tool_calls_total counter")?;
    for (tool, stats) in &snapshot.tools {
        writeln!(
            out,
            "ensemble_tool_calls_total{{tool=\"{}\",outcome=\"success\"}} {}",
            tool, stats.successes
        )?;
        writeln!(
            out,
            "ensemble_tool_calls_total{{tool=\"{}\",outcome=\"error\"}} {}",
            tool, stats.failures
        )?;
    }

    writeln!(out, "# HELP ensemble_tool_latency_ms Tool latency in milliseconds.")?;
    writeln!(out, "# TYPE ensemble_tool_latency_ms summary")?;
    for (tool, stats) in &snapshot.tools {
        writeln!(
            out,
            "ensemble_tool_latency_ms_sum{{tool=\"{}\"}} {}",
            tool, stats.latency.sum_ms
        )?;
        writeln!(
            out,
            "ensemble_tool_latency_ms_count{{tool=\"{}\"}} {}",
            tool, stats.latency.count
        )?;
    }

    writeln!(out, "# HELP ensemble_tool_latency_max_ms Slowest call per tool.")?;
    writeln!(out, "# TYPE ensemble_tool_latency_max_ms gauge")?;
    for (tool, stats) in &snapshot.tools {
        writeln!(
            out,
            "ensemble_tool_latency_max_ms{{tool=\"{}\"}} {}",
            tool, stats.latency.max_ms
        )?;
    }

    for (name, value) in &snapshot.counters {
        writeln!(out, "# TYPE ensemble_{} counter", name)?;
        writeln!(out, "ensemble_{} {}", name, value)?;
    }

    writeln!(out, "# HELP ensemble_uptime_seconds Seconds since process start.")?;
    writeln!(out, "# TYPE ensemble_uptime_seconds gauge")?;
    writeln!(out, "ensemble_uptime_seconds {:.3}", snapshot.uptime_seconds)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(&EnsembleConfig::default())
    }

    #[test]
    fn test_record_counts_and_latency() {
        let m = collector();
        m.record("contribute_perspective", 2.0, true);
        m.record("contribute_perspective", 6.0, false);
        m.record("contribute_perspective", 4.0, true);

        let snap = m.snapshot();
        let stats = &snap.tools["contribute_perspective"];
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.latency.min_ms, 2.0);
        assert_eq!(stats.latency.max_ms, 6.0);
        assert_eq!(stats.latency.avg_ms, 4.0);
        assert_eq!(snap.total_calls(), 3);
    }

    #[test]
    fn test_negative_durations_clamp_to_zero() {
        let m = collector();
        m.record("get_metrics", -5.0, true);
        m.record("get_metrics", f64::NAN, true);
        let stats = &m.snapshot().tools["get_metrics"];
        assert_eq!(stats.latency.min_ms, 0.0);
        assert_eq!(stats.latency.sum_ms, 0.0);
    }

    #[test]
    fn test_counters_start_at_zero() {
        let m = collector();
        m.increment(RATE_LIMITED_TOTAL);
        let snap = m.snapshot();
        assert_eq!(snap.counters[RATE_LIMITED_TOTAL], 1);
        assert_eq!(snap.counters[SESSIONS_STARTED_TOTAL], 0);
    }

    #[test]
    fn test_disabled_collector_is_noop() {
        let mut config = EnsembleConfig::default();
        config.metrics.enabled = false;
        let m = MetricsCollector::new(&config);
        m.record("get_metrics", 1.0, true);
        m.increment(AGENT_OPS_TOTAL);

        let snap = m.snapshot();
        assert!(snap.tools.is_empty());
        assert_eq!(snap.counters[AGENT_OPS_TOTAL], 0);
        assert!(!m.is_enabled());
    }

    #[test]
    fn test_prometheus_rendering() {
        let m = collector();
        m.record("endorse_or_challenge", 1.5, true);
        m.increment(AGENT_OPS_TOTAL);

        let text = m.render_prometheus();
        assert!(text.contains(
            "ensemble_tool_calls_total{tool=\"endorse_or_challenge\",outcome=\"success\"} 1"
        ));
        assert!(text.contains("ensemble_tool_latency_ms_count{tool=\"endorse_or_challenge\"} 1"));
        assert!(text.contains("ensemble_agent_ops_total 1"));
        assert!(text.contains("# TYPE ensemble_uptime_seconds gauge"));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let m = collector();
        m.record("get_rate_status", 1.0, true);
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert!(json.get("startedAt").is_some());
        assert_eq!(json["tools"]["get_rate_status"]["latency"]["maxMs"], 1.0);
        assert_eq!(json["config"]["rateLimitOps"], 5);
    }
}
