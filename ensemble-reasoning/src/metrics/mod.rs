//! Tool metrics: in-process collection plus optional export

pub mod collector;
pub mod export;

pub use collector::{
    render_prometheus, LatencyStats, MetricsCollector, MetricsConfigView, MetricsSnapshot,
    ToolStats, AGENT_OPS_TOTAL, RATE_LIMITED_TOTAL, SESSIONS_ARCHIVED_TOTAL,
    SESSIONS_STARTED_TOTAL,
};
pub use export::{
    metrics_router, write_snapshot_atomic, MetricsBackground, PROMETHEUS_CONTENT_TYPE,
};
