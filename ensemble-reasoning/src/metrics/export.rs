//! Background metrics export
//!
//! Two optional tasks, both best-effort: a periodic JSON snapshot written
//! with write-temp-then-rename, and an axum endpoint serving `GET /metrics`
//! in Prometheus text format. Failures are logged and never reach a tool
//! call.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::collector::{MetricsCollector, MetricsSnapshot};
use crate::config::MetricsConfig;

/// Content type for text exposition format 0.0.4
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Write `snapshot` as JSON to `path` atomically
///
/// Readers see either the previous file or the new one, never a partial
/// write.
pub fn write_snapshot_atomic(path: &Path, snapshot: &MetricsSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let content = serde_json::to_vec_pretty(snapshot)?;
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)
}

/// Router exposing `GET /metrics`
pub fn metrics_router(collector: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(collector)
}

async fn serve_metrics(State(collector): State<Arc<MetricsCollector>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        collector.render_prometheus(),
    )
}

/// Serve the metrics router on `listener` until `cancel` fires
pub async fn serve_metrics_endpoint(
    listener: TcpListener,
    collector: Arc<MetricsCollector>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, metrics_router(collector))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// Write a snapshot every `interval` until `cancel` fires, then once more
pub async fn run_exporter(
    collector: Arc<MetricsCollector>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => export_once(&collector, &path).await,
        }
    }
    export_once(&collector, &path).await;
}

/// File I/O runs on the blocking pool so the runtime worker stays free
async fn export_once(collector: &MetricsCollector, path: &Path) {
    let snapshot = collector.snapshot();
    let target = path.to_path_buf();
    let written =
        tokio::task::spawn_blocking(move || write_snapshot_atomic(&target, &snapshot)).await;
    match written {
        Ok(Ok(())) => debug!(path = %path.display(), "Exported metrics snapshot"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Metrics export failed"),
        Err(e) => warn!(path = %path.display(), error = %e, "Metrics export task failed"),
    }
}

/// Handle owning the background metrics tasks
#[derive(Debug)]
pub struct MetricsBackground {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    endpoint: Option<SocketAddr>,
}

impl MetricsBackground {
    /// A handle with nothing running
    pub fn idle() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            endpoint: None,
        }
    }

    /// Start whatever `config` enables. Nothing starts when metrics are off.
    pub async fn start(collector: Arc<MetricsCollector>, config: &MetricsConfig) -> Self {
        let mut background = Self::idle();
        if !config.enabled || !collector.is_enabled() {
            return background;
        }

        if config.prometheus_enabled {
            let addr = format!("{}:{}", config.prometheus_addr, config.prometheus_port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    background.endpoint = listener.local_addr().ok();
                    info!(addr = %addr, "Serving Prometheus metrics on /metrics");
                    let cancel = background.cancel.clone();
                    let collector = Arc::clone(&collector);
                    background.tasks.push(tokio::spawn(async move {
                        if let Err(e) = serve_metrics_endpoint(listener, collector, cancel).await {
                            warn!(error = %e, "Metrics endpoint stopped");
                        }
                    }));
                }
                Err(e) => warn!(addr = %addr, error = %e, "Could not bind metrics endpoint"),
            }
        }

        if config.export_enabled {
            let interval = Duration::from_secs(config.export_interval_seconds.max(1));
            info!(
                path = %config.export_path.display(),
                interval_secs = interval.as_secs(),
                "Exporting metrics snapshots"
            );
            background.tasks.push(tokio::spawn(run_exporter(
                Arc::clone(&collector),
                config.export_path.clone(),
                interval,
                background.cancel.clone(),
            )));
        }

        background
    }

    /// Address the endpoint is bound to, if it is running
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Cancel every task and wait for it to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Metrics task did not shut down cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleConfig;

    #[test]
    fn test_atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.json");
        let collector = MetricsCollector::new(&EnsembleConfig::default());

        collector.record("get_metrics", 1.0, true);
        write_snapshot_atomic(&path, &collector.snapshot()).unwrap();
        collector.record("get_metrics", 1.0, true);
        write_snapshot_atomic(&path, &collector.snapshot()).unwrap();

        let written: MetricsSnapshot =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.tools["get_metrics"].calls, 2);
        assert!(!dir.path().join("nested").join("metrics.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_disabled_metrics_start_nothing() {
        let mut config = EnsembleConfig::default();
        config.metrics.enabled = false;
        config.metrics.export_enabled = true;
        let collector = Arc::new(MetricsCollector::new(&config));

        let background = MetricsBackground::start(collector, &config.metrics).await;
        assert!(!background.is_running());
        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_exporter_writes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EnsembleConfig::default();
        config.metrics.export_enabled = true;
        config.metrics.export_interval_seconds = 3600;
        config.metrics.export_path = dir.path().join("metrics.json");
        let collector = Arc::new(MetricsCollector::new(&config));

        let background = MetricsBackground::start(Arc::clone(&collector), &config.metrics).await;
        assert!(background.is_running());
        collector.record("synthesize_convergence", 3.0, true);
        background.shutdown().await;

        let written: MetricsSnapshot =
            serde_json::from_slice(&std::fs::read(&config.metrics.export_path).unwrap()).unwrap();
        assert_eq!(written.tools["synthesize_convergence"].calls, 1);
    }
}
