//! Ensemble Reasoning MCP Server
//!
//! Exposes the collaborative reasoning engine as MCP tools over stdio.
//!
//! # Usage
//!
//! ```bash
//! # Defaults
//! ensemble-reasoning-mcp
//!
//! # YAML config plus overrides
//! ensemble-reasoning-mcp --config ensemble.yaml --prometheus --prometheus-port 9464
//!
//! # Environment overrides
//! MCP_RATE_LIMIT_OPS=20 MCP_METRICS_EXPORT=true ensemble-reasoning-mcp
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ensemble_reasoning::session::AgentLens;
use ensemble_reasoning::tools::{
    self, ActiveSessionRequest, ContributeRequest, ConvergenceMapRequest, EndorseRequest,
    ProposeIntegrationRequest, ResetAgentRateRequest, StartReasoningRequest, SynthesizeRequest,
};
use ensemble_reasoning::{telemetry, EnsembleConfig, EnsembleEngine, MetricsBackground, SharedEnsembleEngine};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use tokio::io::{stdin, stdout};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file (overrides ENSEMBLE_CONFIG)
    #[arg(long, env = "ENSEMBLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "info" or "ensemble_reasoning=trace" (overrides ENSEMBLE_LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Directory for JSON log files (overrides ENSEMBLE_LOG_DIR)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Disable metrics collection entirely
    #[arg(long, default_value_t = false)]
    no_metrics: bool,

    /// Serve Prometheus metrics on /metrics
    #[arg(long, default_value_t = false)]
    prometheus: bool,

    /// Port for the metrics endpoint (overrides MCP_PROMETHEUS_PORT)
    #[arg(long)]
    prometheus_port: Option<u16>,

    /// Write periodic JSON metrics snapshots to this path
    #[arg(long)]
    metrics_export_path: Option<PathBuf>,

    /// Operations per lens per window (overrides MCP_RATE_LIMIT_OPS)
    #[arg(long)]
    rate_limit_ops: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut EnsembleConfig) {
        if self.no_metrics {
            config.metrics.enabled = false;
        }
        if self.prometheus {
            config.metrics.prometheus_enabled = true;
        }
        if let Some(port) = self.prometheus_port {
            config.metrics.prometheus_port = port;
        }
        if let Some(path) = &self.metrics_export_path {
            config.metrics.export_enabled = true;
            config.metrics.export_path = path.clone();
        }
        if let Some(ops) = self.rate_limit_ops {
            config.rate_limit.ops_per_window = ops;
        }
    }
}

/// MCP server wrapping a shared engine
#[derive(Clone)]
struct EnsembleServer {
    engine: SharedEnsembleEngine,
    tool_router: ToolRouter<Self>,
}

impl EnsembleServer {
    fn new(engine: SharedEnsembleEngine) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl EnsembleServer {
    #[tool(
        description = "Start a collaborative reasoning session. Archives any active session. Returns the session id and a focus / bias-check description for each lens."
    )]
    async fn start_collaborative_reasoning(
        &self,
        Parameters(req): Parameters<StartReasoningRequest>,
    ) -> Result<String, String> {
        tools::start_collaborative_reasoning(&self.engine, req).into_result()
    }

    #[tool(
        description = "Contribute a thought from one agent lens, optionally building on earlier thought ids. Rate limited per lens."
    )]
    async fn contribute_perspective(
        &self,
        Parameters(req): Parameters<ContributeRequest>,
    ) -> Result<String, String> {
        tools::contribute_perspective(&self.engine, req).into_result()
    }

    #[tool(
        description = "Endorse (positive level) or challenge (negative level) another lens's thought. Rate limited per lens."
    )]
    async fn endorse_or_challenge(
        &self,
        Parameters(req): Parameters<EndorseRequest>,
    ) -> Result<String, String> {
        tools::endorse_or_challenge(&self.engine, req).into_result()
    }

    #[tool(
        description = "Analyse the session: consensus thoughts, tensions, circular reasoning and a convergence score in [0, 1].",
        annotations(read_only_hint = true)
    )]
    async fn synthesize_convergence(
        &self,
        Parameters(req): Parameters<SynthesizeRequest>,
    ) -> Result<String, String> {
        tools::synthesize_convergence(&self.engine, req).into_result()
    }

    #[tool(
        description = "Propose an integration statement that reconciles existing thoughts. Rate limited per lens."
    )]
    async fn propose_integration(
        &self,
        Parameters(req): Parameters<ProposeIntegrationRequest>,
    ) -> Result<String, String> {
        tools::propose_integration(&self.engine, req).into_result()
    }

    #[tool(
        description = "Printable ASCII map of consensus, tensions, cycles and per-lens contributions.",
        annotations(read_only_hint = true)
    )]
    async fn get_convergence_map(
        &self,
        Parameters(req): Parameters<ConvergenceMapRequest>,
    ) -> Result<String, String> {
        tools::get_convergence_map(&self.engine, req).into_result()
    }

    #[tool(
        description = "Full snapshot of the active session: thoughts, endorsements and integrations.",
        annotations(read_only_hint = true)
    )]
    async fn get_active_session(
        &self,
        Parameters(req): Parameters<ActiveSessionRequest>,
    ) -> Result<String, String> {
        tools::get_active_session(&self.engine, req).into_result()
    }

    #[tool(
        description = "Archived sessions, oldest first.",
        annotations(read_only_hint = true)
    )]
    async fn get_session_history(&self) -> Result<String, String> {
        tools::get_session_history(&self.engine).into_result()
    }

    #[tool(
        description = "Per-tool call counts, latency statistics and counters.",
        annotations(read_only_hint = true)
    )]
    async fn get_metrics(&self) -> Result<String, String> {
        tools::get_metrics(&self.engine).into_result()
    }

    #[tool(
        description = "Sliding-window rate status for every agent lens.",
        annotations(read_only_hint = true)
    )]
    async fn get_rate_status(&self) -> Result<String, String> {
        tools::get_rate_status(&self.engine).into_result()
    }

    #[tool(
        description = "Administrative: clear one lens's rate window. Not itself rate limited."
    )]
    async fn reset_agent_rate(
        &self,
        Parameters(req): Parameters<ResetAgentRateRequest>,
    ) -> Result<String, String> {
        tools::reset_agent_rate(&self.engine, req).into_result()
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for EnsembleServer {
    fn get_info(&self) -> ServerInfo {
        let lenses = AgentLens::all()
            .iter()
            .map(|lens| format!("- {}: {}", lens, lens.focus()))
            .collect::<Vec<_>>()
            .join("\n");

        let config = self.engine.config();
        let instructions = format!(
            "Ensemble Reasoning: several agent lenses reason together about one problem.\n\n\
             ### Workflow\n\
             1. `start_collaborative_reasoning` with a problem and the participating lenses\n\
             2. `contribute_perspective` from each lens, using `buildsOn` to reference earlier thoughts\n\
             3. `endorse_or_challenge` other lenses' thoughts (level in [-1, 1], notes on challenges)\n\
             4. `propose_integration` to reconcile competing thoughts\n\
             5. `synthesize_convergence` / `get_convergence_map` to check progress\n\n\
             ### Lenses\n{}\n\n\
             ### Limits\n\
             - {} thoughts per session, {} per lens, {} endorsements per thought\n\
             - {} mutating calls per lens every {}s (`get_rate_status`, `reset_agent_rate`)\n\n\
             Every response is JSON with `status` = `success` (and `result`) or `error` (with `error`, `message`, `details`).",
            lenses,
            config.max_thoughts_per_session,
            config.max_thoughts_per_agent_per_session,
            config.max_endorsements_per_thought,
            config.rate_limit.ops_per_window,
            config.rate_limit.window_seconds,
        );

        ServerInfo {
            instructions: Some(instructions),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EnsembleConfig::load(args.config.as_deref())
        .with_context(|| "Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| telemetry::resolve_log_dir(|key| std::env::var(key).ok()));
    let log_guard = telemetry::init_logging(args.log_level.as_deref(), log_dir);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_guard.log_file(),
        metrics = config.metrics.enabled,
        rate_limit_ops = config.rate_limit.ops_per_window,
        rate_limit_window_s = config.rate_limit.window_seconds,
        "Starting Ensemble Reasoning MCP server"
    );

    let engine = EnsembleEngine::new(config.clone()).shared();
    let background =
        MetricsBackground::start(engine.metrics_collector().clone(), &config.metrics).await;

    let server = EnsembleServer::new(engine);
    let service = server
        .serve((stdin(), stdout()))
        .await
        .context("Failed to initialize MCP server")?;

    info!("MCP server ready, listening on stdio");
    let result = service.waiting().await;

    background.shutdown().await;
    info!("Ensemble Reasoning MCP server stopped");
    result.context("Server error during execution")?;
    Ok(())
}
