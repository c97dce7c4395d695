use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use botkeeper::broadcast::Broadcaster;
use botkeeper::config::{Config, SupervisorKind};
use botkeeper::demo;
use botkeeper::history::ActionLog;
use botkeeper::metrics::MetricsStore;
use botkeeper::reconciler::{StatusReconciler, spawn_reconciler};
use botkeeper::registry::ProcessRegistry;
use botkeeper::server::{AppState, WritePolicy, build_app};
use botkeeper::service::ProcessService;
use botkeeper::store::Store;
use botkeeper::supervisor::{MemorySupervisor, Pm2Supervisor, Supervisor, TimedSupervisor};

#[derive(Parser)]
#[command(name = "botkeeper", version)]
#[command(about = "Management plane for long-running bot processes", long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "botkeeper.yaml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let (supervisor, memory) = connect_supervisor(&config).await?;

    let store = Store::open(&config.store.path, config.metrics.retention())
        .await
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    let registry = ProcessRegistry::new(
        store.clone(),
        supervisor.clone(),
        config.policy.allowed_roots.clone(),
    );
    let metrics = MetricsStore::new(store.clone());
    let history = ActionLog::new(store);
    let broadcaster = Broadcaster::new();

    if let Some(memory) = memory.filter(|_| config.policy.read_only) {
        if let Err(e) = demo::seed(&registry, &history, &metrics, &memory).await {
            warn!(error = %e, "Failed to seed demo processes");
        }
    }

    let service = ProcessService::new(
        registry.clone(),
        history,
        metrics.clone(),
        supervisor.clone(),
        config.supervisor.restart_settings(),
    );

    let cancel = CancellationToken::new();
    let reconciler = Arc::new(StatusReconciler::new(
        registry,
        supervisor,
        metrics,
        broadcaster.clone(),
        config.reconciler.interval(),
    ));
    let reconciler_handle = spawn_reconciler(reconciler, cancel.clone());

    let policy = WritePolicy::new(config.policy.read_only);
    if policy.is_read_only() {
        warn!("Read-only mode: modifying requests will be rejected");
    }

    let state = AppState {
        service,
        broadcaster,
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
    };
    let app = build_app(state, policy, config.server.request_timeout_seconds);

    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "botkeeper listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    cancel.cancel();
    if let Err(e) = reconciler_handle.await {
        warn!(error = %e, "Reconciler task ended abnormally");
    }
    Ok(())
}

/// Build the configured supervisor behind a per-call timeout. The in-memory
/// backend is also returned bare so demo data can be seeded into it.
async fn connect_supervisor(
    config: &Config,
) -> anyhow::Result<(Arc<dyn Supervisor>, Option<Arc<MemorySupervisor>>)> {
    let (inner, memory): (Arc<dyn Supervisor>, _) = match config.supervisor.kind {
        SupervisorKind::Pm2 => {
            let pm2 = Pm2Supervisor::new(config.supervisor.pm2_bin.clone());
            pm2.connect().await.context("connecting to pm2")?;
            (Arc::new(pm2), None)
        }
        SupervisorKind::Memory => {
            info!("Using in-memory supervisor; no real processes will be launched");
            let memory = Arc::new(MemorySupervisor::new());
            (memory.clone(), Some(memory))
        }
    };
    let timed = Arc::new(TimedSupervisor::new(inner, config.supervisor.call_timeout()));
    Ok((timed, memory))
}
