use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use storeforge_core::{Orchestrator, OrchestratorConfig};
use storeforge_runtime::{
    check_cluster_prereqs, check_helm_prereqs, format_missing, ClusterBackend, HelmInstaller,
    KubeCluster, MockCluster, MockInstaller, PackageInstaller,
};
use storeforge_server::AppState;
use storeforge_store::{FileRecordStore, RecordLayout, RecordStore};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "storeforge-server",
    version,
    about = "Provision isolated ecommerce stores on Kubernetes"
)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory holding store records.
    #[arg(long, default_value = "./storeforge-data")]
    data_dir: PathBuf,

    /// TOML configuration file. Environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against in-process mock cluster and installer.
    #[arg(long, default_value_t = false)]
    mock_backends: bool,

    /// Request worker threads.
    #[arg(long, default_value_t = 8)]
    workers: usize,
}

type Backends = (Arc<dyn ClusterBackend>, Arc<dyn PackageInstaller>);

fn real_backends(
    runtime: &tokio::runtime::Runtime,
    config: &OrchestratorConfig,
) -> Result<Backends, Box<dyn std::error::Error>> {
    let mut missing = check_helm_prereqs(&config.helm.binary);
    missing.extend(check_cluster_prereqs());
    if !missing.is_empty() {
        return Err(format_missing(&missing).into());
    }
    let cluster = runtime.block_on(KubeCluster::try_default())?;
    Ok((
        Arc::new(cluster),
        Arc::new(HelmInstaller::new(config.helm.clone())),
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STOREFORGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(cli.config.as_deref())?;
    info!(
        environment = %config.environment,
        chart = %config.helm.chart_path.display(),
        "configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let (cluster, installer): Backends = if cli.mock_backends {
        warn!("using mock backends; no cluster resources will be created");
        (Arc::new(MockCluster::new()), Arc::new(MockInstaller::new()))
    } else {
        real_backends(&runtime, &config)?
    };

    info!("record store: {}", cli.data_dir.display());
    let records: Arc<dyn RecordStore> =
        Arc::new(FileRecordStore::open(RecordLayout::new(&cli.data_dir))?);

    let reconcile = config.reconcile_on_start;
    let orchestrator = Orchestrator::new(config, records, cluster, installer)?;
    if reconcile {
        orchestrator.reconcile_stale()?;
    }

    let state = Arc::new(AppState::new(orchestrator, runtime.handle().clone()));
    let addr = format!("{}:{}", cli.host, cli.port);
    info!("starting storeforge-server on {addr}");
    storeforge_server::run_server(&state, &addr, cli.workers)?;
    Ok(())
}
