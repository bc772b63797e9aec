//! `kci-ingester` — the LAVA-style callback receiver and admin HTTP
//! surface. Run alongside the scheduler and reconcilers.

use std::sync::Arc;

use clap::Parser;
use kci_api_client::{ApiClient, ReqwestApiClient};
use kci_core::config::Config;
use kci_ingester::auth::{JwtAuth, LabTokens};
use kci_ingester::sanitize::LogSanitizer;
use kci_ingester::server::{create_router, AppState};
use kci_ingester::metrics::Metrics;
use kci_ingester::upload::LocalFsStorage;
use kci_telemetry::TelemetryEmitter;
use tokio::sync::Semaphore;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_WORKER_POOL: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "kci-ingester")]
struct Cli {
    #[arg(long, env = "KCI_API_URL")]
    api_url: String,

    #[arg(long, env = "KCI_API_TOKEN")]
    api_token: String,

    #[arg(long, env = "KCI_CONFIG")]
    config: String,

    #[arg(long, env = "KCI_LAB_TOKENS")]
    lab_tokens: String,

    #[arg(long, env = "KCI_JWT_SECRET")]
    jwt_secret: String,

    #[arg(long, env = "KCI_STORAGE_DIR", default_value = "/tmp/kci-storage")]
    storage_dir: String,

    #[arg(long, env = "KCI_STORAGE_BASE_URL", default_value = "http://localhost:8000/storage")]
    storage_base_url: String,

    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: String,

    #[arg(long, default_value_t = DEFAULT_WORKER_POOL)]
    worker_pool: usize,

    #[arg(long, env = "KCI_LOG_MAX_SIZE")]
    log_max_size: Option<usize>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_file(&cli.config)?);
    let lab_tokens = Arc::new(LabTokens::from_file(&cli.lab_tokens)?);
    let api: Arc<dyn ApiClient> = Arc::new(ReqwestApiClient::new(cli.api_url.clone(), cli.api_token.clone()));
    let telemetry = TelemetryEmitter::new(api.clone());
    let storage = Arc::new(LocalFsStorage::new(cli.storage_dir.clone(), cli.storage_base_url.clone()));

    let state = Arc::new(AppState {
        api,
        config,
        storage,
        telemetry,
        metrics: Arc::new(Metrics::default()),
        lab_tokens,
        jwt: Arc::new(JwtAuth::new(cli.jwt_secret.clone())),
        sanitizer: LogSanitizer::new(cli.log_max_size),
        worker_permits: Arc::new(Semaphore::new(cli.worker_pool)),
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(addr = %cli.bind, "ingester listening");
    axum::serve(listener, app).await?;
    Ok(())
}
