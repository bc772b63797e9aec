//! `kci-scheduler` — subscribes to the `node` and `retry` channels,
//! dispatches matching jobs to configured runtimes, and runs a watchdog
//! plus health endpoint alongside.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kci_api_client::{ApiClient, ReqwestApiClient};
use kci_core::config::Config;
use kci_core::event::{Channel, EventData};
use kci_runtime::shell::ShellRuntime;
use kci_runtime::Runtime;
use kci_scheduler::backup::{self, BackupConfig};
use kci_scheduler::job_retry;
use kci_scheduler::watchdog::{self, HardExit, Heartbeats};
use kci_scheduler::Scheduler;
use kci_telemetry::TelemetryEmitter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "kci-scheduler")]
struct Cli {
    #[arg(long, env = "KCI_API_URL")]
    api_url: String,

    #[arg(long, env = "KCI_API_TOKEN")]
    api_token: String,

    #[arg(long, env = "KCI_CONFIG")]
    config: String,

    #[arg(long, env = "KCI_IMAGE_PREFIX")]
    image_prefix: Option<String>,

    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_file(&cli.config)?);
    let api: Arc<dyn ApiClient> = Arc::new(ReqwestApiClient::new(cli.api_url.clone(), cli.api_token.clone()));

    let telemetry = TelemetryEmitter::new(api.clone());

    let mut runtimes: HashMap<String, Arc<dyn Runtime>> = HashMap::new();
    runtimes.insert("default".to_string(), Arc::new(ShellRuntime::new("shell0")));

    let scheduler = Arc::new(Scheduler::new(
        api.clone(),
        config,
        runtimes,
        telemetry,
        cli.image_prefix,
    ));

    let heartbeats = Heartbeats::new();

    let health_addr = cli.health_addr.clone();
    let health_task = tokio::spawn(async move { kci_scheduler::health::serve(&health_addr).await });

    let watchdog_task = tokio::spawn(watchdog::run(
        heartbeats.clone(),
        watchdog::WATCHDOG_TIMEOUT,
        watchdog::CHECK_INTERVAL,
        Arc::new(HardExit),
    ));

    let node_task = tokio::spawn(run_node_consumer(api.clone(), scheduler.clone(), heartbeats.clone()));
    let retry_task = tokio::spawn(run_retry_consumer(api.clone(), heartbeats.clone()));

    let backup = BackupConfig::from_env();
    let backup_task = tokio::spawn(run_backup_sweep(backup));

    tracing::info!("scheduler starting, press Ctrl-C to stop");
    tokio::select! {
        res = health_task => { res??; }
        res = watchdog_task => { res?; }
        res = node_task => { res??; }
        res = retry_task => { res??; }
        res = backup_task => { res?; }
    }
    Ok(())
}

async fn run_node_consumer(
    api: Arc<dyn ApiClient>,
    scheduler: Arc<Scheduler>,
    heartbeats: Heartbeats,
) -> eyre::Result<()> {
    let sub_id = api
        .subscribe(Channel::Node, serde_json::json!({"state": "available"}))
        .await?;
    loop {
        heartbeats.beat("node");
        match api.receive_event(&sub_id).await {
            Ok(event) => {
                if let EventData::Node(node) = event.data {
                    if let Err(err) = scheduler.handle_node_event(&node).await {
                        tracing::error!(%err, node_id = %node.id, "failed to handle node event");
                    }
                }
            }
            Err(err) => {
                tracing::error!(%err, "error receiving node event");
            }
        }
    }
}

async fn run_retry_consumer(api: Arc<dyn ApiClient>, heartbeats: Heartbeats) -> eyre::Result<()> {
    let sub_id = api
        .subscribe(
            Channel::Retry,
            serde_json::json!({"state": "done", "result": "incomplete", "kind": ["kbuild", "job"]}),
        )
        .await?;
    loop {
        heartbeats.beat("retry");
        match api.receive_event(&sub_id).await {
            Ok(event) => {
                if let EventData::Node(node) = event.data {
                    if let Err(err) = job_retry::maybe_retry(api.as_ref(), &node).await {
                        tracing::error!(%err, node_id = %node.id, "failed to process retry event");
                    }
                }
            }
            Err(err) => {
                tracing::error!(%err, "error receiving retry event");
            }
        }
    }
}

async fn run_backup_sweep(config: Option<BackupConfig>) {
    let Some(config) = config else {
        return;
    };
    let mut last_run = None;
    loop {
        tokio::time::sleep(Duration::from_secs(300)).await;
        if backup::should_run_cleanup(last_run) {
            if let Err(err) = backup::cleanup(&config) {
                tracing::warn!(%err, "backup cleanup failed");
            }
            last_run = Some(std::time::SystemTime::now());
        }
    }
}
