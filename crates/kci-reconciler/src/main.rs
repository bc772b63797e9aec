//! `kci-reconciler` — runs one of the timeout/holdoff/closing sweepers,
//! selected with `--mode`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kci_api_client::{ApiClient, ReqwestApiClient};
use kci_reconciler::{Mode, Reconciler};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "kci-reconciler")]
struct Cli {
    #[arg(long, env = "KCI_API_URL")]
    api_url: String,

    #[arg(long, env = "KCI_API_TOKEN")]
    api_token: String,

    #[arg(long, value_enum)]
    mode: CliMode,

    #[arg(long, default_value_t = 60)]
    poll_period: u64,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Timeout,
    Holdoff,
    Closing,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Timeout => Mode::Timeout,
            CliMode::Holdoff => Mode::Holdoff,
            CliMode::Closing => Mode::Closing,
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mode: Mode = cli.mode.into();

    let api: Arc<dyn ApiClient> = Arc::new(ReqwestApiClient::new(cli.api_url, cli.api_token));
    let reconciler = Reconciler::new(api).await?;

    tracing::info!(mode = mode.as_str(), "reconciler starting, press Ctrl-C to stop");
    loop {
        if let Err(err) = reconciler.run_once(mode).await {
            tracing::error!(%err, mode = mode.as_str(), "sweep failed");
        }
        tokio::time::sleep(Duration::from_secs(cli.poll_period)).await;
    }
}
