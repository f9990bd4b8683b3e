mod command;
mod shell;
mod state;

use anyhow::Context;
use clap::Parser;
use shell::{ConsoleSink, Shell};
use state::{ShellState, VmshDirs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use vmsh_control::{HttpGateway, HttpNamer, LifecycleController, PollConfig};

const DEFAULT_API_URL: &str = "http://spb99tpagent01:80/vms/api/v1";
const DEFAULT_NAMER_URL: &str = "http://spb99tpagent01:8443";

#[derive(Parser, Debug)]
#[command(name = "vmsh")]
#[command(about = "Interactive shell for provisioning VM pools")]
#[command(version)]
struct Cli {
    /// Base URL of the provisioning service
    #[arg(long, env = "VMSH_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Base URL of the naming service
    #[arg(long, env = "VMSH_NAMER_URL", default_value = DEFAULT_NAMER_URL)]
    namer_url: String,

    /// Do not use the naming service
    #[arg(long)]
    no_namer: bool,

    /// Pool owner (defaults to the login name)
    #[arg(long, env = "VMSH_USER")]
    user: Option<String>,

    /// Seconds between status polls
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Seconds before a poller gives up
    #[arg(long, default_value_t = 600)]
    poll_ttl: u64,

    /// Pool to select on start, instead of the remembered one
    #[arg(long)]
    pool: Option<String>,
}

impl Cli {
    fn owner(&self) -> anyhow::Result<String> {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .context("cannot determine the pool owner, pass --user")
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.poll_interval),
            Duration::from_secs(self.poll_ttl),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dirs = VmshDirs::new()?;
    let _log_guard = init_logging(&dirs.log_dir());

    let owner = cli.owner()?;
    let gateway = Arc::new(HttpGateway::new(cli.api_url.as_str())?);
    let mut controller = LifecycleController::new(gateway, owner, Arc::new(ConsoleSink))
        .with_poll_config(cli.poll_config());
    if !cli.no_namer {
        controller = controller.with_namer(Arc::new(HttpNamer::new(cli.namer_url.as_str())?));
    }
    info!(api = %cli.api_url, owner = controller.owner(), "Starting shell");

    let saved = ShellState::load(&dirs.config).unwrap_or_else(|e| {
        warn!("Ignoring saved shell state: {e:#}");
        ShellState::default()
    });
    let remembered = cli.pool.or(saved.pool);

    let mut shell = Shell::new(controller);
    shell.start(remembered.as_deref()).await;
    let result = shell.run().await;

    let state = ShellState {
        pool: shell.finish().await,
    };
    if let Err(e) = state.save(&dirs.config) {
        warn!("Could not save shell state: {e:#}");
    }
    info!(pool = ?state.pool, "Shell closed");

    result
}

fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if std::fs::create_dir_all(log_dir).is_ok() {
        let log_path = log_dir.join("vmsh.log");
        if std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .is_ok()
        {
            let file_appender = rolling::never(log_dir, "vmsh.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(non_blocking)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
    None
}
