use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deskgate::config::{DeskConfig, LogFormat, LoggingConfig};
use deskgate::console::{self, ConsoleMessenger, ConsolePermissions, CONSOLE_LOCATION};
use deskgate::ratelimit::RateLimiter;
use deskgate::resource::VBoxManage;
use deskgate::session::{ControllerSettings, SessionController};

#[derive(Debug, Parser)]
#[command(name = "deskgate", version, about = "Shared virtual machine desktop")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "DESKGATE_CONFIG")]
    config: Option<String>,

    /// Override resource.vm_name
    #[arg(long)]
    vm: Option<String>,

    /// Override resource.snapshot
    #[arg(long)]
    snapshot: Option<String>,

    /// Directory screenshots are written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = DeskConfig::load(args.config.as_deref())?;
    if let Some(vm) = args.vm {
        config.resource.vm_name = vm;
    }
    if let Some(snapshot) = args.snapshot {
        config.resource.snapshot = snapshot;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Deskgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        vm = %config.resource.vm_name,
        snapshot = %config.resource.snapshot,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&args.output_dir).await?;

    let arbitration = &config.arbitration;
    let mut locations = arbitration.restricted_locations();
    locations.insert(CONSOLE_LOCATION);
    let limiter = RateLimiter::new(Arc::new(ConsolePermissions), locations)
        .with_cooldown(arbitration.cooldown())
        .with_admin_level(arbitration.admin_level());

    let hypervisor = Arc::new(VBoxManage::from_config(&config.resource));
    let messenger = Arc::new(ConsoleMessenger::new(&args.output_dir));
    let controller = SessionController::connect(
        hypervisor,
        messenger,
        limiter,
        ControllerSettings::from_config(&config),
    )
    .await?;
    let controller = Arc::new(controller);

    let operator = console::operator(arbitration.admin_level());
    console::run(controller, operator, shutdown_signal()).await?;

    info!("Deskgate stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
