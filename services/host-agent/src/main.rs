use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ferrum_reconcile::{Cancelled, RetryPolicy, DEFAULT_RECONCILE_INTERVAL};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ferrum_host_agent::client::{HttpRegistry, Registry};
use ferrum_host_agent::config::AgentConfig;
use ferrum_host_agent::driver::{BootstrapOutcome, DriverError, HostPhaseDriver, RunExit};
use ferrum_host_agent::identity::Identity;
use ferrum_host_agent::strategy::{strategy_for, OsStrategy};

#[derive(Parser)]
#[command(name = "ferrum-agent", version, about = "On-host lifecycle agent")]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long, global = true, default_value = "/etc/ferrum/agent.toml")]
    config: PathBuf,

    /// Verbose logging regardless of configuration.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register this machine with the fleet controller.
    Register {
        /// Continue into installation and bootstrap after registering.
        #[arg(long)]
        install: bool,
    },
    /// Install the OS onto an already-registered machine.
    Install,
    /// Run the steady-state reconcile loop.
    Run,
    /// Wipe this machine and confirm the reset upstream.
    Reset,
    /// Print the agent version.
    Version,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Command::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = AgentConfig::load(&cli.config)?;
    init_tracing(cli.debug || config.debug);
    info!(
        registry_url = %config.registry_url,
        registration = %config.registration,
        "Agent starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let work_dir = PathBuf::from(&config.work_dir);
    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(&config));
    let os = strategy_for(config.strategy, &work_dir);
    let identity = Identity::load_or_generate(&work_dir)?;
    let retry = RetryPolicy::new(DEFAULT_RECONCILE_INTERVAL, shutdown_rx);

    let mut driver = HostPhaseDriver::new(
        registry,
        os.clone(),
        retry,
        identity.public_key_base64(),
        identity.private_key_bytes().to_vec(),
    );

    match run_command(cli.command, &mut driver, os.as_ref()).await {
        Ok(()) => Ok(()),
        Err(e) if is_shutdown(&e) => {
            info!("Shutdown requested, exiting");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn run_command(
    command: Command,
    driver: &mut HostPhaseDriver,
    os: &dyn OsStrategy,
) -> Result<()> {
    match command {
        Command::Register { install } => {
            driver.register().await?;
            if install {
                driver.install().await?;
                if let BootstrapOutcome::RebootRequired = driver.bootstrap().await? {
                    info!("Reboot required to activate the bootstrap payload");
                }
            }
        }
        Command::Install => {
            adopt_hostname(driver, os)?;
            driver.install().await?;
        }
        Command::Run => {
            adopt_hostname(driver, os)?;
            match driver.run().await? {
                RunExit::ResetCompleted => info!("Reset completed, host deregistered"),
                RunExit::RebootRequired => {
                    info!("Reboot required to activate the bootstrap payload")
                }
            }
        }
        Command::Reset => {
            adopt_hostname(driver, os)?;
            driver.trigger_reset().await?;
            driver.reset().await?;
        }
        Command::Version => {}
    }
    Ok(())
}

fn adopt_hostname(driver: &mut HostPhaseDriver, os: &dyn OsStrategy) -> Result<()> {
    match os.persisted_hostname()? {
        Some(hostname) => {
            driver.set_hostname(hostname);
            Ok(())
        }
        None => anyhow::bail!("no registration state found; run `register` first"),
    }
}

fn is_shutdown(e: &anyhow::Error) -> bool {
    e.downcast_ref::<Cancelled>().is_some()
        || matches!(
            e.downcast_ref::<DriverError>(),
            Some(DriverError::Cancelled(_))
        )
}
