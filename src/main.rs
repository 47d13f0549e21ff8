mod cli;

use clap::Parser;
use cli::Cli;
use portly::port::{EnvFileStore, PortAllocator};
use portly::{Controller, Error as PortlyError, Settings};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(portly_error) = e.downcast_ref::<PortlyError>() {
            eprintln!(
                "Error ({}): {}",
                portly_error.stage(),
                portly_error.with_suggestion()
            );
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing()?;

    let work_dir = match cli.workdir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let settings = Settings::from_env(&work_dir, cli.overrides())?;
    tracing::debug!("Resolved settings: {:?}", settings);

    // Listen before allocating so a signal during startup still releases.
    let shutdown = CancellationToken::new();
    portly::lifecycle::cancel_on_signals(shutdown.clone())?;

    let allocator = PortAllocator::new(settings.range)
        .forced(cli.forced)
        .expand_max(cli.expand_max);
    let store = EnvFileStore::new(work_dir.join(&cli.env_file));

    let mut controller = Controller::new(settings, work_dir)
        .with_allocator(allocator)
        .with_store(Box::new(store));
    let running = controller.start().await?;

    // The port on stdout is the contract for wrapper scripts; logs go to stderr.
    println!("{}", running.port());
    running.hold(shutdown).await;

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
