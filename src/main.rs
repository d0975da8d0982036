use anyhow::{Context, Result};
use clap::Parser;
use nyxd::cli::Args;
use nyxd::{config, supervisor};
use tracing::{event, Level};

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.foreground {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        event!(Level::ERROR, "{e:#}");
        return Err(e);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    std::fs::create_dir_all(&args.pid_dir)
        .with_context(|| format!("{}: failed to create pid directory", args.pid_dir.display()))?;

    let watches = config::load(&args.config)?;
    let supervisor = supervisor::build(watches, args.pid_dir.clone())
        .with_context(|| format!("{}: invalid configuration", args.config.display()))?;

    event!(Level::INFO, watches = supervisor.states.len(), "starting supervisor");
    supervisor::run(
        supervisor,
        std::time::Duration::from_secs(args.poll_interval_secs),
    )
}
