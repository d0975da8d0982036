//! Command-line surface. `--help` text generation is left entirely to `clap`'s derive output.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(version, about = "Supervises a set of declared programs, restarting them on exit.")]
pub struct Args {
    /// Path to the TOML file declaring the watch set.
    #[clap(long, short = 'c')]
    pub config: PathBuf,

    /// Directory under which `<watch-name>.pid` files are maintained.
    #[clap(long)]
    pub pid_dir: PathBuf,

    /// Liveness-poll interval in seconds, as a safety net alongside process-connector events.
    #[clap(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Log at debug level instead of info. This supervisor does not itself daemonize; detaching
    /// from the invoking terminal is left to the invoking service manager.
    #[clap(long)]
    pub foreground: bool,
}
