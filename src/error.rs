//! Typed errors for the supervisor core.
//!
//! Covers the validation failures the core itself raises; everything downstream of there (I/O,
//! netlink setup, pidfile parsing) is reported through `anyhow::Result` with added context instead,
//! matching the rest of the crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("{0}: watch name must not be empty")]
    EmptyWatchName(String),

    #[error("watch {0:?}: start command must not be empty")]
    EmptyStartCommand(String),

    #[error("watch {0:?}: duplicate watch name")]
    DuplicateWatch(String),

    #[error("could not create worker thread for watch {0:?}: {1}")]
    WorkerSpawnFailed(String, std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
