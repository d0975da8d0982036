//! Supervisor lifecycle (C8): constructs watches and state records, launches one worker per
//! watch plus the liveness poller, runs the event ingestor on the calling thread, and drives
//! orderly shutdown.
//!
//! Setup proceeds in ordered steps, each of which aborts the whole process via a logged
//! diagnostic and nonzero exit if it cannot recover.

use crate::poller;
use crate::reaper;
use crate::state::{StateRecord, Supervisor};
use crate::watch::{State, Watch};
use crate::worker;
use crate::{error::SupervisorError, ingestor::Ingestor};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// Builds the supervisor's watch set and state records, but does not yet start anything running.
pub fn build(watches: Vec<Watch>, pid_dir: PathBuf) -> Result<Arc<Supervisor>, SupervisorError> {
    let mut by_name = HashMap::new();
    for watch in &watches {
        watch.validate()?;
        if by_name.insert(watch.name.clone(), watch.clone()).is_some() {
            return Err(SupervisorError::DuplicateWatch(watch.name.clone()));
        }
    }

    let self_pid = std::process::id() as i32;
    let shutdown = Arc::new(AtomicBool::new(false));

    Ok(Arc::new_cyclic(|weak: &std::sync::Weak<Supervisor>| {
        let states = watches
            .into_iter()
            .map(|watch| Arc::new(StateRecord::new(watch, weak.clone())))
            .collect();
        Supervisor {
            watches: by_name,
            states,
            pid_dir,
            self_pid,
            shutdown,
        }
    }))
}

/// Launches one worker thread per watch. Thread creation failure is fatal: the supervisor cannot
/// offer its guarantees with a watch that has no worker driving it.
pub fn start_workers(supervisor: &Arc<Supervisor>) -> Result<(), SupervisorError> {
    for record in &supervisor.states {
        let worker_record = Arc::clone(record);
        let handle = std::thread::Builder::new()
            .name(format!("watch-{}", record.watch.name))
            .spawn(move || worker::run(worker_record))
            .map_err(|e| SupervisorError::WorkerSpawnFailed(record.watch.name.clone(), e))?;
        *record.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }
    Ok(())
}

/// Runs the supervisor to completion: installs signal handlers, starts workers and the liveness
/// poller, runs the event ingestor on the calling thread until shutdown, then joins everything.
pub fn run(supervisor: Arc<Supervisor>, poll_interval: std::time::Duration) -> Result<()> {
    reaper::install_sigchld_reaper().context("failed to install SIGCHLD reaper")?;
    let shutdown_fd =
        reaper::install_shutdown_wake().context("failed to install shutdown-wake eventfd")?;

    start_workers(&supervisor).context("failed to start watch workers")?;

    let poller_supervisor = Arc::clone(&supervisor);
    let poller_handle = std::thread::Builder::new()
        .name("liveness-poller".to_string())
        .spawn(move || poller::run(poller_supervisor, poll_interval))
        .context("failed to start liveness poller")?;

    let ingestor = Ingestor::new(supervisor.self_pid, shutdown_fd)
        .context("failed to set up process-event ingestor")?;
    ingestor.run(&supervisor);

    shutdown(&supervisor);
    let _ = poller_handle.join();
    unsafe {
        libc::close(shutdown_fd);
    }

    event!(Level::INFO, "supervisor shut down cleanly");
    Ok(())
}

/// Writes `QUIT` into every record and posts every wake, then joins every worker.
fn shutdown(supervisor: &Supervisor) {
    supervisor.shutdown.store(true, Ordering::SeqCst);
    for record in &supervisor.states {
        record.set_state(State::Quit);
    }
    for record in &supervisor.states {
        let handle = record.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
