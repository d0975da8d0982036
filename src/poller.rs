//! The liveness poller: a safety net for events the process connector does not guarantee delivery
//! of. A fixed-interval `thread::sleep` loop that checks each watch's liveness with
//! `kill(pid, 0)` and feeds the result to `dispatch_poll_result`.

use crate::dispatch::dispatch_poll_result;
use crate::state::Supervisor;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Runs until `supervisor.shutdown` is set. Intended to run on its own thread.
pub fn run(supervisor: Arc<Supervisor>, interval: Duration) {
    crate::reaper::block_reaped_signals_on_current_thread();
    while !supervisor.shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        if supervisor.shutdown.load(Ordering::SeqCst) {
            break;
        }
        for record in &supervisor.states {
            let pid = record.pid();
            if pid == 0 {
                continue;
            }
            let running = kill(Pid::from_raw(pid), None).is_ok();
            dispatch_poll_result(pid, running, &supervisor);
        }
    }
}
