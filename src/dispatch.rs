//! The dispatch layer (C6): maps a pid from an event or poll to its owning watch's record, and
//! drives the write/post discipline on its behalf.

use crate::ingestor::{ProcEvent, ProcEventKind};
use crate::state::Supervisor;
use crate::watch::State;
use tracing::{event, Level};

/// Consumes a process-connector event. An `EXIT` for a known watch's pid writes `STOPPED`. A
/// `FORK` whose parent pid matches a known watch is logged only: the watch's own process is still
/// alive (the `start` action already recorded its pid), so a grandchild being born carries no new
/// supervisory information.
pub fn dispatch_event(pid: i32, proc_event: &ProcEvent, supervisor: &Supervisor) {
    let Some(record) = supervisor.find_by_pid(pid) else {
        event!(Level::TRACE, pid, kind = ?proc_event.kind, "event for untracked pid, ignoring");
        return;
    };

    match proc_event.kind {
        ProcEventKind::Exit => {
            let current = *record.state.lock().unwrap_or_else(|e| e.into_inner());
            if current != State::Stopped {
                record.set_state(State::Stopped);
            }
        }
        ProcEventKind::Fork => {
            event!(Level::TRACE, watch = %record.watch.name, pid, "fork confirms watch still alive");
        }
        ProcEventKind::Other => {}
    }
}

/// Consumes a periodic liveness probe result. Writes `RUNNING`/`STOPPED` and posts the wake only
/// when it would actually change the recorded state, so that repeated confirmations are no-ops.
pub fn dispatch_poll_result(pid: i32, running: bool, supervisor: &Supervisor) {
    let Some(record) = supervisor.find_by_pid(pid) else {
        return;
    };

    let current = *record.state.lock().unwrap_or_else(|e| e.into_inner());
    if running && current != State::Running {
        record.set_state(State::Running);
    } else if !running && current != State::Stopped {
        record.set_state(State::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateRecord;
    use crate::watch::Watch;
    use std::sync::{atomic::AtomicBool, Arc};

    fn test_watch(name: &str) -> Watch {
        Watch {
            name: name.to_string(),
            start: vec!["/bin/true".to_string()],
            stop: None,
            dir: None,
            uid: None,
            gid: None,
            user: None,
            restart_limit: None,
        }
    }

    fn test_supervisor() -> Arc<Supervisor> {
        Arc::new_cyclic(|weak| {
            let record = Arc::new(StateRecord::new(test_watch("w"), weak.clone()));
            record.set_pid(42);
            Supervisor {
                watches: Default::default(),
                states: vec![record],
                pid_dir: std::env::temp_dir(),
                self_pid: std::process::id() as i32,
                shutdown: Arc::new(AtomicBool::new(false)),
            }
        })
    }

    #[test]
    fn repeated_poll_confirming_running_is_idempotent() {
        let sup = test_supervisor();
        sup.states[0].set_state(State::Running);
        // Consume all outstanding wake posts from setup so the count below is meaningful.
        sup.states[0].wake.wait();

        dispatch_poll_result(42, true, &sup);
        // No new post should have landed: wait() would otherwise return immediately again below,
        // but since we already drained the wake, a blocking wait here would hang forever if a
        // post had landed we don't expect one, so instead assert the state is unchanged and
        // still Running (the only externally observable effect besides the wake post).
        assert_eq!(
            *sup.states[0].state.lock().unwrap(),
            State::Running
        );
    }

    #[test]
    fn poll_transitions_running_to_stopped() {
        let sup = test_supervisor();
        sup.states[0].set_state(State::Running);

        dispatch_poll_result(42, false, &sup);
        assert_eq!(*sup.states[0].state.lock().unwrap(), State::Stopped);
    }

    #[test]
    fn unknown_pid_is_ignored() {
        let sup = test_supervisor();
        dispatch_poll_result(9999, true, &sup);
        assert_eq!(*sup.states[0].state.lock().unwrap(), State::Unmonitored);
    }
}
