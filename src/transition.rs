//! The transition table (C3): a static map from `(from, to)` to a transition action, encoded as
//! data rather than nested conditionals, so the legality matrix stays explicit.

use crate::pidfile;
use crate::state::StateRecord;
use crate::watch::State;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{event, Level};

pub type Action = fn(&StateRecord) -> bool;

/// Rows are `State::ROW_STATES` (`INIT, UNMONITORED, STARTING, RUNNING, STOPPING, STOPPED`),
/// columns are `State::COL_STATES` (`UNMONITORED, STARTING, RUNNING, STOPPING, STOPPED`). `None`
/// means the transition is disallowed. Kept as a literal 2D table, not nested conditionals, so
/// the legality matrix stays visible at a glance and self-transitions (the diagonal, where a row
/// and column name the same state) are explicit `None`s rather than implicit.
const TABLE: [[Option<Action>; 5]; 6] = [
    // to:        UNMONITORED          STARTING          RUNNING          STOPPING       STOPPED
    /* INIT    */ [Some(to_unmonitored), None,            None,            None,          None],
    /* UNMON.  */ [None,                 Some(start),     Some(running),   Some(stop),    Some(stopped)],
    /* STARTING*/ [Some(to_unmonitored), None,            Some(running),   Some(stop),    Some(stopped)],
    /* RUNNING */ [Some(to_unmonitored), None,            None,            Some(stop),    Some(stopped)],
    /* STOPPING*/ [Some(to_unmonitored), None,            None,            None,          Some(stopped)],
    /* STOPPED */ [Some(to_unmonitored), Some(start),     None,            None,          None],
];

/// Looks up the transition action for `(from, to)`. `Quit` is never passed here: it is handled by
/// the worker before table lookup.
pub fn lookup(from: State, to: State) -> Option<Action> {
    let col = to.col_index()?;
    TABLE[from.row_index()][col]
}

fn is_live(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// `(INIT, UNMONITORED)` and `(X, UNMONITORED)` for any other `X`: re-derive the record's state
/// from the world rather than from memory. If we don't already believe a child is running, check
/// the pidfile for one left over from a previous run.
pub fn to_unmonitored(record: &StateRecord) -> bool {
    let mut pid = record.pid();
    if pid == 0 {
        if let Some(sup) = record.supervisor.upgrade() {
            match pidfile::read(&sup.pid_dir, &record.watch.name) {
                Ok(Some(read_pid)) => pid = read_pid,
                Ok(None) => pid = 0,
                Err(error) => {
                    event!(Level::WARN, watch = %record.watch.name, %error, "failed to read pidfile");
                    pid = 0;
                }
            }
        }
    }

    let live = pid != 0 && is_live(pid);
    record.set_pid(if live { pid } else { 0 });
    record.set_state(if live { State::Running } else { State::Stopped });
    true
}

/// `(*, STARTING)`: spawn the child. Does not itself change `state`; the next observed fork/exit
/// event or liveness poll drives the record onward.
///
/// A `fork` failure is fatal to the supervisor, not just to this watch: it almost always means
/// the host is out of process-table slots or memory, conditions every other watch's next restart
/// would hit too, so there is nothing this worker can recover into on its own.
pub fn start(record: &StateRecord) -> bool {
    match crate::spawn::spawn(&record.watch) {
        Ok(pid) => {
            record.set_pid(pid);
            if let Some(sup) = record.supervisor.upgrade() {
                match pidfile::write(&sup.pid_dir, &record.watch.name, pid) {
                    Ok(file) => record.set_pidfile_lock(file),
                    Err(error) => {
                        event!(Level::WARN, watch = %record.watch.name, %error, "failed to write pidfile");
                    }
                }
            }
            event!(Level::INFO, watch = %record.watch.name, pid, "started");
            true
        }
        Err(error) => {
            event!(Level::ERROR, watch = %record.watch.name, %error, "fork failed, aborting supervisor");
            std::process::exit(1);
        }
    }
}

/// `(*, RUNNING)`: pure state marker, no side effect.
pub fn running(_record: &StateRecord) -> bool {
    true
}

/// `(*, STOPPING)`: request the child's termination. Uses the watch's configured stop command if
/// present, else sends `SIGTERM` to the child's process group.
pub fn stop(record: &StateRecord) -> bool {
    let pid = record.pid();
    if pid == 0 {
        return true;
    }
    match &record.watch.stop {
        Some(argv) if !argv.is_empty() => {
            let status = std::process::Command::new(&argv[0]).args(&argv[1..]).status();
            if let Err(error) = status {
                event!(Level::WARN, watch = %record.watch.name, %error, "stop command failed to launch");
            }
        }
        _ => {
            let _ = kill(Pid::from_raw(-pid), Signal::SIGTERM);
        }
    }
    true
}

/// `(*, STOPPED)`: pure state marker, plus the auto-restart policy — posts a follow-on wake
/// towards `STARTING`, unless the watch's restart-limit policy has been exceeded.
pub fn stopped(record: &StateRecord) -> bool {
    if record.exceeded_restart_limit() {
        event!(Level::WARN, watch = %record.watch.name, "restart limit exceeded, leaving stopped");
        return true;
    }
    record.note_restart();
    record.set_state(State::Starting);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::State::*;

    #[test]
    fn table_is_not_transitive() {
        // (UNMONITORED, STARTING) and (STARTING, RUNNING) are both defined, but
        // (UNMONITORED, RUNNING) is not.
        assert!(lookup(Unmonitored, Starting).is_some());
        assert!(lookup(Starting, Running).is_some());
        assert!(lookup(Unmonitored, Running).is_none());
    }

    #[test]
    fn self_transitions_are_disallowed() {
        for s in State::ROW_STATES {
            if let Some(col) = s.col_index() {
                let to = State::COL_STATES[col];
                if to == s {
                    assert!(lookup(s, to).is_none());
                }
            }
        }
    }

    #[test]
    fn quit_has_no_outgoing_entries() {
        for to in State::COL_STATES {
            assert!(lookup(Quit, to).is_none());
        }
    }

    #[test]
    fn defined_cells_match_spec_table() {
        assert!(lookup(Init, Unmonitored).is_some());
        assert!(lookup(Init, Starting).is_none());
        assert!(lookup(Unmonitored, Starting).is_some());
        assert!(lookup(Unmonitored, Stopping).is_some());
        assert!(lookup(Stopped, Running).is_none());
        assert!(lookup(Stopping, Starting).is_none());
    }
}
