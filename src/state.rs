//! The mutable per-watch state record, and the supervisor that owns a set of them.

use crate::wake::Wake;
use crate::watch::{State, Watch};
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

/// One per watch. Only the watch's own worker thread may mutate `state`; every other component
/// that wants to request a transition must write `state` and then post `wake`, in that order.
pub struct StateRecord {
    pub watch: Watch,
    pub state: Mutex<State>,
    pub pid: Mutex<i32>,
    pub wake: Wake,
    pub worker: Mutex<Option<JoinHandle<()>>>,
    pub supervisor: Weak<Supervisor>,
    /// Holds the pidfile's `fcntl` lock open for as long as the child it names is believed live.
    /// Replaced (dropping, and so releasing, the previous lock) each time a new child is spawned.
    pidfile_lock: Mutex<Option<File>>,
    restarts: Mutex<Vec<Instant>>,
}

impl StateRecord {
    pub fn new(watch: Watch, supervisor: Weak<Supervisor>) -> Self {
        StateRecord {
            watch,
            state: Mutex::new(State::Unmonitored),
            pid: Mutex::new(0),
            wake: Wake::new(),
            worker: Mutex::new(None),
            supervisor,
            pidfile_lock: Mutex::new(None),
            restarts: Mutex::new(Vec::new()),
        }
    }

    /// Takes ownership of the pidfile lock's open `File`, dropping (and so releasing) whatever
    /// lock was previously held.
    pub fn set_pidfile_lock(&self, file: File) {
        *self.pidfile_lock.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
    }

    /// Writes `state` and posts the wake, in that order, as the write/post discipline requires.
    pub fn set_state(&self, new_state: State) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = new_state;
        self.wake.post();
    }

    pub fn pid(&self) -> i32 {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_pid(&self, pid: i32) {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }

    /// True if this watch's `restart_limit` is set and has already been exceeded within the
    /// current rolling window. Does not itself record a restart; call `note_restart` for that.
    pub fn exceeded_restart_limit(&self) -> bool {
        let Some(limit) = &self.watch.restart_limit else {
            return false;
        };
        let restarts = self.restarts.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let recent = restarts
            .iter()
            .filter(|t| now.duration_since(**t) < limit.window_secs)
            .count();
        recent as u32 >= limit.max_restarts
    }

    /// Records that a restart is about to happen, for the purposes of `exceeded_restart_limit`.
    pub fn note_restart(&self) {
        let Some(limit) = &self.watch.restart_limit else {
            return;
        };
        let mut restarts = self.restarts.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        restarts.retain(|t| now.duration_since(*t) < limit.window_secs);
        restarts.push(now);
    }
}

/// Owns the full set of watches and their state records, the pid directory, and this process's
/// own pid (used to tag the netlink subscription).
pub struct Supervisor {
    pub watches: HashMap<String, Watch>,
    pub states: Vec<std::sync::Arc<StateRecord>>,
    pub pid_dir: PathBuf,
    pub self_pid: i32,
    pub shutdown: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Supervisor {
    /// Looks up the state record whose most recently known pid equals `pid`. Linear scan: the
    /// watch count per supervisor instance is small and pids change on every restart, so an index
    /// would need as much invalidation work as it saves.
    pub fn find_by_pid(&self, pid: i32) -> Option<&std::sync::Arc<StateRecord>> {
        if pid == 0 {
            return None;
        }
        self.states.iter().find(|record| record.pid() == pid)
    }
}
