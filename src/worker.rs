//! The state worker (C4): one thread per watch, serializing that watch's transitions.

use crate::state::StateRecord;
use crate::transition;
use crate::wake::WaitResult;
use crate::watch::State;
use std::sync::Arc;
use tracing::{event, Level};

/// Runs the worker loop for `record` until `QUIT` is observed. Intended to be run on its own
/// thread; the caller stores the `JoinHandle` on `record.worker`.
pub fn run(record: Arc<StateRecord>) {
    crate::reaper::block_reaped_signals_on_current_thread();
    let mut last_state = State::Init;

    loop {
        match record.wake.wait() {
            WaitResult::Interrupted => continue,
            WaitResult::Posted => (),
        }

        let current = *record.state.lock().unwrap_or_else(|e| e.into_inner());
        if current == State::Quit {
            event!(Level::DEBUG, watch = %record.watch.name, "worker exiting");
            return;
        }

        if current == last_state {
            // Idempotent wake: nothing to do.
            continue;
        }

        match transition::lookup(last_state, current) {
            None => {
                event!(
                    Level::WARN,
                    watch = %record.watch.name,
                    from = ?last_state,
                    to = ?current,
                    "disallowed transition, ignoring"
                );
                last_state = current;
            }
            Some(action) => {
                if action(&record) {
                    last_state = current;
                } else {
                    event!(
                        Level::WARN,
                        watch = %record.watch.name,
                        from = ?last_state,
                        to = ?current,
                        "transition action failed, reverting"
                    );
                    *record.state.lock().unwrap_or_else(|e| e.into_inner()) = last_state;
                }
            }
        }
    }
}
