//! The declarative description of a managed program.

use serde::Deserialize;
use std::path::PathBuf;

/// Which state a watch's record is in, or is being asked to move to.
///
/// `Init` only ever appears as a worker's private "last observed" value; it is never written into
/// a [`crate::state::StateRecord`]. `Quit` is terminal: once observed by a worker, the worker
/// exits its loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    Unmonitored,
    Starting,
    Running,
    Stopping,
    Stopped,
    Quit,
}

impl State {
    /// Source ("from") states of the transition table, in row order. `Quit` is handled before
    /// table lookup and never appears here.
    pub const ROW_STATES: [State; 6] = [
        State::Init,
        State::Unmonitored,
        State::Starting,
        State::Running,
        State::Stopping,
        State::Stopped,
    ];

    /// Target ("to") states of the transition table, in column order. `Init` is never a target
    /// (nothing transitions back to it) and `Quit` bypasses the table entirely.
    pub const COL_STATES: [State; 5] = [
        State::Unmonitored,
        State::Starting,
        State::Running,
        State::Stopping,
        State::Stopped,
    ];

    pub(crate) fn row_index(self) -> usize {
        Self::ROW_STATES
            .iter()
            .position(|s| *s == self)
            .expect("QUIT has no transition table row")
    }

    pub(crate) fn col_index(self) -> Option<usize> {
        Self::COL_STATES.iter().position(|s| *s == self)
    }
}

/// An optional cap on how many times a watch may be auto-restarted within a rolling window.
///
/// Supplements the distilled auto-restart policy (see `transition::stopped`) so that a watch
/// whose command is permanently broken does not crash-loop forever.
#[derive(Clone, Debug, Deserialize)]
pub struct RestartLimit {
    pub max_restarts: u32,
    #[serde(with = "humantime_secs")]
    pub window_secs: std::time::Duration,
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// A named supervisory target. Immutable once constructed.
#[derive(Clone, Debug, Deserialize)]
pub struct Watch {
    /// Unique, non-empty identifier for this watch.
    pub name: String,

    /// Command line to run. `start[0]` is resolved against `PATH` by the spawn primitive.
    pub start: Vec<String>,

    /// Command line used to request a graceful stop. If absent, `SIGTERM` is sent to the child's
    /// process group instead.
    #[serde(default)]
    pub stop: Option<Vec<String>>,

    /// Working directory for the child. If absent or nonexistent, the child chdirs to `/`.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Numeric uid to drop privileges to, if set.
    #[serde(default)]
    pub uid: Option<u32>,

    /// Numeric gid to drop privileges to, if set.
    #[serde(default)]
    pub gid: Option<u32>,

    /// Textual user name, kept alongside `uid`/`gid` solely so the spawn primitive can populate
    /// supplementary groups via `initgroups(3)`, which requires a name rather than a numeric id.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub restart_limit: Option<RestartLimit>,
}

impl Watch {
    pub fn validate(&self) -> Result<(), crate::error::SupervisorError> {
        if self.name.trim().is_empty() {
            return Err(crate::error::SupervisorError::EmptyWatchName(
                self.name.clone(),
            ));
        }
        if self.start.is_empty() {
            return Err(crate::error::SupervisorError::EmptyStartCommand(
                self.name.clone(),
            ));
        }
        Ok(())
    }
}
