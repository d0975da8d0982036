//! A process supervisor for UNIX-like hosts.
//!
//! For each declared watch, the supervisor spawns the program, tracks its liveness by observing
//! kernel-level process events (and, as a safety net, periodic polling), and drives it through a
//! state machine so that the program's runtime status reflects the operator's intent.
//!
//! The core is the coupling of three subsystems: the per-watch state machine ([`transition`],
//! [`worker`]), the process-event ingestion loop ([`ingestor`]), and the per-watch worker model
//! ([`worker`], [`wake`]). [`supervisor`] ties these together with the spawn primitive
//! ([`spawn`]), the dispatch layer ([`dispatch`]), and signal handling ([`reaper`]).

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingestor;
pub mod pidfile;
pub mod poller;
pub mod reaper;
pub mod spawn;
pub mod state;
pub mod supervisor;
pub mod transition;
pub mod wake;
pub mod watch;
pub mod worker;
