//! Signal handling (C7): the SIGCHLD reaper and the SIGTERM/SIGINT shutdown wake.
//!
//! The SIGCHLD handler is installed with raw `libc::sigaction` and performs only
//! async-signal-safe operations (save/restore `errno`, `waitpid(..., WNOHANG)`); it deliberately
//! never logs, since a logger call is not in general async-signal-safe.
//!
//! SIGTERM/SIGINT go through `signal_hook::low_level::register`, registering a raw action rather
//! than the iterator-based `Signals` API: the action itself only needs to perform a single
//! async-signal-safe `write(2)` onto the shutdown-wake eventfd so that the ingestor's readiness
//! loop (blocked in `mio::Poll::poll`) wakes up.

use std::io;
use std::os::unix::io::RawFd;

/// Installs the SIGCHLD reaper. Must be called once, before any children are spawned.
pub fn install_sigchld_reaper() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = reap_children as usize;
        action.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// The actual signal handler. Async-signal-safe: saves and restores `errno`, calls only
/// `waitpid(..., WNOHANG)` in a loop until there is nothing left to reap, and never logs.
extern "C" fn reap_children(_signum: libc::c_int) {
    let saved_errno = unsafe { *libc::__errno_location() };
    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
    }
    unsafe {
        *libc::__errno_location() = saved_errno;
    }
}

/// Creates the shutdown-wake eventfd and registers SIGTERM/SIGINT to write to it. The returned fd
/// is readable (8 bytes) exactly when a shutdown has been requested; it is the descriptor the
/// ingestor registers with its readiness facility alongside the netlink socket.
pub fn install_shutdown_wake() -> io::Result<RawFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    for signal in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            signal_hook::low_level::register(signal, move || {
                let one: u64 = 1;
                libc::write(fd, &one as *const u64 as *const libc::c_void, 8);
            })
        }
        .map_err(|e| {
            unsafe { libc::close(fd) };
            e
        })?;
    }

    Ok(fd)
}

/// Blocks SIGCHLD/SIGTERM/SIGINT on the calling thread so the kernel routes them to a thread that
/// has them unblocked instead. Called by worker and poller threads at startup so the three signals
/// are only ever handled on the main thread, which runs the ingestor and installed the handlers.
pub fn block_reaped_signals_on_current_thread() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGCHLD);
        libc::sigaddset(&mut set, libc::SIGTERM);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}
