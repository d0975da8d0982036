//! The spawn primitive (C1): fork a child, drop privileges, daemonize its file descriptors, and
//! exec the watch's command line.
//!
//! The child-side procedure needs to `exit(0)` instead of propagating an error when the
//! executable is missing, which `std::process::Command::pre_exec` cannot express cleanly (its
//! closure's `Err` return always aborts the child with the error reported back through the pipe
//! `Command` sets up). So this is hand-rolled raw `fork`+`execvp`.

use crate::watch::Watch;
use std::ffi::CString;
use std::io::Error;

/// Forks a child that execs `watch.start`, applying the privilege-drop and daemonization steps of
/// the child-side procedure. Returns the child's pid to the parent. A `fork()` failure is fatal
/// to the supervisor (the caller is expected to treat `Err` as such).
pub fn spawn(watch: &Watch) -> std::io::Result<i32> {
    let argv = build_argv(&watch.start);
    let dir = watch.dir.clone();
    let uid = watch.uid;
    let gid = watch.gid;
    let user = watch.user.clone();

    match unsafe { libc::fork() } {
        -1 => Err(Error::last_os_error()),
        0 => {
            // Child. Nothing here may safely return to the caller: every path below either execs
            // or exits.
            child_main(argv, dir, uid, gid, user);
            unreachable!("child_main never returns");
        }
        pid => Ok(pid),
    }
}

fn build_argv(start: &[String]) -> Vec<CString> {
    start
        .iter()
        .map(|s| CString::new(s.as_str()).expect("watch argument must not contain NUL"))
        .collect()
}

fn child_main(
    argv: Vec<CString>,
    dir: Option<std::path::PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    user: Option<String>,
) {
    unsafe {
        libc::umask(0);
        libc::setsid();
    }

    if let Some(gid) = gid {
        unsafe {
            let groups = [gid];
            libc::setgroups(groups.len(), groups.as_ptr());
            libc::setgid(gid);
        }
        if uid.is_some() {
            if let Some(ref user) = user {
                if let Ok(cuser) = CString::new(user.as_str()) {
                    unsafe {
                        libc::initgroups(cuser.as_ptr(), gid as libc::gid_t);
                    }
                }
            }
        }
    }
    if let Some(uid) = uid {
        unsafe {
            libc::setuid(uid);
        }
    }

    use std::os::unix::ffi::OsStrExt;
    let chdir_target = match &dir {
        Some(path) if path.exists() => path.clone(),
        _ => std::path::PathBuf::from("/"),
    };
    let cdir = CString::new(chdir_target.as_os_str().as_bytes()).unwrap_or_default();
    unsafe {
        libc::chdir(cdir.as_ptr());
    }

    redirect_std_fds_to_dev_null();

    let mut argv_ptrs: Vec<*const libc::c_char> =
        argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    unsafe {
        libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
    }

    // execvp only returns on failure.
    let err = Error::last_os_error();
    if err.kind() == std::io::ErrorKind::NotFound {
        // Treat a missing executable as an intentional no-op: the parent's event-driven state
        // machine sees a normal exit and re-derives state from there.
        std::process::exit(0);
    }
    eprintln!("exec failed: {err}");
    std::process::exit(127);
}

fn redirect_std_fds_to_dev_null() {
    let dev_null = CString::new("/dev/null").unwrap();
    let null_fd = unsafe { libc::open(dev_null.as_ptr(), libc::O_RDWR) };
    if null_fd < 0 {
        std::process::exit(127);
    }
    for fd in 0..=2 {
        unsafe {
            libc::close(fd);
            libc::dup2(null_fd, fd);
        }
    }
    if null_fd > 2 {
        unsafe {
            libc::close(null_fd);
        }
    }
}
