//! The `<pid_dir>/<name>.pid` convention: one file per watch, holding the decimal pid of its most
//! recently spawned child.

use anyhow::{anyhow, Context, Result};
use libc::c_int;
use std::ffi::OsString;
use std::fs::File;
use std::io::{prelude::*, BufReader, ErrorKind};
use std::os::unix::prelude::*;
use std::path::{Path, PathBuf};

pub fn path_for(pid_dir: &Path, watch_name: &str) -> PathBuf {
    pid_dir.join(format!("{watch_name}.pid"))
}

/// Atomically writes `pid` into the watch's pidfile, taking an exclusive `fcntl` lock on it for
/// as long as the pid is believed live. The returned `File` must be kept open (not dropped) to
/// hold the lock; callers leak it onto the state record's lifetime by simply not closing it until
/// the watch is reaped.
pub fn write(pid_dir: &Path, watch_name: &str, pid: i32) -> Result<File> {
    let pidfile = path_for(pid_dir, watch_name);
    let mut tmpfile = OsString::from(&pidfile);
    tmpfile.push(".tmp");
    let tmpfile: PathBuf = tmpfile.into();

    let mut file = File::options()
        .append(true)
        .create(true)
        .open(&tmpfile)
        .with_context(|| format!("{}: create failed", tmpfile.display()))?;

    fcntl_set_lock(&file)
        .with_context(|| format!("{}: fcntl(F_SETLK) failed", tmpfile.display()))?;

    file.set_len(0)
        .with_context(|| format!("{}: truncate failed", tmpfile.display()))?;
    file.write_all(format!("{pid}\n").as_bytes())
        .with_context(|| format!("{}: write failed", tmpfile.display()))?;

    std::fs::rename(&tmpfile, &pidfile).with_context(|| {
        format!(
            "failed to rename {} to {}",
            tmpfile.display(),
            pidfile.display()
        )
    })?;

    Ok(file)
}

/// Reads the pid recorded for `watch_name`, if any. Returns `Ok(None)` if no pidfile exists.
pub fn read(pid_dir: &Path, watch_name: &str) -> Result<Option<i32>> {
    let pidfile = path_for(pid_dir, watch_name);
    let file = match File::options().read(true).open(&pidfile) {
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(anyhow!("{}: open failed ({error})", pidfile.display())),
        Ok(file) => file,
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Err(e) => return Err(e).with_context(|| format!("{}: read failed", pidfile.display())),
        Ok(0) => return Err(anyhow!("{}: unexpected end of file", pidfile.display())),
        Ok(_) => (),
    }
    let pid: i32 = line
        .trim()
        .parse()
        .with_context(|| format!("{}: invalid pid contents", pidfile.display()))?;
    Ok(Some(pid))
}

fn fcntl_lock_op(file: &File, command: c_int) -> std::io::Result<libc::flock> {
    let mut lck = libc::flock {
        l_type: libc::F_WRLCK as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };

    loop {
        let retval = unsafe { libc::fcntl(file.as_raw_fd(), command, &mut lck as *mut libc::flock) };
        if retval != -1 {
            return Ok(lck);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn fcntl_set_lock(file: &File) -> std::io::Result<()> {
    fcntl_lock_op(file, libc::F_SETLK)?;
    Ok(())
}
