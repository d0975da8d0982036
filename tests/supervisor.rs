//! Integration tests: spawn the compiled `nyxd` binary against a temporary config and pid
//! directory and drive it through the end-to-end scenarios described for the supervisor, in the
//! style of `daemon/tests/test.rs` (`wait_until` backoff helper, raw `libc::kill` signaling,
//! pidfile-content assertions).

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

enum Completion<T> {
    Incomplete,
    Complete(T),
}
use Completion::*;

/// Repeatedly evaluates `condition`, sleeping a bit between calls, until it yields
/// `Complete(value)`, then returns `Ok(value)`. Gives up and returns an error after a while.
fn wait_until<T, F>(mut condition: F) -> Result<T>
where
    F: FnMut() -> Completion<T>,
{
    for i in 0..10 {
        if let Complete(result) = condition() {
            return Ok(result);
        }
        let ms = match i {
            0 => 10,
            1 => 100,
            _ => 1000,
        };
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
    Err(anyhow!("wait_until timed out"))
}

fn nyxd_command() -> Result<Command> {
    let exe_dir = std::env::current_exe()?
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf();
    Ok(Command::new(exe_dir.join("nyxd")))
}

fn send_signal(pid: libc::pid_t, signal: std::os::raw::c_int) -> Result<(), std::io::Error> {
    if unsafe { libc::kill(pid, signal) } < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn process_exists(pid: libc::pid_t) -> bool {
    send_signal(pid, 0).is_ok()
}

fn read_pidfile(path: &Path) -> Result<libc::pid_t> {
    let contents = fs::read_to_string(path)?;
    Ok(contents.trim().parse()?)
}

fn wait_until_file_exists(path: &Path) -> Result<()> {
    wait_until(|| if path.exists() { Complete(()) } else { Incomplete })
}

fn wait_until_pid_live(path: &Path) -> Result<libc::pid_t> {
    wait_until(|| match read_pidfile(path) {
        Ok(pid) if process_exists(pid) => Complete(pid),
        _ => Incomplete,
    })
}

fn wait_until_exited(child: &mut Child) -> Result<()> {
    wait_until(|| match child.try_wait() {
        Ok(Some(_)) => Complete(()),
        _ => Incomplete,
    })
}

struct TestHarness {
    _tmp: tempfile::TempDir,
    pid_dir: PathBuf,
    config_path: PathBuf,
    child: Child,
}

impl TestHarness {
    fn start(watch_name: &str, start_cmd: &[&str]) -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let pid_dir = tmp.path().join("pids");
        fs::create_dir_all(&pid_dir)?;

        let config_path = tmp.path().join("nyxd.toml");
        let start_toml = start_cmd
            .iter()
            .map(|s| format!("{s:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(
            &config_path,
            format!(
                "[[watch]]\nname = {watch_name:?}\nstart = [{start_toml}]\n"
            ),
        )?;

        let child = nyxd_command()?
            .arg("--config")
            .arg(&config_path)
            .arg("--pid-dir")
            .arg(&pid_dir)
            .arg("--foreground")
            .spawn()
            .context("failed to spawn nyxd")?;

        Ok(TestHarness {
            _tmp: tmp,
            pid_dir,
            config_path,
            child,
        })
    }

    fn pidfile(&self, watch_name: &str) -> PathBuf {
        self.pid_dir.join(format!("{watch_name}.pid"))
    }

    fn stop(mut self) -> Result<()> {
        send_signal(self.child.id() as libc::pid_t, libc::SIGTERM)?;
        self.child.wait()?;
        Ok(())
    }
}

#[test]
fn cold_start_reaches_running() -> Result<()> {
    let harness = TestHarness::start("w", &["/bin/sleep", "60"])?;
    let pidfile = harness.pidfile("w");

    wait_until_file_exists(&pidfile)?;
    let child_pid = wait_until_pid_live(&pidfile)?;
    assert!(process_exists(child_pid));

    send_signal(child_pid, libc::SIGKILL)?;
    harness.stop()?;
    Ok(())
}

#[test]
fn crash_triggers_restart() -> Result<()> {
    let harness = TestHarness::start("w", &["/bin/sleep", "60"])?;
    let pidfile = harness.pidfile("w");

    let first_pid = wait_until_pid_live(&pidfile)?;
    send_signal(first_pid, libc::SIGKILL)?;

    let second_pid = wait_until(|| match read_pidfile(&pidfile) {
        Ok(pid) if pid != first_pid && process_exists(pid) => Complete(pid),
        _ => Incomplete,
    })?;
    assert_ne!(first_pid, second_pid);

    send_signal(second_pid, libc::SIGKILL)?;
    harness.stop()?;
    Ok(())
}

#[test]
fn adopts_existing_live_process_from_pidfile() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pid_dir = tmp.path().join("pids");
    fs::create_dir_all(&pid_dir)?;
    let config_path = tmp.path().join("nyxd.toml");
    fs::write(
        &config_path,
        "[[watch]]\nname = \"w\"\nstart = [\"/bin/sleep\", \"60\"]\n",
    )?;

    let mut first = nyxd_command()?
        .arg("--config")
        .arg(&config_path)
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("--foreground")
        .spawn()
        .context("failed to spawn nyxd")?;

    let pidfile = pid_dir.join("w.pid");
    let child_pid = wait_until_pid_live(&pidfile)?;

    // Kill only the supervisor; the child is left running, orphaned, with its pidfile entry
    // intact.
    send_signal(first.id() as libc::pid_t, libc::SIGTERM)?;
    wait_until_exited(&mut first)?;
    assert!(process_exists(child_pid));

    // A fresh supervisor pointed at the same pid directory must adopt the still-live child
    // rather than spawning a duplicate.
    let mut second = nyxd_command()?
        .arg("--config")
        .arg(&config_path)
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("--foreground")
        .spawn()
        .context("failed to spawn nyxd")?;

    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(
            read_pidfile(&pidfile)?,
            child_pid,
            "adoption must not spawn a duplicate"
        );
    }
    assert!(process_exists(child_pid));

    send_signal(second.id() as libc::pid_t, libc::SIGTERM)?;
    wait_until_exited(&mut second)?;
    send_signal(child_pid, libc::SIGKILL)?;
    Ok(())
}

#[test]
fn missing_executable_exits_cleanly_and_restarts() -> Result<()> {
    let harness = TestHarness::start("w", &["/no/such/executable"])?;
    // The child execs nothing, exits 0, and the supervisor should observe the exit and restart
    // it, producing a fresh pidfile entry each time rather than wedging.
    let pidfile = harness.pidfile("w");
    wait_until_file_exists(&pidfile)?;
    harness.stop()?;
    Ok(())
}

#[test]
fn graceful_shutdown_joins_workers_without_killing_children() -> Result<()> {
    // The supervisor adopts a pre-existing live process from a watch's pidfile on startup
    // (`to_unmonitored`), which only makes sense if a supervised child can outlive its
    // supervisor. Shutdown therefore only tears down the supervisor's own threads (QUIT plus
    // join); it must not reach out and kill the child.
    let mut harness = TestHarness::start("w", &["/bin/sleep", "60"])?;
    let pidfile = harness.pidfile("w");
    let child_pid = wait_until_pid_live(&pidfile)?;

    let supervisor_pid = harness.child.id() as libc::pid_t;
    send_signal(supervisor_pid, libc::SIGTERM)?;
    wait_until_exited(&mut harness.child)?;

    assert!(
        process_exists(child_pid),
        "shutdown must not kill the supervised child"
    );
    send_signal(child_pid, libc::SIGKILL)?;

    match fs::File::open(&harness.config_path) {
        Ok(_) => (),
        Err(e) if e.kind() == ErrorKind::NotFound => panic!("config should not be deleted"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
