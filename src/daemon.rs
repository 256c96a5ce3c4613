//! Detached-mode lifecycle: pidfiles and signals.
//!
//! `grue start` re-execs itself with `--foreground` and lets the child
//! write its own pidfile; `grue stop` and `grue status` work off that
//! file. Signal delivery is unix-only, which is also where the game
//! interpreters live.

use anyhow::{Context, Result, bail};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

/// What the pidfile says about a detached bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Running { pid: i32 },
    /// A pidfile exists but no such process does.
    Stale { pid: i32 },
    NotRunning,
}

/// Record the calling process in `path`, creating parent directories.
pub fn write_pidfile(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("failed to write pidfile {}", path.display()))
}

pub fn read_pidfile(path: &Path) -> Result<i32> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("no pidfile at {} (is the bridge running?)", path.display()))?;
    contents
        .trim()
        .parse()
        .with_context(|| format!("pidfile {} does not contain a pid", path.display()))
}

/// Best-effort removal; a missing file is not worth reporting.
pub fn remove_pidfile(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "could not remove pidfile");
        }
    }
}

/// True when a process with this pid exists.
#[cfg(unix)]
pub fn process_exists(pid: i32) -> bool {
    // SAFETY: signal 0 performs existence checking only, nothing is
    // delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: i32) -> bool {
    false
}

#[cfg(unix)]
fn send_sigterm(pid: i32) -> Result<()> {
    // SAFETY: ordinary signal delivery to a pid read from our pidfile.
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        bail!("process {pid} is not running");
    }
    Err(err).with_context(|| format!("failed to signal process {pid}"))
}

#[cfg(not(unix))]
fn send_sigterm(_pid: i32) -> Result<()> {
    bail!("stopping a detached bridge is only supported on unix");
}

/// Report on the bridge the pidfile points at.
pub fn status(pidfile: &Path) -> BridgeStatus {
    let Ok(pid) = read_pidfile(pidfile) else {
        return BridgeStatus::NotRunning;
    };
    if process_exists(pid) {
        BridgeStatus::Running { pid }
    } else {
        BridgeStatus::Stale { pid }
    }
}

/// Stop a detached bridge: SIGTERM to the recorded pid, then wait for the
/// process to go away. The pidfile is removed on success and when found
/// stale.
pub fn stop(pidfile: &Path, wait: Duration) -> Result<i32> {
    let pid = read_pidfile(pidfile)?;
    if !process_exists(pid) {
        remove_pidfile(pidfile);
        bail!("process {pid} is not running (stale pidfile removed)");
    }
    send_sigterm(pid)?;

    let deadline = Instant::now() + wait;
    while process_exists(pid) {
        if Instant::now() >= deadline {
            bail!(
                "process {pid} did not exit within {}s (kill it manually?)",
                wait.as_secs()
            );
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    remove_pidfile(pidfile);
    Ok(pid)
}

/// Re-exec the current binary as a background bridge. The child runs
/// `start --foreground` with stdout/stderr appended to a timestamped log
/// file, and writes its own pidfile once up. Returns the child pid and
/// the log path.
pub fn spawn_detached(log_dir: &Path, forward_args: &[String]) -> Result<(u32, PathBuf)> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let mut cmd = Command::new(exe);
    cmd.arg("start").arg("--foreground");
    cmd.args(forward_args);

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let log_path = log_dir.join(format!("detached-{ts}.log"));
    let stdout_log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let stderr_log = stdout_log.try_clone()?;

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .spawn()
        .context("failed to spawn detached bridge")?;

    Ok((child.id(), log_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pidfile_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("grue.pid");

        write_pidfile(&path).unwrap();
        assert_eq!(read_pidfile(&path).unwrap(), std::process::id() as i32);

        remove_pidfile(&path);
        assert!(!path.exists());
        // Removing again is quiet.
        remove_pidfile(&path);
    }

    #[test]
    fn read_pidfile_missing_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let err = read_pidfile(&tmp.path().join("grue.pid")).unwrap_err();
        assert!(err.to_string().contains("no pidfile"));
    }

    #[test]
    fn read_pidfile_garbage_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grue.pid");
        std::fs::write(&path, "not a pid\n").unwrap();
        let err = read_pidfile(&path).unwrap_err();
        assert!(err.to_string().contains("does not contain a pid"));
    }

    #[cfg(unix)]
    #[test]
    fn own_process_exists() {
        assert!(process_exists(std::process::id() as i32));
    }

    #[cfg(unix)]
    #[test]
    fn status_reflects_pidfile_state() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grue.pid");

        assert_eq!(status(&path), BridgeStatus::NotRunning);

        std::fs::write(&path, std::process::id().to_string()).unwrap();
        assert_eq!(
            status(&path),
            BridgeStatus::Running {
                pid: std::process::id() as i32
            }
        );

        // A pid far past pid_max can't exist.
        std::fs::write(&path, "999999999").unwrap();
        assert_eq!(status(&path), BridgeStatus::Stale { pid: 999_999_999 });
    }

    #[cfg(unix)]
    #[test]
    fn stop_terminates_the_recorded_process() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grue.pid");

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, child.id().to_string()).unwrap();
        // Reap promptly so the signal-0 check stops seeing a zombie.
        let waiter = std::thread::spawn(move || {
            let _ = child.wait();
        });

        let pid = stop(&path, Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert!(!process_exists(pid));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn stop_cleans_up_stale_pidfile() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("grue.pid");
        std::fs::write(&path, "999999999").unwrap();

        let err = stop(&path, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("stale pidfile removed"));
        assert!(!path.exists());
    }
}
