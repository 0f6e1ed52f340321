//! Daemonization and pidfile lifecycle (spec §4.D startup sequence).
//!
//! Grounded on the double-fork pattern sketched (commented out) in
//! `tasque/daemon.py`'s `daemonize()`, reimplemented with `nix` instead
//! of raw `os.fork()`/`atexit`, and on `tasque/client.py`'s
//! `isdaemonalive` for the pidfile-liveness check.

use crate::error::Result;
use crate::util::checkpid;
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult};
use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Read the pidfile and probe the process it names. Removes the pidfile
/// as a side effect if the process is gone (spec §4.F's
/// `isdaemonalive()`).
pub fn daemon_alive(pid_path: &Path) -> Result<Option<i64>> {
    let Ok(contents) = fs::read_to_string(pid_path) else {
        return Ok(None);
    };
    let Ok(pid) = contents.trim().parse::<i64>() else {
        let _ = fs::remove_file(pid_path);
        return Ok(None);
    };
    if checkpid(pid) {
        Ok(Some(pid))
    } else {
        let _ = fs::remove_file(pid_path);
        Ok(None)
    }
}

pub fn write_pidfile(pid_path: &Path, pid: i64) -> Result<()> {
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(pid_path, format!("{pid}\n"))?;
    Ok(())
}

pub fn remove_pidfile(pid_path: &Path) {
    let _ = fs::remove_file(pid_path);
}

/// Detach from the controlling terminal using the standard double-fork
/// pattern (spec §4.D step 2): fork, `setsid`, fork again, `chdir("/")`,
/// reset umask, redirect stdin/stdout/stderr to `log_path`.
///
/// Returns only in the final grandchild process — the caller is expected
/// to immediately write its own pidfile and enter the supervisor loop.
/// Both intermediate processes call `std::process::exit` and never
/// return, matching `raise SystemExit(0)` in the original pseudocode.
pub fn daemonize(log_path: &Path) -> Result<()> {
    // First fork: detach the immediate parent.
    match unsafe { unistd::fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::setsid()?;

    // Second fork: relinquish session leadership so the daemon can never
    // reacquire a controlling terminal.
    match unsafe { unistd::fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unistd::chdir("/")?;
    unistd::umask(Mode::empty());

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    let log_fd = log_file.as_raw_fd();

    let devnull = fs::File::open("/dev/null")?;
    unistd::dup2(devnull.as_raw_fd(), libc_stdin())?;
    unistd::dup2(log_fd, libc_stdout())?;
    unistd::dup2(log_fd, libc_stderr())?;
    std::mem::forget(log_file);
    std::mem::forget(devnull);

    Ok(())
}

fn libc_stdin() -> i32 {
    0
}
fn libc_stdout() -> i32 {
    1
}
fn libc_stderr() -> i32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn daemon_alive_false_when_pidfile_absent() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("tasque.pid");
        assert_eq!(daemon_alive(&pid_path).unwrap(), None);
    }

    #[test]
    fn daemon_alive_true_for_self_and_removes_stale_entry() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("tasque.pid");
        write_pidfile(&pid_path, std::process::id() as i64).unwrap();
        assert_eq!(daemon_alive(&pid_path).unwrap(), Some(std::process::id() as i64));

        // A pid that (almost certainly) doesn't exist gets cleaned up.
        write_pidfile(&pid_path, 999_999_999).unwrap();
        assert_eq!(daemon_alive(&pid_path).unwrap(), None);
        assert!(!pid_path.exists());
    }
}
