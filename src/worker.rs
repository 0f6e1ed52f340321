//! The worker harness (spec §4.E): what runs inside a freshly forked
//! child process.
//!
//! Grounded on the commented `_tqWorker` pseudocode in `tasque/daemon.py`.
//! Per spec §9's design note, nothing is shared across the fork boundary:
//! the worker re-opens its own `Store` handle and touches only its own
//! row.

use crate::defs;
use crate::error::TasqueError;
use crate::resource::EnvVars;
use crate::store::Store;
use crate::util;
use nix::unistd::{dup, pipe};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{error, info, instrument, warn};

/// Run in the child immediately after `fork()`. Never returns: the
/// process exits from within this function so control never rejoins the
/// supervisor's tick loop in the child's address space.
///
/// `env` carries any variables a resource plugin's `acquire` exported
/// (e.g. `CUDA_VISIBLE_DEVICES`) for the spawned command to inherit.
#[instrument(skip(env), fields(task_id = id))]
pub fn run(id: i64, store_path: PathBuf, env: EnvVars) -> ! {
    let exit = match run_inner(id, &store_path, &env) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "worker harness failed before recording a result");
            1
        }
    };
    std::process::exit(exit);
}

fn run_inner(id: i64, store_path: &std::path::Path, env: &EnvVars) -> crate::error::Result<()> {
    let store = Store::open(store_path)?;
    let task = store
        .get_task(id)?
        .ok_or_else(|| TasqueError::Worker(format!("task {id} vanished before worker start")))?;

    let pid = std::process::id() as i64;
    store.mark_running(id, pid, util::now())?;
    info!(pid, cwd = %task.cwd.display(), cmd = %task.cmd, "worker starting");

    let argv = match util::tokenize(&task.cmd) {
        Ok(argv) if !argv.is_empty() => argv,
        Ok(_) => {
            warn!("empty command after tokenization");
            return finish(&store, id, -1, None);
        }
        Err(e) => {
            warn!(error = %e, "cannot tokenize command");
            return finish(&store, id, -1, None);
        }
    };

    // stdout and stderr both write into the same pipe so the two streams
    // are genuinely merged (spec §4.E step 3: "stderr merged into
    // stdout"), not just concatenated after the fact. Reading the single
    // pipe to EOF before waiting avoids the classic deadlock of draining
    // two independent pipes sequentially while the child blocks writing
    // to whichever one isn't being read.
    let (read_fd, write_fd) = pipe()?;
    let write_fd2 = dup(&write_fd)?;
    // Wrapped immediately so a failed `spawn()` below still closes the
    // read end via `File`'s `Drop` instead of leaking the fd.
    let mut reader = std::fs::File::from(read_fd);

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(&task.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_fd))
        .stderr(Stdio::from(write_fd2));
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "spawn failed");
            return finish(&store, id, -1, None);
        }
    };

    install_sigterm_forwarder(&child);

    let child_pid = child.id();
    let mut combined = Vec::new();
    let _ = reader.read_to_end(&mut combined);

    let status = child.wait()?;
    let retval = status.code().unwrap_or(-1);
    info!(retval, child_pid, "worker command finished");

    finish(&store, id, retval, Some(combined))
}

fn finish(store: &Store, id: i64, retval: i32, output: Option<Vec<u8>>) -> crate::error::Result<()> {
    if let Some(bytes) = output {
        if !bytes.is_empty() {
            write_output(id, &bytes)?;
        }
    }
    store.mark_done(id, retval, util::now())?;
    Ok(())
}

/// Stream-compress the captured output to
/// `tq_id-<ID>_<YYYYMMDD.HHMMSS>.stdout.zst` next to the store file (spec
/// §4.E step 6 / §6).
fn write_output(id: i64, bytes: &[u8]) -> crate::error::Result<()> {
    let stamp = chrono::Local::now().format("%Y%m%d.%H%M%S");
    let path = defs::tasque_dir().join(format!("tq_id-{id}_{stamp}.stdout.zst"));
    let file = std::fs::File::create(&path)?;
    let mut encoder = zstd::stream::Encoder::new(file, 0)?;
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

/// Forward `SIGTERM` to the running child and exit without writing a
/// return value, so the row surfaces as Accident on the next reconcile
/// pass (spec §4.E step 4).
///
/// `nix` signal handlers must be async-signal-safe; the child pid is
/// captured by value ahead of time and only `kill` + `_exit` are called
/// from the handler itself.
fn install_sigterm_forwarder(child: &std::process::Child) {
    use nix::sys::signal::{self, SigHandler, Signal};
    use nix::unistd::Pid;
    use std::sync::atomic::{AtomicI32, Ordering};

    static CHILD_PID: AtomicI32 = AtomicI32::new(0);
    CHILD_PID.store(child.id() as i32, Ordering::SeqCst);

    extern "C" fn handler(_sig: i32) {
        let pid = CHILD_PID.load(std::sync::atomic::Ordering::SeqCst);
        if pid > 0 {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
        std::process::exit(143);
    }

    unsafe {
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use tempfile::tempdir;

    #[test]
    fn run_inner_records_success_and_compresses_output() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("tasq.db")).unwrap();
        let task = Task::new(1, "/tmp", "echo hello-from-worker", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();

        run_inner(1, store.path(), &Vec::new()).unwrap();

        let row = store.get_task(1).unwrap().unwrap();
        assert_eq!(row.retval, Some(0));
        assert!(row.pid.is_none());
        assert!(row.stime.is_some());
        assert!(row.etime.is_some());

        let has_output = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("tq_id-1_"));
        assert!(has_output);
    }

    #[test]
    fn run_inner_records_nonzero_exit() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("tasq.db")).unwrap();
        let task = Task::new(1, "/tmp", "/bin/false", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();

        run_inner(1, store.path(), &Vec::new()).unwrap();

        let row = store.get_task(1).unwrap().unwrap();
        assert_eq!(row.retval, Some(1));
    }

    #[test]
    fn spawn_failure_records_negative_one_with_no_output_file() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("tasq.db")).unwrap();
        let task = Task::new(1, "/tmp", "/no/such/binary-xyz", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();

        run_inner(1, store.path(), &Vec::new()).unwrap();

        let row = store.get_task(1).unwrap().unwrap();
        assert_eq!(row.retval, Some(-1));
        let has_output = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("tq_id-1_"));
        assert!(!has_output);
    }
}
