//! The client operations (spec §4.F), consumed by the CLI in `main.rs`.
//!
//! Grounded on `tasque/client.py`'s `tqClient` (and its commented
//! `tqEdit`/`tqNote`/`tqDelNote`/`tqDumpNotes` methods), plus the
//! `purge()` method dropped from spec.md's distillation (see
//! `DESIGN.md`).

use crate::daemonize;
use crate::defs;
use crate::error::{Result, TasqueError};
use crate::resource::{self, ResourcePlugin};
use crate::store::{Note, Store};
use crate::supervisor::Supervisor;
use crate::task::Task;
use crate::util;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::info;

pub fn enqueue(store: &Store, cwd: impl Into<std::path::PathBuf>, cmd: &str, pri: i64, rsc: Option<f64>) -> Result<i64> {
    let rsc = match rsc {
        Some(rsc) => rsc,
        None => resource::create(&store.resource_name()?)?.default_rsc(),
    };
    let id = store.next_task_id()?;
    let task = Task::new(id, cwd, cmd, pri, rsc)?;
    store.insert_task(&task)?;
    info!(id, cmd, "enqueued");
    Ok(id)
}

/// Deletes the row only if it is not Running (spec §4.F).
pub fn dequeue(store: &Store, id: i64) -> Result<bool> {
    store.dequeue(id)
}

/// Deletes all Done rows and their notes.
pub fn clear(store: &Store) -> Result<Vec<i64>> {
    store.clear_done()
}

/// Sends `SIGTERM` to the row's pid if it is Running and alive; does not
/// mutate the row itself (the worker's own handler drives the Accident
/// transition on next reconcile).
pub fn kill(store: &Store, id: i64) -> Result<bool> {
    let Some(task) = store.get_task(id)? else {
        return Err(TasqueError::Usage(format!("no such task: {id}")));
    };
    let Some(pid) = task.pid else {
        return Ok(false);
    };
    if pid <= 0 || !util::checkpid(pid) {
        return Ok(false);
    }
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    Ok(true)
}

pub fn annotate(store: &Store, id: i64, note: &str) -> Result<i64> {
    if store.get_task(id)?.is_none() {
        return Err(TasqueError::Usage(format!("no such task: {id}")));
    }
    store.annotate(id, note)
}

pub fn delannotation(store: &Store, noteid: i64) -> Result<bool> {
    store.delannotation(noteid)
}

pub fn dumpannotation(store: &Store) -> Result<Vec<Note>> {
    store.list_notes()
}

/// Updates priority and/or resource weight of a Waiting row.
pub fn edit(store: &Store, id: i64, pri: Option<i64>, rsc: Option<f64>) -> Result<bool> {
    if pri.is_none() && rsc.is_none() {
        return Err(TasqueError::Usage("edit requires at least one of --pri/--rsc".into()));
    }
    store.edit_waiting(id, pri, rsc)
}

/// Reads the pidfile and probes the process; removes the pidfile as a
/// side effect if the process is gone.
pub fn isdaemonalive() -> Result<Option<i64>> {
    daemonize::daemon_alive(&defs::tasque_pid())
}

/// Removes the store and log files. Refuses while the supervisor is
/// alive (supplemented from `tasque/client.py`'s `purge`, dropped by
/// spec.md's distillation — see `SPEC_FULL.md` §C).
pub fn purge(store_path: &std::path::Path) -> Result<()> {
    if isdaemonalive()?.is_some() {
        return Err(TasqueError::Usage("refusing to purge while the supervisor is running".into()));
    }
    if store_path.exists() {
        std::fs::remove_file(store_path)?;
    }
    let log_path = defs::tasque_log();
    if log_path.exists() {
        std::fs::remove_file(&log_path)?;
    }
    Ok(())
}

/// Launches the supervisor as a daemon (spec §4.D startup sequence).
/// Refuses if the pidfile names a live process.
pub fn start() -> Result<()> {
    let pid_path = defs::tasque_pid();
    if isdaemonalive()?.is_some() {
        return Err(TasqueError::Usage("supervisor already running".into()));
    }

    daemonize::daemonize(&defs::tasque_log())?;
    let _log_guard = crate::logging::init_daemon();

    daemonize::write_pidfile(&pid_path, std::process::id() as i64)?;
    let store = Store::open_default()?;
    let resource_name = store.resource_name()?;
    let plugin = resource::create(&resource_name)?;
    let mut supervisor = Supervisor::new(store, plugin);
    let result = supervisor.run_forever();
    daemonize::remove_pidfile(&pid_path);
    result
}

/// Sends `SIGTERM` to the pidfile's process.
pub fn stop() -> Result<bool> {
    let Some(pid) = isdaemonalive()? else {
        return Ok(false);
    };
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_tmp() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("tasq.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn enqueue_assigns_ids_in_order_p1() {
        let (_dir, store) = open_tmp();
        assert_eq!(enqueue(&store, "/tmp", "/bin/true", 0, None).unwrap(), 1);
        assert_eq!(enqueue(&store, "/tmp", "/bin/true", 0, None).unwrap(), 2);
        assert_eq!(enqueue(&store, "/tmp", "/bin/true", 0, None).unwrap(), 3);
    }

    #[test]
    fn kill_refuses_waiting_task() {
        let (_dir, store) = open_tmp();
        let id = enqueue(&store, "/tmp", "/bin/true", 0, None).unwrap();
        assert!(!kill(&store, id).unwrap());
    }

    #[test]
    fn kill_unknown_task_is_usage_error() {
        let (_dir, store) = open_tmp();
        assert!(matches!(kill(&store, 42), Err(TasqueError::Usage(_))));
    }

    #[test]
    fn edit_requires_a_field() {
        let (_dir, store) = open_tmp();
        let id = enqueue(&store, "/tmp", "/bin/true", 0, None).unwrap();
        assert!(edit(&store, id, None, None).is_err());
        assert!(edit(&store, id, Some(3), None).unwrap());
    }

    #[test]
    fn annotate_unknown_task_is_usage_error() {
        let (_dir, store) = open_tmp();
        assert!(matches!(annotate(&store, 1, "x"), Err(TasqueError::Usage(_))));
    }
}
