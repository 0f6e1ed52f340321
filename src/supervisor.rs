//! The supervisor main loop (spec §4.D): dispatcher, admission, fork,
//! reap, reconcile.
//!
//! Grounded on the commented `_tqDaemon`/`_tqCheckWorkerAlive` pseudocode
//! in `tasque/daemon.py`. The resource book (spec §4.C, §5) lives only in
//! this process; nothing about it is shared with workers across `fork()`
//! (spec §9).

use crate::error::Result;
use crate::resource::{EnvVars, ResourcePlugin};
use crate::store::Store;
use crate::task::Task;
use crate::util;
use crate::worker;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, read, write, ForkResult, Pid};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const TICK: Duration = Duration::from_secs(1);

static TERM_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_sig: i32) {
    TERM_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_term_handler() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    unsafe {
        let _ = signal(Signal::SIGTERM, SigHandler::Handler(on_sigterm));
    }
}

pub fn term_requested() -> bool {
    TERM_REQUESTED.load(Ordering::SeqCst)
}

struct WorkerHandle {
    pid: i64,
    task_id: i64,
}

pub struct Supervisor {
    store: Store,
    resource: Box<dyn ResourcePlugin>,
    workers: Vec<WorkerHandle>,
}

impl Supervisor {
    pub fn new(store: Store, resource: Box<dyn ResourcePlugin>) -> Supervisor {
        Supervisor { store, resource, workers: Vec::new() }
    }

    /// Run until `SIGTERM` is observed. Callers (the `start` client
    /// operation) are responsible for the pidfile lifecycle around this
    /// call (spec §4.D step 3).
    pub fn run_forever(&mut self) -> Result<()> {
        install_term_handler();
        self.reconcile()?;
        info!(resource = self.resource.name(), "supervisor started");
        while !term_requested() {
            if let Err(e) = self.tick() {
                error!(error = %e, "tick failed, continuing");
            }
            std::thread::sleep(TICK);
        }
        info!("supervisor received SIGTERM, stopping");
        Ok(())
    }

    /// For every Running row, probe pid liveness and transition dead ones
    /// to Accident (spec §4.D reconcile pass).
    #[instrument(skip(self))]
    pub fn reconcile(&self) -> Result<()> {
        reconcile(&self.store)
    }

    /// One iteration of the main loop (spec §4.D steps 1-6).
    pub fn tick(&mut self) -> Result<()> {
        let waiting = self.store.list_waiting()?;
        if waiting.is_empty() {
            return self.reap_workers();
        }

        let hpri = self
            .store
            .highest_waiting_priority()?
            .expect("waiting set is non-empty, so a max priority exists");
        let candidates = self.store.list_waiting_at_priority(hpri)?;

        for task in candidates {
            if self.resource.canalloc(task.rsc) {
                self.dispatch(&task)?;
                break;
            }
        }

        self.reap_workers()?;
        debug!(book = ?self.resource.booked(), "resource book after tick");
        Ok(())
    }

    /// Fork a worker for `task`, admitting it against the resource book
    /// bound to the real child pid (spec §4.D step 4).
    ///
    /// A pipe hands the worker its admitted environment once the parent
    /// has computed it, since `acquire` can only run after the real pid
    /// is known (spec §4.D: "reservation is completed after fork by
    /// re-binding to the actual child pid").
    fn dispatch(&mut self, task: &Task) -> Result<()> {
        let (read_fd, write_fd) = pipe()?;

        match unsafe { fork() }? {
            ForkResult::Child => {
                drop(write_fd);
                let env = read_env(&read_fd);
                drop(read_fd);
                worker::run(task.id, self.store.path().to_path_buf(), env);
            }
            ForkResult::Parent { child } => {
                drop(read_fd);
                let pid = child.as_raw() as i64;
                let env = match self.resource.acquire(pid, task.rsc) {
                    Ok(env) => env,
                    Err(e) => {
                        error!(error = %e, task_id = task.id, "acquire failed after fork, continuing without env");
                        EnvVars::new()
                    }
                };
                write_env(&write_fd, &env);
                drop(write_fd);
                info!(task_id = task.id, pid, "dispatched worker");
                self.workers.push(WorkerHandle { pid, task_id: task.id });
            }
        }
        Ok(())
    }

    /// Join any child whose exit the OS has already reported, release its
    /// resource share, and drop it from the registry (spec §4.D step 5).
    fn reap_workers(&mut self) -> Result<()> {
        let mut still_running = Vec::with_capacity(self.workers.len());
        for handle in self.workers.drain(..) {
            match waitpid(Pid::from_raw(handle.pid as i32), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => still_running.push(handle),
                Ok(_) => self.resource.release(handle.pid),
                Err(_) => self.resource.release(handle.pid),
            }
        }
        self.workers = still_running;
        Ok(())
    }
}

/// For every Running row, probe pid liveness and transition dead ones to
/// Accident (spec §4.D). Run once at supervisor startup, on every tick
/// indirectly via the supervisor's own `Supervisor::reconcile`, and once
/// per client connection as a hygiene measure (spec §4.D: "also invoked
/// once per client connection") — `main.rs` calls this right after
/// opening the store for any task-touching subcommand.
#[instrument(skip(store))]
pub fn reconcile(store: &Store) -> Result<()> {
    for task in store.list_running()? {
        let Some(pid) = task.pid else { continue };
        if !util::checkpid(pid) {
            warn!(task_id = task.id, pid, "reconcile: worker gone, marking Accident");
            store.mark_accident(task.id)?;
        }
    }
    Ok(())
}

fn read_env(fd: &OwnedFd) -> EnvVars {
    use std::os::fd::AsRawFd;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        match read(fd.as_raw_fd(), &mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf)
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_env(fd: &OwnedFd, env: &EnvVars) {
    use std::os::fd::AsRawFd;
    let mut encoded = String::new();
    for (k, v) in env {
        encoded.push_str(k);
        encoded.push('=');
        encoded.push_str(v);
        encoded.push('\n');
    }
    let _ = write(fd.as_raw_fd(), encoded.as_bytes());
}
