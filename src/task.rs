//! The Task model (spec §3, §4.B): an immutable tuple of nine attributes.
//!
//! Grounded on `tasque/defs.py`'s `Task` namedtuple and the nullability
//! convention documented in `tasque/db.py`/`tasque/utils.py`
//! (`null2none`/`none2null`). Per spec §9's design note, the `"null"`
//! string sentinel is not reproduced here: every field that may be absent
//! is a genuine `Option<T>`, mapped to SQL `NULL` only at the store
//! boundary (`crate::store`).

use crate::error::{Result, TasqueError};
use std::path::{Path, PathBuf};

/// One queued command line and its lifecycle record.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Task {
    pub id: i64,
    pub pid: Option<i64>,
    pub cwd: PathBuf,
    pub cmd: String,
    pub retval: Option<i32>,
    pub stime: Option<f64>,
    pub etime: Option<f64>,
    pub pri: i64,
    pub rsc: f64,
}

/// The four states defined by `(pid, retval)` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Running(i64),
    Done(i32),
    Accident,
}

impl Task {
    /// Construct a brand-new Waiting task, enforcing the constraints in
    /// spec §4.B: `id` positive, `cwd` absolute, `cmd` non-empty, `rsc`
    /// non-negative. All other fields begin absent.
    pub fn new(id: i64, cwd: impl Into<PathBuf>, cmd: impl Into<String>, pri: i64, rsc: f64) -> Result<Task> {
        let cwd = cwd.into();
        let cmd = cmd.into();
        if id <= 0 {
            return Err(TasqueError::Usage(format!("task id must be positive, got {id}")));
        }
        if !cwd.is_absolute() {
            return Err(TasqueError::Usage(format!("cwd must be absolute: {}", cwd.display())));
        }
        if cmd.trim().is_empty() {
            return Err(TasqueError::Usage("cmd must not be empty".into()));
        }
        if rsc < 0.0 {
            return Err(TasqueError::Usage(format!("rsc must be non-negative, got {rsc}")));
        }
        Ok(Task {
            id,
            pid: None,
            cwd,
            cmd,
            retval: None,
            stime: None,
            etime: None,
            pri,
            rsc,
        })
    }

    /// Reassemble a `Task` from raw store columns. Used by
    /// `crate::store` after decoding SQL NULLs into `None`. Performs no
    /// validation beyond what the store's schema already guarantees,
    /// since a row that made it into the table was validated at
    /// `enqueue` time.
    #[allow(clippy::too_many_arguments)]
    pub fn from_row(
        id: i64,
        pid: Option<i64>,
        cwd: PathBuf,
        cmd: String,
        retval: Option<i32>,
        stime: Option<f64>,
        etime: Option<f64>,
        pri: i64,
        rsc: f64,
    ) -> Task {
        Task { id, pid, cwd, cmd, retval, stime, etime, pri, rsc }
    }

    /// Classify `(pid, retval)` into one of the four lifecycle states
    /// (spec §3's state table). `pid`/`retval` combinations other than
    /// the four documented ones cannot arise from any transition this
    /// crate performs, but `Accident` is returned as the safe default
    /// for any `pid <= 0` reading, matching the reconcile pass's own
    /// sentinel.
    pub fn state(&self) -> TaskState {
        match (self.pid, self.retval) {
            (None, None) => TaskState::Waiting,
            (None, Some(rv)) => TaskState::Done(rv),
            (Some(p), None) if p > 0 => TaskState::Running(p),
            (Some(_), None) => TaskState::Accident,
            (Some(_), Some(rv)) => TaskState::Done(rv),
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.state(), TaskState::Waiting)
    }

    pub fn cwd_path(&self) -> &Path {
        &self.cwd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_cwd() {
        let err = Task::new(1, "rel/path", "/bin/true", 0, 0.0).unwrap_err();
        assert!(matches!(err, TasqueError::Usage(_)));
    }

    #[test]
    fn rejects_empty_cmd() {
        let err = Task::new(1, "/tmp", "   ", 0, 0.0).unwrap_err();
        assert!(matches!(err, TasqueError::Usage(_)));
    }

    #[test]
    fn rejects_nonpositive_id() {
        assert!(Task::new(0, "/tmp", "/bin/true", 0, 0.0).is_err());
        assert!(Task::new(-1, "/tmp", "/bin/true", 0, 0.0).is_err());
    }

    #[test]
    fn fresh_task_is_waiting() {
        let t = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        assert_eq!(t.state(), TaskState::Waiting);
    }

    #[test]
    fn state_classification() {
        let mut t = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        assert_eq!(t.state(), TaskState::Waiting);
        t.pid = Some(4242);
        assert_eq!(t.state(), TaskState::Running(4242));
        t.pid = None;
        t.retval = Some(0);
        assert_eq!(t.state(), TaskState::Done(0));
        t.retval = None;
        t.pid = Some(-1);
        assert_eq!(t.state(), TaskState::Accident);
    }
}
