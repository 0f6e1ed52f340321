//! The durable, transactional tabular store (spec §4.A).
//!
//! Grounded on `tasque/db.py`'s `tqDB`: every call opens a connection,
//! runs one statement (or a small typed operation built from one
//! statement), commits, and closes — there is no long-lived transaction,
//! so a crash of any actor (client, supervisor, worker) at any point
//! leaves the file in a consistent state. `rusqlite` (bundled SQLite)
//! stands in for the original's `sqlite3` module; it is the one
//! dependency in this crate with no precedent elsewhere in the retrieval
//! pack, because none of the example repos embed a local single-file SQL
//! store (see `DESIGN.md`).

use crate::defs;
use crate::error::Result;
use crate::task::Task;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Note {
    pub noteid: i64,
    pub id: i64,
    pub note: String,
}

pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open (and, if necessary, create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Store> {
        let path = path.into();
        let store = Store { path };
        store.init()?;
        Ok(store)
    }

    /// Open the store at the default/env-derived location (spec §6).
    pub fn open_default() -> Result<Store> {
        Store::open(defs::tasque_db())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Create the schema and seed config if the store file does not yet
    /// exist. A no-op otherwise (spec §4.A: "creates the schema and
    /// seeds config when the file does not exist").
    fn init(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.connect()?;
        conn.execute_batch(&format!(
            "CREATE TABLE {config} (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE {tq} (
                 id INTEGER PRIMARY KEY,
                 pid INTEGER,
                 cwd TEXT NOT NULL,
                 cmd TEXT NOT NULL,
                 retval INTEGER,
                 stime REAL,
                 etime REAL,
                 pri INTEGER NOT NULL DEFAULT 0,
                 rsc REAL NOT NULL DEFAULT 0
             );
             CREATE TABLE {notes} (
                 noteid INTEGER PRIMARY KEY,
                 id INTEGER NOT NULL,
                 note TEXT NOT NULL
             );",
            config = defs::DB_TABLE_CONFIG,
            tq = defs::DB_TABLE_TASQUE,
            notes = defs::DB_TABLE_NOTES,
        ))?;
        conn.execute(
            &format!("INSERT INTO {} (key, value) VALUES (?1, ?2)", defs::DB_TABLE_CONFIG),
            params![defs::CONFIG_KEY_RESOURCE, defs::initial_resource()],
        )?;
        Ok(())
    }

    /// Raw mutating statement (spec §4.A's `exec(stmt)`).
    pub fn exec(&self, sql: &str, sql_params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        let conn = self.connect()?;
        Ok(conn.execute(sql, sql_params)?)
    }

    // ---- Task table -----------------------------------------------------

    /// `max(existing id) + 1`, or 1 if the table is empty (spec §3). The
    /// caller races with other client/worker processes on this read; the
    /// system tolerates that (spec §5) because `id` strictly increases
    /// regardless of interleaving, it's never reused, and a collision
    /// would only occur if two inserts both won the same `max+1` race,
    /// which the `id` column's `PRIMARY KEY` constraint turns into a
    /// retryable insert failure rather than silent corruption.
    pub fn next_task_id(&self) -> Result<i64> {
        let conn = self.connect()?;
        let max: Option<i64> = conn.query_row(
            &format!("SELECT MAX(id) FROM {}", defs::DB_TABLE_TASQUE),
            [],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, pid, cwd, cmd, retval, stime, etime, pri, rsc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                defs::DB_TABLE_TASQUE
            ),
            params![
                task.id,
                task.pid,
                task.cwd.to_string_lossy(),
                task.cmd,
                task.retval,
                task.stime,
                task.etime,
                task.pri,
                task.rsc,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", TASK_COLUMNS, defs::DB_TABLE_TASQUE),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks_where("1=1")
    }

    pub fn list_waiting(&self) -> Result<Vec<Task>> {
        self.list_tasks_where("pid IS NULL AND retval IS NULL")
    }

    pub fn list_waiting_at_priority(&self, pri: i64) -> Result<Vec<Task>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE pid IS NULL AND retval IS NULL AND pri = ?1 ORDER BY id ASC",
            TASK_COLUMNS,
            defs::DB_TABLE_TASQUE
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pri], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn highest_waiting_priority(&self) -> Result<Option<i64>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                "SELECT MAX(pri) FROM {} WHERE pid IS NULL AND retval IS NULL",
                defs::DB_TABLE_TASQUE
            ),
            [],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn list_running(&self) -> Result<Vec<Task>> {
        self.list_tasks_where("pid IS NOT NULL AND pid > 0")
    }

    fn list_tasks_where(&self, predicate: &str) -> Result<Vec<Task>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY id ASC",
            TASK_COLUMNS,
            defs::DB_TABLE_TASQUE,
            predicate
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Worker-start transition: `pid <- child pid, stime <- now()`
    /// (spec §4.E step 1).
    pub fn mark_running(&self, id: i64, pid: i64, stime: f64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!("UPDATE {} SET pid = ?1, stime = ?2 WHERE id = ?3", defs::DB_TABLE_TASQUE),
            params![pid, stime, id],
        )?;
        Ok(())
    }

    /// Worker-completion transition: `retval <- status, etime <- now(),
    /// pid <- absent` (spec §4.E step 7).
    pub fn mark_done(&self, id: i64, retval: i32, etime: f64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "UPDATE {} SET retval = ?1, etime = ?2, pid = NULL WHERE id = ?3",
                defs::DB_TABLE_TASQUE
            ),
            params![retval, etime, id],
        )?;
        Ok(())
    }

    /// Reconcile transition: `pid <- -1`, `retval` stays absent (spec
    /// §4.D). Routed through the raw `exec` primitive (spec §4.A) since
    /// it's a single unparameterized-shape statement with nothing left
    /// to type.
    pub fn mark_accident(&self, id: i64) -> Result<()> {
        self.exec(&format!("UPDATE {} SET pid = -1 WHERE id = ?1", defs::DB_TABLE_TASQUE), &[&id])?;
        Ok(())
    }

    /// `dequeue(id)` (spec §4.F): delete only if not Running. Returns
    /// whether a row was actually removed.
    pub fn dequeue(&self, id: i64) -> Result<bool> {
        self.delete_notes_for_task(id)?;
        let conn = self.connect()?;
        let n = conn.execute(
            &format!(
                "DELETE FROM {} WHERE (pid IS NULL OR pid < 0) AND id = ?1",
                defs::DB_TABLE_TASQUE
            ),
            params![id],
        )?;
        Ok(n > 0)
    }

    /// `clear()` (spec §4.F): delete every Done row and its notes.
    pub fn clear_done(&self) -> Result<Vec<i64>> {
        let conn = self.connect()?;
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT id FROM {} WHERE retval IS NOT NULL",
                defs::DB_TABLE_TASQUE
            ))?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        for id in &ids {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", defs::DB_TABLE_NOTES),
                params![id],
            )?;
        }
        conn.execute(
            &format!("DELETE FROM {} WHERE retval IS NOT NULL", defs::DB_TABLE_TASQUE),
            [],
        )?;
        Ok(ids)
    }

    /// `edit(id, pri?, rsc?)` (spec §4.F): only touches a Waiting row.
    pub fn edit_waiting(&self, id: i64, pri: Option<i64>, rsc: Option<f64>) -> Result<bool> {
        let conn = self.connect()?;
        let mut n = 0;
        if let Some(pri) = pri {
            n += conn.execute(
                &format!(
                    "UPDATE {} SET pri = ?1 WHERE id = ?2 AND pid IS NULL AND retval IS NULL",
                    defs::DB_TABLE_TASQUE
                ),
                params![pri, id],
            )?;
        }
        if let Some(rsc) = rsc {
            n += conn.execute(
                &format!(
                    "UPDATE {} SET rsc = ?1 WHERE id = ?2 AND pid IS NULL AND retval IS NULL",
                    defs::DB_TABLE_TASQUE
                ),
                params![rsc, id],
            )?;
        }
        Ok(n > 0)
    }

    // ---- Notes table ------------------------------------------------------

    pub fn annotate(&self, id: i64, note: &str) -> Result<i64> {
        let conn = self.connect()?;
        let max: Option<i64> =
            conn.query_row(&format!("SELECT MAX(noteid) FROM {}", defs::DB_TABLE_NOTES), [], |row| {
                row.get(0)
            })?;
        let noteid = max.unwrap_or(0) + 1;
        conn.execute(
            &format!("INSERT INTO {} (noteid, id, note) VALUES (?1, ?2, ?3)", defs::DB_TABLE_NOTES),
            params![noteid, id, note],
        )?;
        Ok(noteid)
    }

    pub fn delannotation(&self, noteid: i64) -> Result<bool> {
        let conn = self.connect()?;
        let n = conn.execute(
            &format!("DELETE FROM {} WHERE noteid = ?1", defs::DB_TABLE_NOTES),
            params![noteid],
        )?;
        Ok(n > 0)
    }

    fn delete_notes_for_task(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", defs::DB_TABLE_NOTES), params![id])?;
        Ok(())
    }

    pub fn list_notes(&self) -> Result<Vec<Note>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT noteid, id, note FROM {} ORDER BY noteid ASC",
            defs::DB_TABLE_NOTES
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(Note {
                noteid: row.get(0)?,
                id: row.get(1)?,
                note: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn notes_for_task(&self, id: i64) -> Result<Vec<Note>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT noteid, id, note FROM {} WHERE id = ?1 ORDER BY noteid ASC",
            defs::DB_TABLE_NOTES
        ))?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(Note {
                noteid: row.get(0)?,
                id: row.get(1)?,
                note: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- Config table -------------------------------------------------

    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT value FROM {} WHERE key = ?1", defs::DB_TABLE_CONFIG),
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                t = defs::DB_TABLE_CONFIG
            ),
            params![key, value],
        )?;
        Ok(())
    }

    pub fn resource_name(&self) -> Result<String> {
        Ok(self
            .config_get(defs::CONFIG_KEY_RESOURCE)?
            .unwrap_or_else(|| defs::RESOURCE_DEFAULT.to_string()))
    }
}

const TASK_COLUMNS: &str = "id, pid, cwd, cmd, retval, stime, etime, pri, rsc";

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let cwd: String = row.get(2)?;
    Ok(Task::from_row(
        row.get(0)?,
        row.get(1)?,
        PathBuf::from(cwd),
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn open_tmp() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("tasq.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn init_seeds_default_resource() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.resource_name().unwrap(), "void");
    }

    #[test]
    fn id_monotonicity() {
        let (_dir, store) = open_tmp();
        for expected in 1..=5i64 {
            let id = store.next_task_id().unwrap();
            assert_eq!(id, expected);
            let task = Task::new(id, "/tmp", "/bin/true", 0, 0.0).unwrap();
            store.insert_task(&task).unwrap();
        }
    }

    #[test]
    fn roundtrip_nullability_p4() {
        let (_dir, store) = open_tmp();
        let task = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();
        let back = store.get_task(1).unwrap().unwrap();
        assert_eq!(back.pid, None);
        assert_eq!(back.retval, None);
        assert_eq!(back.stime, None);
        assert_eq!(back.etime, None);
        assert_ne!(back.cmd, "null");
        assert_ne!(back.cwd.to_string_lossy(), "null");
    }

    #[test]
    fn dequeue_refuses_running_row() {
        let (_dir, store) = open_tmp();
        let task = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();
        store.mark_running(1, 4242, 100.0).unwrap();
        assert!(!store.dequeue(1).unwrap());
        store.mark_accident(1).unwrap();
        assert!(store.dequeue(1).unwrap());
    }

    #[test]
    fn dequeue_cascades_notes_p3() {
        let (_dir, store) = open_tmp();
        let task = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();
        store.annotate(1, "hello").unwrap();
        store.dequeue(1).unwrap();
        assert!(store.notes_for_task(1).unwrap().is_empty());
    }

    #[test]
    fn clear_removes_only_done_rows_and_their_notes() {
        let (_dir, store) = open_tmp();
        let waiting = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&waiting).unwrap();
        let done = Task::new(2, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&done).unwrap();
        store.mark_done(2, 0, 1.0).unwrap();
        store.annotate(2, "finished").unwrap();
        let removed = store.clear_done().unwrap();
        assert_eq!(removed, vec![2]);
        assert!(store.get_task(1).unwrap().is_some());
        assert!(store.get_task(2).unwrap().is_none());
        assert!(store.notes_for_task(2).unwrap().is_empty());
    }

    #[test]
    fn edit_only_touches_waiting_rows() {
        let (_dir, store) = open_tmp();
        let task = Task::new(1, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&task).unwrap();
        store.mark_running(1, 4242, 1.0).unwrap();
        assert!(!store.edit_waiting(1, Some(5), None).unwrap());

        let task2 = Task::new(2, "/tmp", "/bin/true", 0, 0.0).unwrap();
        store.insert_task(&task2).unwrap();
        assert!(store.edit_waiting(2, Some(5), Some(2.0)).unwrap());
        let back = store.get_task(2).unwrap().unwrap();
        assert_eq!(back.pri, 5);
        assert_eq!(back.rsc, 2.0);
    }
}
