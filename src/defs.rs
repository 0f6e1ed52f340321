//! Path resolution and schema constants.
//!
//! Grounded on `tasque/defs.py`: the store lives at `$TASQUE_DB`, falling
//! back to `~/.tasque/tasq.db`; the log and pidfile are siblings of the
//! store file, derived rather than independently configurable.

use std::path::PathBuf;

pub const DB_TABLE_CONFIG: &str = "config";
pub const DB_TABLE_TASQUE: &str = "tq";
pub const DB_TABLE_NOTES: &str = "notes";

pub const CONFIG_KEY_RESOURCE: &str = "resource";
pub const RESOURCE_DEFAULT: &str = "void";

/// Resolve the store path from `$TASQUE_DB`, falling back to
/// `~/.tasque/tasq.db` (spec §6).
pub fn tasque_db() -> PathBuf {
    match std::env::var_os("TASQUE_DB") {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tasque")
            .join("tasq.db"),
    }
}

pub fn tasque_dir() -> PathBuf {
    tasque_db()
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn tasque_log() -> PathBuf {
    tasque_dir().join("tasq.log")
}

pub fn tasque_pid() -> PathBuf {
    tasque_dir().join("tasque.pid")
}

/// The initial resource plugin, taken from `$TASQUE_RESOURCE` the first
/// time the store is created (spec §6); afterwards the `config` table
/// value in the store wins.
pub fn initial_resource() -> String {
    std::env::var("TASQUE_RESOURCE").unwrap_or_else(|_| RESOURCE_DEFAULT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn db_falls_back_to_home_dir() {
        std::env::remove_var("TASQUE_DB");
        let p = tasque_db();
        assert!(p.ends_with(".tasque/tasq.db"));
    }

    #[test]
    #[serial]
    fn log_and_pid_are_siblings_of_db() {
        std::env::set_var("TASQUE_DB", "/tmp/tqtest/tasq.db");
        assert_eq!(tasque_log(), PathBuf::from("/tmp/tqtest/tasq.log"));
        assert_eq!(tasque_pid(), PathBuf::from("/tmp/tqtest/tasque.pid"));
        std::env::remove_var("TASQUE_DB");
    }
}
