//! Small helpers grounded on `tasque/utils.py`.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::{SystemTime, UNIX_EPOCH};

/// Now, as UNIX seconds with fractional precision (spec §3's
/// `stime`/`etime`).
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Check whether `pid` names a live process, via a null signal probe
/// (spec §4.D's reconcile pass). Grounded on `utils.checkpid`.
pub fn checkpid(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// `A hour B minute C seconds`, grounded on `utils.sec2hms`.
pub fn sec2hms(s: f64) -> String {
    let sec = s.rem_euclid(60.0);
    let total_minutes = (s as i64).div_euclid(60);
    let mm = total_minutes.rem_euclid(60);
    let hh = total_minutes.div_euclid(60);
    format!("{hh}h{mm}m{sec:.3}s")
}

/// Tokenize a command line with shell-style word splitting (quoting
/// respected, no shell invocation or expansion) — spec §4.E step 3.
pub fn tokenize(cmd: &str) -> crate::error::Result<Vec<String>> {
    shlex::split(cmd).ok_or_else(|| crate::error::TasqueError::Worker(format!("cannot tokenize command: {cmd:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec2hms_formats_hours_minutes_seconds() {
        assert_eq!(sec2hms(0.0), "0h0m0.000s");
        assert_eq!(sec2hms(3661.5), "1h1m1.500s");
    }

    #[test]
    fn checkpid_rejects_nonpositive() {
        assert!(!checkpid(0));
        assert!(!checkpid(-1));
    }

    #[test]
    fn checkpid_true_for_self() {
        assert!(checkpid(std::process::id() as i64));
    }

    #[test]
    fn tokenize_respects_quoting() {
        let toks = tokenize("echo 'hello world' foo").unwrap();
        assert_eq!(toks, vec!["echo", "hello world", "foo"]);
    }

    #[test]
    fn tokenize_rejects_unterminated_quote() {
        assert!(tokenize("echo 'unterminated").is_err());
    }
}
