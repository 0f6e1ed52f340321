//! GPU device enumeration and the cross-process selection lock (spec §6,
//! §5). Grounded on `tasque/cuda_selector.py`'s `CudaSelector` and the
//! `cusel.py` entry point, with the actual device query re-expressed as
//! the plain subprocess call spec §6 describes (`nvidia-smi
//! --query-gpu=index,memory.total,memory.used,memory.free
//! --format=csv,noheader,nounits`) rather than as a separate standalone
//! tool — spec §1 keeps the standalone CLI out of scope, but the
//! resource plugins still need the query to decide admission.

use crate::error::{Result, TasqueError};
use nix::fcntl::{flock, FlockArg};
use std::os::unix::io::AsRawFd;
use std::process::Command;

pub const AVAIL_THRESHOLD: f64 = 0.97;
const LOCK_PATH: &str = "/tmp/tasque-cusel.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Card {
    pub index: u32,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
}

impl Card {
    pub fn is_available(&self) -> bool {
        (self.memory_free as f64) >= AVAIL_THRESHOLD * (self.memory_total as f64)
    }
}

/// Where a resource plugin gets its card table from. Production code
/// uses `NvidiaSmi`; tests substitute a fixed table so admission logic
/// can be exercised without real hardware.
pub trait CardSource: Send {
    fn cards(&self) -> Result<Vec<Card>>;
}

pub struct NvidiaSmi;

impl CardSource for NvidiaSmi {
    fn cards(&self) -> Result<Vec<Card>> {
        get_cards()
    }
}

/// Query `nvidia-smi` for the current card table. A missing/failing
/// `nvidia-smi` is a `ResourceError`, per spec §7 ("the GPU query tool is
/// absent"), which callers turn into `canalloc() == false` rather than
/// propagating.
pub fn get_cards() -> Result<Vec<Card>> {
    let out = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,memory.total,memory.used,memory.free",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .map_err(|e| TasqueError::Resource(format!("nvidia-smi unavailable: {e}")))?;
    if !out.status.success() {
        return Err(TasqueError::Resource("nvidia-smi exited with an error".into()));
    }
    let text = String::from_utf8_lossy(&out.stdout);
    parse_cards(&text)
}

fn parse_cards(text: &str) -> Result<Vec<Card>> {
    let mut cards = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(TasqueError::Resource(format!("unexpected nvidia-smi row: {line:?}")));
        }
        let parse = |s: &str| -> Result<u64> {
            s.parse::<u64>()
                .map_err(|_| TasqueError::Resource(format!("non-integer nvidia-smi field: {s:?}")))
        };
        cards.push(Card {
            index: fields[0].parse().map_err(|_| {
                TasqueError::Resource(format!("non-integer nvidia-smi index: {:?}", fields[0]))
            })?,
            memory_total: parse(fields[1])?,
            memory_used: parse(fields[2])?,
            memory_free: parse(fields[3])?,
        });
    }
    Ok(cards)
}

/// Pick the least-loaded unbooked card with at least `mem` MiB free,
/// excluding any index in `exclude` or `booked`. Mirrors
/// `CudaSelector.selectCard`: sort by memory used ascending, return the
/// first match. Does not block — the supervisor's tick loop provides the
/// retry cadence spec §4.D already requires.
pub fn select_card(cards: &[Card], mem: u64, booked: &[u32]) -> Option<u32> {
    let mut candidates: Vec<&Card> =
        cards.iter().filter(|c| !booked.contains(&c.index) && c.memory_free >= mem).collect();
    candidates.sort_by_key(|c| c.memory_used);
    candidates.first().map(|c| c.index)
}

/// Hold the advisory cross-process lock spec §5 describes ("CUDA
/// selector locking") for the duration of `f`, so two independent
/// device-selection calls never race each other onto the same idle card.
pub fn with_selection_lock<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(LOCK_PATH)?;
    flock(file.as_raw_fd(), FlockArg::LockExclusive)?;
    let result = f();
    let _ = flock(file.as_raw_fd(), FlockArg::Unlock);
    result
}
