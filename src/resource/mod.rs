//! Resource plugins (spec §4.C): the pluggable admission-control layer.
//!
//! Grounded on `tasque/resources.py`'s `AbstractResource` and its four
//! concrete subclasses. Per spec §9's design note, the original's
//! "method that returns a pair of closures" shape is replaced with a
//! capability trait whose `acquire`/`release` take the worker `pid`
//! directly — the closures could only be built *after* `fork()` gives us
//! a real pid anyway, so binding them ahead of time via partial
//! application bought nothing.

mod cuda;
mod gpu;
mod void;
mod virtual_res;
mod vmem;

pub use cuda::Card;

use crate::error::{Result, TasqueError};

/// Environment variables an `acquire()` call wants exported into the
/// worker's process before it execs the task command (spec §4.C: GPU
/// `acquire` exports `CUDA_VISIBLE_DEVICES`).
pub type EnvVars = Vec<(String, String)>;

/// The capability interface every resource plugin implements.
///
/// `canalloc` never blocks (spec §4.C). `acquire`/`release` are bound to
/// a worker pid and must be idempotent within that worker's lifecycle
/// (calling `release` twice, or `acquire` twice for the same pid, must
/// not double-book or underflow the ledger).
pub trait ResourcePlugin: Send {
    fn name(&self) -> &'static str;

    /// `rsc` an `enqueue` call should use when the caller doesn't supply
    /// one explicitly (spec §3: "default defined by the active resource
    /// plugin"). Plugins where `rsc` isn't a meaningful weight (void,
    /// gpu) can leave this at 0.0.
    fn default_rsc(&self) -> f64 {
        0.0
    }

    /// Non-blocking admission test against the current book.
    fn canalloc(&self, rsc: f64) -> bool;

    /// Commit the reservation for `pid` and return any environment
    /// variables the worker should export before exec'ing the command.
    fn acquire(&mut self, pid: i64, rsc: f64) -> Result<EnvVars>;

    /// Return `pid`'s share. Idempotent: releasing a pid that isn't
    /// booked is a no-op, not an error (a worker may die before it ever
    /// reached `acquire`, or the supervisor may reconcile-and-release a
    /// pid it already released on a previous tick).
    fn release(&mut self, pid: i64);

    /// The live book, for introspection. The supervisor logs it once per
    /// tick; nothing outside this process can see it, since the book
    /// lives only in the supervisor's memory (spec §5).
    fn booked(&self) -> Vec<(i64, f64)>;
}

/// Resource variants named in spec §4.C. `cpu`/`memory` are declared but
/// stubbed (the spec explicitly allows this): their `canalloc` always
/// returns `false` via `ResourceError`, mirroring the original's
/// `NotImplementedError` subclasses.
pub fn create(name: &str) -> Result<Box<dyn ResourcePlugin>> {
    match name {
        "void" => Ok(Box::new(void::VoidResource::default())),
        "virtual" => Ok(Box::new(virtual_res::VirtualResource::default())),
        "gpu" => Ok(Box::new(gpu::GpuResource::default())),
        "vmem" => Ok(Box::new(vmem::VmemResource::default())),
        "cpu" | "memory" => Err(TasqueError::Resource(format!(
            "resource plugin '{name}' is declared but not implemented"
        ))),
        other => Err(TasqueError::Resource(format!("unknown resource plugin '{other}'"))),
    }
}
