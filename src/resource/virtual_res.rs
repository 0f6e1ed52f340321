//! Virtual resource: a purely numeric, imagined capacity of 1.0 used to
//! express logical parallelism (spec §4.C.2). Grounded on
//! `tasque/resources.py`'s `VirtualResource`.

use super::{EnvVars, ResourcePlugin};
use crate::error::Result;
use std::collections::HashMap;

#[derive(Default)]
pub struct VirtualResource {
    book: HashMap<i64, f64>,
}

impl ResourcePlugin for VirtualResource {
    fn name(&self) -> &'static str {
        "virtual"
    }

    /// Claims the whole 1.0 capacity unless told otherwise, so two
    /// `enqueue`s against a freshly-configured `virtual` store default
    /// to sequential execution rather than silent unbounded parallelism.
    fn default_rsc(&self) -> f64 {
        1.0
    }

    fn canalloc(&self, rsc: f64) -> bool {
        let used: f64 = self.book.values().sum();
        rsc <= 1.0 - used
    }

    fn acquire(&mut self, pid: i64, rsc: f64) -> Result<EnvVars> {
        self.book.insert(pid, rsc);
        Ok(Vec::new())
    }

    fn release(&mut self, pid: i64) {
        self.book.remove(&pid);
    }

    fn booked(&self) -> Vec<(i64, f64)> {
        self.book.iter().map(|(&p, &r)| (p, r)).collect()
    }
}
