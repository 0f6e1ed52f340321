//! Void resource: sequential execution, one slot total (spec §4.C.1).
//! Grounded on `tasque/resources.py`'s `VoidResource`. Default plugin.

use super::{EnvVars, ResourcePlugin};
use crate::error::Result;
use std::collections::HashMap;

#[derive(Default)]
pub struct VoidResource {
    book: HashMap<i64, f64>,
}

impl ResourcePlugin for VoidResource {
    fn name(&self) -> &'static str {
        "void"
    }

    fn canalloc(&self, _rsc: f64) -> bool {
        self.book.is_empty()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_slot_at_a_time() {
        let mut r = VoidResource::default();
        assert!(r.canalloc(0.0));
        r.acquire(100, 0.0).unwrap();
        assert!(!r.canalloc(0.0));
        r.release(100);
        assert!(r.canalloc(0.0));
    }
}
