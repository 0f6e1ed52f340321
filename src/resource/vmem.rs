//! Fine-grained GPU memory resource (spec §4.C.4). Grounded on
//! `tasque/resources.py`'s `VmemResource` stub, fleshed out using the
//! same card-selection logic as `tasque/cuda_selector.py`'s
//! `CudaSelector.selectCard` (least-loaded-first, excluding booked
//! cards) rather than the whole-card policy `gpu` uses.

use super::cuda::{select_card, with_selection_lock, Card, CardSource, NvidiaSmi};
use super::{EnvVars, ResourcePlugin};
use crate::error::{Result, TasqueError};
use std::collections::HashMap;

pub struct VmemResource {
    book: HashMap<i64, (u32, f64)>,
    source: Box<dyn CardSource>,
}

impl Default for VmemResource {
    fn default() -> Self {
        VmemResource { book: HashMap::new(), source: Box::new(NvidiaSmi) }
    }
}

impl VmemResource {
    #[cfg(test)]
    pub fn with_source(source: Box<dyn CardSource>) -> Self {
        VmemResource { book: HashMap::new(), source }
    }

    fn cards(&self) -> Vec<Card> {
        self.source.cards().unwrap_or_default()
    }

    fn booked_indices(&self) -> Vec<u32> {
        self.book.values().map(|(idx, _)| *idx).collect()
    }
}

impl ResourcePlugin for VmemResource {
    fn name(&self) -> &'static str {
        "vmem"
    }

    fn canalloc(&self, rsc: f64) -> bool {
        let mem = rsc.max(0.0) as u64;
        select_card(&self.cards(), mem, &self.booked_indices()).is_some()
    }

    fn acquire(&mut self, pid: i64, rsc: f64) -> Result<EnvVars> {
        with_selection_lock(|| {
            let mem = rsc.max(0.0) as u64;
            let cards = self.cards();
            let idx = select_card(&cards, mem, &self.booked_indices())
                .ok_or_else(|| TasqueError::Resource("no card with enough free memory".into()))?;
            self.book.insert(pid, (idx, rsc));
            Ok(vec![("CUDA_VISIBLE_DEVICES".to_string(), idx.to_string())])
        })
    }

    fn release(&mut self, pid: i64) {
        self.book.remove(&pid);
    }

    fn booked(&self) -> Vec<(i64, f64)> {
        self.book.iter().map(|(&p, &(_, mem))| (p, mem)).collect()
    }
}
