//! Whole-card GPU resource (spec §4.C.3). Grounded on
//! `tasque/resources.py`'s `GpuResource` stub (`raise
//! NotImplementedError()`), fleshed out per spec §4.C/§6's concrete
//! contract: a card is "available" at ≥97% free memory, `acquire` picks
//! a random available-and-unbooked card and exports
//! `CUDA_VISIBLE_DEVICES`.

use super::cuda::{with_selection_lock, Card, CardSource, NvidiaSmi};
use super::{EnvVars, ResourcePlugin};
use crate::error::Result;
use rand::seq::SliceRandom;
use std::collections::HashMap;

pub struct GpuResource {
    book: HashMap<i64, u32>,
    source: Box<dyn CardSource>,
}

impl Default for GpuResource {
    fn default() -> Self {
        GpuResource { book: HashMap::new(), source: Box::new(NvidiaSmi) }
    }
}

impl GpuResource {
    #[cfg(test)]
    pub fn with_source(source: Box<dyn CardSource>) -> Self {
        GpuResource { book: HashMap::new(), source }
    }

    fn available_unbooked(&self) -> Vec<Card> {
        let cards = match self.source.cards() {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let booked: Vec<u32> = self.book.values().copied().collect();
        cards
            .into_iter()
            .filter(|c| c.is_available() && !booked.contains(&c.index))
            .collect()
    }
}

impl ResourcePlugin for GpuResource {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn canalloc(&self, _rsc: f64) -> bool {
        // Spec §7: a missing/failing query tool degrades canalloc to
        // false rather than raising (`available_unbooked` already maps
        // an enumeration error to an empty list).
        !self.available_unbooked().is_empty()
    }

    fn acquire(&mut self, pid: i64, _rsc: f64) -> Result<EnvVars> {
        with_selection_lock(|| {
            let candidates = self.available_unbooked();
            let chosen = candidates
                .choose(&mut rand::thread_rng())
                .ok_or_else(|| crate::error::TasqueError::Resource("no available GPU card".into()))?
                .index;
            self.book.insert(pid, chosen);
            Ok(vec![("CUDA_VISIBLE_DEVICES".to_string(), chosen.to_string())])
        })
    }

    fn release(&mut self, pid: i64) {
        self.book.remove(&pid);
    }

    fn booked(&self) -> Vec<(i64, f64)> {
        self.book.iter().map(|(&p, &idx)| (p, idx as f64)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Card>);
    impl CardSource for Fixed {
        fn cards(&self) -> Result<Vec<Card>> {
            Ok(self.0.clone())
        }
    }

    fn card(index: u32, total: u64, free: u64) -> Card {
        Card { index, memory_total: total, memory_used: total - free, memory_free: free }
    }

    #[test]
    fn canalloc_requires_an_unbooked_available_card() {
        let cards = vec![card(0, 1000, 980), card(1, 1000, 100)];
        let mut gpu = GpuResource::with_source(Box::new(Fixed(cards)));
        assert!(gpu.canalloc(0.0));
        gpu.acquire(42, 0.0).unwrap();
        // only one available card existed and it's now booked.
        assert!(!gpu.canalloc(0.0));
        gpu.release(42);
        assert!(gpu.canalloc(0.0));
    }

    #[test]
    fn acquire_exports_cuda_visible_devices() {
        let cards = vec![card(3, 1000, 990)];
        let mut gpu = GpuResource::with_source(Box::new(Fixed(cards)));
        let env = gpu.acquire(1, 0.0).unwrap();
        assert_eq!(env, vec![("CUDA_VISIBLE_DEVICES".to_string(), "3".to_string())]);
    }

    #[test]
    fn missing_nvidia_smi_degrades_to_false_not_error() {
        struct Failing;
        impl CardSource for Failing {
            fn cards(&self) -> Result<Vec<Card>> {
                Err(crate::error::TasqueError::Resource("no nvidia-smi".into()))
            }
        }
        let gpu = GpuResource::with_source(Box::new(Failing));
        assert!(!gpu.canalloc(0.0));
    }
}
