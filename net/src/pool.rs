use std::net::SocketAddrV4;

use rand::Rng;

use crate::candidate::CandidateRegistry;
use crate::peer::{PeerSlot, PeerState};

/// Fixed-size table of peer slots. Slot count and framer capacity are set at
/// construction and never change; only the binding within each slot does.
pub struct PeerPool {
    slots: Vec<PeerSlot>,
    magic: u32,
    framer_capacity: usize,
    ibd_mode: bool,
}

impl PeerPool {
    pub fn new(slot_count: usize, magic: u32, framer_capacity: usize) -> Self {
        let slots = (0..slot_count)
            .map(|i| PeerSlot::unbound(i, magic, framer_capacity))
            .collect();
        PeerPool {
            slots,
            magic,
            framer_capacity,
            ibd_mode: true,
        }
    }

    pub fn slots(&self) -> &[PeerSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &PeerSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut PeerSlot {
        &mut self.slots[index]
    }

    pub fn ibd_mode(&self) -> bool {
        self.ibd_mode
    }

    /// Recomputed periodically: IBD turns off once the locally-validated tip
    /// is within `threshold` of the fully-downloaded height.
    pub fn recompute_ibd_mode(&mut self, tip_height: u32, max_full_block_height: u32, threshold: f64) {
        self.ibd_mode = if tip_height == 0 {
            true
        } else {
            (max_full_block_height as f64 / tip_height as f64) <= threshold
        };
    }

    pub fn bound_addresses(&self) -> Vec<SocketAddrV4> {
        self.slots.iter().filter_map(|s| s.address).collect()
    }

    pub fn unbound_slot_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_bound())
            .map(|(i, _)| i)
            .collect()
    }

    /// Binds every unbound slot to the best available non-peer candidate.
    /// Slots for which no candidate is available are left unbound. Returns
    /// the `(index, address)` pairs that were freshly bound, so the caller
    /// can dial them.
    pub fn fill_unbound_slots(&mut self, registry: &CandidateRegistry, now_ms: u64, rng: &mut impl Rng) -> Vec<(usize, SocketAddrV4)> {
        let mut freshly_bound = Vec::new();
        for index in self.unbound_slot_indices() {
            let bound = self.bound_addresses();
            if let Some(addr) = registry.pick_best_nonpeer(&bound, now_ms, rng) {
                self.slots[index].bind(addr, now_ms, self.magic, self.framer_capacity);
                freshly_bound.push((index, addr));
            }
        }
        freshly_bound
    }

    /// Tears down slot `index`'s binding so it is picked up by the next
    /// `fill_unbound_slots` call. The caller is responsible for closing the
    /// underlying socket before or after this call.
    pub fn unbind(&mut self, index: usize) {
        self.slots[index].address = None;
        self.slots[index].state = PeerState::Closing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn rng() -> StepRng {
        StepRng::new(0, 0)
    }

    #[test]
    fn fills_unbound_slots_from_registry() {
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate("1.2.3.4:8333".parse().unwrap(), 5);
        registry.add_candidate("5.6.7.8:8333".parse().unwrap(), 5);
        let mut pool = PeerPool::new(2, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        pool.fill_unbound_slots(&registry, 10_000, &mut rng());
        assert!(pool.slots().iter().all(|s| s.is_bound()));
        assert!(pool.unbound_slot_indices().is_empty());
    }

    #[test]
    fn never_binds_same_address_twice() {
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate("1.2.3.4:8333".parse().unwrap(), 5);
        let mut pool = PeerPool::new(2, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        pool.fill_unbound_slots(&registry, 10_000, &mut rng());
        let bound: Vec<_> = pool.bound_addresses();
        assert_eq!(bound.len(), 1); // only one candidate available
    }

    #[test]
    fn ibd_mode_turns_off_near_tip() {
        let mut pool = PeerPool::new(1, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        pool.recompute_ibd_mode(1000, 960, 0.95);
        assert!(!pool.ibd_mode());
        pool.recompute_ibd_mode(1000, 500, 0.95);
        assert!(pool.ibd_mode());
    }

    #[test]
    fn unbind_frees_slot_for_refill() {
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate("1.2.3.4:8333".parse().unwrap(), 5);
        let mut pool = PeerPool::new(1, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        pool.fill_unbound_slots(&registry, 10_000, &mut rng());
        pool.unbind(0);
        assert!(!pool.slot(0).is_bound());
    }
}
