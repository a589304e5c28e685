use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use rand::Rng;

use crate::clock::Clock;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateStatus {
    Active,
    Disabled,
}

#[derive(Clone, Debug)]
pub struct Candidate {
    pub addr: SocketAddrV4,
    pub last_seen_ts: u64,
    pub status: CandidateStatus,
    /// `None` until at least one round-trip sample has been observed.
    pub avg_latency_ms: Option<f64>,
}

/// Ordered registry of known peer addresses: insertion order is preserved
/// (mirrors iteration order of the source's candidate array) while lookup by
/// address stays O(1) via the side index.
pub struct CandidateRegistry {
    order: Vec<SocketAddrV4>,
    by_addr: HashMap<SocketAddrV4, Candidate>,
    latency_tolerance_ms: f64,
}

impl CandidateRegistry {
    pub fn new(latency_tolerance_ms: u64) -> Self {
        CandidateRegistry {
            order: Vec::new(),
            by_addr: HashMap::new(),
            latency_tolerance_ms: latency_tolerance_ms as f64,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Idempotent per address. Non-IPv4 addresses are silently skipped.
    pub fn add_candidate(&mut self, addr: SocketAddr, timestamp: u64) {
        let SocketAddr::V4(addr) = addr else {
            return;
        };
        if let Some(existing) = self.by_addr.get_mut(&addr) {
            existing.last_seen_ts = existing.last_seen_ts.max(timestamp);
            return;
        }
        self.order.push(addr);
        self.by_addr.insert(
            addr,
            Candidate {
                addr,
                last_seen_ts: timestamp,
                status: CandidateStatus::Active,
                avg_latency_ms: None,
            },
        );
    }

    pub fn touch(&mut self, addr: &SocketAddrV4, timestamp: u64) {
        if let Some(candidate) = self.by_addr.get_mut(addr) {
            candidate.last_seen_ts = timestamp;
        }
    }

    pub fn record_latency(&mut self, addr: &SocketAddrV4, sample_ms: f64) {
        if let Some(candidate) = self.by_addr.get_mut(addr) {
            candidate.avg_latency_ms = Some(match candidate.avg_latency_ms {
                Some(prev) => (prev + sample_ms) / 2.0,
                None => sample_ms,
            });
        }
    }

    pub fn disable(&mut self, addr: &SocketAddrV4) {
        if let Some(candidate) = self.by_addr.get_mut(addr) {
            candidate.status = CandidateStatus::Disabled;
        }
    }

    pub fn get(&self, addr: &SocketAddrV4) -> Option<&Candidate> {
        self.by_addr.get(addr)
    }

    fn score(&self, candidate: &Candidate, now_ms: u64, rng: &mut impl Rng) -> f64 {
        let status = match candidate.status {
            CandidateStatus::Active => 0.0,
            CandidateStatus::Disabled => -10.0,
        };
        let delta_secs = now_ms.saturating_sub(candidate.last_seen_ts * 1000) / 1000;
        let freshness = if delta_secs > 7 * SECS_PER_DAY {
            0.8
        } else if delta_secs > SECS_PER_DAY {
            1.0
        } else {
            0.5
        };
        let latency = match candidate.avg_latency_ms {
            Some(avg) if avg > 0.0 => self.latency_tolerance_ms / avg,
            _ => 1.0,
        };
        let jitter: f64 = rng.gen_range(0.0..2.0);
        status + freshness + latency + jitter
    }

    /// Highest-scoring candidate not present in `bound`. Ties resolve to the
    /// lowest insertion index.
    pub fn pick_best_nonpeer(
        &self,
        bound: &[SocketAddrV4],
        now_ms: u64,
        rng: &mut impl Rng,
    ) -> Option<SocketAddrV4> {
        let mut best: Option<(SocketAddrV4, f64)> = None;
        for addr in &self.order {
            if bound.contains(addr) {
                continue;
            }
            let candidate = &self.by_addr[addr];
            let score = self.score(candidate, now_ms, rng);
            match &best {
                Some((_, best_score)) if *best_score >= score => {}
                _ => best = Some((*addr, score)),
            }
        }
        best.map(|(addr, _)| addr)
    }
}

pub fn loopback(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn zero_jitter_rng() -> StepRng {
        // StepRng always yields 0 after scaling into [0, 2.0), removing the
        // jitter term so scoring comparisons are deterministic.
        StepRng::new(0, 0)
    }

    #[test]
    fn add_candidate_is_idempotent_and_skips_non_ipv4() {
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate(SocketAddr::V4(loopback(8333).into()), 100);
        registry.add_candidate(SocketAddr::V4(loopback(8333).into()), 200);
        registry.add_candidate("[::1]:8333".parse().unwrap(), 50);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&loopback(8333)).unwrap().last_seen_ts, 200);
    }

    #[test]
    fn disabled_candidate_scores_lower_than_active() {
        let mut registry = CandidateRegistry::new(2_000);
        let now = 10 * 1000;
        registry.add_candidate(SocketAddr::V4(loopback(1).into()), 5);
        registry.add_candidate(SocketAddr::V4(loopback(2).into()), 5);
        registry.disable(&loopback(2));
        let mut rng = zero_jitter_rng();
        let best = registry.pick_best_nonpeer(&[], now, &mut rng).unwrap();
        assert_eq!(best, loopback(1));
    }

    #[test]
    fn pick_best_nonpeer_excludes_bound_addresses() {
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate(SocketAddr::V4(loopback(1).into()), 5);
        registry.add_candidate(SocketAddr::V4(loopback(2).into()), 5);
        let mut rng = zero_jitter_rng();
        let best = registry
            .pick_best_nonpeer(&[loopback(1)], 10_000, &mut rng)
            .unwrap();
        assert_eq!(best, loopback(2));
    }

    #[test]
    fn lower_latency_outscores_higher_latency() {
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate(SocketAddr::V4(loopback(1).into()), 5);
        registry.add_candidate(SocketAddr::V4(loopback(2).into()), 5);
        registry.record_latency(&loopback(1), 100.0);
        registry.record_latency(&loopback(2), 4_000.0);
        let mut rng = zero_jitter_rng();
        let best = registry.pick_best_nonpeer(&[], 10_000, &mut rng).unwrap();
        assert_eq!(best, loopback(1));
    }
}
