use log::{debug, warn};

use crate::candidate::CandidateRegistry;
use crate::chain::ChainView;
use crate::config::Config;
use crate::peer::{PeerSlot, PeerState};
use crate::wire::messages::{AddrMessage, PingPongMessage, ProtocolMessage};

/// Two hours, subtracted from gossiped addresses' timestamps so a freshly
/// relayed address doesn't immediately outrank addresses we've dialed
/// ourselves (mirrors the reference node's addr-relay discount).
const ADDR_GOSSIP_DISCOUNT_SECS: u64 = 2 * 60 * 60;

/// Pure dispatch on command; every side effect lands on the peer slot, the
/// candidate registry, the chain collaborator, or the returned outbound
/// messages. Never touches the socket directly.
pub fn handle_message(
    peer: &mut PeerSlot,
    registry: &mut CandidateRegistry,
    chain: &mut dyn ChainView,
    config: &Config,
    now_ms: u64,
    message: ProtocolMessage,
) -> Vec<ProtocolMessage> {
    if let Some(addr) = peer.address {
        registry.touch(&addr, now_ms / 1000);
    }

    let registry_len = registry.len();

    match message {
        ProtocolMessage::Version(version) => on_version(peer, config, now_ms, registry_len, version.protocol_version, version.start_height as u32),
        ProtocolMessage::VerAck => on_verack(peer, config, registry_len, now_ms),
        ProtocolMessage::Ping(ping) => vec![ProtocolMessage::Pong(ping)],
        ProtocolMessage::Pong(pong) => {
            on_pong(peer, registry, now_ms, pong);
            vec![]
        }
        ProtocolMessage::Addr(addr) => {
            on_addr(registry, now_ms, addr);
            vec![]
        }
        ProtocolMessage::Headers(headers) => {
            for header in headers.headers {
                chain.process_header(header);
            }
            vec![]
        }
        ProtocolMessage::Block(block) => {
            peer.clear_requesting();
            chain.process_block(block);
            vec![]
        }
        other => {
            debug!("no handler for inbound {}, ignoring", other.command());
            vec![]
        }
    }
}

fn on_version(peer: &mut PeerSlot, config: &Config, now_ms: u64, registry_len: usize, their_version: i32, chain_height: u32) -> Vec<ProtocolMessage> {
    if their_version < config.minimum_peer_version {
        warn!("peer advertised protocol version {their_version} below minimum {}", config.minimum_peer_version);
        peer.state = PeerState::Closing;
        return vec![];
    }
    let completed = peer.accept_them(chain_height);
    let mut outbound = vec![];
    if completed {
        enter_active(peer, now_ms, registry_len, config.getaddr_threshold, &mut outbound);
    }
    outbound
}

fn on_verack(peer: &mut PeerSlot, config: &Config, registry_len: usize, now_ms: u64) -> Vec<ProtocolMessage> {
    let completed = peer.accept_us();
    let mut outbound = vec![ProtocolMessage::VerAck];
    if completed {
        enter_active(peer, now_ms, registry_len, config.getaddr_threshold, &mut outbound);
    }
    outbound
}

fn enter_active(peer: &mut PeerSlot, now_ms: u64, registry_len: usize, getaddr_threshold: usize, outbound: &mut Vec<ProtocolMessage>) {
    peer.state = PeerState::Active;
    if registry_len < getaddr_threshold {
        outbound.push(ProtocolMessage::GetAddr);
    }
    let nonce = rand::random();
    peer.ping.nonce = Some(nonce);
    peer.ping.sent_ts = now_ms;
    outbound.push(ProtocolMessage::Ping(PingPongMessage::new(nonce)));
}

fn on_pong(peer: &mut PeerSlot, registry: &mut CandidateRegistry, now_ms: u64, pong: PingPongMessage) {
    if peer.ping.nonce == Some(pong.nonce) {
        let sample = (now_ms.saturating_sub(peer.ping.sent_ts)) as f64;
        peer.latency_ring.push(sample);
        peer.ping.nonce = None;
        if let Some(addr) = peer.address {
            registry.record_latency(&addr, sample);
        }
    }
}

fn on_addr(registry: &mut CandidateRegistry, now_ms: u64, addr: AddrMessage) {
    let now_secs = now_ms / 1000;
    for record in addr.records {
        if !record.addr.is_ipv4() {
            continue;
        }
        let discounted_ts = (record.timestamp as u64).saturating_sub(ADDR_GOSSIP_DISCOUNT_SECS);
        registry.add_candidate(record.addr, discounted_ts.min(now_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NullChain;
    use crate::wire::messages::VersionMessage;
    use crate::wire::node::NodeServiceSet;

    fn fresh_peer() -> PeerSlot {
        let mut peer = PeerSlot::unbound(0, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        peer.address = Some("1.2.3.4:8333".parse().unwrap());
        peer
    }

    #[test]
    fn version_then_verack_enters_active_and_sends_ping() {
        let mut peer = fresh_peer();
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate("1.2.3.4:8333".parse().unwrap(), 0);
        let mut chain = NullChain::default();
        let config = Config::default();

        let version = VersionMessage::new("5.6.7.8:8333".parse().unwrap(), 70015, NodeServiceSet(vec![]), "/test/".into(), 500);
        let out = handle_message(&mut peer, &mut registry, &mut chain, &config, 1_000, ProtocolMessage::Version(version));
        assert!(out.is_empty());
        assert_eq!(peer.state, PeerState::HandshakeHalf);

        let out = handle_message(&mut peer, &mut registry, &mut chain, &config, 1_000, ProtocolMessage::VerAck);
        assert_eq!(peer.state, PeerState::Active);
        assert!(out.iter().any(|m| matches!(m, ProtocolMessage::VerAck)));
        assert!(out.iter().any(|m| matches!(m, ProtocolMessage::Ping(_))));
    }

    #[test]
    fn version_below_minimum_closes_peer() {
        let mut peer = fresh_peer();
        let mut registry = CandidateRegistry::new(2_000);
        let mut chain = NullChain::default();
        let config = Config::default();
        let version = VersionMessage::new("5.6.7.8:8333".parse().unwrap(), 60000, NodeServiceSet(vec![]), "/old/".into(), 0);
        handle_message(&mut peer, &mut registry, &mut chain, &config, 1_000, ProtocolMessage::Version(version));
        assert_eq!(peer.state, PeerState::Closing);
    }

    #[test]
    fn ping_is_echoed_as_pong_with_same_nonce() {
        let mut peer = fresh_peer();
        let mut registry = CandidateRegistry::new(2_000);
        let mut chain = NullChain::default();
        let config = Config::default();
        let out = handle_message(&mut peer, &mut registry, &mut chain, &config, 1_000, ProtocolMessage::Ping(PingPongMessage::new(42)));
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], ProtocolMessage::Pong(p) if p.nonce == 42));
    }

    #[test]
    fn matching_pong_records_latency_sample() {
        let mut peer = fresh_peer();
        peer.ping.nonce = Some(7);
        peer.ping.sent_ts = 1_000;
        let mut registry = CandidateRegistry::new(2_000);
        registry.add_candidate("1.2.3.4:8333".parse().unwrap(), 0);
        let mut chain = NullChain::default();
        let config = Config::default();
        handle_message(&mut peer, &mut registry, &mut chain, &config, 1_250, ProtocolMessage::Pong(PingPongMessage::new(7)));
        assert_eq!(peer.latency_ring.average(), Some(250.0));
        assert!(peer.ping.nonce.is_none());
    }

    #[test]
    fn mismatched_pong_is_ignored() {
        let mut peer = fresh_peer();
        peer.ping.nonce = Some(7);
        let mut registry = CandidateRegistry::new(2_000);
        let mut chain = NullChain::default();
        let config = Config::default();
        handle_message(&mut peer, &mut registry, &mut chain, &config, 1_250, ProtocolMessage::Pong(PingPongMessage::new(99)));
        assert!(peer.latency_ring.average().is_none());
        assert_eq!(peer.ping.nonce, Some(7));
    }

    #[test]
    fn block_receipt_clears_requesting_and_forwards_to_chain() {
        let mut peer = fresh_peer();
        peer.mark_requesting([1; 32]);
        let mut registry = CandidateRegistry::new(2_000);
        let mut chain = NullChain::default();
        let config = Config::default();
        let block = crate::wire::messages::BlockMessage {
            header: crate::wire::messages::BlockHeader { version: 1, prev_hash: [0; 32], merkle_root: [0; 32], time: 0, bits: 0, nonce: 0 },
            raw_transactions: vec![],
        };
        handle_message(&mut peer, &mut registry, &mut chain, &config, 1_000, ProtocolMessage::Block(block));
        assert_eq!(peer.requesting, [0; 32]);
    }

    #[test]
    fn addr_records_are_added_with_gossip_discount() {
        let mut registry = CandidateRegistry::new(2_000);
        let addr = AddrMessage {
            records: vec![crate::wire::messages::AddrRecord {
                timestamp: 10_000,
                services: NodeServiceSet(vec![]),
                addr: "9.9.9.9:8333".parse().unwrap(),
            }],
        };
        on_addr(&mut registry, 20_000_000, addr);
        assert!(registry.get(&"9.9.9.9:8333".parse().unwrap()).is_some());
    }
}
