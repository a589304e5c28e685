use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::ThreadRng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

use crate::admin::AdminListener;
use crate::candidate::CandidateRegistry;
use crate::chain::ChainView;
use crate::clock::Clock;
use crate::config::Config;
use crate::connection::{run_connection, EngineEvent};
use crate::peer::PeerState;
use crate::pool::PeerPool;
use crate::protocol;
use crate::scheduler::{Scheduler, Task};
use crate::wire::messages::{BlockRequestMessage, InventoryMessage, VersionMessage};
use crate::wire::raw_message::RawMessage;

/// Owns every piece of mutable state — the peer pool, candidate registry,
/// scheduler and admin listener — as plain fields. No `Arc`/`Mutex`: the
/// single `select!` loop in [`Engine::run`] is the only place any of it is
/// mutated, and it holds every peer's write half directly so writes are
/// naturally serialized without locks.
pub struct Engine {
    config: Config,
    pool: PeerPool,
    registry: CandidateRegistry,
    scheduler: Scheduler,
    admin: AdminListener,
    chain: Box<dyn ChainView>,
    clock: Arc<dyn Clock>,
    rng: ThreadRng,
    write_halves: HashMap<usize, OwnedWriteHalf>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

impl Engine {
    pub async fn new(config: Config, chain: Box<dyn ChainView>, clock: Arc<dyn Clock>, slot_count: usize) -> std::io::Result<Self> {
        let admin = AdminListener::bind(config.admin_port, config.backlog).await?;
        let pool = PeerPool::new(slot_count, config.network.magic_value(), crate::framer::MIN_CAPACITY);
        let scheduler = Scheduler::new(&config.periods);
        let registry = CandidateRegistry::new(config.tolerances.latency_ms);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Engine {
            config,
            pool,
            registry,
            scheduler,
            admin,
            chain,
            clock,
            rng: rand::thread_rng(),
            write_halves: HashMap::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn admin_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.admin.local_addr()
    }

    pub fn seed_candidates(&mut self, addrs: impl IntoIterator<Item = SocketAddrV4>) {
        let now_secs = self.clock.now_ms() / 1000;
        for addr in addrs {
            self.registry.add_candidate(std::net::SocketAddr::V4(addr), now_secs);
        }
    }

    /// Runs until the admin listener receives `KILL` or the autoexit timer fires.
    pub async fn run(mut self) {
        self.dial_unbound_slots();
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.on_event(event).await;
                }
                task = self.scheduler.tick() => {
                    if self.on_scheduled(task).await {
                        break;
                    }
                }
                result = self.admin.accept_and_check() => {
                    match result {
                        Ok(true) => {
                            info!("admin KILL received, shutting down");
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => warn!("admin listener error: {e}"),
                    }
                }
            }
        }
    }

    fn dial_unbound_slots(&mut self) {
        let now_ms = self.clock.now_ms();
        let freshly_bound = self.pool.fill_unbound_slots(&self.registry, now_ms, &mut self.rng);
        for (index, addr) in freshly_bound {
            self.spawn_connection(index, addr);
        }
    }

    fn spawn_connection(&self, index: usize, addr: SocketAddrV4) {
        let magic = self.config.network.magic_value();
        let events_tx = self.events_tx.clone();
        tokio::task::spawn(run_connection(index, addr, magic, crate::framer::MIN_CAPACITY, events_tx));
    }

    async fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected { index, write_half } => {
                self.write_halves.insert(index, write_half);
                self.send_version(index).await;
            }
            EngineEvent::Message { index, command, message } => {
                self.on_message(index, command, message).await;
            }
            EngineEvent::FrameDiscarded { index } => {
                debug!("peer {index} discarded a malformed/corrupt frame");
            }
            EngineEvent::Closed { index, error } => {
                self.on_closed(index, error).await;
            }
        }
    }

    async fn send_version(&mut self, index: usize) {
        let local_addr = self.pool.slot(index).address;
        let Some(local_addr) = local_addr else { return };
        let version = VersionMessage::new(
            std::net::SocketAddr::V4(local_addr),
            self.config.protocol_version,
            self.config.services.clone(),
            self.config.user_agent.clone(),
            self.chain.tip_height() as i32,
        );
        self.write_message(index, crate::wire::messages::ProtocolMessage::Version(version)).await;
    }

    async fn on_message(&mut self, index: usize, command: crate::wire::raw_message::Command, message: crate::wire::messages::ProtocolMessage) {
        if !self.config.should_skip_print(command.as_str()) {
            debug!("peer {index} <- {command}");
        }
        let now_ms = self.clock.now_ms();
        let slot = self.pool.slot_mut(index);
        let outbound = protocol::handle_message(slot, &mut self.registry, self.chain.as_mut(), &self.config, now_ms, message);
        if self.pool.slot(index).state == PeerState::Closing {
            self.close_peer(index, true).await;
            return;
        }
        for reply in outbound {
            self.write_message(index, reply).await;
        }
        self.apply_ibd_replacement(index).await;
    }

    async fn apply_ibd_replacement(&mut self, index: usize) {
        if !self.pool.ibd_mode() {
            return;
        }
        let tip = self.chain.tip_height();
        let max_diff = self.config.ibd_peer_max_block_difference;
        let slot = self.pool.slot(index);
        if slot.is_handshaken() && tip > slot.chain_height && tip - slot.chain_height > max_diff {
            warn!("peer {index} is {} blocks behind during IBD, replacing", tip - slot.chain_height);
            self.close_peer(index, false).await;
        }
    }

    async fn on_closed(&mut self, index: usize, error: Option<crate::error::PeerError>) {
        if let Some(e) = &error {
            debug!("peer {index} closed: {e}");
        }
        let was_handshaken = self.pool.slot(index).is_handshaken();
        if let Some(addr) = self.pool.slot(index).address {
            if !was_handshaken {
                self.registry.disable(&addr);
            }
        }
        self.write_halves.remove(&index);
        self.pool.unbind(index);
        self.dial_unbound_slots();
    }

    /// Closes and unbinds `index`. `disable` controls whether the bound
    /// candidate is marked disabled in the registry: a handshake timeout
    /// disables it, but a peer-life timeout or an IBD-mode replacement does
    /// not — the candidate may simply be reachable again later.
    async fn close_peer(&mut self, index: usize, disable: bool) {
        if let Some(mut write_half) = self.write_halves.remove(&index) {
            let _ = write_half.shutdown().await;
        }
        if disable {
            if let Some(addr) = self.pool.slot(index).address {
                self.registry.disable(&addr);
            }
        }
        self.pool.unbind(index);
        self.dial_unbound_slots();
    }

    async fn write_message(&mut self, index: usize, message: crate::wire::messages::ProtocolMessage) {
        let command = message.command();
        let payload = message.encode_payload();
        let raw = RawMessage::new(self.config.network.magic_value(), command, payload).serialize();
        if let Some(write_half) = self.write_halves.get_mut(&index) {
            if let Err(e) = write_half.write_all(&raw).await {
                warn!("write to peer {index} failed: {e}");
                let disable = !self.pool.slot(index).is_handshaken();
                self.close_peer(index, disable).await;
            }
        }
    }

    /// Called on the data-exchange tick: requests headers from ahead peers
    /// and distributes outstanding block hashes across idle peers.
    async fn do_data_exchange(&mut self) {
        let tip = self.chain.tip_height();
        let idle_indices: Vec<usize> = (0..self.pool.slots().len())
            .filter(|&i| self.pool.slot(i).is_idle_for_blocks())
            .collect();
        if idle_indices.is_empty() {
            return;
        }
        let mut missing = self.chain.find_missing_blocks(idle_indices.len());

        for index in 0..self.pool.slots().len() {
            let slot = self.pool.slot(index);
            if !slot.is_handshaken() {
                continue;
            }
            if slot.chain_height > tip {
                let request = BlockRequestMessage::anchored_at(self.config.protocol_version, [0; 32]);
                self.write_message(index, crate::wire::messages::ProtocolMessage::GetHeaders(request)).await;
            }
        }

        for index in idle_indices {
            let Some(hash) = missing.pop() else { break };
            self.pool.slot_mut(index).mark_requesting(hash);
            let inv = InventoryMessage::single_block(hash);
            self.write_message(index, crate::wire::messages::ProtocolMessage::GetData(inv)).await;
        }
    }

    /// Returns slots to replace, each paired with whether the bound
    /// candidate should be disabled: a handshake timeout disables it, a
    /// peer-life timeout does not.
    fn check_peer_liveness(&mut self) -> Vec<(usize, bool)> {
        let now_ms = self.clock.now_ms();
        let mut to_replace = Vec::new();
        for index in 0..self.pool.slots().len() {
            let slot = self.pool.slot(index);
            if !slot.is_bound() {
                continue;
            }
            if !slot.is_handshaken() && slot.handshake_elapsed_ms(now_ms) > self.config.tolerances.handshake_ms {
                to_replace.push((index, true));
                continue;
            }
            if self.config.tolerances.peer_life_ms > 0 && slot.connection_age_ms(now_ms) > self.config.tolerances.peer_life_ms {
                to_replace.push((index, false));
                continue;
            }
            if let Some(avg) = slot.latency_ring.average() {
                if slot.latency_ring.is_full() && avg > self.config.tolerances.latency_ms as f64 {
                    warn!("peer {index} average latency {avg}ms exceeds tolerance (diagnostic only)");
                }
            }
        }
        to_replace
    }

    async fn ping_active_peers(&mut self) {
        let now_ms = self.clock.now_ms();
        for index in 0..self.pool.slots().len() {
            if !self.pool.slot(index).is_handshaken() {
                continue;
            }
            if self.pool.slot(index).ping.nonce.is_some() {
                let sample = self.config.tolerances.latency_ms as f64;
                self.pool.slot_mut(index).latency_ring.push(sample);
            }
            let nonce = rand::random();
            {
                let slot = self.pool.slot_mut(index);
                slot.ping.nonce = Some(nonce);
                slot.ping.sent_ts = now_ms;
            }
            self.write_message(index, crate::wire::messages::ProtocolMessage::Ping(crate::wire::messages::PingPongMessage::new(nonce))).await;
        }
    }

    fn print_node_status(&self) {
        let active = self.pool.slots().iter().filter(|s| s.is_handshaken()).count();
        info!(
            "status: {}/{} peers handshaken, ibd_mode={}, tip_height={}",
            active,
            self.pool.slots().len(),
            self.pool.ibd_mode(),
            self.chain.tip_height(),
        );
    }

    /// Returns `true` if the engine should stop after this tick (autoexit).
    async fn on_scheduled(&mut self, task: Task) -> bool {
        match task {
            Task::DataExchange => {
                self.do_data_exchange().await;
                false
            }
            Task::PersistIndices => {
                self.chain.save();
                false
            }
            Task::Autoexit => {
                info!("autoexit timer fired, shutting down");
                true
            }
            Task::RecomputeIbdMode => {
                self.pool.recompute_ibd_mode(self.chain.tip_height(), self.chain.max_full_block_height(), self.config.ibd_mode_availability_threshold);
                false
            }
            Task::CheckPeerLiveness => {
                for (index, disable) in self.check_peer_liveness() {
                    self.close_peer(index, disable).await;
                }
                false
            }
            Task::PingPeers => {
                self.ping_active_peers().await;
                false
            }
            Task::PrintNodeStatus => {
                self.print_node_status();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{timeout, Duration};

    use crate::candidate::CandidateStatus;
    use crate::chain::NullChain;
    use crate::clock::{SystemClock, VirtualClock};
    use crate::wire::raw_message::{Command, Header, HEADER_SIZE};
    use crate::wire::ProtocolMessage;

    fn read_frame(buf: &[u8]) -> (Command, Vec<u8>) {
        let header = Header::parse(&<[u8; HEADER_SIZE]>::try_from(&buf[..HEADER_SIZE]).unwrap());
        let payload = buf[HEADER_SIZE..HEADER_SIZE + header.length as usize].to_vec();
        (header.command().unwrap(), payload)
    }

    /// Drives a full handshake + one ping/pong cycle against a hand-rolled
    /// fake peer, then shuts the engine down over the admin socket.
    #[tokio::test]
    async fn engine_completes_handshake_and_responds_to_kill() {
        let fake_peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fake_peer_addr = match fake_peer_listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            _ => unreachable!(),
        };

        let config = Config { admin_port: 0, ..Config::default() };
        let magic = config.network.magic_value();
        let mut engine = Engine::new(config, Box::new(NullChain::default()), Arc::new(SystemClock), 1).await.unwrap();
        engine.seed_candidates([fake_peer_addr]);
        let admin_addr = engine.admin_addr().unwrap();

        let fake_peer = tokio::spawn(async move {
            let (mut socket, _) = fake_peer_listener.accept().await.unwrap();
            let mut buf = vec![0_u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let (command, _) = read_frame(&buf[..n]);
            assert_eq!(command, Command::Version);

            let version = crate::wire::messages::VersionMessage::new(
                std::net::SocketAddr::V4(fake_peer_addr),
                70015,
                crate::wire::node::NodeServiceSet(vec![]),
                "/fake/".into(),
                0,
            );
            let reply = RawMessage::new(magic, Command::Version, ProtocolMessage::Version(version).encode_payload()).serialize();
            socket.write_all(&reply).await.unwrap();
            let verack = RawMessage::new(magic, Command::VerAck, vec![]).serialize();
            socket.write_all(&verack).await.unwrap();

            // drain our own verack + optional getaddr + first ping, which may
            // arrive split across several TCP reads
            let mut accumulated = Vec::new();
            let mut saw_ping = false;
            while !saw_ping {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before a ping arrived");
                accumulated.extend_from_slice(&buf[..n]);
                while accumulated.len() >= HEADER_SIZE {
                    let declared = u32::from_le_bytes(accumulated[16..20].try_into().unwrap()) as usize;
                    if accumulated.len() < HEADER_SIZE + declared {
                        break;
                    }
                    let (command, payload) = read_frame(&accumulated);
                    accumulated.drain(..HEADER_SIZE + declared);
                    if command == Command::Ping {
                        let pong = RawMessage::new(magic, Command::Pong, payload).serialize();
                        socket.write_all(&pong).await.unwrap();
                        saw_ping = true;
                    }
                }
            }
        });

        // `Engine` embeds a `ThreadRng` and so is not `Send`; it is awaited
        // directly here rather than via `tokio::spawn`, exactly as the
        // binary crate does in its own `select!` against ctrl-c.
        let killer = tokio::spawn(async move {
            fake_peer.await.unwrap();
            let mut admin_client = TcpStream::connect(admin_addr).await.unwrap();
            admin_client.write_all(b"KILL").await.unwrap();
        });

        timeout(Duration::from_secs(5), engine.run()).await.unwrap();
        killer.await.unwrap();
    }

    /// After the handshake tolerance elapses on a [`VirtualClock`] with no
    /// real sleep, liveness checking must replace the slot *and* disable the
    /// candidate — unlike a peer-life timeout or an IBD replacement, which
    /// leave the candidate enabled for a future retry.
    #[tokio::test]
    async fn handshake_timeout_disables_candidate() {
        let clock = Arc::new(VirtualClock::new(0));
        let config = Config { admin_port: 0, ..Config::default() };
        let handshake_ms = config.tolerances.handshake_ms;
        let mut engine = Engine::new(config, Box::new(NullChain::default()), clock.clone(), 1).await.unwrap();

        let addr = crate::candidate::loopback(18333);
        engine.seed_candidates([addr]);
        engine.dial_unbound_slots();
        assert!(engine.pool.slot(0).is_bound());

        clock.advance(handshake_ms + 1);

        let to_replace = engine.check_peer_liveness();
        assert_eq!(to_replace, vec![(0, true)]);
        for (index, disable) in to_replace {
            engine.close_peer(index, disable).await;
        }

        assert_eq!(engine.registry.get(&addr).unwrap().status, CandidateStatus::Disabled);
        assert!(!engine.pool.slot(0).is_bound());
    }
}

