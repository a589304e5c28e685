use crate::wire::node::{Network, NodeService, NodeServiceSet};

/// Scheduler intervals, milliseconds. `0` disables an entry.
#[derive(Clone, Debug)]
pub struct Periods {
    pub peer_data_exchange_ms: u64,
    pub save_indices_ms: u64,
    pub autoexit_ms: u64,
    pub reset_ibd_mode_ms: u64,
    pub timeout_peers_ms: u64,
    pub ping_ms: u64,
    pub print_node_status_ms: u64,
}

impl Default for Periods {
    fn default() -> Self {
        Periods {
            peer_data_exchange_ms: 1_000,
            save_indices_ms: 120_000,
            autoexit_ms: 30 * 60_000,
            reset_ibd_mode_ms: 60_000,
            timeout_peers_ms: 10_000,
            ping_ms: 11_000,
            print_node_status_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tolerances {
    /// Max ms from connect to handshake complete.
    pub handshake_ms: u64,
    /// Target round-trip ms; exceeding only flags the peer in logs.
    pub latency_ms: u64,
    /// Optional ms after which a peer is retired regardless of health. `0` disables.
    pub peer_life_ms: u64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances {
            handshake_ms: 5_000,
            latency_ms: 2_000,
            peer_life_ms: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub protocol_version: i32,
    pub minimum_peer_version: i32,
    pub services: NodeServiceSet,
    pub user_agent: String,
    pub max_outgoing: usize,
    pub max_outgoing_ibd: usize,
    pub addr_life_secs: u64,
    pub backlog: u32,
    pub getaddr_threshold: usize,
    pub ibd_mode_availability_threshold: f64,
    pub ibd_peer_max_block_difference: u32,
    pub admin_port: u16,
    pub silent_incoming_message_commands: Vec<String>,
    pub tolerances: Tolerances,
    pub periods: Periods,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Mainnet,
            protocol_version: 70015,
            minimum_peer_version: 70001,
            services: NodeServiceSet(vec![NodeService::NodeNetwork]),
            user_agent: "/Satoshi:0.16.2/tinybtc:0.0.1/".to_string(),
            max_outgoing: 8,
            max_outgoing_ibd: 64,
            addr_life_secs: 14 * 24 * 60 * 60,
            backlog: 32,
            getaddr_threshold: 1_000,
            ibd_mode_availability_threshold: 0.95,
            ibd_peer_max_block_difference: 100,
            admin_port: 9494,
            silent_incoming_message_commands: vec!["ping".to_string(), "pong".to_string()],
            tolerances: Tolerances::default(),
            periods: Periods::default(),
        }
    }
}

impl Config {
    pub fn max_outgoing_for(&self, ibd_mode: bool) -> usize {
        if ibd_mode {
            self.max_outgoing_ibd
        } else {
            self.max_outgoing
        }
    }

    pub fn should_skip_print(&self, command: &str) -> bool {
        self.silent_incoming_message_commands
            .iter()
            .any(|s| s == command)
    }
}
