use std::ops::BitOr;

use strum::{EnumIter, IntoEnumIterator};

use crate::error::PeerError;

/// Which network's magic bytes and genesis rules a connection speaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Network {
    Mainnet,
    Testnet3,
    Regtest,
}

impl Network {
    pub fn magic_value(&self) -> u32 {
        match self {
            Network::Mainnet => 0xD9B4BEF9,
            Network::Testnet3 => 0x0709110B,
            Network::Regtest => 0xDAB5BFFA,
        }
    }
}

impl TryFrom<u32> for Network {
    type Error = PeerError;

    fn try_from(magic_value: u32) -> Result<Self, Self::Error> {
        Network::iter()
            .find(|n| n.magic_value() == magic_value)
            .ok_or_else(|| PeerError::from(format!("unrecognized net magic value: {magic_value:#x}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeServiceSet(pub Vec<NodeService>);

impl NodeServiceSet {
    pub fn as_bitmask(&self) -> u64 {
        self.0.iter().fold(0_u64, |acc, bit| acc.bitor(bit.as_u64()))
    }

    pub fn from_bitmask(mask: u64) -> Self {
        NodeServiceSet(NodeService::iter().filter(|e| mask & e.as_u64() != 0).collect())
    }

    pub fn contains(&self, service: NodeService) -> bool {
        self.0.contains(&service)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter)]
#[repr(u64)]
pub enum NodeService {
    NodeNetwork = 0x1,
    NodeGetUtxo = 0x2,
    NodeBloom = 0x4,
    NodeWitness = 0x8,
    NodeNetworkLimited = 0x400,
}

impl NodeService {
    pub fn as_u64(self) -> u64 {
        self as u64
    }
}
