use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

use crate::error::{FrameError, FrameResult};
use crate::wire::buffer::{ByteBufferComposer, ByteBufferParser};
use crate::wire::node::NodeServiceSet;
use crate::wire::raw_message::Command;

/// A decoded application-level message, tagged by the command that produced it.
///
/// This is the re-architected replacement for the source's chained
/// `strcmp`-based dispatch in `parse_buffer_into_message`/`send_message`: the
/// command string is translated to this enum exactly once, at header-parse
/// time, and every later match is exhaustive.
#[derive(Debug)]
pub enum ProtocolMessage {
    Version(VersionMessage),
    VerAck,
    Ping(PingPongMessage),
    Pong(PingPongMessage),
    Addr(AddrMessage),
    GetAddr,
    Inv(InventoryMessage),
    GetData(InventoryMessage),
    Reject(RejectMessage),
    Headers(HeadersMessage),
    Block(BlockMessage),
    GetHeaders(BlockRequestMessage),
    GetBlocks(BlockRequestMessage),
    SendHeaders,
}

impl ProtocolMessage {
    pub fn command(&self) -> Command {
        match self {
            ProtocolMessage::Version(_) => Command::Version,
            ProtocolMessage::VerAck => Command::VerAck,
            ProtocolMessage::Ping(_) => Command::Ping,
            ProtocolMessage::Pong(_) => Command::Pong,
            ProtocolMessage::Addr(_) => Command::Addr,
            ProtocolMessage::GetAddr => Command::GetAddr,
            ProtocolMessage::Inv(_) => Command::Inv,
            ProtocolMessage::GetData(_) => Command::GetData,
            ProtocolMessage::Reject(_) => Command::Reject,
            ProtocolMessage::Headers(_) => Command::Headers,
            ProtocolMessage::Block(_) => Command::Block,
            ProtocolMessage::GetHeaders(_) => Command::GetHeaders,
            ProtocolMessage::GetBlocks(_) => Command::GetBlocks,
            ProtocolMessage::SendHeaders => Command::SendHeaders,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            ProtocolMessage::Version(m) => m.encode(),
            ProtocolMessage::VerAck | ProtocolMessage::GetAddr | ProtocolMessage::SendHeaders => vec![],
            ProtocolMessage::Ping(m) | ProtocolMessage::Pong(m) => m.encode(),
            ProtocolMessage::Addr(m) => m.encode(),
            ProtocolMessage::Inv(m) | ProtocolMessage::GetData(m) => m.encode(),
            ProtocolMessage::Reject(m) => m.encode(),
            ProtocolMessage::Headers(m) => m.encode(),
            ProtocolMessage::Block(m) => m.encode(),
            ProtocolMessage::GetHeaders(m) | ProtocolMessage::GetBlocks(m) => m.encode(),
        }
    }

    pub fn decode(command: Command, payload: &[u8]) -> FrameResult<Self> {
        let map_err = |reason: std::io::Error| FrameError::MalformedPayload {
            command: command.as_str().to_string(),
            reason: reason.to_string(),
        };
        Ok(match command {
            Command::Version => ProtocolMessage::Version(VersionMessage::decode(payload).map_err(map_err)?),
            Command::VerAck => ProtocolMessage::VerAck,
            Command::Ping => ProtocolMessage::Ping(PingPongMessage::decode(payload).map_err(map_err)?),
            Command::Pong => ProtocolMessage::Pong(PingPongMessage::decode(payload).map_err(map_err)?),
            Command::Addr => ProtocolMessage::Addr(AddrMessage::decode(payload).map_err(map_err)?),
            Command::GetAddr => ProtocolMessage::GetAddr,
            Command::Inv => ProtocolMessage::Inv(InventoryMessage::decode(payload).map_err(map_err)?),
            Command::GetData => ProtocolMessage::GetData(InventoryMessage::decode(payload).map_err(map_err)?),
            Command::Reject => ProtocolMessage::Reject(RejectMessage::decode(payload).map_err(map_err)?),
            Command::Headers => ProtocolMessage::Headers(HeadersMessage::decode(payload).map_err(map_err)?),
            Command::Block => ProtocolMessage::Block(BlockMessage::decode(payload).map_err(map_err)?),
            Command::GetHeaders => ProtocolMessage::GetHeaders(BlockRequestMessage::decode(payload).map_err(map_err)?),
            Command::GetBlocks => ProtocolMessage::GetBlocks(BlockRequestMessage::decode(payload).map_err(map_err)?),
            Command::SendHeaders => ProtocolMessage::SendHeaders,
        })
    }
}

/// https://en.bitcoin.it/wiki/Protocol_documentation#version
#[derive(Clone, Debug)]
pub struct VersionMessage {
    pub protocol_version: i32,
    pub services: NodeServiceSet,
    pub timestamp: i64,
    pub addr_recv: SocketAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    pub fn new(addr_recv: SocketAddr, protocol_version: i32, services: NodeServiceSet, user_agent: String, start_height: i32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        VersionMessage {
            protocol_version,
            services,
            timestamp,
            addr_recv,
            nonce: thread_rng().gen(),
            user_agent,
            start_height,
            relay: false,
        }
    }

    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let protocol_version = parser.read_i32_le()?;
        let services = NodeServiceSet::from_bitmask(parser.read_u64_le()?);
        let timestamp = parser.read_i64_le()?;
        let (_, addr_recv) = parser.parse_net_addr()?;
        parser.skip_bytes(26)?; // addr_from: ignored per protocol docs
        let nonce = parser.read_u64_le()?;
        let user_agent = parser.read_var_string()?;
        let start_height = parser.read_i32_le()?;
        let relay = parser.remaining() > 0 && parser.read_u8()? != 0;
        Ok(VersionMessage {
            protocol_version,
            services,
            timestamp,
            addr_recv,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append(&self.protocol_version.to_le_bytes());
        c.append(&self.services.as_bitmask().to_le_bytes());
        c.append(&self.timestamp.to_le_bytes());
        c.append_net_addr(&self.services, &self.addr_recv);
        c.append(&[0_u8; 26]); // addr_from
        c.append(&self.nonce.to_le_bytes());
        c.append_var_string(&self.user_agent);
        c.append(&self.start_height.to_le_bytes());
        c.append(&[self.relay as u8]);
        c.result()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PingPongMessage {
    pub nonce: u64,
}

impl PingPongMessage {
    pub fn new(nonce: u64) -> Self {
        PingPongMessage { nonce }
    }

    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        Ok(PingPongMessage { nonce: parser.read_u64_le()? })
    }

    fn encode(&self) -> Vec<u8> {
        self.nonce.to_le_bytes().to_vec()
    }
}

#[derive(Clone, Debug)]
pub struct AddrRecord {
    pub timestamp: u32,
    pub services: NodeServiceSet,
    pub addr: SocketAddr,
}

#[derive(Clone, Debug, Default)]
pub struct AddrMessage {
    pub records: Vec<AddrRecord>,
}

impl AddrMessage {
    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let count = parser.read_varint()?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let timestamp = parser.read_u32_le()?;
            let (services, addr) = parser.parse_net_addr()?;
            records.push(AddrRecord { timestamp, services, addr });
        }
        Ok(AddrMessage { records })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append_varint(self.records.len() as u64);
        for record in &self.records {
            c.append(&record.timestamp.to_le_bytes());
            c.append_net_addr(&record.services, &record.addr);
        }
        c.result()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryType {
    Error,
    Tx,
    Block,
    Unknown(u32),
}

impl InventoryType {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => InventoryType::Error,
            1 => InventoryType::Tx,
            2 => InventoryType::Block,
            other => InventoryType::Unknown(other),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            InventoryType::Error => 0,
            InventoryType::Tx => 1,
            InventoryType::Block => 2,
            InventoryType::Unknown(v) => v,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct InventoryItem {
    pub kind: InventoryType,
    pub hash: [u8; 32],
}

impl InventoryItem {
    pub fn block(hash: [u8; 32]) -> Self {
        InventoryItem { kind: InventoryType::Block, hash }
    }
}

#[derive(Clone, Debug, Default)]
pub struct InventoryMessage {
    pub items: Vec<InventoryItem>,
}

impl InventoryMessage {
    pub fn single_block(hash: [u8; 32]) -> Self {
        InventoryMessage { items: vec![InventoryItem::block(hash)] }
    }

    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let count = parser.read_varint()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = InventoryType::from_u32(parser.read_u32_le()?);
            let hash: [u8; 32] = parser.read(32)?.try_into().unwrap();
            items.push(InventoryItem { kind, hash });
        }
        Ok(InventoryMessage { items })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append_varint(self.items.len() as u64);
        for item in &self.items {
            c.append(&item.kind.as_u32().to_le_bytes());
            c.append(&item.hash);
        }
        c.result()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RejectMessage {
    pub message: String,
    pub code: u8,
    pub reason: String,
}

impl RejectMessage {
    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let message = parser.read_var_string()?;
        let code = parser.read_u8()?;
        let reason = parser.read_var_string()?;
        Ok(RejectMessage { message, code, reason })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append_var_string(&self.message);
        c.append(&[self.code]);
        c.append_var_string(&self.reason);
        c.result()
    }
}

/// Abstract block header shape: enough to hash, order, and extend the chain
/// with. Full consensus validation is out of scope; see `ChainView`.
#[derive(Clone, Debug)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize())
    }

    fn serialize(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append(&self.version.to_le_bytes());
        c.append(&self.prev_hash);
        c.append(&self.merkle_root);
        c.append(&self.time.to_le_bytes());
        c.append(&self.bits.to_le_bytes());
        c.append(&self.nonce.to_le_bytes());
        c.result()
    }

    fn decode(parser: &mut ByteBufferParser) -> std::io::Result<Self> {
        Ok(BlockHeader {
            version: parser.read_i32_le()?,
            prev_hash: parser.read(32)?.try_into().unwrap(),
            merkle_root: parser.read(32)?.try_into().unwrap(),
            time: parser.read_u32_le()?,
            bits: parser.read_u32_le()?,
            nonce: parser.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeadersMessage {
    pub headers: Vec<BlockHeader>,
}

impl HeadersMessage {
    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let count = parser.read_varint()?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(BlockHeader::decode(&mut parser)?);
            let tx_count = parser.read_varint()?; // always 0 in a `headers` message
            if tx_count != 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "headers message carried transactions"));
            }
        }
        Ok(HeadersMessage { headers })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append_varint(self.headers.len() as u64);
        for header in &self.headers {
            c.append(&header.serialize());
            c.append_varint(0);
        }
        c.result()
    }
}

/// A full block: header plus opaque transaction bytes. Transaction decoding
/// is out of scope (`process_incoming_block` owns that); the core only needs
/// the header to hash and the raw bytes to hand off.
#[derive(Clone, Debug)]
pub struct BlockMessage {
    pub header: BlockHeader,
    pub raw_transactions: Vec<u8>,
}

impl BlockMessage {
    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let header = BlockHeader::decode(&mut parser)?;
        let raw_transactions = parser.read(parser.remaining())?.to_vec();
        Ok(BlockMessage { header, raw_transactions })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append(&self.header.serialize());
        c.append(&self.raw_transactions);
        c.result()
    }
}

/// `getheaders`/`getblocks` payload. The core only ever sends a single-hash
/// locator anchored at the local tip (§4.6 of the spec).
#[derive(Clone, Debug)]
pub struct BlockRequestMessage {
    pub version: i32,
    pub locator_hashes: Vec<[u8; 32]>,
    pub hash_stop: [u8; 32],
}

impl BlockRequestMessage {
    pub fn anchored_at(version: i32, tip_hash: [u8; 32]) -> Self {
        BlockRequestMessage {
            version,
            locator_hashes: vec![tip_hash],
            hash_stop: [0; 32],
        }
    }

    fn decode(payload: &[u8]) -> std::io::Result<Self> {
        let mut parser = ByteBufferParser::new(payload);
        let version = parser.read_i32_le()?;
        let count = parser.read_varint()?;
        let mut locator_hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            locator_hashes.push(parser.read(32)?.try_into().unwrap());
        }
        let hash_stop = parser.read(32)?.try_into().unwrap();
        Ok(BlockRequestMessage { version, locator_hashes, hash_stop })
    }

    fn encode(&self) -> Vec<u8> {
        let mut c = ByteBufferComposer::new();
        c.append(&self.version.to_le_bytes());
        c.append_varint(self.locator_hashes.len() as u64);
        for hash in &self.locator_hashes {
            c.append(hash);
        }
        c.append(&self.hash_stop);
        c.result()
    }
}

pub(crate) fn double_sha256(input: &[u8]) -> [u8; 32] {
    sha256(&sha256(input))
}

pub(crate) fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(input);
    hasher.finalize_fixed().into()
}
