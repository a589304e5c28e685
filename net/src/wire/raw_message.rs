use std::fmt;

use crate::error::FrameError;
use crate::wire::messages::double_sha256;

/// Size of a message header: 4-byte magic + 12-byte command + 4-byte length + 4-byte checksum.
pub const HEADER_SIZE: usize = 24;

/// Commands recognized on the wire. Unlike the original's chained `strcmp`
/// dispatch, parsing a command string into this enum happens exactly once.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    VerAck,
    Ping,
    Pong,
    Addr,
    GetAddr,
    Inv,
    GetData,
    Reject,
    Headers,
    Block,
    GetHeaders,
    GetBlocks,
    SendHeaders,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::VerAck => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Addr => "addr",
            Command::GetAddr => "getaddr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Reject => "reject",
            Command::Headers => "headers",
            Command::Block => "block",
            Command::GetHeaders => "getheaders",
            Command::GetBlocks => "getblocks",
            Command::SendHeaders => "sendheaders",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(match raw {
            "version" => Command::Version,
            "verack" => Command::VerAck,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "addr" => Command::Addr,
            "getaddr" => Command::GetAddr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "reject" => Command::Reject,
            "headers" => Command::Headers,
            "block" => Command::Block,
            "getheaders" => Command::GetHeaders,
            "getblocks" => Command::GetBlocks,
            "sendheaders" => Command::SendHeaders,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// 12-byte zero-padded ASCII field as it appears in the header.
    fn to_field(self) -> [u8; 12] {
        let mut field = [0_u8; 12];
        let bytes = self.as_str().as_bytes();
        field[..bytes.len()].copy_from_slice(bytes);
        field
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed 24-byte message header, decoded but not yet validated against a payload.
#[derive(Debug)]
pub struct Header {
    pub magic: u32,
    pub command_field: [u8; 12],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl Header {
    /// Parses a header from exactly [`HEADER_SIZE`] bytes. Infallible: an
    /// unrecognized command is only an error once [`Header::command`] is
    /// called, keeping magic-resync a pure byte-pattern search.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let command_field: [u8; 12] = bytes[4..16].try_into().unwrap();
        let length = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let checksum: [u8; 4] = bytes[20..24].try_into().unwrap();
        Header { magic, command_field, length, checksum }
    }

    pub fn command(&self) -> Result<Command, FrameError> {
        let end = self.command_field.iter().position(|&b| b == 0).unwrap_or(self.command_field.len());
        let raw = std::str::from_utf8(&self.command_field[..end])
            .map_err(|_| FrameError::UnknownCommand("<non-utf8>".to_string()))?;
        Command::parse(raw)
    }

    pub fn checksum_of(payload: &[u8]) -> [u8; 4] {
        double_sha256(payload)[..4].try_into().unwrap()
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == Self::checksum_of(payload)
    }
}

/// A fully framed message ready for the socket: header bytes followed by payload.
pub struct RawMessage {
    pub magic: u32,
    pub command: Command,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(magic: u32, command: Command, payload: Vec<u8>) -> Self {
        RawMessage { magic, command, payload }
    }

    /// Serializes header + payload. Length and checksum are always derived
    /// from `self.payload.len()`, never a borrowed pointer's size.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.command.to_field());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&Header::checksum_of(&self.payload));
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Command::Version)]
    #[case(Command::VerAck)]
    #[case(Command::Ping)]
    #[case(Command::GetHeaders)]
    fn command_field_round_trips(#[case] command: Command) {
        let field = command.to_field();
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let parsed = Command::parse(std::str::from_utf8(&field[..end]).unwrap()).unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Command::parse("notacommand").is_err());
    }

    #[test]
    fn raw_message_checksum_matches_reference_vector() {
        use hex_literal::hex;
        // verack has an empty payload; double-sha256("") truncated to 4 bytes
        // is a well known test vector.
        let msg = RawMessage::new(0xD9B4BEF9, Command::VerAck, vec![]);
        let bytes = msg.serialize();
        assert_eq!(&bytes[20..24], &hex!("5df6e0e2"));
    }

    #[test]
    fn header_checksum_verification_detects_corruption() {
        let msg = RawMessage::new(0xD9B4BEF9, Command::Ping, 8_u64.to_le_bytes().to_vec());
        let mut bytes = msg.serialize();
        let header = Header::parse(&<[u8; HEADER_SIZE]>::try_from(&bytes[..HEADER_SIZE]).unwrap());
        assert!(header.verify_checksum(&bytes[HEADER_SIZE..]));
        *bytes.last_mut().unwrap() ^= 0xFF;
        assert!(!header.verify_checksum(&bytes[HEADER_SIZE..]));
    }
}
