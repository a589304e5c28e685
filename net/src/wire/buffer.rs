use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::wire::node::NodeServiceSet;

pub(crate) struct ByteBufferParser<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ByteBufferParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        ByteBufferParser { buffer, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn skip_bytes(&mut self, count: usize) -> io::Result<()> {
        self.eof_check(count)?;
        self.pos += count;
        Ok(())
    }

    pub fn read(&mut self, size: usize) -> io::Result<&'a [u8]> {
        self.eof_check(size)?;
        let range = self.pos..self.pos + size;
        self.pos += size;
        Ok(&self.buffer[range])
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u32_le(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_i32_le(&mut self) -> io::Result<i32> {
        Ok(i32::from_le_bytes(self.read(4)?.try_into().unwrap()))
    }

    pub fn read_u64_le(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    pub fn read_i64_le(&mut self) -> io::Result<i64> {
        Ok(i64::from_le_bytes(self.read(8)?.try_into().unwrap()))
    }

    fn read_u16_be(&mut self) -> io::Result<u16> {
        Ok(u16::from_be_bytes(self.read(2)?.try_into().unwrap()))
    }

    /// net_addr struct without the 4-byte time field (as used in `version`).
    pub fn parse_net_addr(&mut self) -> io::Result<(NodeServiceSet, SocketAddr)> {
        let services_mask = self.read_u64_le()?;
        let ip: [u8; 16] = self.read(16)?.try_into().unwrap();
        let ip = IpAddr::from(ip);
        let port = self.read_u16_be()?;
        Ok((NodeServiceSet::from_bitmask(services_mask), SocketAddr::new(ip, port)))
    }

    /// CompactSize unsigned integer.
    /// See https://en.bitcoin.it/wiki/Protocol_documentation#Variable_length_integer
    pub fn read_varint(&mut self) -> io::Result<u64> {
        let prefix = self.read_u8()?;
        match prefix {
            0xFF => Ok(u64::from_le_bytes(self.read(8)?.try_into().unwrap())),
            0xFE => Ok(u32::from_le_bytes(self.read(4)?.try_into().unwrap()) as u64),
            0xFD => Ok(u16::from_le_bytes(self.read(2)?.try_into().unwrap()) as u64),
            n => Ok(n as u64),
        }
    }

    /// Length-prefixed (CompactSize) ASCII/UTF-8 string.
    pub fn read_var_string(&mut self) -> io::Result<String> {
        let len = self.read_varint()? as usize;
        let bytes = self.read(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn eof_check(&self, want_bytes: usize) -> io::Result<()> {
        if self.remaining() < want_bytes {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("can not read {} bytes from buffer of size {}", want_bytes, self.buffer.len()),
            ))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct ByteBufferComposer {
    buffer: Vec<u8>,
}

impl ByteBufferComposer {
    pub fn new() -> Self {
        ByteBufferComposer { buffer: vec![] }
    }

    pub fn result(self) -> Vec<u8> {
        self.buffer
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// net_addr struct without the time field.
    pub fn append_net_addr(&mut self, service: &NodeServiceSet, addr: &SocketAddr) {
        self.append(&service.as_bitmask().to_le_bytes());
        let ipv6_octets = match &addr.ip() {
            IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
            IpAddr::V6(ip) => ip.octets(),
        };
        self.append(&ipv6_octets);
        self.append(&addr.port().to_be_bytes());
    }

    pub fn append_varint(&mut self, value: u64) {
        if value < 0xFD {
            self.append(&[value as u8]);
        } else if value <= u16::MAX as u64 {
            self.append(&[0xFD]);
            self.append(&(value as u16).to_le_bytes());
        } else if value <= u32::MAX as u64 {
            self.append(&[0xFE]);
            self.append(&(value as u32).to_le_bytes());
        } else {
            self.append(&[0xFF]);
            self.append(&value.to_le_bytes());
        }
    }

    pub fn append_var_string(&mut self, s: &str) {
        self.append_varint(s.len() as u64);
        self.append(s.as_bytes());
    }
}
