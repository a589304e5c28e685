use log::{debug, warn};

use crate::error::FrameError;
use crate::wire::raw_message::{Command, Header, HEADER_SIZE};
use crate::wire::ProtocolMessage;

/// Minimum buffer capacity the spec requires for any peer's stream buffer.
pub const MIN_CAPACITY: usize = 65 * 1024;

/// A single extracted frame: either a fully decoded message, or a discarded
/// frame whose header parsed but whose body failed checksum/decode — in both
/// discard cases the connection survives.
pub enum Extracted {
    Message(Command, ProtocolMessage),
    Discarded,
}

/// Reconstructs discrete protocol messages from a raw, possibly-fragmented
/// TCP byte stream. Owns a fixed-capacity buffer per peer; never reallocates.
///
/// This replaces the teacher's `IOBuffer`/`extract_message_from_stream_buffer`
/// pair. Unlike that implementation, length is checked *before* the buffer is
/// compacted or a header is acted upon (see module docs in `wire_protocol` for
/// the bug this avoids).
pub struct Framer {
    magic: u32,
    buffer: Vec<u8>,
    len: usize,
}

impl Framer {
    pub fn new(magic: u32, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Framer {
            magic,
            buffer: vec![0_u8; capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends an incoming TCP segment to the buffer.
    ///
    /// Returns `Err` if the segment would overflow the fixed-capacity
    /// buffer — the caller must replace the peer; this is not recoverable
    /// by discarding a frame, since we cannot even store the bytes.
    pub fn push_segment(&mut self, segment: &[u8]) -> Result<(), FrameError> {
        if self.len + segment.len() > self.buffer.len() {
            return Err(FrameError::Oversize {
                declared: self.len + segment.len(),
                capacity: self.buffer.len(),
            });
        }
        self.buffer[self.len..self.len + segment.len()].copy_from_slice(segment);
        self.len += segment.len();
        Ok(())
    }

    /// Extracts every complete frame currently available. Stops when fewer
    /// than 24 bytes of buffered-but-unparsed data remain, or the next
    /// header's declared length hasn't fully arrived yet.
    pub fn extract_all(&mut self) -> Result<Vec<Extracted>, FrameError> {
        let mut out = Vec::new();
        loop {
            match self.extract_one()? {
                Some(item) => out.push(item),
                None => break,
            }
        }
        Ok(out)
    }

    fn extract_one(&mut self) -> Result<Option<Extracted>, FrameError> {
        if !self.resync_to_magic() {
            return Ok(None);
        }
        if self.len < HEADER_SIZE {
            return Ok(None);
        }
        let header_bytes: [u8; HEADER_SIZE] = self.buffer[..HEADER_SIZE].try_into().unwrap();
        let header = Header::parse(&header_bytes);
        let declared = header.length as usize;
        let frame_size = HEADER_SIZE + declared;

        if frame_size > self.buffer.len() {
            return Err(FrameError::Oversize {
                declared,
                capacity: self.buffer.len() - HEADER_SIZE,
            });
        }
        if self.len < frame_size {
            return Ok(None);
        }

        let payload = self.buffer[HEADER_SIZE..frame_size].to_vec();
        self.consume(frame_size);

        if !header.verify_checksum(&payload) {
            warn!("checksum mismatch, discarding frame");
            return Ok(Some(Extracted::Discarded));
        }

        let command = match header.command() {
            Ok(c) => c,
            Err(_) => {
                debug!("unknown command in frame, discarding");
                return Ok(Some(Extracted::Discarded));
            }
        };

        match ProtocolMessage::decode(command, &payload) {
            Ok(message) => Ok(Some(Extracted::Message(command, message))),
            Err(_) => {
                debug!("malformed payload for {command}, discarding");
                Ok(Some(Extracted::Discarded))
            }
        }
    }

    /// Scans for the magic prefix and shifts it to offset 0. Returns `false`
    /// if no magic was found, in which case at least `|magic| - 1` trailing
    /// bytes are retained in case the prefix straddles a segment boundary.
    fn resync_to_magic(&mut self) -> bool {
        let magic_bytes = self.magic.to_le_bytes();
        if self.len < magic_bytes.len() {
            return false;
        }
        let window = &self.buffer[..self.len];
        let Some(offset) = window
            .windows(magic_bytes.len())
            .position(|w| w == magic_bytes)
        else {
            let keep = magic_bytes.len() - 1;
            self.consume(self.len - keep);
            return false;
        };
        if offset > 0 {
            warn!("skipping {offset} desynchronized bytes to realign on magic prefix");
            self.consume(offset);
        }
        true
    }

    /// Shifts `count` bytes out of the front of the buffer via a left-rotate,
    /// never reallocating.
    fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.len);
        self.buffer.rotate_left(count);
        self.len -= count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::raw_message::RawMessage;

    const MAGIC: u32 = 0xD9B4BEF9;

    fn ping_bytes(nonce: u64) -> Vec<u8> {
        RawMessage::new(MAGIC, Command::Ping, nonce.to_le_bytes().to_vec()).serialize()
    }

    #[test]
    fn extracts_single_message_delivered_whole() {
        let mut framer = Framer::new(MAGIC, MIN_CAPACITY);
        framer.push_segment(&ping_bytes(7)).unwrap();
        let extracted = framer.extract_all().unwrap();
        assert_eq!(extracted.len(), 1);
        assert!(matches!(extracted[0], Extracted::Message(Command::Ping, _)));
        assert_eq!(framer.len(), 0);
    }

    #[test]
    fn extracts_message_split_across_segments() {
        let mut framer = Framer::new(MAGIC, MIN_CAPACITY);
        let bytes = ping_bytes(7);
        let (a, b) = bytes.split_at(10);
        framer.push_segment(a).unwrap();
        assert!(framer.extract_all().unwrap().is_empty());
        framer.push_segment(b).unwrap();
        let extracted = framer.extract_all().unwrap();
        assert_eq!(extracted.len(), 1);
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let mut framer = Framer::new(MAGIC, MIN_CAPACITY);
        let mut bytes = vec![0xAA, 0xBB, 0xCC];
        bytes.extend(ping_bytes(1));
        framer.push_segment(&bytes).unwrap();
        let extracted = framer.extract_all().unwrap();
        assert_eq!(extracted.len(), 1);
    }

    #[test]
    fn discards_corrupt_checksum_but_keeps_following_frame() {
        let mut framer = Framer::new(MAGIC, MIN_CAPACITY);
        let mut corrupt = ping_bytes(1);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF; // corrupt payload without touching header/checksum
        let mut stream = corrupt;
        stream.extend(ping_bytes(2));
        framer.push_segment(&stream).unwrap();
        let extracted = framer.extract_all().unwrap();
        assert_eq!(extracted.len(), 2);
        assert!(matches!(extracted[0], Extracted::Discarded));
        assert!(matches!(extracted[1], Extracted::Message(Command::Ping, _)));
    }

    #[test]
    fn oversize_frame_is_rejected_without_corrupting_state() {
        let mut framer = Framer::new(MAGIC, MIN_CAPACITY);
        let header = Header::parse(&{
            let mut h = [0_u8; HEADER_SIZE];
            h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
            h[4..10].copy_from_slice(b"ping\0\0");
            h[16..20].copy_from_slice(&(MIN_CAPACITY as u32).to_le_bytes());
            h
        });
        let mut bytes = vec![0_u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&header.magic.to_le_bytes());
        bytes[4..16].copy_from_slice(&header.command_field);
        bytes[16..20].copy_from_slice(&header.length.to_le_bytes());
        bytes[20..24].copy_from_slice(&header.checksum);
        let result = framer.push_segment(&bytes).and_then(|_| framer.extract_all());
        assert!(result.is_err());
    }

    #[test]
    fn capacity_is_never_below_minimum() {
        let framer = Framer::new(MAGIC, 10);
        assert_eq!(framer.capacity(), MIN_CAPACITY);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn framer_recovers_any_prefix_garbage(garbage in prop::collection::vec(1_u8..=255, 0..64)) {
            let mut framer = Framer::new(MAGIC, MIN_CAPACITY);
            let mut stream = garbage;
            stream.extend(ping_bytes(42));
            framer.push_segment(&stream).unwrap();
            let extracted = framer.extract_all().unwrap();
            let messages: Vec<_> = extracted.into_iter().filter(|e| matches!(e, Extracted::Message(..))).collect();
            prop_assert_eq!(messages.len(), 1);
        }
    }
}
