use std::net::SocketAddrV4;

use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::PeerError;
use crate::framer::{Extracted, Framer};
use crate::wire::raw_message::Command;
use crate::wire::ProtocolMessage;

/// Everything a per-peer reader task reports back to the engine. The engine
/// is the only place that mutates pool/registry state; this channel is the
/// sole communication path from a reader task into that state.
pub enum EngineEvent {
    /// The outbound TCP connection succeeded; `write_half` is handed to the
    /// engine so it owns every peer's writes directly (no locking).
    Connected { index: usize, write_half: OwnedWriteHalf },
    Message { index: usize, command: Command, message: ProtocolMessage },
    FrameDiscarded { index: usize },
    Closed { index: usize, error: Option<PeerError> },
}

const READ_CHUNK: usize = 16 * 1024;

/// Dials `addr`, then owns the read half and a [`Framer`] for the connection's
/// lifetime, translating bytes into [`EngineEvent`]s. Runs as a Tokio task,
/// never an OS thread, so it shares the engine's single-threaded runtime.
pub async fn run_connection(index: usize, addr: SocketAddrV4, magic: u32, framer_capacity: usize, events: mpsc::Sender<EngineEvent>) {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(EngineEvent::Closed { index, error: Some(PeerError::Transport(e)) }).await;
            return;
        }
    };
    let (mut read_half, write_half) = stream.into_split();
    if events.send(EngineEvent::Connected { index, write_half }).await.is_err() {
        return;
    }

    let mut framer = Framer::new(magic, framer_capacity);
    let mut chunk = vec![0_u8; READ_CHUNK];
    let final_error = loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(PeerError::Transport(e)),
        };
        if let Err(e) = framer.push_segment(&chunk[..n]) {
            warn!("peer {index} overran its framer buffer: {e}");
            break Some(PeerError::Frame(e));
        }
        match framer.extract_all() {
            Ok(extracted) => {
                for item in extracted {
                    let event = match item {
                        Extracted::Message(command, message) => EngineEvent::Message { index, command, message },
                        Extracted::Discarded => EngineEvent::FrameDiscarded { index },
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("peer {index} framer error: {e}");
                break Some(PeerError::Frame(e));
            }
        }
    };

    let _ = events.send(EngineEvent::Closed { index, error: final_error }).await;
}
