use thiserror::Error;

pub type FrameResult<T> = Result<T, FrameError>;
pub type PeerResult<T> = Result<T, PeerError>;

/// Errors raised while extracting a message from a peer's stream buffer.
///
/// These are always local to one frame: the caller discards the offending
/// bytes and keeps the connection, except [`FrameError::Oversize`] which
/// forces peer replacement (see the `framer` module).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed payload for command {command}: {reason}")]
    MalformedPayload { command: String, reason: String },
    #[error("checksum mismatch for command {0:?}")]
    ChecksumMismatch(String),
    #[error("declared frame length {declared} exceeds buffer capacity {capacity}")]
    Oversize { declared: usize, capacity: usize },
}

/// Errors raised while handling a single peer connection.
///
/// Every variant here is recovered by replacing the peer; none of them
/// propagate further than the engine's per-peer event handling.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("remote closed the connection")]
    RemoteClosed,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("handshake timed out after {elapsed_ms}ms")]
    HandshakeTimeout { elapsed_ms: u64 },
    #[error("peer life exceeded ({life_ms}ms > {limit_ms}ms)")]
    LifeExceeded { life_ms: u64, limit_ms: u64 },
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl From<&str> for PeerError {
    fn from(msg: &str) -> Self {
        PeerError::Protocol(msg.to_string())
    }
}

impl From<String> for PeerError {
    fn from(msg: String) -> Self {
        PeerError::Protocol(msg)
    }
}
