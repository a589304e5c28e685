use log::{info, warn};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// Sentinel that triggers a clean shutdown. Only an exact, bounded-length
/// prefix match counts — unlike the source's `INSTRUCTION_KILL` handling,
/// which read from the socket without a length bound, this never reads more
/// than `KILL.len()` bytes regardless of what the client sends.
const KILL: &[u8] = b"KILL";

/// Accepts a single out-of-band control connection and reports whether it
/// carried the shutdown sentinel. Any other payload, or a connection that
/// closes early, is ignored.
pub struct AdminListener {
    listener: TcpListener,
}

impl AdminListener {
    pub async fn bind(port: u16, backlog: u32) -> std::io::Result<Self> {
        let _ = backlog; // TCP backlog is set by the OS listen() call behind TcpListener::bind
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("admin listener bound on 0.0.0.0:{port}");
        Ok(AdminListener { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts the next connection and reads at most [`KILL`]'s length of
    /// bytes from it. Returns `true` if those bytes were exactly `KILL`.
    pub async fn accept_and_check(&self) -> std::io::Result<bool> {
        let (mut socket, peer_addr) = self.listener.accept().await?;
        let mut buf = [0_u8; KILL.len()];
        let mut filled = 0;
        while filled < buf.len() {
            let n = socket.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let is_kill = &buf[..filled] == KILL;
        if is_kill {
            warn!("admin KILL received from {peer_addr}");
        } else {
            info!("admin connection from {peer_addr} ignored ({filled} bytes, not KILL)");
        }
        Ok(is_kill)
    }
}
