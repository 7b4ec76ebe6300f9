//! Per-camera UDP request/response transport

use crate::visca::Command;
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Largest VISCA reply we expect; replies are well below this.
const MAX_REPLY_SIZE: usize = 64;

/// Request/response channel to one camera
///
/// Each call opens a transient socket connected to the camera, sends exactly
/// one frame and waits for exactly as many datagrams as the frame kind
/// produces. There is no retry and no internal timeout: a lost reply leaves
/// the call pending until the caller gives up on it. The socket is released
/// when the call returns or its future is dropped.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    addr: SocketAddr,
}

impl CommandChannel {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends `command` and collects its replies.
    ///
    /// Returns the single reply of an inquiry, or `None` once both the
    /// acknowledge and completion of a command have arrived.
    pub async fn execute(&self, command: &Command) -> std::io::Result<Option<Bytes>> {
        let local: SocketAddr = if self.addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.addr).await?;

        socket.send(command.as_bytes()).await?;
        debug!(
            camera = %self.addr,
            frame = %crate::visca::hex(command.as_bytes()),
            "Command sent"
        );

        let mut buf = [0u8; MAX_REPLY_SIZE];
        let mut last = Bytes::new();
        for _ in 0..command.expected_replies() {
            let len = socket.recv(&mut buf).await?;
            debug!(
                camera = %self.addr,
                reply = %crate::visca::hex(&buf[..len]),
                "Answer received"
            );
            last = Bytes::copy_from_slice(&buf[..len]);
        }

        if command.is_inquiry() {
            Ok(Some(last))
        } else {
            Ok(None)
        }
    }
}
