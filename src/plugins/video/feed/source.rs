//! Packet sources: where compressed video fragments come from.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use super::super::types::VideoPacket;

/// Largest datagram the vehicle sends on its video port.
const MAX_DATAGRAM: usize = 2048;

/// Yields compressed video packets until the vehicle connection ends.
///
/// `next_packet` may block waiting for data. `None` means the stream is over.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Option<VideoPacket>;
}

/// Packets handed over by another thread through a channel. The stream ends
/// when every sender is dropped.
pub struct ChannelSource {
    receiver: Receiver<VideoPacket>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<VideoPacket>) -> Self {
        Self { receiver }
    }
}

impl PacketSource for ChannelSource {
    fn next_packet(&mut self) -> Option<VideoPacket> {
        self.receiver.recv().ok()
    }
}

/// Datagrams received on the vehicle's video port. The stream ends after
/// `idle_timeout` passes without a packet.
pub struct UdpSource {
    socket: UdpSocket,
    idle_timeout: Duration,
    buf: Vec<u8>,
}

impl UdpSource {
    pub fn bind(addr: SocketAddr, idle_timeout: Duration) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(idle_timeout))?;
        tracing::info!(target: "video", "[SOURCE] Listening for video on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            idle_timeout,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl PacketSource for UdpSource {
    fn next_packet(&mut self) -> Option<VideoPacket> {
        let waiting_since = Instant::now();
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((0, _)) => continue,
                Ok((len, _)) => return Some(VideoPacket::from(self.buf[..len].to_vec())),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    tracing::info!(target: "video",
                        "[SOURCE] No video for {:?}, treating connection as closed",
                        waiting_since.elapsed());
                    return None;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(target: "video", "[SOURCE] Receive failed: {}", e);
                    return None;
                }
            }
        }
    }
}

impl std::fmt::Debug for UdpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSource")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
