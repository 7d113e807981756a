use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::SinkError;
use crate::reading::Reading;
use crate::sink::ReadingSink;

const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;
const MAX_DATAGRAM: usize = 65536;

/// Sends each reading as one encoded UDP datagram
pub struct UdpSink {
    socket: Socket,
    target: SockAddr,
    label: String,
    sent_packets: u64,
    sent_bytes: u64,
}

impl UdpSink {
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))?;

        if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            warn!("Failed to set send buffer for {}: {}", target, e);
        }

        info!("UDP sink ready, forwarding readings to {}", target);
        Ok(Self {
            socket,
            target: target.into(),
            label: format!("udp://{}", target),
            sent_packets: 0,
            sent_bytes: 0,
        })
    }

    pub fn get_stats(&self) -> (u64, u64) {
        (self.sent_packets, self.sent_bytes)
    }
}

impl ReadingSink for UdpSink {
    fn name(&self) -> &str {
        &self.label
    }

    fn emit(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let frame = codec::encode(reading).map_err(|e| SinkError::Rejected(e.to_string()))?;

        match self.socket.send_to(&frame, &self.target) {
            Ok(bytes) => {
                self.sent_packets += 1;
                self.sent_bytes += bytes as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                Err(SinkError::Disconnected(e.to_string()))
            }
            Err(e) => Err(SinkError::Io(e)),
        }
    }
}

/// Bound UDP socket handing out raw datagrams. Reads time out so the caller
/// can check for shutdown between datagrams.
pub struct UdpReceiver {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl UdpReceiver {
    pub fn bind(addr: SocketAddr, read_timeout: Duration) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            warn!("Failed to set large receive buffer for {}: {}", addr, e);
        }

        socket.set_read_timeout(Some(read_timeout))?;
        socket.bind(&addr.into())?;

        info!("Listening on UDP {}", addr);
        Ok(Self {
            socket: socket.into(),
            buffer: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Next datagram, or `None` when the read timed out
    pub fn recv(&mut self) -> io::Result<Option<&[u8]>> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((size, src)) => {
                debug!("Received {} bytes from {}", size, src);
                Ok(Some(&self.buffer[..size]))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
