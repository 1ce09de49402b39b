use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use super::protocol::{Channel, MAX_DATAGRAM_SIZE, Packet, PacketBody, PacketHeader};

/// Counters exposed for the status line and the scoreboard lag column.
#[derive(Debug, Clone, Default)]
pub struct NetStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub decode_failures: u64,
}

/// A raw transport event, before role-specific routing. Connect and
/// disconnect control frames are surfaced as events here; everything else
/// arrives as a decoded packet plus the verbatim datagram for the demo log.
#[derive(Debug)]
pub enum NetEvent {
    Connect {
        addr: SocketAddr,
        protocol_version: u32,
    },
    ConnectAck {
        addr: SocketAddr,
        client_num: u32,
        connect_value: u32,
    },
    Deny {
        addr: SocketAddr,
        reason_raw: u32,
    },
    Disconnect {
        addr: SocketAddr,
        reason_raw: u32,
    },
    Message {
        addr: SocketAddr,
        packet: Packet,
        raw: Vec<u8>,
    },
}

/// Thin wrapper over a nonblocking UDP socket. One endpoint serves either
/// role; the drivers own all per-peer state.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    recv_buffer: Box<[u8]>,
    send_sequence: u32,
    stats: NetStats,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE].into_boxed_slice(),
            send_sequence: 0,
            stats: NetStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetStats {
        &self.stats
    }

    /// Stamp a body with the next header. `ack`/`ack_bits` come from the
    /// destination peer's receive tracker.
    pub fn make_packet(&mut self, channel: Channel, ack: u32, ack_bits: u32, body: PacketBody) -> Packet {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        Packet::new(PacketHeader::new(channel, sequence, ack, ack_bits), body)
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let data = packet
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let bytes = self.socket.send_to(&data, addr)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(bytes)
    }

    /// Drain everything currently queued on the socket, waiting at most
    /// `timeout` for the first datagram so a quiet tick still yields
    /// promptly. Undecodable datagrams are counted and dropped.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Vec<NetEvent>> {
        let mut events = Vec::new();
        let mut first = true;

        loop {
            if first {
                self.socket.set_read_timeout(Some(timeout.max(Duration::from_micros(1))))?;
                self.socket.set_nonblocking(false)?;
            }

            let result = self.socket.recv_from(&mut self.recv_buffer);

            if first {
                self.socket.set_nonblocking(true)?;
                first = false;
            }

            match result {
                Ok((size, addr)) => {
                    let raw = &self.recv_buffer[..size];
                    match Packet::deserialize(raw) {
                        Ok(packet) => {
                            self.stats.packets_received += 1;
                            self.stats.bytes_received += size as u64;
                            events.push(Self::classify(packet, raw.to_vec(), addr));
                        }
                        Err(e) => {
                            self.stats.decode_failures += 1;
                            log::debug!("dropping undecodable datagram from {addr}: {e}");
                        }
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(events)
    }

    fn classify(packet: Packet, raw: Vec<u8>, addr: SocketAddr) -> NetEvent {
        match packet.body {
            PacketBody::Connect { protocol_version } => NetEvent::Connect {
                addr,
                protocol_version,
            },
            PacketBody::ConnectAck {
                client_num,
                connect_value,
            } => NetEvent::ConnectAck {
                addr,
                client_num,
                connect_value,
            },
            PacketBody::Deny { reason_raw } => NetEvent::Deny { addr, reason_raw },
            PacketBody::Disconnect { reason_raw } => NetEvent::Disconnect { addr, reason_raw },
            PacketBody::Message(_) => NetEvent::Message { addr, packet, raw },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Message;

    fn loopback_pair() -> (NetworkEndpoint, NetworkEndpoint) {
        let a = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let b = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        (a, b)
    }

    #[test]
    fn messages_cross_the_loopback() {
        let (mut sender, mut receiver) = loopback_pair();

        let packet = sender.make_packet(
            Channel::Sequenced,
            0,
            0,
            PacketBody::Message(Message::TicFinished { world_index: 5 }),
        );
        sender.send_to(&packet, receiver.local_addr()).unwrap();

        let events = receiver.poll(Duration::from_millis(200)).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            NetEvent::Message { packet, raw, .. } => {
                assert!(matches!(
                    packet.body,
                    PacketBody::Message(Message::TicFinished { world_index: 5 })
                ));
                assert!(!raw.is_empty());
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    #[test]
    fn connect_frames_become_events() {
        let (mut sender, mut receiver) = loopback_pair();

        let packet = sender.make_packet(
            Channel::Sequenced,
            0,
            0,
            PacketBody::Connect {
                protocol_version: crate::net::protocol::PROTOCOL_VERSION,
            },
        );
        sender.send_to(&packet, receiver.local_addr()).unwrap();

        let events = receiver.poll(Duration::from_millis(200)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], NetEvent::Connect { .. }));
    }

    #[test]
    fn garbage_is_counted_and_dropped() {
        let (sender, mut receiver) = loopback_pair();

        sender
            .socket
            .send_to(&[0xff; 16], receiver.local_addr())
            .unwrap();

        let events = receiver.poll(Duration::from_millis(200)).unwrap();
        assert!(events.is_empty());
        assert_eq!(receiver.stats().decode_failures, 1);
    }

    #[test]
    fn sequences_increment_per_packet() {
        let mut endpoint = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let p1 = endpoint.make_packet(
            Channel::Sequenced,
            0,
            0,
            PacketBody::Message(Message::TicFinished { world_index: 0 }),
        );
        let p2 = endpoint.make_packet(
            Channel::Sequenced,
            0,
            0,
            PacketBody::Message(Message::TicFinished { world_index: 0 }),
        );
        assert_eq!(p1.header.sequence + 1, p2.header.sequence);
    }
}
