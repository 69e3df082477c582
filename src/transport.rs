use pnet::packet::icmp::IcmpPacket;
use pnet::transport::{TransportReceiver, TransportSender};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::config::ConfigError;

/// Buffer size of the pnet transport channel
const CHANNEL_BUFFER_SIZE: usize = 4096;

/// Sending half of a transport
pub trait EchoWriter: Send {
    /// Send one ICMP packet to `dest`
    fn write_to(&mut self, packet: &[u8], dest: IpAddr) -> io::Result<usize>;
}

/// Receiving half of a transport
pub trait EchoReader: Send {
    /// Copy the next ICMP message into `buf`
    ///
    /// Waits at most `timeout`. Returns the sender address and the number of bytes copied.
    ///
    /// # Errors
    ///
    /// If nothing arrives in time, the error is of kind `TimedOut`.
    fn read_from(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<(IpAddr, usize)>;
}

/// Network protocols a prober can open its socket with
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Icmpv4,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    /// Parse a selector of the form `network:protocol`, e.g. `ip4:icmp` or `ip4:1`
    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        match selector {
            "ip4:icmp" | "ip4:1" => Ok(Protocol::Icmpv4),
            _ => Err(ConfigError::UnsupportedProtocol(selector.to_string())),
        }
    }
}

/// Raw ICMP socket of a prober
///
/// The socket is split into a sending and a receiving half, which the send and receive pass of a
/// cycle use independently of each other. The socket is bound to the wildcard address, so the
/// receiving half sees every ICMP message arriving at the host and not just the replies to its
/// own requests.
pub struct Transport {
    pub(crate) writer: Box<dyn EchoWriter>,
    pub(crate) reader: Box<dyn EchoReader>,
}

impl Transport {
    /// Open a new raw socket for the given protocol selector
    ///
    /// # Errors
    ///
    /// An unsupported selector is a configuration error. Opening a raw socket usually requires
    /// elevated privileges and OS errors are passed on as they are.
    pub fn open(selector: &str) -> Result<Self, Box<dyn std::error::Error>> {
        use pnet::packet::ip::IpNextHeaderProtocols::Icmp;
        use pnet::transport::{self, TransportChannelType::*, TransportProtocol::*};

        let protocol = match selector.parse::<Protocol>()? {
            Protocol::Icmpv4 => Layer4(Ipv4(Icmp)),
        };

        trace!("Opening raw socket for {}", selector);

        let (tx, rx) = transport::transport_channel(CHANNEL_BUFFER_SIZE, protocol)?;
        Ok(Self::from_parts(Box::new(PnetWriter(tx)), Box::new(PnetReader(rx))))
    }

    /// Assemble a transport from its two halves
    pub fn from_parts(writer: Box<dyn EchoWriter>, reader: Box<dyn EchoReader>) -> Self {
        Self { writer, reader }
    }

    /// Release the socket
    pub fn close(self) {
        drop(self);
        trace!("Closed raw socket");
    }
}

/// Sending half backed by a pnet [`TransportSender`](tx)
///
/// [tx]: https://docs.rs/pnet/0.25.0/pnet/transport/struct.TransportSender.html
struct PnetWriter(TransportSender);

impl EchoWriter for PnetWriter {
    fn write_to(&mut self, packet: &[u8], dest: IpAddr) -> io::Result<usize> {
        let packet = IcmpPacket::new(packet)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "icmp packet"))?;
        self.0.send_to(packet, dest)
    }
}

/// Receiving half backed by a pnet [`TransportReceiver`](rx)
///
/// pnet strips the IPv4 header, so the bytes handed out start with the ICMP header.
///
/// [rx]: https://docs.rs/pnet/0.25.0/pnet/transport/struct.TransportReceiver.html
struct PnetReader(TransportReceiver);

impl EchoReader for PnetReader {
    fn read_from(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<(IpAddr, usize)> {
        use pnet::packet::Packet;
        use pnet::transport::icmp_packet_iter;

        let mut incoming = icmp_packet_iter(&mut self.0);
        match incoming.next_with_timeout(timeout)? {
            Some((packet, addr)) => {
                let bytes = packet.packet();
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok((addr, len))
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no icmp message")),
        }
    }
}

/// First non-loopback IPv4 address of this host
///
/// Only used to describe the probing host in log output.
pub fn local_source_ip() -> Option<Ipv4Addr> {
    pnet::datalink::interfaces()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .flat_map(|iface| iface.ips.into_iter())
        .find_map(|net| match net.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
            _ => None,
        })
}

/// In-memory transport that answers echo requests itself
#[cfg(test)]
pub(crate) mod loopback {
    use super::*;
    use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
    use pnet::packet::icmp::{IcmpTypes, MutableIcmpPacket};
    use pnet::packet::Packet;
    use pnet::util::checksum;

    /// What happens to the n-th packet written
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum Fate {
        /// Answered with one echo reply
        Echo,
        /// Answered twice with the same reply
        Duplicate,
        /// Request shows up on the socket, followed by the reply
        Mirrored,
        /// Reply carries another identifier
        Foreign,
        /// A read error is reported before the reply
        Glitch,
        /// Never answered
        Lost,
        /// The write itself fails
        Refused,
    }

    type Delivery = Result<(IpAddr, Vec<u8>), io::ErrorKind>;

    pub struct LoopbackWriter {
        fates: Vec<Fate>,
        written: usize,
        replies: Sender<Delivery>,
    }

    pub struct LoopbackReader {
        replies: Receiver<Delivery>,
    }

    /// Create a transport whose n-th written packet meets `fates[n]`
    ///
    /// Packets beyond the list are echoed.
    pub fn transport(fates: &[Fate]) -> Transport {
        let (tx, rx) = channel::unbounded();
        Transport::from_parts(
            Box::new(LoopbackWriter {
                fates: fates.to_vec(),
                written: 0,
                replies: tx,
            }),
            Box::new(LoopbackReader { replies: rx }),
        )
    }

    /// Turn an echo request into the matching echo reply
    pub fn reply_to(request: &[u8]) -> Vec<u8> {
        let mut pkg = MutableIcmpPacket::owned(request.to_vec()).unwrap();
        pkg.set_icmp_type(IcmpTypes::EchoReply);
        pkg.set_checksum(0);
        let sum = checksum(pkg.packet(), 1);
        pkg.set_checksum(sum);
        pkg.packet().to_vec()
    }

    impl EchoWriter for LoopbackWriter {
        fn write_to(&mut self, packet: &[u8], dest: IpAddr) -> io::Result<usize> {
            let fate = self.fates.get(self.written).copied().unwrap_or(Fate::Echo);
            self.written += 1;

            let reply = reply_to(packet);
            let deliveries: Vec<Delivery> = match fate {
                Fate::Echo => vec![Ok((dest, reply))],
                Fate::Duplicate => vec![Ok((dest, reply.clone())), Ok((dest, reply))],
                Fate::Mirrored => vec![Ok((dest, packet.to_vec())), Ok((dest, reply))],
                Fate::Foreign => {
                    let mut reply = reply;
                    reply[5] ^= 0xff;
                    vec![Ok((dest, reply))]
                }
                Fate::Glitch => vec![Err(io::ErrorKind::Other), Ok((dest, reply))],
                Fate::Lost => vec![],
                Fate::Refused => {
                    return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused"))
                }
            };
            for delivery in deliveries {
                let _ = self.replies.send(delivery);
            }
            Ok(packet.len())
        }
    }

    impl EchoReader for LoopbackReader {
        fn read_from(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<(IpAddr, usize)> {
            match self.replies.recv_timeout(timeout) {
                Ok(Ok((addr, bytes))) => {
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    Ok((addr, len))
                }
                Ok(Err(kind)) => Err(io::Error::new(kind, "injected read error")),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "no icmp message"))
                }
            }
        }
    }
}
