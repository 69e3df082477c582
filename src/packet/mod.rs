use pnet::packet::{
    icmp::{echo_reply::EchoReplyPacket, IcmpPacket, IcmpType, IcmpTypes},
    Packet,
};
use std::convert::TryInto;
use std::error::Error;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use crate::transport::EchoReader;

pub use request::EchoRequest;

mod request;

/// Size of the echo header: type, code, checksum, identifier and sequence number
pub const ECHO_HEADER_SIZE: usize = 8;

/// Size of the departure timestamp carried as payload
pub const TIMESTAMP_SIZE: usize = 8;

/// Size of the buffer a single datagram is read into
pub const READ_BUFFER_SIZE: usize = 1500;

/// Encode a timestamp as 8 big-endian bytes
pub fn timestamp_to_bytes(nanos: i64) -> [u8; TIMESTAMP_SIZE] {
    nanos.to_be_bytes()
}

/// Decode the timestamp from the leading 8 bytes of a payload
///
/// Returns `None` if the payload is shorter than a timestamp. Trailing bytes are ignored.
pub fn timestamp_from_bytes(payload: &[u8]) -> Option<i64> {
    payload
        .get(..TIMESTAMP_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .map(i64::from_be_bytes)
}

/// The interesting bits of an echo reply
///
/// Only the identifier, the sequence number and the departure timestamp are retained. Everything
/// else in the packet does not help to match the reply or to compute its round-trip time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub id: u16,
    pub seq: u16,
    /// Departure time in nanoseconds since the Unix epoch
    pub sent_at: i64,
}

impl EchoReply {
    /// Time in transit, measured against `now` in nanoseconds since the Unix epoch
    ///
    /// A departure time in the future, e.g. after the wall clock was stepped back, counts as zero.
    pub fn rtt(&self, now: i64) -> Duration {
        let lapsed = now.saturating_sub(self.sent_at);
        Duration::from_nanos(lapsed.max(0) as u64)
    }
}

/// An ICMP message after receipt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IcmpMessage {
    EchoReply(EchoReply),

    // Catch-all for every type a prober does not care about
    Other(IcmpType),
}

/// Reasons an ICMP message cannot be parsed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooShort(usize),
    MissingTimestamp(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "icmp message of {} bytes is too short", len),
            Self::MissingTimestamp(len) => {
                write!(f, "echo reply payload of {} bytes carries no timestamp", len)
            }
        }
    }
}

impl Error for DecodeError {}

/// Parse an ICMP message
///
/// Echo replies are required to carry the 8 byte departure timestamp. All other message types
/// are reported by their type field only.
pub fn parse(bytes: &[u8]) -> Result<IcmpMessage, DecodeError> {
    let icmp = IcmpPacket::new(bytes).ok_or(DecodeError::TooShort(bytes.len()))?;
    let icmp_type = icmp.get_icmp_type();
    if icmp_type != IcmpTypes::EchoReply {
        return Ok(IcmpMessage::Other(icmp_type));
    }

    let reply = EchoReplyPacket::new(bytes).ok_or(DecodeError::TooShort(bytes.len()))?;
    let payload = reply.payload();
    let sent_at =
        timestamp_from_bytes(payload).ok_or(DecodeError::MissingTimestamp(payload.len()))?;

    Ok(IcmpMessage::EchoReply(EchoReply {
        id: reply.get_identifier(),
        seq: reply.get_sequence_number(),
        sent_at,
    }))
}

/// Failures while reading the next message off the transport
#[derive(Debug)]
pub enum ReadError {
    /// Nothing arrived before the deadline
    Timeout,
    Io(io::Error),
    Malformed(DecodeError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for icmp messages"),
            Self::Io(e) => write!(f, "reading icmp message failed: {}", e),
            Self::Malformed(e) => write!(f, "malformed icmp message: {}", e),
        }
    }
}

impl Error for ReadError {}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

impl From<DecodeError> for ReadError {
    fn from(e: DecodeError) -> Self {
        Self::Malformed(e)
    }
}

/// Read one datagram into `buf` and parse it
///
/// Waits at most `timeout` for the datagram. Returns the address of the sender together with the
/// parsed message.
pub fn decode<R: EchoReader + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(IpAddr, IcmpMessage), ReadError> {
    let (source, len) = reader.read_from(buf, timeout)?;
    let message = parse(&buf[..len])?;
    Ok((source, message))
}
