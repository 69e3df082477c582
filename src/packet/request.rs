use pnet::packet::{
    icmp::{echo_request::MutableEchoRequestPacket, IcmpCode, IcmpTypes},
    Packet,
};
use pnet::util::checksum;
use std::io;

use super::{timestamp_to_bytes, ECHO_HEADER_SIZE, TIMESTAMP_SIZE};

/// A probe packet before send-out
///
/// Low-level abstraction for outgoing echo request messages. The only payload is the departure
/// time of the packet, so the reply carries everything needed to compute the round-trip time.
#[derive(Debug)]
pub struct EchoRequest(MutableEchoRequestPacket<'static>);

impl EchoRequest {
    /// Create a new stamped echo request
    ///
    /// The type field is set to echo request, the code field to zero and the checksum is
    /// computed over the finished packet.
    ///
    /// # Errors
    ///
    /// The function could theoretically fail, if the buffer were smaller than the echo request
    /// header. As the buffer is sized for header plus timestamp, this should never occur.
    pub fn new(id: u16, sequence: u16, sent_at: i64) -> Result<Self, io::Error> {
        let mut pkg = MutableEchoRequestPacket::owned(vec![0; ECHO_HEADER_SIZE + TIMESTAMP_SIZE])
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "icmp echo request"))?;

        pkg.set_icmp_type(IcmpTypes::EchoRequest);
        pkg.set_icmp_code(IcmpCode::new(0));
        pkg.set_identifier(id);
        pkg.set_sequence_number(sequence);
        pkg.set_payload(&timestamp_to_bytes(sent_at));
        pkg.set_checksum(0);
        let sum = checksum(pkg.packet(), 1);
        pkg.set_checksum(sum);

        Ok(Self(pkg))
    }

    /// Wire representation of this packet
    pub fn as_bytes(&self) -> &[u8] {
        self.0.packet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::timestamp_from_bytes;

    #[test]
    fn create_stamped_echo_request() {
        let pkg = EchoRequest::new(0x1234, 0x1201, 1_600_000_000_123_456_789)
            .expect("Failed creating a new echo request packet");

        let packet = pkg.as_bytes();

        // Type 8 and code 0
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);

        // The 5 - 6th byte are reserved for the identifier
        assert_eq!(&packet[4..6], &[0x12, 0x34]);

        // The 7 - 8th byte are reserved for the sequence number
        assert_eq!(&packet[6..8], &[0x12, 0x01]);

        // 8 bytes timestamp + 8 bytes header
        assert_eq!(packet.len(), 16);
        assert_eq!(timestamp_from_bytes(&packet[8..]), Some(1_600_000_000_123_456_789));
    }

    #[test]
    fn checksum_verifies() {
        let pkg = EchoRequest::new(7, 9, 42).unwrap();
        let packet = pkg.as_bytes();

        // Recomputing skips the checksum word and must reproduce the stored value
        assert_ne!(&packet[2..4], &[0, 0]);
        assert_eq!(checksum(packet, 1), u16::from_be_bytes([packet[2], packet[3]]));
    }
}
