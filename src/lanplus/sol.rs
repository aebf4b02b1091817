//! The Serial-over-LAN payload format and its per-packet
//! sequence/acknowledge bookkeeping.

use bitflags::bitflags;

bitflags! {
    /// The operation bits of an outbound SOL packet (byte 4).
    pub struct SolOperation: u8 {
        const NACK = 0x40;
        const ASSERT_RING_WOR = 0x20;
        const GENERATE_BREAK = 0x10;
        const DEASSERT_CTS = 0x08;
        const DEASSERT_DCD_DSR = 0x04;
        const FLUSH_INBOUND = 0x02;
        const FLUSH_OUTBOUND = 0x01;
    }
}

bitflags! {
    /// The status bits of an inbound SOL packet (byte 4).
    pub struct SolStatus: u8 {
        const NACK = 0x40;
        const TRANSFER_UNAVAILABLE = 0x20;
        const SOL_INACTIVE = 0x10;
        const TRANSMIT_OVERRUN = 0x08;
        const BREAK_DETECTED = 0x04;
    }
}

/// A received SOL packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SolPacket {
    /// The 4-bit sequence number of this packet; 0 for a packet that
    /// only acknowledges.
    pub packet_sequence_number: u8,
    /// The sequence number this packet acknowledges, if any.
    pub acked_packet_number: u8,
    /// How many characters of the acknowledged packet were accepted.
    pub accepted_character_count: u8,
    /// Status bits reported by the BMC.
    pub status: SolStatus,
    /// The terminal byte stream carried by this packet.
    pub data: Vec<u8>,
}

impl SolPacket {
    /// Parse a SOL packet from a decrypted payload.
    pub(crate) fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }

        Some(Self {
            packet_sequence_number: payload[0] & 0x0F,
            acked_packet_number: payload[1] & 0x0F,
            accepted_character_count: payload[2],
            status: SolStatus::from_bits_truncate(payload[3]),
            data: payload[4..].to_vec(),
        })
    }

    /// Whether this packet acknowledges (fully or partially) an
    /// outbound packet sent under `sequence_number`.
    pub(crate) fn acks(&self, sequence_number: u8) -> bool {
        sequence_number != 0 && self.acked_packet_number == sequence_number
    }
}

/// Serialize an outbound SOL payload.
pub(crate) fn write_sol_payload(
    packet_sequence_number: u8,
    acked_packet_number: u8,
    accepted_character_count: u8,
    operation: SolOperation,
    data: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + data.len());

    payload.push(packet_sequence_number & 0x0F);
    payload.push(acked_packet_number & 0x0F);
    payload.push(accepted_character_count);
    payload.push(operation.bits());
    payload.extend_from_slice(data);

    payload
}

/// The SOL sequencing state of one session.
#[derive(Debug)]
pub(crate) struct SolState {
    sequence_number: u8,
    last_received_sequence_number: u8,
    last_received_byte_count: u8,
}

impl Default for SolState {
    fn default() -> Self {
        Self {
            // The first data packet is sent under sequence number 1.
            sequence_number: 1,
            last_received_sequence_number: 0,
            last_received_byte_count: 0,
        }
    }
}

impl SolState {
    /// Take the next outbound sequence number. Data packets cycle
    /// through 1..=15; 0 is reserved for pure ACKs.
    pub fn next_sequence_number(&mut self) -> u8 {
        if self.sequence_number > 0x0F {
            self.sequence_number = 1;
        }

        let current = self.sequence_number;
        self.sequence_number += 1;
        current
    }

    /// Apply duplicate suppression to a received data packet.
    ///
    /// A packet repeating the last seen sequence number only delivers
    /// the bytes beyond what the earlier copy carried; `packet.data` is
    /// trimmed accordingly (possibly to nothing). The cached byte count
    /// always reflects the full packet, so a re-repeat is judged
    /// against the longest copy seen.
    pub fn filter_duplicate(&mut self, packet: &mut SolPacket) {
        let full_len = packet.data.len();

        if packet.packet_sequence_number == self.last_received_sequence_number {
            let previously_seen = self.last_received_byte_count as usize;

            if full_len > previously_seen {
                packet.data.drain(..previously_seen);
            } else {
                packet.data.clear();
            }
        }

        if packet.packet_sequence_number != 0 {
            self.last_received_sequence_number = packet.packet_sequence_number;
            self.last_received_byte_count = full_len.min(u8::MAX as usize) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let payload = write_sol_payload(3, 2, 10, SolOperation::GENERATE_BREAK, b"hello");

        assert_eq!(payload[..4], [0x03, 0x02, 0x0A, 0x10]);

        let packet = SolPacket::from_payload(&payload).unwrap();
        assert_eq!(packet.packet_sequence_number, 3);
        assert_eq!(packet.acked_packet_number, 2);
        assert_eq!(packet.accepted_character_count, 10);
        assert_eq!(packet.data, b"hello");
    }

    #[test]
    fn sequence_skips_zero() {
        let mut state = SolState::default();

        let mut seen = Vec::new();
        for _ in 0..31 {
            seen.push(state.next_sequence_number());
        }

        assert_eq!(seen[0], 1);
        assert_eq!(seen[14], 15);
        assert_eq!(seen[15], 1);
        assert!(seen.iter().all(|seq| (1..=15).contains(seq)));
    }

    #[test]
    fn duplicate_with_no_new_data_is_emptied() {
        let mut state = SolState::default();

        let mut first = SolPacket::from_payload(&[0x01, 0x00, 0x00, 0x00, b'a', b'b']).unwrap();
        state.filter_duplicate(&mut first);
        assert_eq!(first.data, b"ab");

        let mut repeat = SolPacket::from_payload(&[0x01, 0x00, 0x00, 0x00, b'a', b'b']).unwrap();
        state.filter_duplicate(&mut repeat);
        assert!(repeat.data.is_empty());
    }

    #[test]
    fn duplicate_with_extension_delivers_the_tail() {
        let mut state = SolState::default();

        let mut first = SolPacket::from_payload(&[0x02, 0x00, 0x00, 0x00, b'a', b'b']).unwrap();
        state.filter_duplicate(&mut first);

        let mut repeat =
            SolPacket::from_payload(&[0x02, 0x00, 0x00, 0x00, b'a', b'b', b'c', b'd']).unwrap();
        state.filter_duplicate(&mut repeat);
        assert_eq!(repeat.data, b"cd");

        // The cache now covers the longer copy.
        let mut again =
            SolPacket::from_payload(&[0x02, 0x00, 0x00, 0x00, b'a', b'b', b'c', b'd']).unwrap();
        state.filter_duplicate(&mut again);
        assert!(again.data.is_empty());
    }

    #[test]
    fn new_sequence_passes_through() {
        let mut state = SolState::default();

        let mut first = SolPacket::from_payload(&[0x03, 0x00, 0x00, 0x00, b'x']).unwrap();
        state.filter_duplicate(&mut first);

        let mut second = SolPacket::from_payload(&[0x04, 0x00, 0x00, 0x00, b'y']).unwrap();
        state.filter_duplicate(&mut second);
        assert_eq!(second.data, b"y");
    }

    #[test]
    fn ack_only_packets_do_not_poison_the_cache() {
        let mut state = SolState::default();

        let mut data = SolPacket::from_payload(&[0x05, 0x00, 0x00, 0x00, b'x', b'y']).unwrap();
        state.filter_duplicate(&mut data);

        let mut ack = SolPacket::from_payload(&[0x00, 0x05, 0x02, 0x00]).unwrap();
        state.filter_duplicate(&mut ack);
        assert!(ack.acks(5));

        let mut repeat = SolPacket::from_payload(&[0x05, 0x00, 0x00, 0x00, b'x', b'y']).unwrap();
        state.filter_duplicate(&mut repeat);
        assert!(repeat.data.is_empty());
    }
}
