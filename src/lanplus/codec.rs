//! Building and parsing of the RMCP / RMCP+ session envelope, including
//! payload encryption, the integrity trailer, and the IPMI message body
//! with its Send Message bridging wrappers.

use super::checksum::push_checksum;
use super::crypto::{
    aes_128_cbc_decrypt, aes_128_cbc_encrypt, constant_time_eq, random_bytes, BadCiphertext,
    ConfidentialityAlgorithm, IntegrityAlgorithm, RunningHmac, SessionKeys,
};
use super::rmcp::{AsfMessage, RmcpHeader, RmcpHeaderError, RmcpType};

pub(crate) const BMC_SLAVE_ADDR: u8 = 0x20;
pub(crate) const REMOTE_SWID: u8 = 0x81;
pub(crate) const SEND_MESSAGE_CMD: u8 = 0x34;
pub(crate) const NETFN_APP: u8 = 0x06;

pub(crate) const AUTHTYPE_NONE: u8 = 0x00;
pub(crate) const AUTHTYPE_RMCP_PLUS: u8 = 0x06;

/// The RMCP+ payload types we handle, from table 13-16 of the IPMI v2.0
/// specification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadType {
    IpmiMessage,
    Sol,
    OpenSessionRequest,
    OpenSessionResponse,
    Rakp1,
    Rakp2,
    Rakp3,
    Rakp4,
}

impl TryFrom<u8> for PayloadType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0x00 => Self::IpmiMessage,
            0x01 => Self::Sol,
            0x10 => Self::OpenSessionRequest,
            0x11 => Self::OpenSessionResponse,
            0x12 => Self::Rakp1,
            0x13 => Self::Rakp2,
            0x14 => Self::Rakp3,
            0x15 => Self::Rakp4,
            _ => return Err(()),
        };

        Ok(value)
    }
}

impl From<PayloadType> for u8 {
    fn from(value: PayloadType) -> Self {
        match value {
            PayloadType::IpmiMessage => 0x00,
            PayloadType::Sol => 0x01,
            PayloadType::OpenSessionRequest => 0x10,
            PayloadType::OpenSessionResponse => 0x11,
            PayloadType::Rakp1 => 0x12,
            PayloadType::Rakp2 => 0x13,
            PayloadType::Rakp3 => 0x14,
            PayloadType::Rakp4 => 0x15,
        }
    }
}

/// An error that occurred while parsing an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadError {
    /// There was not enough data in the packet.
    NotEnoughData,
    /// The RMCP class was neither IPMI nor ASF.
    InvalidRmcpClass,
    /// The packet carried an ASF message we could not decode.
    InvalidAsfMessage,
    /// The session auth type byte was neither none nor RMCP+.
    UnsupportedAuthType(u8),
    /// The payload type is not one we know.
    InvalidPayloadType(u8),
    /// The encrypted bit does not match the session's confidentiality
    /// state.
    MismatchingEncryptionState,
    /// The authenticated bit does not match the session's integrity
    /// state.
    MismatchingAuthenticationState,
    /// The payload length field disagrees with the packet length.
    IncorrectPayloadLen,
    /// The authcode trailer did not verify.
    AuthCodeMismatch,
    /// The encrypted payload could not be decrypted.
    BadCiphertext,
    /// The confidentiality trailer was malformed after decryption.
    InvalidConfidentialityTrailer,
}

impl From<RmcpHeaderError> for ReadError {
    fn from(value: RmcpHeaderError) -> Self {
        match value {
            RmcpHeaderError::NotEnoughData => ReadError::NotEnoughData,
            RmcpHeaderError::InvalidClass => ReadError::InvalidRmcpClass,
        }
    }
}

impl From<BadCiphertext> for ReadError {
    fn from(_: BadCiphertext) -> Self {
        ReadError::BadCiphertext
    }
}

/// An error that occurred while building an outbound packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteError {
    /// The payload does not fit the 16-bit length field.
    PayloadTooLong,
    /// The payload, once padded and prefixed with an IV, does not fit
    /// the 16-bit length field.
    EncryptedPayloadTooLong,
    /// The negotiated integrity algorithm cannot be used for sealing.
    UnsupportedIntegrityAlgorithm(IntegrityAlgorithm),
    /// The negotiated confidentiality algorithm cannot be used for
    /// traffic.
    UnsupportedConfidentialityAlgorithm(ConfidentialityAlgorithm),
    /// The system entropy source failed to produce an IV.
    EntropyUnavailable,
}

/// A fully parsed inbound datagram.
#[derive(Debug)]
pub(crate) enum InboundPacket {
    /// An ASF message (presence pong).
    Asf(AsfMessage),
    /// The body of an IPMI v1.5 session message.
    V1_5(Vec<u8>),
    /// An RMCP+ session message.
    V2_0(InboundMessage),
}

/// A decoded (and, where applicable, decrypted and verified) RMCP+
/// session message.
#[derive(Debug)]
pub(crate) struct InboundMessage {
    pub ty: PayloadType,
    pub session_id: u32,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

/// The cryptographic state packets are sealed and unsealed with.
///
/// Sessions start out `Insecure`; the `Protected` state is installed
/// once RAKP-4 verifies and carries the derived session keys.
pub(crate) enum SessionCipher {
    Insecure,
    Protected {
        integrity: IntegrityAlgorithm,
        confidentiality: ConfidentialityAlgorithm,
        keys: SessionKeys,
        /// Compute the integrity pad without counting the pad-length and
        /// next-header bytes. Some OEM firmware lays the trailer out
        /// this way.
        short_trailer_pad: bool,
    },
}

impl core::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCipher::Insecure => f.debug_struct("Insecure").finish(),
            SessionCipher::Protected {
                integrity,
                confidentiality,
                ..
            } => f
                .debug_struct("Protected")
                .field("integrity", integrity)
                .field("confidentiality", confidentiality)
                .finish(),
        }
    }
}

impl SessionCipher {
    fn encrypted(&self) -> bool {
        match self {
            SessionCipher::Insecure => false,
            SessionCipher::Protected {
                confidentiality, ..
            } => *confidentiality != ConfidentialityAlgorithm::None,
        }
    }

    fn authenticated(&self) -> bool {
        match self {
            SessionCipher::Insecure => false,
            SessionCipher::Protected { integrity, .. } => *integrity != IntegrityAlgorithm::None,
        }
    }

    /// Build a complete RMCP+ datagram around `payload`.
    pub fn write_packet(
        &self,
        ty: PayloadType,
        session_id: u32,
        sequence: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, WriteError> {
        let mut buffer = Vec::with_capacity(payload.len() + 64);

        RmcpHeader::new_ipmi().write(&mut buffer);

        buffer.push(AUTHTYPE_RMCP_PLUS);

        let encrypted = (self.encrypted() as u8) << 7;
        let authenticated = (self.authenticated() as u8) << 6;
        buffer.push(encrypted | authenticated | u8::from(ty));

        buffer.extend_from_slice(&session_id.to_le_bytes());
        buffer.extend_from_slice(&sequence.to_le_bytes());

        self.write_payload(payload, &mut buffer)?;
        self.write_trailer(&mut buffer)?;

        Ok(buffer)
    }

    fn write_payload(&self, data: &[u8], buffer: &mut Vec<u8>) -> Result<(), WriteError> {
        let confidentiality = match self {
            SessionCipher::Insecure => ConfidentialityAlgorithm::None,
            SessionCipher::Protected {
                confidentiality, ..
            } => *confidentiality,
        };

        match confidentiality {
            ConfidentialityAlgorithm::None => {
                if data.len() > u16::MAX as usize {
                    return Err(WriteError::PayloadTooLong);
                }

                buffer.extend_from_slice(&(data.len() as u16).to_le_bytes());
                buffer.extend_from_slice(data);
            }
            ConfidentialityAlgorithm::AesCbc128 => {
                let keys = match self {
                    SessionCipher::Protected { keys, .. } => keys,
                    SessionCipher::Insecure => unreachable!("encryption requires session keys"),
                };

                let iv: [u8; 16] =
                    random_bytes().map_err(|_| WriteError::EntropyUnavailable)?;

                // Data, confidentiality pad and the pad length byte
                // together must fill whole AES blocks.
                let pad_len = (16 - ((data.len() + 1) % 16)) % 16;
                let padded_len = 16 + data.len() + pad_len + 1;

                if padded_len > u16::MAX as usize {
                    return Err(WriteError::EncryptedPayloadTooLong);
                }

                buffer.extend_from_slice(&(padded_len as u16).to_le_bytes());
                buffer.extend_from_slice(&iv);

                let encrypt_from = buffer.len();

                buffer.extend_from_slice(data);
                buffer.extend((1u8..).take(pad_len));
                buffer.push(pad_len as u8);

                aes_128_cbc_encrypt(keys.aes_key(), &iv, &mut buffer[encrypt_from..]);
            }
            algorithm => {
                return Err(WriteError::UnsupportedConfidentialityAlgorithm(algorithm));
            }
        }

        Ok(())
    }

    fn write_trailer(&self, buffer: &mut Vec<u8>) -> Result<(), WriteError> {
        let (integrity, keys, short_pad) = match self {
            SessionCipher::Insecure => return Ok(()),
            SessionCipher::Protected {
                integrity,
                keys,
                short_trailer_pad,
                ..
            } => (*integrity, keys, *short_trailer_pad),
        };

        if integrity == IntegrityAlgorithm::None {
            return Ok(());
        }

        // The authenticated range runs from the auth type byte through
        // the next-header byte; the pad aligns it to 4 bytes.
        let covered = if short_pad {
            buffer[4..].len()
        } else {
            buffer[4..].len() + 2
        };
        let pad_len = (4 - covered % 4) % 4;

        buffer.extend(std::iter::repeat(0xFF).take(pad_len));
        buffer.push(pad_len as u8);

        // Next header, hardcoded per table 13-8.
        buffer.push(0x07);

        let kind = integrity
            .hmac_kind()
            .ok_or(WriteError::UnsupportedIntegrityAlgorithm(integrity))?;

        let mac = RunningHmac::new(kind, keys.k1())
            .expect("integrity HMAC kinds are never RakpNone")
            .feed(&buffer[4..])
            .finalize();

        buffer.extend_from_slice(&mac[..integrity.mac_len()]);

        Ok(())
    }

    /// Parse one inbound datagram.
    ///
    /// Validation order: RMCP class, auth type, authcode, decryption,
    /// payload length. Session-ID filtering is the caller's job, since
    /// it depends on session state.
    pub fn read_packet(&self, data: &[u8]) -> Result<InboundPacket, ReadError> {
        let (header, rest) = RmcpHeader::from_bytes(data)?;

        match header.class().ty {
            RmcpType::Asf => AsfMessage::from_bytes(rest)
                .map(InboundPacket::Asf)
                .ok_or(ReadError::InvalidAsfMessage),
            RmcpType::OemDefined => Err(ReadError::InvalidRmcpClass),
            RmcpType::Ipmi => {
                let auth_type = *rest.first().ok_or(ReadError::NotEnoughData)?;

                match auth_type {
                    AUTHTYPE_NONE => Self::read_v1_5(rest).map(InboundPacket::V1_5),
                    AUTHTYPE_RMCP_PLUS => self.read_v2_0(rest).map(InboundPacket::V2_0),
                    other => Err(ReadError::UnsupportedAuthType(other)),
                }
            }
        }
    }

    fn read_v1_5(rest: &[u8]) -> Result<Vec<u8>, ReadError> {
        // authtype + sequence + session id + length byte
        if rest.len() < 10 {
            return Err(ReadError::NotEnoughData);
        }

        let len = rest[9] as usize;
        let body = &rest[10..];

        if body.len() < len {
            return Err(ReadError::IncorrectPayloadLen);
        }

        Ok(body[..len].to_vec())
    }

    fn read_v2_0(&self, rest: &[u8]) -> Result<InboundMessage, ReadError> {
        // authtype + payload type + session id + sequence + length
        if rest.len() < 12 {
            return Err(ReadError::NotEnoughData);
        }

        let encrypted = (rest[1] & 0x80) == 0x80;
        let authenticated = (rest[1] & 0x40) == 0x40;
        let ty = PayloadType::try_from(rest[1] & 0x3F)
            .map_err(|_| ReadError::InvalidPayloadType(rest[1] & 0x3F))?;

        let session_id = u32::from_le_bytes(rest[2..6].try_into().unwrap());
        let sequence = u32::from_le_bytes(rest[6..10].try_into().unwrap());
        let payload_len = u16::from_le_bytes(rest[10..12].try_into().unwrap()) as usize;

        if rest.len() < 12 + payload_len {
            return Err(ReadError::IncorrectPayloadLen);
        }

        // The handshake payload types are never protected; only
        // in-session traffic carries the session crypto.
        let in_session = matches!(ty, PayloadType::IpmiMessage | PayloadType::Sol)
            && session_id != 0;

        if in_session {
            if self.authenticated() != authenticated {
                return Err(ReadError::MismatchingAuthenticationState);
            }
            if self.encrypted() != encrypted {
                return Err(ReadError::MismatchingEncryptionState);
            }
        } else if authenticated || encrypted {
            return Err(ReadError::MismatchingAuthenticationState);
        }

        if in_session && self.authenticated() {
            self.validate_authcode(rest)?;
        }

        let payload = &rest[12..12 + payload_len];

        let payload = if in_session && self.encrypted() {
            self.decrypt_payload(payload)?
        } else {
            payload.to_vec()
        };

        Ok(InboundMessage {
            ty,
            session_id,
            sequence,
            payload,
        })
    }

    fn validate_authcode(&self, rest: &[u8]) -> Result<(), ReadError> {
        let (integrity, keys) = match self {
            SessionCipher::Protected {
                integrity, keys, ..
            } => (*integrity, keys),
            SessionCipher::Insecure => unreachable!("validated by caller"),
        };

        let mac_len = integrity.mac_len();

        if rest.len() < 12 + mac_len + 2 {
            return Err(ReadError::NotEnoughData);
        }

        let covered = &rest[..rest.len() - mac_len];
        let supplied = &rest[rest.len() - mac_len..];

        let kind = integrity
            .hmac_kind()
            .ok_or(ReadError::AuthCodeMismatch)?;

        let mac = RunningHmac::new(kind, keys.k1())
            .expect("integrity HMAC kinds are never RakpNone")
            .feed(covered)
            .finalize();

        if constant_time_eq(&mac[..mac_len], supplied) {
            Ok(())
        } else {
            Err(ReadError::AuthCodeMismatch)
        }
    }

    fn decrypt_payload(&self, payload: &[u8]) -> Result<Vec<u8>, ReadError> {
        let keys = match self {
            SessionCipher::Protected { keys, .. } => keys,
            SessionCipher::Insecure => unreachable!("validated by caller"),
        };

        if payload.len() < 16 {
            return Err(ReadError::NotEnoughData);
        }

        let iv: [u8; 16] = payload[..16].try_into().unwrap();
        let mut plaintext = payload[16..].to_vec();

        aes_128_cbc_decrypt(keys.aes_key(), &iv, &mut plaintext)?;

        let pad_len = *plaintext.last().ok_or(ReadError::BadCiphertext)? as usize;

        if pad_len + 1 > plaintext.len() {
            return Err(ReadError::InvalidConfidentialityTrailer);
        }

        let data_len = plaintext.len() - pad_len - 1;

        // Pad bytes count up from 0x01.
        for (idx, value) in plaintext[data_len..plaintext.len() - 1].iter().enumerate() {
            if *value != (idx + 1) as u8 {
                return Err(ReadError::InvalidConfidentialityTrailer);
            }
        }

        plaintext.truncate(data_len);

        Ok(plaintext)
    }
}

/// Build the sessionless IPMI v1.5 datagram used for the Get Channel
/// Authentication Capabilities probe.
pub(crate) fn write_v1_5_packet(body: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(body.len() + 14);

    RmcpHeader::new_ipmi().write(&mut buffer);

    buffer.push(AUTHTYPE_NONE);

    // Pre-session sequence number and session ID are zero.
    buffer.extend_from_slice(&0u32.to_le_bytes());
    buffer.extend_from_slice(&0u32.to_le_bytes());

    buffer.push(body.len() as u8);
    buffer.extend_from_slice(body);

    buffer
}

/// The bridging route of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BridgeRoute {
    /// Straight to the BMC.
    Direct,
    /// Encapsulated in one Send Message command.
    Single {
        target_addr: u8,
        target_channel: u8,
    },
    /// Encapsulated twice, relayed through a transit controller.
    Double {
        transit_addr: u8,
        transit_channel: u8,
        target_addr: u8,
        target_channel: u8,
    },
}

impl BridgeRoute {
    pub fn level(&self) -> u8 {
        match self {
            BridgeRoute::Direct => 0,
            BridgeRoute::Single { .. } => 1,
            BridgeRoute::Double { .. } => 2,
        }
    }
}

/// Write the IPMI request message body, wrapping it in Send Message
/// encapsulation when the route is bridged.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_ipmi_request_body(
    buffer: &mut Vec<u8>,
    route: BridgeRoute,
    my_addr: u8,
    netfn: u8,
    lun: u8,
    rq_seq: u8,
    cmd: u8,
    data: &[u8],
) {
    let rq_seq_lun = rq_seq << 2;

    // Send Message wrapper checksum ranges that must be closed after the
    // inner message is written.
    let mut wrapper_starts: Vec<usize> = Vec::new();

    let (rs_addr, rq_addr) = match route {
        BridgeRoute::Direct => (BMC_SLAVE_ADDR, REMOTE_SWID),
        BridgeRoute::Single {
            target_addr,
            target_channel,
        } => {
            let header = buffer.len();
            buffer.extend_from_slice(&[BMC_SLAVE_ADDR, NETFN_APP << 2]);
            push_checksum(buffer, header);

            wrapper_starts.push(buffer.len());
            buffer.extend_from_slice(&[
                REMOTE_SWID,
                rq_seq_lun,
                SEND_MESSAGE_CMD,
                0x40 | target_channel,
            ]);

            (target_addr, REMOTE_SWID)
        }
        BridgeRoute::Double {
            transit_addr,
            transit_channel,
            target_addr,
            target_channel,
        } => {
            let header = buffer.len();
            buffer.extend_from_slice(&[BMC_SLAVE_ADDR, NETFN_APP << 2]);
            push_checksum(buffer, header);

            wrapper_starts.push(buffer.len());
            buffer.extend_from_slice(&[
                REMOTE_SWID,
                rq_seq_lun,
                SEND_MESSAGE_CMD,
                0x40 | transit_channel,
            ]);

            let header = buffer.len();
            buffer.extend_from_slice(&[transit_addr, NETFN_APP << 2]);
            push_checksum(buffer, header);

            wrapper_starts.push(buffer.len());
            buffer.extend_from_slice(&[
                REMOTE_SWID,
                rq_seq_lun,
                SEND_MESSAGE_CMD,
                0x40 | target_channel,
            ]);

            (target_addr, my_addr)
        }
    };

    let header = buffer.len();
    buffer.extend_from_slice(&[rs_addr, (netfn << 2) | (lun & 0x03)]);
    push_checksum(buffer, header);

    let body = buffer.len();
    buffer.extend_from_slice(&[rq_addr, rq_seq_lun, cmd]);
    buffer.extend_from_slice(data);
    push_checksum(buffer, body);

    // Close the wrapper checksums, innermost first.
    while let Some(start) = wrapper_starts.pop() {
        push_checksum(buffer, start);
    }
}

/// A parsed IPMI response message body.
#[derive(Debug, Clone)]
pub(crate) struct IpmiResponseBody {
    pub netfn: u8,
    pub rq_seq: u8,
    pub cmd: u8,
    pub completion_code: u8,
    /// Response data, not including the completion code or the trailing
    /// checksum. For a bridged response this is the embedded inner
    /// message.
    pub data: Vec<u8>,
}

/// Parse an IPMI response message body.
pub(crate) fn parse_ipmi_response_body(payload: &[u8]) -> Result<IpmiResponseBody, ReadError> {
    // rq_addr, netfn/lun, checksum, rs_addr, rq_seq/lun, cmd,
    // completion code, then data and the final checksum.
    if payload.len() < 8 {
        return Err(ReadError::NotEnoughData);
    }

    Ok(IpmiResponseBody {
        netfn: payload[1] >> 2,
        rq_seq: payload[4] >> 2,
        cmd: payload[5],
        completion_code: payload[6],
        data: payload[7..payload.len() - 1].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lanplus::crypto::AuthenticationAlgorithm;

    fn protected_cipher() -> SessionCipher {
        let keys = SessionKeys::derive(
            AuthenticationAlgorithm::RakpHmacSha1,
            b"password",
            &[0x11; 16],
            &[0x22; 16],
            0x14,
            b"admin",
        )
        .unwrap();

        SessionCipher::Protected {
            integrity: IntegrityAlgorithm::HmacSha1_96,
            confidentiality: ConfidentialityAlgorithm::AesCbc128,
            keys,
            short_trailer_pad: false,
        }
    }

    #[test]
    fn insecure_packet_roundtrip() {
        let cipher = SessionCipher::Insecure;

        let packet = cipher
            .write_packet(PayloadType::OpenSessionRequest, 0, 0, &[1, 2, 3, 4])
            .unwrap();

        // RMCP header, authtype, payload type
        assert_eq!(&packet[..6], &[0x06, 0x00, 0xFF, 0x07, 0x06, 0x10]);

        match cipher.read_packet(&packet).unwrap() {
            InboundPacket::V2_0(message) => {
                assert_eq!(message.ty, PayloadType::OpenSessionRequest);
                assert_eq!(message.session_id, 0);
                assert_eq!(message.payload, [1, 2, 3, 4]);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn protected_packet_roundtrip() {
        let cipher = protected_cipher();

        let payload: Vec<u8> = (0u8..23).collect();
        let packet = cipher
            .write_packet(PayloadType::IpmiMessage, 0x02000000, 7, &payload)
            .unwrap();

        // Encrypted and authenticated bits are set.
        assert_eq!(packet[5], 0x80 | 0x40);

        match cipher.read_packet(&packet).unwrap() {
            InboundPacket::V2_0(message) => {
                assert_eq!(message.ty, PayloadType::IpmiMessage);
                assert_eq!(message.session_id, 0x02000000);
                assert_eq!(message.sequence, 7);
                assert_eq!(message.payload, payload);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn authenticated_range_is_4_aligned_and_tamper_evident() {
        let cipher = protected_cipher();

        let packet = cipher
            .write_packet(PayloadType::IpmiMessage, 0x02000000, 7, &[0xAB; 10])
            .unwrap();

        // Everything from the auth type byte through the next-header
        // byte must be a multiple of 4.
        assert_eq!((packet.len() - 4 - 12) % 4, 0);

        // Flipping any byte in the authenticated range must be caught.
        for idx in 4..packet.len() {
            let mut tampered = packet.clone();
            tampered[idx] ^= 0x01;

            match cipher.read_packet(&tampered) {
                Err(_) => {}
                Ok(packet) => panic!("tampered byte {idx} accepted: {packet:?}"),
            }
        }
    }

    #[test]
    fn ciphertext_avalanches() {
        let cipher = protected_cipher();

        let a = cipher
            .write_packet(PayloadType::IpmiMessage, 0x02000000, 7, &[0x00; 16])
            .unwrap();
        let mut b_payload = [0x00; 16];
        b_payload[0] = 0x01;
        let b = cipher
            .write_packet(PayloadType::IpmiMessage, 0x02000000, 7, &b_payload)
            .unwrap();

        // Payload starts at offset 16; the ciphertext follows the
        // 16-byte IV.
        let differing: u32 = a[32..64]
            .iter()
            .zip(&b[32..64])
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();

        // ~50 % of 256 bits; allow a generous band. The IVs differ, so
        // even identical plaintexts diverge, which only strengthens the
        // property under test.
        assert!(differing > 64, "only {differing} bits differ");
    }

    #[test]
    fn v1_5_packet_layout() {
        let packet = write_v1_5_packet(&[0xAA, 0xBB]);

        #[rustfmt::skip]
        assert_eq!(
            packet,
            [
                0x06, 0x00, 0xFF, 0x07,
                0x00,
                0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00,
                0x02,
                0xAA, 0xBB,
            ]
        );

        match SessionCipher::Insecure.read_packet(&packet).unwrap() {
            InboundPacket::V1_5(body) => assert_eq!(body, [0xAA, 0xBB]),
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn direct_body_layout() {
        let mut body = Vec::new();
        write_ipmi_request_body(
            &mut body,
            BridgeRoute::Direct,
            BMC_SLAVE_ADDR,
            0x06,
            0,
            0x02,
            0x01,
            &[],
        );

        assert_eq!(body, [0x20, 0x18, 0xC8, 0x81, 0x08, 0x01, 0x76]);
    }

    #[test]
    fn single_bridge_wraps_in_send_message() {
        let mut body = Vec::new();
        write_ipmi_request_body(
            &mut body,
            BridgeRoute::Single {
                target_addr: 0x82,
                target_channel: 7,
            },
            BMC_SLAVE_ADDR,
            0x06,
            0,
            0x05,
            0x01,
            &[],
        );

        // Send Message header addressed to the BMC.
        assert_eq!(&body[..3], &[0x20, 0x18, 0xC8]);
        assert_eq!(&body[3..7], &[0x81, 0x05 << 2, 0x34, 0x47]);

        // Inner message addressed to the target.
        assert_eq!(body[7], 0x82);
        assert_eq!(body[8], 0x18);

        // Trailing wrapper checksum covers from the Send Message
        // requester address.
        let sum = body[3..]
            .iter()
            .fold(0u8, |acc, value| acc.wrapping_add(*value));
        assert_eq!(sum, 0);

        // Inner message checksum covers the inner requester bytes.
        let inner = &body[10..body.len() - 1];
        let sum = inner.iter().fold(0u8, |acc, value| acc.wrapping_add(*value));
        assert_eq!(sum, 0);
    }

    #[test]
    fn double_bridge_wraps_twice() {
        let mut body = Vec::new();
        write_ipmi_request_body(
            &mut body,
            BridgeRoute::Double {
                transit_addr: 0x84,
                transit_channel: 3,
                target_addr: 0x82,
                target_channel: 7,
            },
            BMC_SLAVE_ADDR,
            0x06,
            0,
            0x05,
            0x01,
            &[],
        );

        // First wrapper routes through the transit channel, second to
        // the target channel.
        assert_eq!(&body[..3], &[0x20, 0x18, 0xC8]);
        assert_eq!(&body[3..7], &[0x81, 0x05 << 2, 0x34, 0x40 | 3]);
        assert_eq!(body[7], 0x84);
        assert_eq!(&body[10..14], &[0x81, 0x05 << 2, 0x34, 0x40 | 7]);

        // Innermost requester address is ours, not the software ID.
        assert_eq!(body[14], 0x82);
        assert_eq!(body[17], BMC_SLAVE_ADDR);
    }

    #[test]
    fn response_body_parses() {
        // rq_addr, netfn/lun, cks, rs_addr, rqseq/lun, cmd, cc, data, cks
        let payload = [0x81, 0x1C, 0x63, 0x20, 0x08, 0x01, 0x00, 0x11, 0x22, 0x00];

        let body = parse_ipmi_response_body(&payload).unwrap();

        assert_eq!(body.netfn, 0x07);
        assert_eq!(body.rq_seq, 0x02);
        assert_eq!(body.cmd, 0x01);
        assert_eq!(body.completion_code, 0x00);
        assert_eq!(body.data, [0x11, 0x22]);
    }
}
