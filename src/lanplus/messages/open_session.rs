use crate::app::auth::PrivilegeLevel;
use crate::lanplus::crypto::{
    AuthenticationAlgorithm, ConfidentialityAlgorithm, IntegrityAlgorithm,
};

use super::{ParseError, RakpStatusCode};

/// One of the three 8-byte algorithm proposal records carried by the
/// Open Session messages.
#[derive(Debug, Clone, Copy)]
pub enum AlgorithmPayload {
    Authentication(AuthenticationAlgorithm),
    Integrity(IntegrityAlgorithm),
    Confidentiality(ConfidentialityAlgorithm),
}

impl AlgorithmPayload {
    pub fn write(&self, buffer: &mut Vec<u8>) {
        let (ty, value) = match *self {
            Self::Authentication(a) => (0x00, u8::from(a)),
            Self::Integrity(i) => (0x01, u8::from(i)),
            Self::Confidentiality(c) => (0x02, u8::from(c)),
        };

        // Payload type
        buffer.push(ty);

        // Two reserved bytes
        buffer.extend_from_slice(&[0x00, 0x00]);

        // Payload length
        buffer.push(0x08);

        // Algorithm, then three reserved bytes
        buffer.push(value);
        buffer.extend_from_slice(&[0x00, 0x00, 0x00]);
    }

    pub fn from_data(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() != 8 || data[3] != 8 {
            return Err(ParseError::InvalidAlgorithmPayload);
        }

        let algorithm = data[4] & 0x3F;

        match data[0] {
            0x00 => AuthenticationAlgorithm::try_from(algorithm)
                .map(Self::Authentication)
                .map_err(|_| ParseError::InvalidAlgorithmPayload),
            0x01 => IntegrityAlgorithm::try_from(algorithm)
                .map(Self::Integrity)
                .map_err(|_| ParseError::InvalidAlgorithmPayload),
            0x02 => ConfidentialityAlgorithm::try_from(algorithm)
                .map(Self::Confidentiality)
                .map_err(|_| ParseError::InvalidAlgorithmPayload),
            _ => Err(ParseError::InvalidAlgorithmPayload),
        }
    }
}

/// The RMCP+ Open Session Request.
#[derive(Debug, Clone)]
pub struct OpenSessionRequest {
    pub message_tag: u8,
    /// `None` asks the BMC for the highest privilege level matching the
    /// proposed algorithms.
    pub requested_max_privilege: Option<PrivilegeLevel>,
    pub console_session_id: u32,
    pub authentication_algorithm: AuthenticationAlgorithm,
    pub integrity_algorithm: IntegrityAlgorithm,
    pub confidentiality_algorithm: ConfidentialityAlgorithm,
}

impl OpenSessionRequest {
    pub fn write(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.message_tag);
        buffer.push(self.requested_max_privilege.map(Into::into).unwrap_or(0));

        // Two reserved bytes
        buffer.extend_from_slice(&[0x00, 0x00]);

        buffer.extend_from_slice(&self.console_session_id.to_le_bytes());

        AlgorithmPayload::Authentication(self.authentication_algorithm).write(buffer);
        AlgorithmPayload::Integrity(self.integrity_algorithm).write(buffer);
        AlgorithmPayload::Confidentiality(self.confidentiality_algorithm).write(buffer);
    }
}

/// The RMCP+ Open Session Response.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSessionResponse {
    pub message_tag: u8,
    pub maximum_privilege_level: PrivilegeLevel,
    pub console_session_id: u32,
    pub bmc_session_id: u32,
    pub authentication_algorithm: AuthenticationAlgorithm,
    pub integrity_algorithm: IntegrityAlgorithm,
    pub confidentiality_algorithm: ConfidentialityAlgorithm,
}

impl OpenSessionResponse {
    pub fn from_data(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 2 {
            return Err(ParseError::NotEnoughData);
        }

        let message_tag = data[0];

        if let Some(status) = RakpStatusCode::from_wire(data[1]) {
            return Err(ParseError::Status(status));
        }

        if data.len() < 36 {
            return Err(ParseError::NotEnoughData);
        }

        let maximum_privilege_level = PrivilegeLevel::try_from(data[2])
            .map_err(|_| ParseError::InvalidPrivilegeLevel(data[2]))?;

        let console_session_id = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let bmc_session_id = u32::from_le_bytes(data[8..12].try_into().unwrap());

        if bmc_session_id == 0 {
            return Err(ParseError::ZeroSessionId);
        }

        let authentication_algorithm = match AlgorithmPayload::from_data(&data[12..20])? {
            AlgorithmPayload::Authentication(a) => a,
            _ => return Err(ParseError::InvalidAlgorithmPayload),
        };

        let integrity_algorithm = match AlgorithmPayload::from_data(&data[20..28])? {
            AlgorithmPayload::Integrity(i) => i,
            _ => return Err(ParseError::InvalidAlgorithmPayload),
        };

        let confidentiality_algorithm = match AlgorithmPayload::from_data(&data[28..36])? {
            AlgorithmPayload::Confidentiality(c) => c,
            _ => return Err(ParseError::InvalidAlgorithmPayload),
        };

        Ok(Self {
            message_tag,
            maximum_privilege_level,
            console_session_id,
            bmc_session_id,
            authentication_algorithm,
            integrity_algorithm,
            confidentiality_algorithm,
        })
    }
}
