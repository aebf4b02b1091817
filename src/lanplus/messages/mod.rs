//! The RMCP+ session-establishment messages: Open Session and RAKP 1–4.

mod open_session;
pub use open_session::{AlgorithmPayload, OpenSessionRequest, OpenSessionResponse};

mod rakp_1;
pub use rakp_1::{RakpMessage1, Username};

mod rakp_2;
pub use rakp_2::RakpMessage2;

mod rakp_3;
pub use rakp_3::{Rakp3Contents, RakpMessage3};

mod rakp_4;
pub use rakp_4::RakpMessage4;

/// The RMCP+ / RAKP status codes from table 13-15 of the IPMI v2.0
/// specification, shared by the Open Session response and the RAKP
/// messages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RakpStatusCode {
    InsufficientResources,
    InvalidSessionId,
    InvalidPayloadType,
    InvalidAuthenticationAlgorithm,
    InvalidIntegrityAlgorithm,
    NoMatchingAuthenticationPayload,
    NoMatchingIntegrityPayload,
    InactiveSessionId,
    InvalidRole,
    UnauthorizedRoleRequested,
    InsufficientResourcesForRole,
    InvalidNameLength,
    UnauthorizedName,
    UnauthorizedGuid,
    InvalidIntegrityCheckValue,
    InvalidConfidentialityAlgorithm,
    NoMatchingCipherSuite,
    IllegalParameter,
    /// A status code outside table 13-15.
    Unknown(u8),
}

impl RakpStatusCode {
    /// Parse a non-zero wire status code.
    ///
    /// Returns `None` for 0, which indicates success.
    pub fn from_wire(value: u8) -> Option<Self> {
        let code = match value {
            0x00 => return None,
            0x01 => Self::InsufficientResources,
            0x02 => Self::InvalidSessionId,
            0x03 => Self::InvalidPayloadType,
            0x04 => Self::InvalidAuthenticationAlgorithm,
            0x05 => Self::InvalidIntegrityAlgorithm,
            0x06 => Self::NoMatchingAuthenticationPayload,
            0x07 => Self::NoMatchingIntegrityPayload,
            0x08 => Self::InactiveSessionId,
            0x09 => Self::InvalidRole,
            0x0A => Self::UnauthorizedRoleRequested,
            0x0B => Self::InsufficientResourcesForRole,
            0x0C => Self::InvalidNameLength,
            0x0D => Self::UnauthorizedName,
            0x0E => Self::UnauthorizedGuid,
            0x0F => Self::InvalidIntegrityCheckValue,
            0x10 => Self::InvalidConfidentialityAlgorithm,
            0x11 => Self::NoMatchingCipherSuite,
            0x12 => Self::IllegalParameter,
            v => Self::Unknown(v),
        };

        Some(code)
    }
}

impl From<RakpStatusCode> for u8 {
    fn from(value: RakpStatusCode) -> Self {
        match value {
            RakpStatusCode::InsufficientResources => 0x01,
            RakpStatusCode::InvalidSessionId => 0x02,
            RakpStatusCode::InvalidPayloadType => 0x03,
            RakpStatusCode::InvalidAuthenticationAlgorithm => 0x04,
            RakpStatusCode::InvalidIntegrityAlgorithm => 0x05,
            RakpStatusCode::NoMatchingAuthenticationPayload => 0x06,
            RakpStatusCode::NoMatchingIntegrityPayload => 0x07,
            RakpStatusCode::InactiveSessionId => 0x08,
            RakpStatusCode::InvalidRole => 0x09,
            RakpStatusCode::UnauthorizedRoleRequested => 0x0A,
            RakpStatusCode::InsufficientResourcesForRole => 0x0B,
            RakpStatusCode::InvalidNameLength => 0x0C,
            RakpStatusCode::UnauthorizedName => 0x0D,
            RakpStatusCode::UnauthorizedGuid => 0x0E,
            RakpStatusCode::InvalidIntegrityCheckValue => 0x0F,
            RakpStatusCode::InvalidConfidentialityAlgorithm => 0x10,
            RakpStatusCode::NoMatchingCipherSuite => 0x11,
            RakpStatusCode::IllegalParameter => 0x12,
            RakpStatusCode::Unknown(v) => v,
        }
    }
}

/// An error that occurred while parsing a handshake message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParseError {
    /// There was not enough data to parse the expected message.
    NotEnoughData,
    /// The message carried a non-zero status code.
    Status(RakpStatusCode),
    /// A session ID field that must be non-zero was zero.
    ZeroSessionId,
    /// The message carried an algorithm payload that could not be
    /// decoded.
    InvalidAlgorithmPayload,
    /// The privilege level field was not a valid privilege level.
    InvalidPrivilegeLevel(u8),
}

#[test]
fn status_codes_roundtrip() {
    for value in 0x01..=0x12u8 {
        let code = RakpStatusCode::from_wire(value).unwrap();
        assert_eq!(u8::from(code), value);
        assert!(!matches!(code, RakpStatusCode::Unknown(_)));
    }

    assert_eq!(RakpStatusCode::from_wire(0x00), None);
    assert_eq!(
        RakpStatusCode::from_wire(0x42),
        Some(RakpStatusCode::Unknown(0x42))
    );
}
