use super::{ParseError, RakpStatusCode};

/// The RAKP Message 4 the BMC closes the exchange with: its integrity
/// check value over the session, keyed with the SIK.
#[derive(Debug, PartialEq)]
pub struct RakpMessage4<'a> {
    pub message_tag: u8,
    pub console_session_id: u32,
    pub integrity_check_value: &'a [u8],
}

impl<'a> RakpMessage4<'a> {
    pub fn from_data(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < 4 {
            return Err(ParseError::NotEnoughData);
        }

        let message_tag = data[0];

        if let Some(status) = RakpStatusCode::from_wire(data[1]) {
            return Err(ParseError::Status(status));
        }

        if data.len() < 8 {
            return Err(ParseError::NotEnoughData);
        }

        let console_session_id = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let integrity_check_value = &data[8..];

        Ok(Self {
            message_tag,
            console_session_id,
            integrity_check_value,
        })
    }
}
