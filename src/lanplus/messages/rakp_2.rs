use super::{ParseError, RakpStatusCode};

/// The RAKP Message 2 the BMC answers with: its random number, its GUID
/// and the key-exchange authcode over both sides' session parameters.
#[derive(Debug, PartialEq)]
pub struct RakpMessage2<'a> {
    pub message_tag: u8,
    pub console_session_id: u32,
    pub bmc_random: [u8; 16],
    pub bmc_guid: [u8; 16],
    pub key_exchange_auth_code: &'a [u8],
}

impl<'a> RakpMessage2<'a> {
    pub fn from_data(data: &'a [u8]) -> Result<Self, ParseError> {
        // Tag, status code and two reserved bytes always precede the
        // variable part.
        if data.len() < 4 {
            return Err(ParseError::NotEnoughData);
        }

        let message_tag = data[0];

        if let Some(status) = RakpStatusCode::from_wire(data[1]) {
            return Err(ParseError::Status(status));
        }

        if data.len() < 40 {
            return Err(ParseError::NotEnoughData);
        }

        let console_session_id = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let bmc_random = data[8..24].try_into().unwrap();
        let bmc_guid = data[24..40].try_into().unwrap();
        let key_exchange_auth_code = &data[40..];

        Ok(Self {
            message_tag,
            console_session_id,
            bmc_random,
            bmc_guid,
            key_exchange_auth_code,
        })
    }
}
