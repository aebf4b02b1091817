use crate::connection::{IpmiCommand, Message, NetFn, NotEnoughData};

use super::auth::PrivilegeLevel;

/// The Set Session Privilege Level command.
///
/// Sessions come up at User level; this raises the operating privilege
/// of the session to the requested level.
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilegeLevel {
    level: PrivilegeLevel,
}

impl SetSessionPrivilegeLevel {
    /// Create a new `SetSessionPrivilegeLevel` for `level`.
    pub fn new(level: PrivilegeLevel) -> Self {
        Self { level }
    }
}

impl From<SetSessionPrivilegeLevel> for Message {
    fn from(value: SetSessionPrivilegeLevel) -> Self {
        Message::new_request(NetFn::App, 0x3B, vec![value.level.into()])
    }
}

impl IpmiCommand for SetSessionPrivilegeLevel {
    type Output = PrivilegeLevel;

    type Error = NotEnoughData;

    fn parse_success_response(data: &[u8]) -> Result<Self::Output, Self::Error> {
        let level = data.first().ok_or(NotEnoughData)?;
        PrivilegeLevel::try_from(*level).map_err(|_| NotEnoughData)
    }
}

/// The Close Session command.
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    session_id: u32,
}

impl CloseSession {
    /// Create a new `CloseSession` for the BMC-assigned `session_id`.
    pub fn new(session_id: u32) -> Self {
        Self { session_id }
    }
}

impl From<CloseSession> for Message {
    fn from(value: CloseSession) -> Self {
        Message::new_request(NetFn::App, 0x3C, value.session_id.to_le_bytes().to_vec())
    }
}

impl IpmiCommand for CloseSession {
    type Output = ();

    type Error = core::convert::Infallible;

    fn parse_success_response(_data: &[u8]) -> Result<Self::Output, Self::Error> {
        Ok(())
    }
}

#[test]
fn close_session_id_is_little_endian() {
    let message: Message = CloseSession::new(0xDEAD_BEEF).into();
    assert_eq!(message.data(), &[0xEF, 0xBE, 0xAD, 0xDE]);
}
