//! Authentication-related commands and types.

mod get_channel_authentication_capabilities;
pub use get_channel_authentication_capabilities::{
    ChannelAuthenticationCapabilities, GetChannelAuthenticationCapabilities,
};

mod get_channel_cipher_suites;
pub use get_channel_cipher_suites::{CipherSuiteRecords, GetChannelCipherSuites};

/// The privilege level requested for, or granted to, a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegeLevel {
    /// Callback-only connections.
    Callback,
    /// Read-only commands.
    User,
    /// All BMC commands except configuration ones.
    Operator,
    /// All BMC commands.
    Administrator,
    /// OEM-defined.
    OemProprietary,
}

impl TryFrom<u8> for PrivilegeLevel {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let level = match value & 0x0F {
            1 => Self::Callback,
            2 => Self::User,
            3 => Self::Operator,
            4 => Self::Administrator,
            5 => Self::OemProprietary,
            _ => return Err(()),
        };
        Ok(level)
    }
}

impl From<PrivilegeLevel> for u8 {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::Callback => 1,
            PrivilegeLevel::User => 2,
            PrivilegeLevel::Operator => 3,
            PrivilegeLevel::Administrator => 4,
            PrivilegeLevel::OemProprietary => 5,
        }
    }
}

#[test]
fn privilege_level_ordering() {
    assert!(PrivilegeLevel::Administrator > PrivilegeLevel::User);
    assert!(PrivilegeLevel::Operator > PrivilegeLevel::User);
    assert!(PrivilegeLevel::User > PrivilegeLevel::Callback);
}
