use crate::connection::{Channel, IpmiCommand, Message, NetFn, NotEnoughData};

use super::PrivilegeLevel;

/// The Get Channel Authentication Capabilities command.
///
/// This is the only command the session core sends in an IPMI v1.5
/// envelope: it is how we learn whether the BMC speaks v2.0 / RMCP+ at
/// all, before opening a session.
#[derive(Debug, Clone)]
pub struct GetChannelAuthenticationCapabilities {
    channel_number: u8,
    privilege_level: PrivilegeLevel,
    request_v2_data: bool,
}

impl GetChannelAuthenticationCapabilities {
    /// Create a new `GetChannelAuthenticationCapabilities` which asks the
    /// BMC to include its IPMI v2.0 extended data.
    pub fn new(channel: Channel, privilege_level: PrivilegeLevel) -> Self {
        Self {
            channel_number: channel.value(),
            privilege_level,
            request_v2_data: true,
        }
    }

    /// Clear the "request IPMI v2 data" bit.
    ///
    /// Some BMCs error out when the bit is set; the original probe is
    /// retried once in this form.
    pub fn without_v2_data_bit(mut self) -> Self {
        self.request_v2_data = false;
        self
    }
}

impl From<GetChannelAuthenticationCapabilities> for Message {
    fn from(value: GetChannelAuthenticationCapabilities) -> Message {
        let v2_bit = if value.request_v2_data { 0x80 } else { 0x00 };

        Message::new_request(
            NetFn::App,
            0x38,
            vec![
                v2_bit | (value.channel_number & 0x0F),
                value.privilege_level.into(),
            ],
        )
    }
}

/// The authentication capabilities reported by a channel.
#[derive(Debug, Clone)]
pub struct ChannelAuthenticationCapabilities {
    /// The channel the capabilities apply to.
    pub channel_number: u8,
    /// A K_G key is set to a non-default value.
    pub kg_set: bool,
    /// IPMI v2.0 / RMCP+ sessions are supported.
    pub ipmi2_connections_supported: bool,
    /// IPMI v1.5 sessions are supported.
    pub ipmi15_connections_supported: bool,
    /// Anonymous logins are enabled.
    pub anonymous_login_enabled: bool,
    /// Null usernames (with non-null passwords) are enabled.
    pub null_usernames_enabled: bool,
    /// Non-null usernames are enabled.
    pub non_null_usernames_enabled: bool,
}

impl IpmiCommand for GetChannelAuthenticationCapabilities {
    type Output = ChannelAuthenticationCapabilities;

    type Error = NotEnoughData;

    fn parse_success_response(data: &[u8]) -> Result<Self::Output, Self::Error> {
        if data.len() < 4 {
            return Err(NotEnoughData);
        }

        let channel_number = data[0];
        let ipmi2_ext_cap = (data[1] & 0x80) == 0x80;

        let kg_set = (data[2] & 0x20) == 0x20;
        let non_null_usernames_enabled = (data[2] & 0x04) == 0x04;
        let null_usernames_enabled = (data[2] & 0x02) == 0x02;
        let anonymous_login_enabled = (data[2] & 0x01) == 0x01;

        // Without the extended-capabilities bit, byte 4 is reserved and
        // v2.0 support cannot be signalled.
        let (ipmi2, ipmi15) = if ipmi2_ext_cap {
            ((data[3] & 0x02) == 0x02, (data[3] & 0x01) == 0x01)
        } else {
            (false, true)
        };

        Ok(ChannelAuthenticationCapabilities {
            channel_number,
            kg_set,
            ipmi2_connections_supported: ipmi2,
            ipmi15_connections_supported: ipmi15,
            anonymous_login_enabled,
            null_usernames_enabled,
            non_null_usernames_enabled,
        })
    }
}

#[test]
fn parse_v2_capabilities() {
    // Channel 1, v2 extended data, MD5+password, v2.0 and v1.5 support
    let data = [0x01, 0x94, 0x04, 0x03, 0x00, 0x00, 0x00, 0x00];

    let caps = GetChannelAuthenticationCapabilities::parse_success_response(&data).unwrap();

    assert!(caps.ipmi2_connections_supported);
    assert!(caps.ipmi15_connections_supported);
    assert!(caps.non_null_usernames_enabled);
    assert!(!caps.kg_set);
}

#[test]
fn request_data_carries_v2_bit() {
    let message: Message = GetChannelAuthenticationCapabilities::new(
        Channel::Current,
        PrivilegeLevel::Administrator,
    )
    .into();

    assert_eq!(message.data(), &[0x8E, 0x04]);

    let message: Message = GetChannelAuthenticationCapabilities::new(
        Channel::Current,
        PrivilegeLevel::Administrator,
    )
    .without_v2_data_bit()
    .into();

    assert_eq!(message.data(), &[0x0E, 0x04]);
}
