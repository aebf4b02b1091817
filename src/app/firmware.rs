use crate::connection::{IpmiCommand, Message, NetFn, NotEnoughData};

/// PICMG identifier carried by every HPM.1 request and response.
const PICMG_IDENTIFIER: u8 = 0;

/// The HPM.1 Get Upgrade Status command.
///
/// Long-duration firmware commands answer completion code 0x80 while the
/// controller is still working; this command is polled until the last
/// command's completion code settles.
#[derive(Debug, Clone, Copy)]
pub struct GetUpgradeStatus;

impl From<GetUpgradeStatus> for Message {
    fn from(_: GetUpgradeStatus) -> Self {
        Message::new_request(NetFn::Picmg, 0x34, vec![PICMG_IDENTIFIER])
    }
}

/// The state of the firmware command currently being processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpgradeStatus {
    /// The command in process, or 0 if none.
    pub command_in_process: u8,
    /// The completion code of the last issued firmware command; 0x80
    /// while it is still in progress.
    pub last_cmd_ccode: u8,
}

impl UpgradeStatus {
    /// Whether the controller is still working on the last command.
    pub fn in_progress(&self) -> bool {
        self.last_cmd_ccode == crate::connection::completion_code_raw::IN_PROGRESS
    }
}

impl IpmiCommand for GetUpgradeStatus {
    type Output = UpgradeStatus;

    type Error = NotEnoughData;

    fn parse_success_response(data: &[u8]) -> Result<Self::Output, Self::Error> {
        if data.len() < 3 {
            return Err(NotEnoughData);
        }

        Ok(UpgradeStatus {
            command_in_process: data[1],
            last_cmd_ccode: data[2],
        })
    }
}

#[test]
fn upgrade_status_in_progress() {
    let status = GetUpgradeStatus::parse_success_response(&[0x00, 0x32, 0x80]).unwrap();
    assert!(status.in_progress());
    assert_eq!(status.command_in_process, 0x32);

    let status = GetUpgradeStatus::parse_success_response(&[0x00, 0x00, 0x00]).unwrap();
    assert!(!status.in_progress());
}
