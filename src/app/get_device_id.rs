use crate::connection::{IpmiCommand, Message, NetFn, NotEnoughData};

/// The Get Device ID command.
///
/// The session core uses this as its keepalive on idle sessions.
pub struct GetDeviceId;

impl From<GetDeviceId> for Message {
    fn from(_: GetDeviceId) -> Self {
        Message::new_request(NetFn::App, 0x01, Vec::new())
    }
}

impl IpmiCommand for GetDeviceId {
    type Output = DeviceId;

    type Error = NotEnoughData;

    fn parse_success_response(data: &[u8]) -> Result<Self::Output, Self::Error> {
        DeviceId::from_data(data).ok_or(NotEnoughData)
    }
}

/// The fields returned by Get Device ID.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceId {
    /// The raw ID of the device.
    pub device_id: u8,
    /// The revision of the device.
    pub device_revision: u8,
    /// `true` if the device is available, `false` if it is in firmware
    /// update, SDR repository update, or self-initialization state.
    pub device_available: bool,
    /// The major version of the firmware revision of the device.
    pub major_fw_revision: u8,
    /// The minor version of the firmware of the device.
    pub minor_fw_revision: u8,
    /// The major version of the IPMI version supported by the device.
    pub major_version: u8,
    /// The minor version of the IPMI version supported by the device.
    pub minor_version: u8,
    /// The ID of the manufacturer.
    pub manufacturer_id: u32,
    /// The ID of the product.
    pub product_id: u16,
}

impl DeviceId {
    /// Parse a `DeviceId` from IPMI response data.
    pub fn from_data(data: &[u8]) -> Option<Self> {
        if data.len() < 11 {
            return None;
        }

        let device_id = data[0];
        let device_revision = data[1] & 0x0F;
        let device_available = (data[2] & 0x80) != 0x80;
        let major_fw_revision = data[2] & 0x7F;
        let minor_fw_revision = data[3];
        let major_version = data[4] & 0x0F;
        let minor_version = (data[4] >> 4) & 0x0F;
        let manufacturer_id = u32::from_le_bytes([data[6], data[7], data[8], 0]);
        let product_id = u16::from_le_bytes([data[9], data[10]]);

        Some(Self {
            device_id,
            device_revision,
            device_available,
            major_fw_revision,
            minor_fw_revision,
            major_version,
            minor_version,
            manufacturer_id,
            product_id,
        })
    }
}

#[test]
fn parse_device_id() {
    let data = [
        0x20, 0x01, 0x02, 0x16, 0x02, 0xBF, 0x57, 0x01, 0x00, 0x03, 0x0C, 0x00, 0x01, 0x00, 0x00,
    ];

    let id = DeviceId::from_data(&data).unwrap();

    assert_eq!(id.device_id, 0x20);
    assert!(id.device_available);
    assert_eq!(id.major_fw_revision, 0x02);
    assert_eq!(id.major_version, 2);
    assert_eq!(id.manufacturer_id, 0x157);
    assert_eq!(id.product_id, 0x0C03);
}
