//! The App and PICMG commands that the session core issues itself.

pub mod auth;

mod get_device_id;
pub use get_device_id::{DeviceId, GetDeviceId};

mod session;
pub use session::{CloseSession, SetSessionPrivilegeLevel};

mod firmware;
pub use firmware::{GetUpgradeStatus, UpgradeStatus};
