use crate::connection::{Address, Channel, LogicalUnit, NetFn};

use super::Message;

/// The destination of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestTargetAddress {
    /// The BMC that terminates the session.
    Bmc(LogicalUnit),
    /// A controller behind the BMC, reached by encapsulating the request
    /// in a Send Message command for the given address and channel.
    BmcOrIpmb(Address, Channel, LogicalUnit),
}

impl RequestTargetAddress {
    /// The logical unit addressed by this target.
    pub fn lun(&self) -> LogicalUnit {
        match self {
            RequestTargetAddress::Bmc(lun) => *lun,
            RequestTargetAddress::BmcOrIpmb(_, _, lun) => *lun,
        }
    }
}

/// An IPMI request and the target it should be routed to.
pub struct Request {
    target: RequestTargetAddress,
    message: Message,
}

impl Request {
    /// Create a new `Request` for `message`, addressed to `target`.
    pub const fn new(request: Message, target: RequestTargetAddress) -> Self {
        Self {
            target,
            message: request,
        }
    }

    /// The netfn of this request.
    pub fn netfn(&self) -> NetFn {
        self.message.netfn()
    }

    /// The raw netfn value of this request.
    pub fn netfn_raw(&self) -> u8 {
        self.message.netfn_raw()
    }

    /// The target of this request.
    pub fn target(&self) -> RequestTargetAddress {
        self.target
    }

    /// The command value of this request.
    pub fn cmd(&self) -> u8 {
        self.message.cmd()
    }

    /// The data carried by this request.
    pub fn data(&self) -> &[u8] {
        self.message.data()
    }

    /// Get the bridging target of this request, treating a target that is
    /// `my_addr` as the BMC itself (no bridging required).
    pub fn bridge_target_address_and_channel(
        &self,
        my_addr: Address,
    ) -> Option<(Address, Channel)> {
        match self.target {
            RequestTargetAddress::Bmc(_) => None,
            RequestTargetAddress::BmcOrIpmb(a, _, _) if a == my_addr => None,
            RequestTargetAddress::BmcOrIpmb(a, c, _) => Some((a, c)),
        }
    }
}
