//! ipmi-lanplus: a pure-rust IPMI v2.0 / RMCP+ client.
//!
//! This library implements the `lanplus` transport: the RMCP+ session
//! handshake (Open Session, RAKP 1–4), the authenticated and encrypted
//! packet codec, request tracking with timeout/retry and bridging, and
//! the Serial-over-LAN sub-protocol. Command serialization lives in the
//! [`app`] and [`connection`] modules; [`lanplus::LanPlus`] is the
//! session itself.

pub mod app;

pub mod connection;

pub mod lanplus;

mod error;
pub use error::IpmiError;

use connection::{CompletionErrorCode, IpmiCommand, LogicalUnit, Request, RequestTargetAddress};

/// A typed-command wrapper around an [`IpmiConnection`](connection::IpmiConnection).
///
/// Turns [`IpmiCommand`] values into requests and parses their
/// responses.
pub struct Ipmi<CON> {
    inner: CON,
}

impl<CON> Ipmi<CON> {
    pub fn release(self) -> CON {
        self.inner
    }
}

impl<CON> From<CON> for Ipmi<CON>
where
    CON: connection::IpmiConnection,
{
    fn from(value: CON) -> Self {
        Self::new(value)
    }
}

impl<CON> Ipmi<CON>
where
    CON: connection::IpmiConnection,
{
    pub fn new(inner: CON) -> Self {
        Self { inner }
    }

    pub fn inner_mut(&mut self) -> &mut CON {
        &mut self.inner
    }

    pub fn send_recv<CMD>(
        &mut self,
        request: CMD,
    ) -> Result<CMD::Output, IpmiError<CON::Error, CMD::Error>>
    where
        CMD: IpmiCommand,
    {
        let target_address = match request.target() {
            Some((a, c)) => RequestTargetAddress::BmcOrIpmb(a, c, LogicalUnit::Zero),
            None => RequestTargetAddress::Bmc(LogicalUnit::Zero),
        };

        let message = request.into();
        let (message_netfn, message_cmd) = (message.netfn(), message.cmd());
        let mut request = Request::new(message, target_address);

        let response = self.inner.send_recv(&mut request)?;

        if response.netfn() != message_netfn || response.cmd() != message_cmd {
            return Err(IpmiError::UnexpectedResponse {
                netfn_sent: message_netfn,
                netfn_recvd: response.netfn(),
                cmd_sent: message_cmd,
                cmd_recvd: response.cmd(),
            });
        }

        if response.cc() != 0 {
            let error = CompletionErrorCode::try_from(response.cc())
                .ok()
                .and_then(|code| CMD::handle_completion_code(code, response.data()))
                .map(|error| IpmiError::Command {
                    error,
                    netfn: response.netfn(),
                    cmd: response.cmd(),
                    completion_code: Some(response.cc()),
                    data: response.data().to_vec(),
                })
                .unwrap_or_else(|| IpmiError::Failed {
                    netfn: response.netfn(),
                    cmd: response.cmd(),
                    completion_code: response.cc(),
                    data: response.data().to_vec(),
                });

            return Err(error);
        }

        CMD::parse_success_response(response.data()).map_err(|error| IpmiError::Command {
            error,
            netfn: response.netfn(),
            cmd: response.cmd(),
            completion_code: None,
            data: response.data().to_vec(),
        })
    }
}

// Re-exported so callers do not have to spell out module paths for the
// types every session needs.
pub use app::auth::PrivilegeLevel;
pub use lanplus::messages::Username;
pub use lanplus::{LanPlus, LanPlusError, SessionParams};
