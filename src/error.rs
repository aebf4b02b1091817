use crate::connection::NetFn;

/// The error of a typed command issued through [`Ipmi`](crate::Ipmi).
///
/// `CON` is the connection's error type; `P` is the command's
/// response-parsing error type.
#[derive(Clone, Debug, PartialEq)]
pub enum IpmiError<CON, P> {
    /// The response was for a different netfn or command than the
    /// request.
    UnexpectedResponse {
        netfn_sent: NetFn,
        netfn_recvd: NetFn,
        cmd_sent: u8,
        cmd_recvd: u8,
    },
    /// The command failed with an error the command type knows how to
    /// describe, or its successful response could not be parsed
    /// (`completion_code` is `None` in that case).
    Command {
        error: P,
        netfn: NetFn,
        cmd: u8,
        completion_code: Option<u8>,
        data: Vec<u8>,
    },
    /// The command failed with a completion code the command type has
    /// no special handling for.
    Failed {
        netfn: NetFn,
        cmd: u8,
        completion_code: u8,
        data: Vec<u8>,
    },
    /// The connection failed.
    Connection(CON),
}

impl<CON, P> From<CON> for IpmiError<CON, P> {
    fn from(value: CON) -> Self {
        Self::Connection(value)
    }
}

impl<CON, P> IpmiError<CON, P> {
    /// Map the connection error type.
    pub fn map<CON2, F>(self, f: F) -> IpmiError<CON2, P>
    where
        F: FnOnce(CON) -> CON2,
    {
        match self {
            IpmiError::UnexpectedResponse {
                netfn_sent,
                netfn_recvd,
                cmd_sent,
                cmd_recvd,
            } => IpmiError::UnexpectedResponse {
                netfn_sent,
                netfn_recvd,
                cmd_sent,
                cmd_recvd,
            },
            IpmiError::Command {
                error,
                netfn,
                cmd,
                completion_code,
                data,
            } => IpmiError::Command {
                error,
                netfn,
                cmd,
                completion_code,
                data,
            },
            IpmiError::Failed {
                netfn,
                cmd,
                completion_code,
                data,
            } => IpmiError::Failed {
                netfn,
                cmd,
                completion_code,
                data,
            },
            IpmiError::Connection(e) => IpmiError::Connection(f(e)),
        }
    }
}
