use super::RakpStatusCode;

/// The RAKP Message 3 we send.
///
/// On success it carries our key-exchange authcode; when the RAKP-2
/// authcode did not verify it instead carries the status code that tells
/// the BMC why the exchange is being abandoned.
#[derive(Debug, Clone)]
pub struct RakpMessage3<'a> {
    pub message_tag: u8,
    pub bmc_session_id: u32,
    pub contents: Rakp3Contents<'a>,
}

#[derive(Debug, Clone)]
pub enum Rakp3Contents<'a> {
    Success(&'a [u8]),
    Failure(RakpStatusCode),
}

impl RakpMessage3<'_> {
    pub fn write(&self, buffer: &mut Vec<u8>) {
        let (status, auth_code): (u8, &[u8]) = match &self.contents {
            Rakp3Contents::Success(auth_code) => (0x00, auth_code),
            Rakp3Contents::Failure(status) => ((*status).into(), &[]),
        };

        buffer.push(self.message_tag);
        buffer.push(status);

        // Two reserved bytes
        buffer.extend_from_slice(&[0x00, 0x00]);

        buffer.extend_from_slice(&self.bmc_session_id.to_le_bytes());
        buffer.extend_from_slice(auth_code);
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.contents, Rakp3Contents::Failure(_))
    }
}
