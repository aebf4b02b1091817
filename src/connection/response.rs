use crate::connection::NetFn;

use super::Message;

/// A response to an IPMI [`Request`](super::Request).
///
/// The first data byte of the message is the completion code; a message
/// without at least that byte is not a valid response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    seq: i64,
    message: Message,
}

impl Response {
    /// Create a new `Response`, returning `None` if `message` does not
    /// carry a completion code.
    pub fn new(message: Message, seq: i64) -> Option<Self> {
        if !message.data().is_empty() {
            Some(Self { message, seq })
        } else {
            None
        }
    }

    /// The netfn of this response.
    pub fn netfn(&self) -> NetFn {
        self.message.netfn()
    }

    /// The command value of this response.
    pub fn cmd(&self) -> u8 {
        self.message.cmd()
    }

    /// The sequence number this response was matched against.
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// The completion code of this response.
    pub fn cc(&self) -> u8 {
        self.message.data()[0]
    }

    /// The response data, not including the completion code.
    pub fn data(&self) -> &[u8] {
        &self.message.data()[1..]
    }
}
