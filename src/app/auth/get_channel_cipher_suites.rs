use crate::connection::{Channel, IpmiCommand, Message, NetFn, NotEnoughData};

/// The Get Channel Cipher Suites command.
///
/// Cipher suite records are returned in pages of at most 16 bytes; the
/// caller iterates `list_index` until a short page is returned.
#[derive(Debug, Clone)]
pub struct GetChannelCipherSuites {
    channel: Channel,
    list_index: u8,
}

impl GetChannelCipherSuites {
    /// Create a new `GetChannelCipherSuites`.
    ///
    /// Returns `None` if `list_index > 0x3F`.
    pub fn new(channel: Channel, list_index: u8) -> Option<Self> {
        if list_index > 0x3F {
            None
        } else {
            Some(Self {
                channel,
                list_index,
            })
        }
    }
}

impl From<GetChannelCipherSuites> for Message {
    fn from(value: GetChannelCipherSuites) -> Self {
        // Payload type 0 (IPMI), list algorithms by cipher suite
        Message::new_request(
            NetFn::App,
            0x54,
            vec![value.channel.value(), 0x00, 0x80 | value.list_index],
        )
    }
}

/// One page of cipher suite record data.
pub struct CipherSuiteRecords {
    data_length: usize,
    record_data: [u8; 16],
}

impl CipherSuiteRecords {
    /// Whether this page is full, i.e. whether another page may follow.
    pub fn is_full(&self) -> bool {
        self.data_length == 16
    }
}

impl core::ops::Deref for CipherSuiteRecords {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.record_data[..self.data_length]
    }
}

impl IpmiCommand for GetChannelCipherSuites {
    type Output = CipherSuiteRecords;

    type Error = NotEnoughData;

    fn parse_success_response(data: &[u8]) -> Result<Self::Output, Self::Error> {
        // First response byte echoes the channel number.
        if data.is_empty() || data.len() > 17 {
            return Err(NotEnoughData);
        }

        let data = &data[1..];

        let mut record_data = [0u8; 16];
        record_data[..data.len()].copy_from_slice(data);

        Ok(CipherSuiteRecords {
            record_data,
            data_length: data.len(),
        })
    }
}

#[test]
fn short_page_is_final() {
    let data = [0x01, 0xC0, 0x03, 0x01, 0x41, 0x81];

    let page = GetChannelCipherSuites::parse_success_response(&data).unwrap();

    assert_eq!(&*page, &[0xC0, 0x03, 0x01, 0x41, 0x81]);
    assert!(!page.is_full());
}
