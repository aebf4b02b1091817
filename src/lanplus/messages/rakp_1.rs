/// A user name as carried by RAKP-1: at most 16 bytes of non-null
/// ASCII.
#[derive(Debug, Clone)]
pub struct Username {
    data: [u8; 16],
    length: usize,
}

impl Username {
    pub fn new_empty() -> Self {
        Self {
            data: [0u8; 16],
            length: 0,
        }
    }

    /// Create a `Username` from `name`.
    ///
    /// Returns `None` if `name` is longer than 16 bytes or contains
    /// non-ASCII or null characters.
    pub fn new(name: &str) -> Option<Self> {
        if name.len() > 16 {
            return None;
        }

        let mut data = [0u8; 16];
        let mut length = 0;

        for char in name.chars() {
            if char.is_ascii() && char as u32 != 0 {
                data[length] = char as u8;
                length += 1;
            } else {
                return None;
            }
        }

        Some(Self { data, length })
    }

    pub fn len(&self) -> u8 {
        self.length as u8
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl core::ops::Deref for Username {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data[..self.length]
    }
}

/// The RAKP Message 1 we send: our random number, the requested role and
/// the user name.
#[derive(Debug)]
pub struct RakpMessage1<'a> {
    pub message_tag: u8,
    pub bmc_session_id: u32,
    pub console_random: [u8; 16],
    /// The requested maximum privilege level with the name-lookup bit,
    /// exactly as it goes on the wire (and into the HMACs).
    pub requested_role: u8,
    pub username: &'a Username,
    /// Emit all 16 user-name bytes regardless of the name's length.
    /// Some managed systems refuse the session otherwise.
    pub pad_username: bool,
}

impl RakpMessage1<'_> {
    pub fn write(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.message_tag);

        // Three reserved bytes
        buffer.extend_from_slice(&[0x00, 0x00, 0x00]);

        buffer.extend_from_slice(&self.bmc_session_id.to_le_bytes());
        buffer.extend_from_slice(&self.console_random);

        buffer.push(self.requested_role);

        // Two reserved bytes
        buffer.extend_from_slice(&[0x00, 0x00]);

        buffer.push(self.username.len());

        if self.pad_username {
            buffer.extend_from_slice(&self.username.data);
        } else {
            buffer.extend_from_slice(self.username);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let message = RakpMessage1 {
            message_tag: 0x00,
            bmc_session_id: 0x2F590161,
            console_random: [
                0x52, 0xF0, 0x5E, 0x19, 0x70, 0x79, 0xB4, 0xF9, 0xAB, 0xEC, 0x4A, 0x0E, 0x69,
                0x36, 0xA9, 0xA3,
            ],
            requested_role: 0x14,
            username: &Username::new("jona").unwrap(),
            pad_username: false,
        };

        let mut buffer = Vec::new();
        message.write(&mut buffer);

        #[rustfmt::skip]
        let expected = [
            0x00, 0x00, 0x00, 0x00,
            0x61, 0x01, 0x59, 0x2F,
            0x52, 0xF0, 0x5E, 0x19, 0x70, 0x79, 0xB4, 0xF9,
            0xAB, 0xEC, 0x4A, 0x0E, 0x69, 0x36, 0xA9, 0xA3,
            0x14, 0x00, 0x00,
            0x04, 0x6A, 0x6F, 0x6E, 0x61,
        ];

        assert_eq!(buffer, expected);
    }

    #[test]
    fn padded_username_fills_the_field() {
        let message = RakpMessage1 {
            message_tag: 0x00,
            bmc_session_id: 1,
            console_random: [0; 16],
            requested_role: 0x14,
            username: &Username::new("ab").unwrap(),
            pad_username: true,
        };

        let mut buffer = Vec::new();
        message.write(&mut buffer);

        // Length byte still reflects the name, the field is 16 bytes.
        assert_eq!(buffer[27], 2);
        assert_eq!(buffer.len(), 28 + 16);
    }

    #[test]
    fn rejects_oversized_and_non_ascii_names() {
        assert!(Username::new("01234567890123456").is_none());
        assert!(Username::new("nönäscii").is_none());
        assert!(Username::new("admin").is_some());
    }
}
