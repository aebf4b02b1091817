//! The RMCP outer header and the ASF presence ping/pong messages.

pub const ASF_RMCP_IANA: u32 = 4542;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RmcpType {
    Asf,
    Ipmi,
    OemDefined,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmcpClass {
    pub ty: RmcpType,
    pub is_ack: bool,
}

impl From<RmcpClass> for u8 {
    fn from(value: RmcpClass) -> Self {
        let ack_bit = (value.is_ack as u8) << 7;

        let value = match value.ty {
            RmcpType::Asf => 0x06,
            RmcpType::Ipmi => 0x07,
            RmcpType::OemDefined => 0x08,
        };

        value | ack_bit
    }
}

impl TryFrom<u8> for RmcpClass {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let is_ack = (value & 0x80) == 0x80;

        let ty = match value & 0x7F {
            0x06 => RmcpType::Asf,
            0x07 => RmcpType::Ipmi,
            0x08 => RmcpType::OemDefined,
            _ => return Err(()),
        };

        Ok(Self { is_ack, ty })
    }
}

#[derive(Debug, Clone)]
pub struct RmcpHeader {
    version: u8,
    sequence_number: u8,
    class: RmcpClass,
}

impl RmcpHeader {
    fn new(sequence_number: u8, ty: RmcpType) -> Self {
        Self {
            version: 6,
            sequence_number,
            class: RmcpClass { ty, is_ack: false },
        }
    }

    pub fn new_asf(sequence: u8) -> Self {
        Self::new(sequence, RmcpType::Asf)
    }

    pub fn new_ipmi() -> Self {
        // IPMI messages request no RMCP ACK
        Self::new(0xFF, RmcpType::Ipmi)
    }

    pub fn class(&self) -> &RmcpClass {
        &self.class
    }

    pub fn write(&self, buffer: &mut Vec<u8>) {
        let sequence_number = if self.class.ty == RmcpType::Ipmi {
            0xFF
        } else {
            self.sequence_number
        };

        buffer.extend_from_slice(&[self.version, 0, sequence_number, u8::from(self.class)]);
    }

    pub fn from_bytes(data: &[u8]) -> Result<(Self, &[u8]), RmcpHeaderError> {
        if data.len() < 4 {
            return Err(RmcpHeaderError::NotEnoughData);
        }

        let version = data[0];
        let sequence_number = data[2];
        let class = RmcpClass::try_from(data[3]).map_err(|_| RmcpHeaderError::InvalidClass)?;

        Ok((
            Self {
                version,
                sequence_number,
                class,
            },
            &data[4..],
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RmcpHeaderError {
    /// There was not enough data in the packet to parse an RMCP header.
    NotEnoughData,
    /// The class of the RMCP packet was not valid.
    InvalidClass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsfMessageType {
    Ping,
    Pong {
        enterprise_number: u32,
        oem_data: u32,
        ipmi_supported: bool,
    },
}

/// An ASF presence message, used to discover whether the remote RMCP
/// endpoint supports IPMI before any session traffic is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct AsfMessage {
    pub message_tag: u8,
    pub message_type: AsfMessageType,
}

impl AsfMessage {
    pub fn ping(message_tag: u8) -> Self {
        Self {
            message_tag,
            message_type: AsfMessageType::Ping,
        }
    }

    pub fn write(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&ASF_RMCP_IANA.to_be_bytes());

        let type_byte = match self.message_type {
            AsfMessageType::Ping => 0x80,
            AsfMessageType::Pong { .. } => 0x40,
        };

        buffer.push(type_byte);
        buffer.push(self.message_tag);
        buffer.push(0x00);

        match &self.message_type {
            AsfMessageType::Ping => {
                // Data length
                buffer.push(0);
            }
            AsfMessageType::Pong {
                enterprise_number,
                oem_data,
                ipmi_supported,
            } => {
                // Data length
                buffer.push(0x10);
                buffer.extend_from_slice(&enterprise_number.to_be_bytes());
                buffer.extend_from_slice(&oem_data.to_be_bytes());
                buffer.push(if *ipmi_supported { 0x80 } else { 0x00 });
                buffer.extend(std::iter::repeat(0).take(7));
            }
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }

        if data[..4] != ASF_RMCP_IANA.to_be_bytes() {
            return None;
        }

        let type_byte = data[4];
        let message_tag = data[5];
        let data_len = data[7];
        let data = &data[8..];

        let message_type = match type_byte {
            0x80 if data_len == 0 => AsfMessageType::Ping,
            0x40 if data_len == 0x10 && data.len() >= 16 => {
                let enterprise_number = u32::from_be_bytes(data[..4].try_into().unwrap());
                let oem_data = u32::from_be_bytes(data[4..8].try_into().unwrap());
                let ipmi_supported = (data[8] & 0x80) == 0x80;

                AsfMessageType::Pong {
                    enterprise_number,
                    oem_data,
                    ipmi_supported,
                }
            }
            _ => return None,
        };

        Some(Self {
            message_tag,
            message_type,
        })
    }
}
