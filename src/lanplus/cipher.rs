//! The cipher suite table from table 22-19 of the IPMI v2.0
//! specification, and best-available suite selection.

use crate::app::auth::GetChannelCipherSuites;
use crate::connection::{Channel, IpmiConnection};
use crate::Ipmi;

use super::crypto::{AuthenticationAlgorithm, ConfidentialityAlgorithm, IntegrityAlgorithm};

/// A standard cipher suite ID in the range `0..=17`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite(u8);

/// The requested cipher suite ID is reserved or out of range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidCipherSuite(pub u8);

impl CipherSuite {
    /// Cipher suite 3: HMAC-SHA1 / HMAC-SHA1-96 / AES-CBC-128. Required
    /// by the specification, so always a valid fallback.
    pub const SUITE_3: Self = Self(3);

    /// Cipher suite 17: HMAC-SHA256 / HMAC-SHA256-128 / AES-CBC-128.
    pub const SUITE_17: Self = Self(17);

    /// The suites tried by best-available selection, strongest first.
    const PREFERRED: [Self; 2] = [Self::SUITE_17, Self::SUITE_3];

    /// Create a `CipherSuite` from a standard suite ID.
    pub fn new(id: u8) -> Result<Self, InvalidCipherSuite> {
        if id <= 17 {
            Ok(Self(id))
        } else {
            Err(InvalidCipherSuite(id))
        }
    }

    /// The numeric ID of this suite.
    pub fn id(&self) -> u8 {
        self.0
    }

    /// The (authentication, integrity, confidentiality) triple this
    /// suite stands for.
    pub fn algorithms(
        &self,
    ) -> (
        AuthenticationAlgorithm,
        IntegrityAlgorithm,
        ConfidentialityAlgorithm,
    ) {
        use AuthenticationAlgorithm as A;
        use ConfidentialityAlgorithm as C;
        use IntegrityAlgorithm as I;

        match self.0 {
            0 => (A::RakpNone, I::None, C::None),
            1 => (A::RakpHmacSha1, I::None, C::None),
            2 => (A::RakpHmacSha1, I::HmacSha1_96, C::None),
            3 => (A::RakpHmacSha1, I::HmacSha1_96, C::AesCbc128),
            4 => (A::RakpHmacSha1, I::HmacSha1_96, C::Xrc4_128),
            5 => (A::RakpHmacSha1, I::HmacSha1_96, C::Xrc4_40),
            6 => (A::RakpHmacMd5, I::None, C::None),
            7 => (A::RakpHmacMd5, I::HmacMd5_128, C::None),
            8 => (A::RakpHmacMd5, I::HmacMd5_128, C::AesCbc128),
            9 => (A::RakpHmacMd5, I::HmacMd5_128, C::Xrc4_128),
            10 => (A::RakpHmacMd5, I::HmacMd5_128, C::Xrc4_40),
            11 => (A::RakpHmacMd5, I::Md5_128, C::None),
            12 => (A::RakpHmacMd5, I::Md5_128, C::AesCbc128),
            13 => (A::RakpHmacMd5, I::Md5_128, C::Xrc4_128),
            14 => (A::RakpHmacMd5, I::Md5_128, C::Xrc4_40),
            15 => (A::RakpHmacSha256, I::None, C::None),
            16 => (A::RakpHmacSha256, I::HmacSha256_128, C::None),
            17 => (A::RakpHmacSha256, I::HmacSha256_128, C::AesCbc128),
            _ => unreachable!("CipherSuite IDs are validated on construction"),
        }
    }
}

/// Iterate the cipher suite IDs present in concatenated Get Channel
/// Cipher Suites record data.
///
/// Only standard (0xC0) records are understood; an OEM record stops the
/// iteration, as everything after it has a different layout.
fn suite_ids(record_data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    let mut records = record_data.chunks_exact(5);

    core::iter::from_fn(move || {
        let record = records.next()?;

        if record[0] != 0xC0 {
            log::debug!("Stopping at non-standard cipher suite record 0x{:02X}", record[0]);
            return None;
        }

        Some(record[1])
    })
}

/// Query the BMC's supported cipher suites and pick the best one we
/// implement.
///
/// Preference order is suite 17, then suite 3. If the listing cannot be
/// retrieved, suite 3 is used: the specification requires every RMCP+
/// implementation to provide it.
pub(super) fn find_best_cipher_suite<CON>(ipmi: &mut Ipmi<CON>) -> CipherSuite
where
    CON: IpmiConnection,
{
    let mut record_data = Vec::new();

    for list_index in 0..=0x3F {
        let command = match GetChannelCipherSuites::new(Channel::Current, list_index) {
            Some(v) => v,
            None => break,
        };

        match ipmi.send_recv(command) {
            Ok(page) => {
                let full = page.is_full();
                record_data.extend_from_slice(&page);

                if !full {
                    break;
                }
            }
            Err(e) => {
                log::info!("Could not list channel cipher suites: {e:?}");
                return CipherSuite::SUITE_3;
            }
        }
    }

    let supported: Vec<u8> = suite_ids(&record_data).collect();

    for preferred in CipherSuite::PREFERRED {
        if supported.contains(&preferred.id()) {
            log::info!("Using best available cipher suite {}", preferred.id());
            return preferred;
        }
    }

    log::info!("No preferred cipher suite reported, falling back to suite 3");
    CipherSuite::SUITE_3
}
