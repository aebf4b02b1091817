//! Cryptographic building blocks for RMCP+ sessions: the negotiated
//! algorithm identifiers, HMAC computation, AES-CBC-128 payload
//! encryption, key derivation and the RAKP authcodes.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

mod mac;
pub(crate) use mac::RunningHmac;

mod keys;
pub(crate) use keys::SessionKeys;

mod rakp;
pub(crate) use rakp::{
    constant_time_eq, rakp2_hmac, rakp3_authcode, rakp4_integrity_check_value,
};

/// The authentication algorithm negotiated for the RAKP exchange.
///
/// This determines the HMAC used for the RAKP authcodes and the digest
/// length of the derived session keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthenticationAlgorithm {
    RakpNone,
    RakpHmacSha1,
    RakpHmacMd5,
    RakpHmacSha256,
}

impl AuthenticationAlgorithm {
    /// The digest length of the underlying hash, which is also the
    /// length of SIK, K1 and K2 derived under this algorithm.
    pub fn digest_len(&self) -> usize {
        match self {
            AuthenticationAlgorithm::RakpNone => 0,
            AuthenticationAlgorithm::RakpHmacSha1 => 20,
            AuthenticationAlgorithm::RakpHmacMd5 => 16,
            AuthenticationAlgorithm::RakpHmacSha256 => 32,
        }
    }

    /// The length of the RAKP-4 integrity check value under this
    /// algorithm.
    pub fn rakp4_icv_len(&self) -> usize {
        match self {
            AuthenticationAlgorithm::RakpNone => 0,
            AuthenticationAlgorithm::RakpHmacSha1 => 12,
            AuthenticationAlgorithm::RakpHmacMd5 => 16,
            AuthenticationAlgorithm::RakpHmacSha256 => 16,
        }
    }
}

impl TryFrom<u8> for AuthenticationAlgorithm {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0x00 => Self::RakpNone,
            0x01 => Self::RakpHmacSha1,
            0x02 => Self::RakpHmacMd5,
            0x03 => Self::RakpHmacSha256,
            _ => return Err(()),
        };

        Ok(value)
    }
}

impl From<AuthenticationAlgorithm> for u8 {
    fn from(value: AuthenticationAlgorithm) -> Self {
        match value {
            AuthenticationAlgorithm::RakpNone => 0x00,
            AuthenticationAlgorithm::RakpHmacSha1 => 0x01,
            AuthenticationAlgorithm::RakpHmacMd5 => 0x02,
            AuthenticationAlgorithm::RakpHmacSha256 => 0x03,
        }
    }
}

/// The integrity algorithm protecting session packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum IntegrityAlgorithm {
    #[default]
    None,
    HmacSha1_96,
    HmacMd5_128,
    Md5_128,
    HmacSha256_128,
}

impl IntegrityAlgorithm {
    /// The length of the authcode trailer produced by this algorithm.
    pub fn mac_len(&self) -> usize {
        match self {
            IntegrityAlgorithm::None => 0,
            IntegrityAlgorithm::HmacSha1_96 => 12,
            IntegrityAlgorithm::HmacMd5_128 => 16,
            IntegrityAlgorithm::Md5_128 => 16,
            IntegrityAlgorithm::HmacSha256_128 => 16,
        }
    }

    /// The HMAC this algorithm truncates, or `None` for the algorithms we
    /// cannot seal with (plain keyed MD5 is never negotiated by this
    /// implementation).
    pub(crate) fn hmac_kind(&self) -> Option<AuthenticationAlgorithm> {
        match self {
            IntegrityAlgorithm::None | IntegrityAlgorithm::Md5_128 => None,
            IntegrityAlgorithm::HmacSha1_96 => Some(AuthenticationAlgorithm::RakpHmacSha1),
            IntegrityAlgorithm::HmacMd5_128 => Some(AuthenticationAlgorithm::RakpHmacMd5),
            IntegrityAlgorithm::HmacSha256_128 => Some(AuthenticationAlgorithm::RakpHmacSha256),
        }
    }
}

impl TryFrom<u8> for IntegrityAlgorithm {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0x00 => Self::None,
            0x01 => Self::HmacSha1_96,
            0x02 => Self::HmacMd5_128,
            0x03 => Self::Md5_128,
            0x04 => Self::HmacSha256_128,
            _ => return Err(()),
        };

        Ok(value)
    }
}

impl From<IntegrityAlgorithm> for u8 {
    fn from(value: IntegrityAlgorithm) -> Self {
        match value {
            IntegrityAlgorithm::None => 0x00,
            IntegrityAlgorithm::HmacSha1_96 => 0x01,
            IntegrityAlgorithm::HmacMd5_128 => 0x02,
            IntegrityAlgorithm::Md5_128 => 0x03,
            IntegrityAlgorithm::HmacSha256_128 => 0x04,
        }
    }
}

/// The confidentiality algorithm protecting session payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConfidentialityAlgorithm {
    #[default]
    None,
    AesCbc128,
    Xrc4_128,
    Xrc4_40,
}

impl TryFrom<u8> for ConfidentialityAlgorithm {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0x00 => Self::None,
            0x01 => Self::AesCbc128,
            0x02 => Self::Xrc4_128,
            0x03 => Self::Xrc4_40,
            _ => return Err(()),
        };

        Ok(value)
    }
}

impl From<ConfidentialityAlgorithm> for u8 {
    fn from(value: ConfidentialityAlgorithm) -> Self {
        match value {
            ConfidentialityAlgorithm::None => 0x00,
            ConfidentialityAlgorithm::AesCbc128 => 0x01,
            ConfidentialityAlgorithm::Xrc4_128 => 0x02,
            ConfidentialityAlgorithm::Xrc4_40 => 0x03,
        }
    }
}

/// The ciphertext of an inbound packet could not be decrypted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BadCiphertext;

/// Encrypt `buffer` in place with AES-CBC-128.
///
/// The caller is responsible for padding: `buffer` must be a multiple of
/// 16 bytes long, anything else is a contract violation.
pub(crate) fn aes_128_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], buffer: &mut [u8]) {
    debug_assert_eq!(buffer.len() % 16, 0);

    let len = buffer.len();
    cbc::Encryptor::<aes::Aes128>::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(buffer, len)
        .expect("AES-CBC encryption of block-aligned data is infallible");
}

/// Decrypt `buffer` in place with AES-CBC-128.
pub(crate) fn aes_128_cbc_decrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    buffer: &mut [u8],
) -> Result<(), BadCiphertext> {
    if buffer.len() % 16 != 0 {
        return Err(BadCiphertext);
    }

    cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(buffer)
        .map_err(|_| BadCiphertext)?;

    Ok(())
}

/// Draw `N` bytes from the operating system entropy source.
///
/// Used for the console random number and the per-packet AES IVs. An
/// error here means the system cannot provide entropy and the session
/// must not proceed.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], getrandom::Error> {
    let mut buffer = [0u8; N];
    getrandom::getrandom(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_roundtrip() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];

        let plaintext: Vec<u8> = (0u8..32).collect();
        let mut buffer = plaintext.clone();

        aes_128_cbc_encrypt(&key, &iv, &mut buffer);
        assert_ne!(buffer, plaintext);

        aes_128_cbc_decrypt(&key, &iv, &mut buffer).unwrap();
        assert_eq!(buffer, plaintext);
    }

    #[test]
    fn unaligned_ciphertext_is_rejected() {
        let mut buffer = [0u8; 17];
        assert_eq!(
            aes_128_cbc_decrypt(&[0; 16], &[0; 16], &mut buffer),
            Err(BadCiphertext)
        );
    }

    #[test]
    fn algorithm_codes_roundtrip() {
        for value in 0..=3u8 {
            assert_eq!(
                u8::from(AuthenticationAlgorithm::try_from(value).unwrap()),
                value
            );
            assert_eq!(
                u8::from(ConfidentialityAlgorithm::try_from(value).unwrap()),
                value
            );
        }

        for value in 0..=4u8 {
            assert_eq!(u8::from(IntegrityAlgorithm::try_from(value).unwrap()), value);
        }

        assert!(AuthenticationAlgorithm::try_from(4).is_err());
        assert!(IntegrityAlgorithm::try_from(5).is_err());
        assert!(ConfidentialityAlgorithm::try_from(4).is_err());
    }
}
