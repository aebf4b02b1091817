use super::{AuthenticationAlgorithm, RunningHmac};

/// The keys derived from a completed RAKP exchange.
///
/// SIK is the session integrity key; K1 keys the per-packet integrity
/// authcode and the first 16 bytes of K2 are the AES-CBC-128 key.
pub struct SessionKeys {
    sik: Vec<u8>,
    k1: Vec<u8>,
    k2: Vec<u8>,
    aes_key: [u8; 16],
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish()
    }
}

impl SessionKeys {
    /// Derive SIK, K1 and K2.
    ///
    /// `kg` is the BMC key K_G, or the user password when no K_G is
    /// configured. The SIK is an HMAC over both random numbers, the
    /// requested role byte and the user name; K1 and K2 are HMACs of
    /// constant bytes under the SIK.
    ///
    /// Returns `None` when `algorithm` is `RakpNone`: such sessions
    /// derive no key material.
    pub fn derive(
        algorithm: AuthenticationAlgorithm,
        kg: &[u8],
        console_random: &[u8; 16],
        bmc_random: &[u8; 16],
        requested_role: u8,
        username: &[u8],
    ) -> Option<Self> {
        let sik = RunningHmac::new(algorithm, kg)?
            .feed(console_random)
            .feed(bmc_random)
            .feed(&[requested_role, username.len() as u8])
            .feed(username)
            .finalize();

        let digest_len = algorithm.digest_len();

        let k1 = RunningHmac::new(algorithm, &sik)?
            .feed(&vec![0x01; digest_len])
            .finalize();
        let k2 = RunningHmac::new(algorithm, &sik)?
            .feed(&vec![0x02; digest_len])
            .finalize();

        // Every supported digest is at least 16 bytes long.
        let aes_key = k2[..16].try_into().unwrap();

        Some(Self {
            sik,
            k1,
            k2,
            aes_key,
        })
    }

    pub fn sik(&self) -> &[u8] {
        &self.sik
    }

    pub fn k1(&self) -> &[u8] {
        &self.k1
    }

    pub fn k2(&self) -> &[u8] {
        &self.k2
    }

    pub fn aes_key(&self) -> &[u8; 16] {
        &self.aes_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_lengths_follow_digest() {
        let console_random = [0x11; 16];
        let bmc_random = [0x22; 16];

        for (algorithm, len) in [
            (AuthenticationAlgorithm::RakpHmacSha1, 20),
            (AuthenticationAlgorithm::RakpHmacMd5, 16),
            (AuthenticationAlgorithm::RakpHmacSha256, 32),
        ] {
            let keys = SessionKeys::derive(
                algorithm,
                b"password",
                &console_random,
                &bmc_random,
                0x14,
                b"admin",
            )
            .unwrap();

            assert_eq!(keys.sik().len(), len);
            assert_eq!(keys.k1().len(), len);
            assert_eq!(keys.k2().len(), len);
            assert_eq!(&keys.k2()[..16], keys.aes_key());
        }
    }

    #[test]
    fn rakp_none_derives_nothing() {
        assert!(SessionKeys::derive(
            AuthenticationAlgorithm::RakpNone,
            b"password",
            &[0; 16],
            &[0; 16],
            0x14,
            b"admin",
        )
        .is_none());
    }

    #[test]
    fn k1_and_k2_differ() {
        let keys = SessionKeys::derive(
            AuthenticationAlgorithm::RakpHmacSha1,
            b"password",
            &[0x11; 16],
            &[0x22; 16],
            0x14,
            b"admin",
        )
        .unwrap();

        assert_ne!(keys.k1(), keys.k2());
        assert_ne!(keys.sik(), keys.k1());
    }
}
