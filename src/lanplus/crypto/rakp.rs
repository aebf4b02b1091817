//! The RAKP authcode computations from sections 13.20–13.28 of the IPMI
//! v2.0 specification.

use subtle::ConstantTimeEq;

use super::{AuthenticationAlgorithm, RunningHmac};

/// Compare two authcodes without leaking where they diverge.
///
/// Timing differences here would give an attacker a byte-at-a-time
/// oracle on the RAKP HMACs.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// The key-exchange authcode the BMC must present in RAKP-2:
///
/// HMAC(password, console_id ‖ bmc_id ‖ console_random ‖ bmc_random ‖
///      bmc_guid ‖ requested_role ‖ username_len ‖ username)
///
/// Returns `None` for `RakpNone`, which exchanges no authcode.
#[allow(clippy::too_many_arguments)]
pub fn rakp2_hmac(
    algorithm: AuthenticationAlgorithm,
    password: &[u8],
    console_session_id: u32,
    bmc_session_id: u32,
    console_random: &[u8; 16],
    bmc_random: &[u8; 16],
    bmc_guid: &[u8; 16],
    requested_role: u8,
    username: &[u8],
) -> Option<Vec<u8>> {
    let mac = RunningHmac::new(algorithm, password)?
        .feed(&console_session_id.to_le_bytes())
        .feed(&bmc_session_id.to_le_bytes())
        .feed(console_random)
        .feed(bmc_random)
        .feed(bmc_guid)
        .feed(&[requested_role, username.len() as u8])
        .feed(username)
        .finalize();

    Some(mac)
}

/// The authcode we present in RAKP-3:
///
/// HMAC(password, bmc_random ‖ console_id ‖ requested_role ‖
///      username_len ‖ username)
pub fn rakp3_authcode(
    algorithm: AuthenticationAlgorithm,
    password: &[u8],
    bmc_random: &[u8; 16],
    console_session_id: u32,
    requested_role: u8,
    username: &[u8],
) -> Option<Vec<u8>> {
    let mac = RunningHmac::new(algorithm, password)?
        .feed(bmc_random)
        .feed(&console_session_id.to_le_bytes())
        .feed(&[requested_role, username.len() as u8])
        .feed(username)
        .finalize();

    Some(mac)
}

/// The integrity check value the BMC must present in RAKP-4:
///
/// HMAC(SIK, console_random ‖ bmc_id ‖ bmc_guid)
///
/// truncated to the algorithm's RAKP-4 length.
pub fn rakp4_integrity_check_value(
    algorithm: AuthenticationAlgorithm,
    sik: &[u8],
    console_random: &[u8; 16],
    bmc_session_id: u32,
    bmc_guid: &[u8; 16],
) -> Option<Vec<u8>> {
    let mut mac = RunningHmac::new(algorithm, sik)?
        .feed(console_random)
        .feed(&bmc_session_id.to_le_bytes())
        .feed(bmc_guid)
        .finalize();

    mac.truncate(algorithm.rakp4_icv_len());

    Some(mac)
}
