//! The IPMI v2.0 / RMCP+ LAN interface.
//!
//! [`LanPlus::open`] performs the RMCP+ Open Session / RAKP handshake
//! and yields a connection that speaks authenticated, encrypted IPMI
//! and Serial-over-LAN to a BMC over UDP.

use std::{
    collections::VecDeque,
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use crate::{
    app::auth::PrivilegeLevel,
    connection::{
        is_duplicate_indication, Address, Channel, IpmiConnection, Message, Request,
        RequestTargetAddress, Response,
    },
    Ipmi, IpmiError,
};

mod checksum;

pub(crate) mod codec;
use codec::{
    parse_ipmi_response_body, write_ipmi_request_body, write_v1_5_packet, BridgeRoute,
    InboundMessage, InboundPacket, IpmiResponseBody, PayloadType, SessionCipher,
    BMC_SLAVE_ADDR, SEND_MESSAGE_CMD,
};
pub use codec::{ReadError, WriteError};

pub mod crypto;
use crypto::{ConfidentialityAlgorithm, IntegrityAlgorithm};

mod cipher;
pub use cipher::{CipherSuite, InvalidCipherSuite};

pub mod messages;
use messages::Username;
pub use messages::RakpStatusCode;

mod rmcp;
use rmcp::{AsfMessage, AsfMessageType, RmcpHeader};

mod session;
pub use session::SessionState;

mod sol;
pub use sol::{SolOperation, SolPacket, SolStatus};
use sol::{write_sol_payload, SolState};

mod tracker;
use tracker::{InFlightRequest, RequestTracker};

#[cfg(test)]
mod tests;

/// The default RMCP+ UDP port.
pub const IPMI_LANPLUS_PORT: u16 = 0x26F;

/// The session ID this console assigns to itself, chosen to be easy to
/// spot in packet dumps.
const CONSOLE_SESSION_ID: u32 = 0xA0A2A3A4;

/// Default per-try response timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of tries per request.
const DEFAULT_RETRIES: u32 = 4;

/// How long a controller may stay unreachable while activating new
/// firmware before a session re-open is attempted.
const DEFAULT_INACCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a long-duration firmware command may stay in progress.
const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum request data size on LAN.
const LAN_MAX_REQUEST_DATA_SIZE: u16 = 38;

/// Default maximum response data size on LAN.
const LAN_MAX_RESPONSE_DATA_SIZE: u16 = 34;

/// OEM firmware deviations that change handshake or SOL details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OemQuirks {
    /// Standard-conforming firmware.
    #[default]
    None,
    /// Intel IPMI v2 BMCs: the Open Session request names the requested
    /// privilege level instead of asking for the highest matching one,
    /// and a SOL ACK accepting zero characters is a full ACK.
    IntelPlus,
    /// Intel 82571 NIC-side management: no auth-capability probe, no
    /// privilege escalation, and the RAKP-1 user name field is padded
    /// to its full 16 bytes.
    I82571Spt,
    /// ICTS test tooling: the integrity pad excludes the pad-length and
    /// next-header bytes.
    Icts,
}

/// The parameters a session is opened with. Immutable once the session
/// is established.
#[derive(Clone)]
pub struct SessionParams {
    /// The user to authenticate as.
    pub username: Username,
    /// The user's password.
    pub password: Vec<u8>,
    /// The BMC key K_G, when one is configured. The password is used in
    /// its place otherwise.
    pub kg: Option<Vec<u8>>,
    /// The privilege level to request.
    pub privilege_level: PrivilegeLevel,
    /// The cipher suite to use. `None` queries the BMC and picks the
    /// best supported one.
    pub cipher_suite: Option<CipherSuite>,
    /// Request name-only user lookup instead of name-and-privilege
    /// lookup.
    pub name_only_lookup: bool,
    /// Per-try response timeout. Grows by one second per retry.
    pub timeout: Duration,
    /// Number of tries per request, and of handshake restarts.
    pub retries: u32,
    /// The OEM quirk profile of the remote firmware.
    pub quirks: OemQuirks,
    /// See [`DEFAULT_INACCESS_TIMEOUT`].
    pub inaccess_timeout: Duration,
    /// See [`DEFAULT_UPGRADE_TIMEOUT`].
    pub upgrade_timeout: Duration,
}

impl SessionParams {
    /// Session parameters with the defaults ipmitool-compatible tooling
    /// expects: Administrator privilege, best available cipher suite,
    /// 1 s timeout, 4 tries.
    pub fn new(username: Username, password: &[u8]) -> Self {
        Self {
            username,
            password: password.to_vec(),
            kg: None,
            privilege_level: PrivilegeLevel::Administrator,
            cipher_suite: None,
            name_only_lookup: true,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            quirks: OemQuirks::None,
            inaccess_timeout: DEFAULT_INACCESS_TIMEOUT,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
        }
    }

    fn kg(&self) -> &[u8] {
        match &self.kg {
            Some(kg) if !kg.is_empty() => kg,
            _ => &self.password,
        }
    }
}

impl core::fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParams")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("kg", &self.kg.as_ref().map(|_| "<redacted>"))
            .field("privilege_level", &self.privilege_level)
            .field("cipher_suite", &self.cipher_suite)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("quirks", &self.quirks)
            .finish()
    }
}

/// A packet failed structural or cryptographic validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MalformedPacket {
    /// The session envelope could not be decoded or verified.
    Envelope(ReadError),
    /// A handshake message could not be decoded.
    Handshake(messages::ParseError),
}

/// The RAKP handshake failed to authenticate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthFailure {
    /// The BMC reported an error status during the handshake.
    Status(RakpStatusCode),
    /// The RAKP-2 key-exchange authcode did not verify: the password or
    /// K_G does not match the BMC's.
    Rakp2AuthCodeMismatch,
    /// The RAKP-4 integrity check value did not verify.
    Rakp4IntegrityCheckMismatch,
    /// The BMC accepted different algorithms than the ones we proposed.
    NegotiationMismatch,
}

/// Something the remote end requires is not implemented here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unsupported {
    /// The remote RMCP endpoint does not support IPMI at all.
    IpmiNotSupported,
    /// The BMC does not support IPMI v2.0 / RMCP+ sessions.
    V2SessionsNotSupported,
    /// The cipher suite ID is reserved.
    CipherSuite(u8),
    /// The integrity algorithm is not implemented for traffic.
    IntegrityAlgorithm(IntegrityAlgorithm),
    /// The confidentiality algorithm is not implemented for traffic.
    ConfidentialityAlgorithm(ConfidentialityAlgorithm),
}

/// The error type of every [`LanPlus`] operation.
#[derive(Debug)]
pub enum LanPlusError {
    /// The socket failed.
    Transport(std::io::Error),
    /// No response arrived within the configured timeout and retries.
    Timeout,
    /// An inbound packet or handshake message failed validation.
    MalformedPacket(MalformedPacket),
    /// Session authentication failed.
    AuthFailed(AuthFailure),
    /// A required algorithm or capability is not implemented.
    Unsupported(Unsupported),
    /// An outbound request could not be encoded.
    Request(WriteError),
    /// The BMC answered with a non-zero completion code.
    Command {
        /// The raw completion code.
        code: u8,
    },
    /// The session is closed.
    SessionClosed,
}

impl From<std::io::Error> for LanPlusError {
    fn from(value: std::io::Error) -> Self {
        Self::Transport(value)
    }
}

impl From<ReadError> for LanPlusError {
    fn from(value: ReadError) -> Self {
        Self::MalformedPacket(MalformedPacket::Envelope(value))
    }
}

impl From<WriteError> for LanPlusError {
    fn from(value: WriteError) -> Self {
        match value {
            WriteError::UnsupportedIntegrityAlgorithm(i) => {
                Self::Unsupported(Unsupported::IntegrityAlgorithm(i))
            }
            WriteError::UnsupportedConfidentialityAlgorithm(c) => {
                Self::Unsupported(Unsupported::ConfidentialityAlgorithm(c))
            }
            other => Self::Request(other),
        }
    }
}

impl From<InvalidCipherSuite> for LanPlusError {
    fn from(value: InvalidCipherSuite) -> Self {
        Self::Unsupported(Unsupported::CipherSuite(value.0))
    }
}

/// Collapse a typed-command error into the connection error, turning
/// completion-code failures into [`LanPlusError::Command`].
fn flatten_ipmi_error<P: core::fmt::Debug>(error: IpmiError<LanPlusError, P>) -> LanPlusError {
    match error {
        IpmiError::Connection(e) => e,
        IpmiError::Failed { completion_code, .. } => LanPlusError::Command {
            code: completion_code,
        },
        IpmiError::Command { completion_code, .. } => LanPlusError::Command {
            code: completion_code.unwrap_or(0),
        },
        IpmiError::UnexpectedResponse { .. } => {
            LanPlusError::MalformedPacket(MalformedPacket::Envelope(ReadError::NotEnoughData))
        }
    }
}

/// What one received datagram amounted to.
#[derive(Debug)]
enum Poll {
    /// Nothing arrived before the deadline.
    TimedOut,
    /// A packet arrived but was not what we wait for; read again.
    ReadAgain,
    /// A response matched an in-flight request.
    Response(Response),
    /// A handshake message matching the current session state.
    Handshake(InboundMessage),
    /// A SOL packet.
    Sol(SolPacket),
}

/// An IPMI v2.0 / RMCP+ session to one BMC.
///
/// All state lives in this value; independent sessions do not share
/// anything and may be used from different threads.
pub struct LanPlus {
    socket: UdpSocket,
    params: SessionParams,

    state: SessionState,
    console_session_id: u32,
    bmc_session_id: u32,
    cipher_suite: CipherSuite,
    cipher: SessionCipher,
    out_sequence: u32,

    tracker: RequestTracker,
    /// A retransmission happened for the request currently awaited, so
    /// duplicate-indication completion codes may be echoes of it.
    retransmitted: bool,

    sol: SolState,
    pending_sol: VecDeque<SolPacket>,

    /// Current per-try timeout; grows while retrying, restored after.
    timeout: Duration,

    my_addr: u8,
    target: Option<(Address, Channel)>,
    transit: Option<(Address, Channel)>,

    max_request_data_size: u16,
    max_response_data_size: u16,

    // RAKP scratch state, only meaningful during the handshake.
    console_random: [u8; 16],
    bmc_random: [u8; 16],
    bmc_guid: [u8; 16],
    requested_role: u8,
    rakp2_status: Option<RakpStatusCode>,
}

impl core::fmt::Debug for LanPlus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanPlus")
            .field("state", &self.state)
            .field("cipher_suite", &self.cipher_suite.id())
            .field("bmc_session_id", &self.bmc_session_id)
            .finish()
    }
}

impl LanPlus {
    /// Open a session to `remote`, performing the full RMCP+ handshake.
    pub fn open<R: ToSocketAddrs + core::fmt::Debug>(
        remote: R,
        params: SessionParams,
    ) -> Result<Self, LanPlusError> {
        let address = remote.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::NotFound,
                format!("Could not resolve any addresses for {remote:?}"),
            )
        })?;

        let bind_address: SocketAddr = match address {
            SocketAddr::V4(_) => "0.0.0.0:0".parse().unwrap(),
            SocketAddr::V6(_) => "[::]:0".parse().unwrap(),
        };

        log::debug!("Opening connection to {address}");

        let socket = UdpSocket::bind(bind_address)?;
        socket.set_read_timeout(Some(params.timeout))?;
        socket.connect(address)?;

        let timeout = params.timeout;

        let mut session = Self {
            socket,
            params,
            state: SessionState::Presession,
            console_session_id: CONSOLE_SESSION_ID,
            bmc_session_id: 0,
            cipher_suite: CipherSuite::SUITE_3,
            cipher: SessionCipher::Insecure,
            out_sequence: 0,
            tracker: RequestTracker::default(),
            retransmitted: false,
            sol: SolState::default(),
            pending_sol: VecDeque::new(),
            timeout,
            my_addr: BMC_SLAVE_ADDR,
            target: None,
            transit: None,
            max_request_data_size: LAN_MAX_REQUEST_DATA_SIZE,
            max_response_data_size: LAN_MAX_RESPONSE_DATA_SIZE,
            console_random: [0; 16],
            bmc_random: [0; 16],
            bmc_guid: [0; 16],
            requested_role: 0,
            rakp2_status: None,
        };

        if session.params.quirks != OemQuirks::I82571Spt {
            session.ping()?;
        }

        session.establish()?;

        Ok(session)
    }

    /// The state this session is in.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The cipher suite the session was established with.
    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    /// Route every request without an explicit target through a Send
    /// Message wrapper to `addr` on `channel`.
    pub fn set_target(&mut self, addr: Address, channel: Channel) {
        self.target = Some((addr, channel));
    }

    /// Relay bridged requests through a transit controller, wrapping
    /// them twice.
    pub fn set_transit(&mut self, addr: Address, channel: Channel) {
        self.transit = Some((addr, channel));
    }

    /// Set our own address, used as the requester address of
    /// double-bridged requests.
    pub fn set_my_addr(&mut self, addr: Address) {
        self.my_addr = addr.0;
    }

    /// The maximum request data size currently in effect.
    pub fn max_request_data_size(&self) -> u16 {
        self.max_request_data_size
    }

    /// The maximum response data size currently in effect.
    pub fn max_response_data_size(&self) -> u16 {
        self.max_response_data_size
    }

    /// Set the maximum request data size.
    ///
    /// Encrypted payloads fill whole AES blocks, so under AES-CBC-128
    /// the size is rounded down to a multiple of 16 minus the 16-byte
    /// IV and one pad-length byte.
    pub fn set_max_request_data_size(&mut self, size: u16) {
        self.max_request_data_size = self.clamp_payload_size(size);
    }

    /// Set the maximum response data size. See
    /// [`Self::set_max_request_data_size`].
    pub fn set_max_response_data_size(&mut self, size: u16) {
        self.max_response_data_size = self.clamp_payload_size(size);
    }

    fn clamp_payload_size(&self, size: u16) -> u16 {
        let (_, _, confidentiality) = self.cipher_suite.algorithms();

        if confidentiality == ConfidentialityAlgorithm::AesCbc128 {
            (size & !15).saturating_sub(16 + 1)
        } else {
            size
        }
    }

    /// Send a raw command and await its response.
    ///
    /// The command goes to the session target set with
    /// [`Self::set_target`], or to the BMC itself when none is set.
    pub fn send_raw(
        &mut self,
        netfn: crate::connection::NetFn,
        cmd: u8,
        data: Vec<u8>,
    ) -> Result<Response, LanPlusError> {
        let lun = crate::connection::LogicalUnit::Zero;

        let target = match self.target {
            Some((addr, channel)) => RequestTargetAddress::BmcOrIpmb(addr, channel, lun),
            None => RequestTargetAddress::Bmc(lun),
        };

        let mut request = Request::new(Message::new_request(netfn, cmd, data), target);

        self.send_request(&mut request)
    }

    /// Close the session.
    ///
    /// The Close Session command is sent best-effort, without retries;
    /// the session ends up in [`SessionState::Closed`] regardless.
    pub fn close(mut self) {
        self.close_in_place();
    }

    fn close_in_place(&mut self) {
        if self.state == SessionState::Active {
            let mut request = Request::new(
                crate::app::CloseSession::new(self.bmc_session_id).into(),
                RequestTargetAddress::Bmc(crate::connection::LogicalUnit::Zero),
            );

            match self.send_request_once(&mut request) {
                Ok(Some(response)) if response.cc() != 0 => {
                    log::warn!("Close Session failed: completion code 0x{:02X}", response.cc());
                }
                Ok(Some(_)) => {
                    log::debug!("Closed session 0x{:08X}", self.bmc_session_id);
                }
                Ok(None) => log::warn!("Close Session command timed out"),
                Err(e) => log::warn!("Close Session command failed: {e:?}"),
            }
        }

        self.state = SessionState::Closed;
        self.tracker.clear();
        self.pending_sol.clear();
    }

    /// Verify the session is alive by issuing Get Device ID.
    ///
    /// A keepalive whose answer is displaced by SOL traffic counts as
    /// alive: the inbound SOL packets prove the BMC is there.
    pub fn keepalive(&mut self) -> Result<(), LanPlusError> {
        if self.state != SessionState::Active {
            return Err(LanPlusError::SessionClosed);
        }

        let pending_before = self.pending_sol.len();

        let result = Ipmi::new(&mut *self).send_recv(crate::app::GetDeviceId);

        match result {
            Ok(_) => Ok(()),
            Err(IpmiError::Connection(LanPlusError::Timeout))
                if self.pending_sol.len() > pending_before =>
            {
                Ok(())
            }
            Err(e) => Err(flatten_ipmi_error(e)),
        }
    }

    /// Send a command that may answer 0x80 (in progress), polling Get
    /// Upgrade Status until the final completion code is known.
    ///
    /// A silent or 0xFF/0xC3-answering BMC is assumed to be rebooting
    /// into new firmware: after the inaccessibility timeout one session
    /// re-open is attempted before giving up.
    pub fn send_long_duration(
        &mut self,
        netfn: crate::connection::NetFn,
        cmd: u8,
        data: Vec<u8>,
    ) -> Result<Response, LanPlusError> {
        use crate::connection::{completion_code_raw, indicates_inaccessible};

        if self.state != SessionState::Active {
            return Err(LanPlusError::SessionClosed);
        }

        let started = Instant::now();

        let first_try = match self.send_raw(netfn, cmd, data.clone()) {
            Ok(response) if indicates_inaccessible(response.cc()) => None,
            Ok(response) => Some(response),
            Err(LanPlusError::Timeout) => None,
            Err(e) => return Err(e),
        };

        let response = match first_try {
            Some(response) => response,
            None => {
                let wait = self.params.inaccess_timeout.saturating_sub(started.elapsed());
                log::info!(
                    "Controller inaccessible, re-opening the session in {}s",
                    wait.as_secs()
                );
                std::thread::sleep(wait);

                self.reopen()?;
                self.send_raw(netfn, cmd, data)?
            }
        };

        if response.cc() != completion_code_raw::IN_PROGRESS {
            return Ok(response);
        }

        self.wait_long_duration(netfn, cmd)
    }

    fn wait_long_duration(
        &mut self,
        netfn: crate::connection::NetFn,
        cmd: u8,
    ) -> Result<Response, LanPlusError> {
        let deadline = Instant::now() + self.params.upgrade_timeout;

        loop {
            // At least 100 ms between status requests.
            std::thread::sleep(Duration::from_millis(100));

            let status = Ipmi::new(&mut *self)
                .send_recv(crate::app::GetUpgradeStatus)
                .map_err(flatten_ipmi_error)?;

            if !status.in_progress() {
                let message =
                    Message::new_raw(netfn.response_value(), cmd, vec![status.last_cmd_ccode]);

                // The message always carries the completion code byte.
                return Ok(Response::new(message, 0).unwrap());
            }

            if Instant::now() >= deadline {
                log::warn!("Long-duration command 0x{cmd:02X} did not finish in time");
                return Err(LanPlusError::Timeout);
            }
        }
    }

    /// Send SOL character data, handling partial ACKs by retransmitting
    /// the unaccepted tail under fresh sequence numbers.
    ///
    /// Returns the ACK that completed (or aborted) the transfer.
    pub fn send_sol(
        &mut self,
        data: &[u8],
        operation: SolOperation,
    ) -> Result<SolPacket, LanPlusError> {
        if self.state != SessionState::Active {
            return Err(LanPlusError::SessionClosed);
        }

        let mut remaining = data.to_vec();

        loop {
            let sequence_number = self.sol.next_sequence_number();
            let payload = write_sol_payload(sequence_number, 0, 0, operation, &remaining);

            let ack = self.exchange_sol_data(sequence_number, &payload)?;

            if ack.status.contains(SolStatus::TRANSFER_UNAVAILABLE)
                || ack.status.contains(SolStatus::NACK)
            {
                return Ok(ack);
            }

            let accepted = ack.accepted_character_count as usize;

            if accepted >= remaining.len() {
                return Ok(ack);
            }

            if self.params.quirks == OemQuirks::IntelPlus && accepted == 0 {
                // Reported as accepting nothing, meant as a full ACK.
                return Ok(ack);
            }

            log::debug!(
                "Partial SOL ACK: {accepted}/{} characters, resending the tail",
                remaining.len()
            );

            remaining.drain(..accepted);
        }
    }

    /// Send an ACK-only SOL packet. Not retried and not acknowledged.
    pub fn send_sol_ack(&mut self, packet: &SolPacket) -> Result<(), LanPlusError> {
        let payload = write_sol_payload(
            0,
            packet.packet_sequence_number,
            packet.data.len() as u8,
            SolOperation::empty(),
            &[],
        );

        let sequence = self.next_out_sequence();
        let wire =
            self.cipher
                .write_packet(PayloadType::Sol, self.bmc_session_id, sequence, &payload)?;

        self.socket.send(&wire)?;

        Ok(())
    }

    /// Receive one SOL packet, acknowledging and de-duplicating it.
    ///
    /// Blocks up to the session timeout.
    pub fn recv_sol(&mut self) -> Result<SolPacket, LanPlusError> {
        if self.state != SessionState::Active {
            return Err(LanPlusError::SessionClosed);
        }

        if let Some(packet) = self.pending_sol.pop_front() {
            return Ok(packet);
        }

        let deadline = Instant::now() + self.timeout;

        loop {
            match self.poll_single(deadline)? {
                Poll::TimedOut => return Err(LanPlusError::Timeout),
                Poll::Sol(packet) => {
                    self.absorb_sol_packet(packet)?;

                    if let Some(packet) = self.pending_sol.pop_front() {
                        return Ok(packet);
                    }
                }
                Poll::Response(response) => {
                    log::debug!(
                        "Dropping IPMI response to cmd 0x{:02X} while receiving SOL",
                        response.cmd()
                    );
                }
                Poll::ReadAgain | Poll::Handshake(_) => {}
            }
        }
    }

    /// Transmit SOL data bytes and wait for the packet that ACKs them,
    /// retrying with the same wire bytes on timeout.
    fn exchange_sol_data(
        &mut self,
        sequence_number: u8,
        payload: &[u8],
    ) -> Result<SolPacket, LanPlusError> {
        let sequence = self.next_out_sequence();
        let wire =
            self.cipher
                .write_packet(PayloadType::Sol, self.bmc_session_id, sequence, payload)?;

        let saved_timeout = self.timeout;
        let mut ack = None;

        for attempt in 0..self.params.retries.max(1) {
            if attempt > 0 {
                log::debug!("Resending SOL packet (seq {sequence_number}, attempt {attempt})");
            }

            self.socket.send(&wire)?;

            let deadline = Instant::now() + self.timeout;

            match self.poll_sol_ack(sequence_number, deadline)? {
                Some(packet) => {
                    ack = Some(packet);
                    break;
                }
                None => self.timeout += Duration::from_secs(1),
            }
        }

        self.timeout = saved_timeout;

        ack.ok_or(LanPlusError::Timeout)
    }

    fn poll_sol_ack(
        &mut self,
        sequence_number: u8,
        deadline: Instant,
    ) -> Result<Option<SolPacket>, LanPlusError> {
        loop {
            match self.poll_single(deadline)? {
                Poll::TimedOut => return Ok(None),
                Poll::Sol(mut packet) => {
                    let acks_us = packet.acks(sequence_number);

                    // Inbound data riding along (or arriving instead)
                    // is delivered through the pending queue first.
                    self.absorb_sol_packet(packet.clone())?;

                    if acks_us {
                        // The data was queued above; do not hand it out
                        // a second time with the ACK.
                        packet.data.clear();
                        return Ok(Some(packet));
                    }
                }
                Poll::Response(response) => {
                    log::debug!(
                        "Dropping IPMI response to cmd 0x{:02X} while awaiting SOL ACK",
                        response.cmd()
                    );
                }
                Poll::ReadAgain | Poll::Handshake(_) => {}
            }
        }
    }

    /// Acknowledge, de-duplicate and queue an inbound SOL packet.
    fn absorb_sol_packet(&mut self, mut packet: SolPacket) -> Result<(), LanPlusError> {
        if packet.packet_sequence_number != 0 {
            // ACK the full byte count, before duplicate trimming.
            self.send_sol_ack(&packet)?;
            self.sol.filter_duplicate(&mut packet);

            if !packet.data.is_empty() || !packet.status.is_empty() {
                self.pending_sol.push_back(packet);
            }
        } else if !packet.status.is_empty() {
            // Status changes can arrive on ACK-only packets.
            self.pending_sol.push_back(packet);
        }

        Ok(())
    }

    fn next_out_sequence(&mut self) -> u32 {
        if self.state == SessionState::Active {
            self.out_sequence = self.out_sequence.wrapping_add(1);
        }

        self.out_sequence
    }

    fn bridge_route(&self, request: &Request) -> BridgeRoute {
        let target = request.bridge_target_address_and_channel(Address(self.my_addr));

        let (target_addr, target_channel) = match target {
            Some((addr, channel)) if addr.0 != self.my_addr && addr.0 != 0 => {
                (addr.0, channel.value())
            }
            _ => return BridgeRoute::Direct,
        };

        match self.transit {
            Some((addr, channel)) if addr.0 != self.my_addr && addr.0 != 0 => BridgeRoute::Double {
                transit_addr: addr.0,
                transit_channel: channel.value(),
                target_addr,
                target_channel,
            },
            _ => BridgeRoute::Single {
                target_addr,
                target_channel,
            },
        }
    }

    /// Build the wire datagram and tracker entry for `request`.
    fn build_ipmi_request(
        &mut self,
        request: &Request,
        seq: u8,
    ) -> Result<InFlightRequest, LanPlusError> {
        let route = self.bridge_route(request);

        let mut body = Vec::new();
        write_ipmi_request_body(
            &mut body,
            route,
            self.my_addr,
            request.netfn_raw(),
            request.target().lun().value(),
            seq,
            request.cmd(),
            request.data(),
        );

        // The presession capability probe is the one command that goes
        // out in an IPMI v1.5 envelope, so even v1.5-only BMCs can tell
        // us they do not speak v2.0.
        let v1_5_probe =
            request.netfn_raw() == 0x06 && request.cmd() == 0x38 && self.bmc_session_id == 0;

        let wire = if v1_5_probe {
            write_v1_5_packet(&body)
        } else {
            let sequence = self.next_out_sequence();
            self.cipher.write_packet(
                PayloadType::IpmiMessage,
                self.bmc_session_id,
                sequence,
                &body,
            )?
        };

        let bridging_level = route.level();

        Ok(InFlightRequest {
            seq,
            netfn: request.netfn_raw(),
            cmd: if bridging_level > 0 {
                SEND_MESSAGE_CMD
            } else {
                request.cmd()
            },
            target_cmd: request.cmd(),
            bridging_level,
            wire,
        })
    }

    /// Send `request` and wait for its response, retrying with the
    /// identical wire bytes and a growing timeout.
    fn send_request(&mut self, request: &mut Request) -> Result<Response, LanPlusError> {
        if self.state == SessionState::Closed {
            return Err(LanPlusError::SessionClosed);
        }

        let seq = self.tracker.next_seq();
        let entry = self.build_ipmi_request(request, seq)?;
        let wire = entry.wire.clone();

        log::debug!(
            ">> Sending IPMI command: netfn 0x{:02X} cmd 0x{:02X} seq 0x{:02X}",
            request.netfn_raw(),
            request.cmd(),
            seq,
        );

        self.tracker.insert(entry);
        self.retransmitted = false;

        let saved_timeout = self.timeout;
        let mut result = None;

        for attempt in 0..self.params.retries.max(1) {
            if attempt > 0 {
                log::debug!("Resending request (seq 0x{seq:02X}, attempt {attempt})");
                self.retransmitted = true;
            }

            self.socket.send(&wire)?;

            let deadline = Instant::now() + self.timeout;

            match self.poll_response(deadline) {
                Ok(Some(response)) => {
                    result = Some(response);
                    break;
                }
                Ok(None) => self.timeout += Duration::from_secs(1),
                Err(e) => {
                    self.timeout = saved_timeout;
                    self.tracker.remove_seq(seq);
                    return Err(e);
                }
            }
        }

        self.timeout = saved_timeout;

        match result {
            Some(response) => Ok(response),
            None => {
                self.tracker.remove_seq(seq);
                Err(LanPlusError::Timeout)
            }
        }
    }

    /// Send `request` once and poll for a response once. Used for the
    /// best-effort Close Session.
    fn send_request_once(
        &mut self,
        request: &mut Request,
    ) -> Result<Option<Response>, LanPlusError> {
        let seq = self.tracker.next_seq();
        let entry = self.build_ipmi_request(request, seq)?;
        let wire = entry.wire.clone();

        self.tracker.insert(entry);
        self.retransmitted = false;
        self.socket.send(&wire)?;

        let result = self.poll_response(Instant::now() + self.timeout);
        self.tracker.remove_seq(seq);

        result
    }

    /// Poll until an IPMI response matches an in-flight request, or the
    /// deadline passes. SOL packets arriving meanwhile are absorbed.
    fn poll_response(&mut self, deadline: Instant) -> Result<Option<Response>, LanPlusError> {
        loop {
            match self.poll_single(deadline)? {
                Poll::TimedOut => return Ok(None),
                Poll::ReadAgain => {}
                Poll::Sol(packet) => self.absorb_sol_packet(packet)?,
                Poll::Handshake(message) => {
                    log::info!("Dropping unexpected handshake payload {:?}", message.ty);
                }
                Poll::Response(response) => return Ok(Some(response)),
            }
        }
    }

    /// Receive and classify a single datagram.
    fn poll_single(&mut self, deadline: Instant) -> Result<Poll, LanPlusError> {
        let Some(datagram) = self.recv_datagram(deadline)? else {
            return Ok(Poll::TimedOut);
        };

        let packet = match self.cipher.read_packet(&datagram) {
            Ok(packet) => packet,
            Err(ReadError::AuthCodeMismatch) => {
                log::error!("Received message with invalid authcode, dropping");
                return Ok(Poll::ReadAgain);
            }
            Err(e) => {
                log::warn!("Dropping undecodable packet: {e:?}");
                return Ok(Poll::ReadAgain);
            }
        };

        match packet {
            InboundPacket::Asf(_) => Ok(Poll::ReadAgain),
            InboundPacket::V1_5(body) => match parse_ipmi_response_body(&body) {
                Ok(body) => Ok(self.match_response(body)),
                Err(e) => {
                    log::warn!("Dropping malformed v1.5 response: {e:?}");
                    Ok(Poll::ReadAgain)
                }
            },
            InboundPacket::V2_0(message) => Ok(self.dispatch_v2_0(message)),
        }
    }

    fn dispatch_v2_0(&mut self, message: InboundMessage) -> Poll {
        // Traffic for somebody else's session.
        if self.state == SessionState::Active && message.session_id != self.console_session_id {
            log::info!(
                "Packet session ID 0x{:08X} does not match active session 0x{:08X}",
                message.session_id,
                self.console_session_id
            );
            return Poll::ReadAgain;
        }

        match message.ty {
            PayloadType::IpmiMessage => match parse_ipmi_response_body(&message.payload) {
                Ok(body) => self.match_response(body),
                Err(e) => {
                    log::warn!("Dropping malformed IPMI response: {e:?}");
                    Poll::ReadAgain
                }
            },
            PayloadType::Sol => {
                if self.state != SessionState::Active {
                    log::warn!("Received an unexpected SOL packet");
                    return Poll::ReadAgain;
                }

                match SolPacket::from_payload(&message.payload) {
                    Some(packet) => Poll::Sol(packet),
                    None => {
                        log::warn!("Dropping truncated SOL packet");
                        Poll::ReadAgain
                    }
                }
            }
            PayloadType::OpenSessionResponse => {
                self.expect_handshake(message, SessionState::OpenSent)
            }
            PayloadType::Rakp2 => self.expect_handshake(message, SessionState::Rakp1Sent),
            PayloadType::Rakp4 => self.expect_handshake(message, SessionState::Rakp3Sent),
            PayloadType::OpenSessionRequest | PayloadType::Rakp1 | PayloadType::Rakp3 => {
                log::warn!("Received a console-to-BMC payload {:?}", message.ty);
                Poll::ReadAgain
            }
        }
    }

    fn expect_handshake(&mut self, message: InboundMessage, expected: SessionState) -> Poll {
        if self.state == expected {
            Poll::Handshake(message)
        } else {
            log::warn!(
                "Received an unexpected {:?} in state {:?}",
                message.ty,
                self.state
            );
            Poll::ReadAgain
        }
    }

    /// Match a parsed response body against the in-flight table,
    /// unwrapping Send Message encapsulation as needed.
    fn match_response(&mut self, mut body: IpmiResponseBody) -> Poll {
        loop {
            let retransmitted = self.retransmitted;

            let Some(entry) = self.tracker.get_mut(body.rq_seq, body.cmd) else {
                log::info!(
                    "No request matches response seq 0x{:02X} cmd 0x{:02X}, dropping",
                    body.rq_seq,
                    body.cmd
                );
                return Poll::ReadAgain;
            };

            if entry.bridging_level > 0 {
                if body.completion_code == 0 {
                    entry.bridging_level -= 1;

                    if entry.bridging_level == 0 {
                        entry.cmd = entry.target_cmd;
                    }

                    if !body.data.is_empty() {
                        // The bridged response is embedded in this one.
                        match parse_ipmi_response_body(&body.data) {
                            Ok(inner) => {
                                body = inner;
                                continue;
                            }
                            Err(e) => {
                                log::warn!("Dropping malformed bridged response: {e:?}");
                                return Poll::ReadAgain;
                            }
                        }
                    }

                    log::debug!("Bridged command accepted, waiting for the target's answer");
                    return Poll::ReadAgain;
                }

                log::debug!(
                    "Bridged command failed with ccode 0x{:02X}",
                    body.completion_code
                );
            }

            // A duplicate-request indication after a retransmission is
            // an echo of the retry; the original response follows.
            if retransmitted && is_duplicate_indication(body.completion_code) {
                log::debug!(
                    "Duplicate indication 0x{:02X} for seq 0x{:02X}, polling again",
                    body.completion_code,
                    body.rq_seq
                );
                return Poll::ReadAgain;
            }

            let seq = body.rq_seq;
            self.tracker.remove(body.rq_seq, body.cmd);

            let mut data = Vec::with_capacity(body.data.len() + 1);
            data.push(body.completion_code);
            data.extend_from_slice(&body.data);

            let message = Message::new_raw(body.netfn, body.cmd, data);

            // The message always carries the completion code byte.
            return Poll::Response(Response::new(message, seq as i64).unwrap());
        }
    }

    /// Receive one datagram, waiting at most until `deadline`.
    ///
    /// A connection-refused error is retried once: the RMCP ping to UDP
    /// port 623 is seen by both the BMC and the host OS, and the OS's
    /// rejection can queue ahead of the BMC's answer.
    fn recv_datagram(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>, LanPlusError> {
        let mut retry_refused = true;

        loop {
            let now = Instant::now();

            if now >= deadline {
                return Ok(None);
            }

            self.socket.set_read_timeout(Some(deadline - now))?;

            let mut buffer = [0u8; 2048];

            match self.socket.recv(&mut buffer) {
                Ok(0) => return Ok(None),
                Ok(received) => return Ok(Some(buffer[..received].to_vec())),
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused && retry_refused => {
                    retry_refused = false;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send the RMCP presence ping and verify the pong advertises IPMI.
    fn ping(&mut self) -> Result<(), LanPlusError> {
        let message_tag = 0xC8;

        let mut wire = Vec::new();
        RmcpHeader::new_asf(0xFF).write(&mut wire);
        AsfMessage::ping(message_tag).write(&mut wire);

        log::debug!("Sending RMCP presence ping");

        self.socket.send(&wire)?;

        let deadline = Instant::now() + self.timeout;

        loop {
            let Some(datagram) = self.recv_datagram(deadline)? else {
                return Err(LanPlusError::Timeout);
            };

            match self.cipher.read_packet(&datagram) {
                Ok(InboundPacket::Asf(AsfMessage {
                    message_tag: tag,
                    message_type: AsfMessageType::Pong { ipmi_supported, .. },
                })) if tag == message_tag => {
                    return if ipmi_supported {
                        Ok(())
                    } else {
                        Err(LanPlusError::Unsupported(Unsupported::IpmiNotSupported))
                    };
                }
                Ok(_) | Err(_) => continue,
            }
        }
    }
}

impl IpmiConnection for LanPlus {
    type SendError = LanPlusError;

    type RecvError = LanPlusError;

    type Error = LanPlusError;

    fn send(&mut self, request: &mut Request) -> Result<(), LanPlusError> {
        if self.state == SessionState::Closed {
            return Err(LanPlusError::SessionClosed);
        }

        let seq = self.tracker.next_seq();
        let entry = self.build_ipmi_request(request, seq)?;

        self.socket.send(&entry.wire)?;
        self.tracker.insert(entry);
        self.retransmitted = false;

        Ok(())
    }

    fn recv(&mut self) -> Result<Response, LanPlusError> {
        self.poll_response(Instant::now() + self.timeout)?
            .ok_or(LanPlusError::Timeout)
    }

    fn send_recv(&mut self, request: &mut Request) -> Result<Response, LanPlusError> {
        self.send_request(request)
    }
}

impl IpmiConnection for &mut LanPlus {
    type SendError = LanPlusError;

    type RecvError = LanPlusError;

    type Error = LanPlusError;

    fn send(&mut self, request: &mut Request) -> Result<(), LanPlusError> {
        IpmiConnection::send(&mut **self, request)
    }

    fn recv(&mut self) -> Result<Response, LanPlusError> {
        IpmiConnection::recv(&mut **self)
    }

    fn send_recv(&mut self, request: &mut Request) -> Result<Response, LanPlusError> {
        IpmiConnection::send_recv(&mut **self, request)
    }
}
