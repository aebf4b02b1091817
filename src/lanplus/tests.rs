//! End-to-end exercises against a scripted BMC double.
//!
//! Each test runs a minimal BMC on a loopback UDP socket. The double
//! reuses the crate's own codec, keyed with the same RAKP-derived
//! material, so both directions of the session crypto are exercised;
//! the wire-format details are pinned down separately by the per-module
//! unit tests.

use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{app::auth::PrivilegeLevel, connection::NetFn};

use super::{
    checksum::push_checksum,
    cipher::CipherSuite,
    codec::{InboundPacket, PayloadType, SessionCipher, BMC_SLAVE_ADDR, REMOTE_SWID},
    crypto::{rakp2_hmac, rakp4_integrity_check_value, SessionKeys},
    messages::{AlgorithmPayload, Username},
    rmcp::{AsfMessage, AsfMessageType, RmcpHeader},
    sol::write_sol_payload,
    AuthFailure, LanPlus, LanPlusError, SessionParams, SessionState, SolOperation,
};

const BMC_SESSION_ID: u32 = 0x02000000;

fn test_params() -> SessionParams {
    let mut params = SessionParams::new(Username::new("admin").unwrap(), b"admin");
    params.cipher_suite = Some(CipherSuite::SUITE_3);
    params
}

/// An IPMI request as the BMC double sees it.
#[derive(Debug, Clone)]
struct ParsedRequest {
    netfn: u8,
    seq: u8,
    cmd: u8,
    data: Vec<u8>,
    raw_body: Vec<u8>,
}

fn parse_request_body(body: &[u8]) -> ParsedRequest {
    assert!(body.len() >= 7, "truncated request body: {body:02X?}");

    ParsedRequest {
        netfn: body[1] >> 2,
        seq: body[4] >> 2,
        cmd: body[5],
        data: body[6..body.len() - 1].to_vec(),
        raw_body: body.to_vec(),
    }
}

/// Build an IPMI response message body.
fn response_body(netfn: u8, seq: u8, cmd: u8, cc: u8, data: &[u8]) -> Vec<u8> {
    let mut body = vec![REMOTE_SWID, (netfn | 1) << 2];
    push_checksum(&mut body, 0);

    let start = body.len();
    body.extend_from_slice(&[BMC_SLAVE_ADDR, seq << 2, cmd, cc]);
    body.extend_from_slice(data);
    push_checksum(&mut body, start);

    body
}

/// The BMC double: owns the server socket and, once the handshake is
/// done, the same session cipher as the console under test.
struct ScriptedBmc {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    cipher: SessionCipher,
    out_sequence: u32,

    /// The cipher suite this BMC expects the console to propose.
    suite: CipherSuite,

    /// The password this BMC believes in; RAKP-2 is computed with it.
    password: Vec<u8>,

    console_session_id: u32,
    console_random: [u8; 16],
    requested_role: u8,
    username: Vec<u8>,
    bmc_random: [u8; 16],
    bmc_guid: [u8; 16],
}

impl ScriptedBmc {
    fn new(socket: UdpSocket, password: &[u8]) -> Self {
        let mut bmc_random = [0u8; 16];
        let mut bmc_guid = [0u8; 16];

        for i in 0..16u8 {
            bmc_random[i as usize] = i;
            bmc_guid[i as usize] = 0x10 + i;
        }

        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();

        Self {
            socket,
            peer: None,
            cipher: SessionCipher::Insecure,
            out_sequence: 0,
            suite: CipherSuite::SUITE_3,
            password: password.to_vec(),
            console_session_id: 0,
            console_random: [0; 16],
            requested_role: 0,
            username: Vec::new(),
            bmc_random,
            bmc_guid,
        }
    }

    fn recv_raw(&mut self) -> Vec<u8> {
        let mut buffer = [0u8; 2048];
        let (received, peer) = self.socket.recv_from(&mut buffer).unwrap();
        self.peer = Some(peer);
        buffer[..received].to_vec()
    }

    fn send_raw(&self, data: &[u8]) {
        self.socket.send_to(data, self.peer.unwrap()).unwrap();
    }

    fn recv_packet(&mut self) -> InboundPacket {
        let datagram = self.recv_raw();
        self.cipher.read_packet(&datagram).unwrap()
    }

    /// Like [`Self::recv_packet`], but `None` when nothing arrives.
    fn try_recv_packet(&mut self) -> Option<InboundPacket> {
        let mut buffer = [0u8; 2048];
        let (received, peer) = self.socket.recv_from(&mut buffer).ok()?;
        self.peer = Some(peer);
        self.cipher.read_packet(&buffer[..received]).ok()
    }

    fn send_v2(&mut self, ty: PayloadType, payload: &[u8]) {
        self.out_sequence += 1;
        let wire = self
            .cipher
            .write_packet(ty, self.console_session_id, self.out_sequence, payload)
            .unwrap();
        self.send_raw(&wire);
    }

    fn send_pong(&mut self, message_tag: u8) {
        let mut wire = Vec::new();
        RmcpHeader::new_asf(0xFF).write(&mut wire);
        AsfMessage {
            message_tag,
            message_type: AsfMessageType::Pong {
                enterprise_number: super::rmcp::ASF_RMCP_IANA,
                oem_data: 0,
                ipmi_supported: true,
            },
        }
        .write(&mut wire);
        self.send_raw(&wire);
    }

    fn send_v1_5_response(&mut self, request: &ParsedRequest, cc: u8, data: &[u8]) {
        let body = response_body(request.netfn, request.seq, request.cmd, cc, data);

        let mut wire = Vec::new();
        RmcpHeader::new_ipmi().write(&mut wire);
        wire.push(0x00);
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.push(body.len() as u8);
        wire.extend_from_slice(&body);

        self.send_raw(&wire);
    }

    fn send_response(&mut self, request: &ParsedRequest, cc: u8, data: &[u8]) {
        let body = response_body(request.netfn, request.seq, request.cmd, cc, data);
        self.send_v2(PayloadType::IpmiMessage, &body);
    }

    /// Serve presession traffic and the RAKP handshake until RAKP-3.
    ///
    /// Returns `true` if the handshake completed and the session cipher
    /// is installed.
    fn serve_handshake(&mut self) -> bool {
        loop {
            match self.recv_packet() {
                InboundPacket::Asf(AsfMessage {
                    message_tag,
                    message_type: AsfMessageType::Ping,
                }) => self.send_pong(message_tag),
                InboundPacket::Asf(_) => {}
                InboundPacket::V1_5(body) => {
                    let request = parse_request_body(&body);
                    assert_eq!(request.cmd, 0x38, "expected the v1.5 capability probe");

                    // v2.0 and v1.5 session support
                    self.send_v1_5_response(&request, 0x00, &[0x0E, 0x94, 0x06, 0x03, 0, 0, 0, 0]);
                }
                InboundPacket::V2_0(message) => match message.ty {
                    PayloadType::IpmiMessage => {
                        let request = parse_request_body(&message.payload);

                        // Sessionless traffic before the handshake is
                        // the cipher suite listing.
                        assert_eq!(request.cmd, 0x54);
                        self.send_response(
                            &request,
                            0x00,
                            &[0x01, 0xC0, 0x03, 0x01, 0x41, 0x81, 0xC0, 0x11, 0x03, 0x44, 0x81],
                        );
                    }
                    PayloadType::OpenSessionRequest => self.handle_open_session(&message.payload),
                    PayloadType::Rakp1 => self.handle_rakp1(&message.payload),
                    PayloadType::Rakp3 => return self.handle_rakp3(&message.payload),
                    other => panic!("BMC got unexpected payload {other:?}"),
                },
            }
        }
    }

    fn algorithms(
        &self,
    ) -> (
        super::crypto::AuthenticationAlgorithm,
        super::crypto::IntegrityAlgorithm,
        super::crypto::ConfidentialityAlgorithm,
    ) {
        self.suite.algorithms()
    }

    fn handle_open_session(&mut self, payload: &[u8]) {
        assert_eq!(payload.len(), 32);

        self.console_session_id = u32::from_le_bytes(payload[4..8].try_into().unwrap());

        let (auth, integrity, confidentiality) = self.algorithms();
        assert_eq!(payload[12], u8::from(auth));
        assert_eq!(payload[20], u8::from(integrity));
        assert_eq!(payload[28], u8::from(confidentiality));

        let mut response = vec![payload[0], 0x00, u8::from(PrivilegeLevel::Administrator), 0x00];
        response.extend_from_slice(&self.console_session_id.to_le_bytes());
        response.extend_from_slice(&BMC_SESSION_ID.to_le_bytes());
        AlgorithmPayload::Authentication(auth).write(&mut response);
        AlgorithmPayload::Integrity(integrity).write(&mut response);
        AlgorithmPayload::Confidentiality(confidentiality).write(&mut response);

        self.send_v2(PayloadType::OpenSessionResponse, &response);
    }

    fn handle_rakp1(&mut self, payload: &[u8]) {
        assert_eq!(
            u32::from_le_bytes(payload[4..8].try_into().unwrap()),
            BMC_SESSION_ID
        );

        self.console_random = payload[8..24].try_into().unwrap();
        self.requested_role = payload[24];

        let username_len = payload[27] as usize;
        self.username = payload[28..28 + username_len].to_vec();

        let (auth, _, _) = self.algorithms();

        let auth_code = rakp2_hmac(
            auth,
            &self.password,
            self.console_session_id,
            BMC_SESSION_ID,
            &self.console_random,
            &self.bmc_random,
            &self.bmc_guid,
            self.requested_role,
            &self.username,
        )
        .unwrap();

        let mut response = vec![payload[0], 0x00, 0x00, 0x00];
        response.extend_from_slice(&self.console_session_id.to_le_bytes());
        response.extend_from_slice(&self.bmc_random);
        response.extend_from_slice(&self.bmc_guid);
        response.extend_from_slice(&auth_code);

        self.send_v2(PayloadType::Rakp2, &response);
    }

    fn handle_rakp3(&mut self, payload: &[u8]) -> bool {
        let status = payload[1];

        let (auth, integrity, confidentiality) = self.algorithms();

        if status != 0 {
            // The console is abandoning the exchange; echo an error
            // RAKP-4 the way real firmware does.
            let response = vec![payload[0], status, 0x00, 0x00];
            self.send_v2(PayloadType::Rakp4, &response);
            return false;
        }

        let keys = SessionKeys::derive(
            auth,
            &self.password,
            &self.console_random,
            &self.bmc_random,
            self.requested_role,
            &self.username,
        )
        .unwrap();

        let icv = rakp4_integrity_check_value(
            auth,
            keys.sik(),
            &self.console_random,
            BMC_SESSION_ID,
            &self.bmc_guid,
        )
        .unwrap();

        let mut response = vec![payload[0], 0x00, 0x00, 0x00];
        response.extend_from_slice(&self.console_session_id.to_le_bytes());
        response.extend_from_slice(&icv);

        self.send_v2(PayloadType::Rakp4, &response);

        self.cipher = SessionCipher::Protected {
            integrity,
            confidentiality,
            keys,
            short_trailer_pad: false,
        };

        true
    }

    /// Receive one in-session IPMI request.
    fn expect_request(&mut self) -> ParsedRequest {
        match self.recv_packet() {
            InboundPacket::V2_0(message) if message.ty == PayloadType::IpmiMessage => {
                assert_eq!(message.session_id, BMC_SESSION_ID);
                parse_request_body(&message.payload)
            }
            other => panic!("BMC expected an IPMI request, got {other:?}"),
        }
    }

    /// Serve the Set Session Privilege Level that follows RAKP-4.
    fn serve_privilege_escalation(&mut self) {
        let request = self.expect_request();
        assert_eq!(request.cmd, 0x3B);
        let level = request.data[0];
        self.send_response(&request, 0x00, &[level]);
    }

    fn serve_session_establishment(&mut self) {
        assert!(self.serve_handshake());
        self.serve_privilege_escalation();
    }
}

fn spawn_bmc<F>(script: F) -> SocketAddr
where
    F: FnOnce(ScriptedBmc) + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let address = socket.local_addr().unwrap();

    thread::spawn(move || script(ScriptedBmc::new(socket, b"admin")));

    address
}

#[test]
fn successful_session_suite_3() {
    let address = spawn_bmc(|mut bmc| {
        bmc.serve_session_establishment();

        // Get Device ID
        let request = bmc.expect_request();
        assert_eq!(request.netfn, 0x06);
        assert_eq!(request.cmd, 0x01);
        let body = [
            0x20, 0x01, 0x02, 0x16, 0x02, 0xBF, 0x57, 0x01, 0x00, 0x03, 0x0C, 0x00, 0x01, 0x00,
            0x00,
        ];
        bmc.send_response(&request, 0x00, &body);

        // Close Session
        let request = bmc.expect_request();
        assert_eq!(request.cmd, 0x3C);
        assert_eq!(request.data, BMC_SESSION_ID.to_le_bytes());
        bmc.send_response(&request, 0x00, &[]);
    });

    let mut session = LanPlus::open(address, test_params()).unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.cipher_suite(), CipherSuite::SUITE_3);

    let response = session.send_raw(NetFn::App, 0x01, Vec::new()).unwrap();
    assert_eq!(response.cc(), 0x00);
    assert_eq!(response.data().len(), 15);

    session.close();
}

#[test]
fn best_available_cipher_suite_is_probed() {
    let address = spawn_bmc(|mut bmc| {
        // The handshake servicing asserts that the console proposes
        // the algorithms of the suite it picked.
        bmc.suite = CipherSuite::SUITE_17;
        assert!(bmc.serve_handshake());
        bmc.serve_privilege_escalation();
    });

    let mut params = test_params();
    params.cipher_suite = None;

    // The double lists suites 3 and 17; 17 is preferred and the whole
    // handshake runs under HMAC-SHA256.
    let session = match LanPlus::open(address, params) {
        Ok(session) => session,
        Err(e) => panic!("open failed: {e:?}"),
    };

    assert_eq!(session.cipher_suite(), CipherSuite::SUITE_17);
    session.close();
}

#[test]
fn wrong_password_closes_with_auth_failure() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let address = socket.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut bmc = ScriptedBmc::new(socket, b"letmein");
        // The RAKP-2 authcode is keyed with the BMC's password, which
        // does not match the console's; the console answers with a
        // failing RAKP-3.
        assert!(!bmc.serve_handshake());
    });

    let error = LanPlus::open(address, test_params()).unwrap_err();

    match error {
        LanPlusError::AuthFailed(AuthFailure::Rakp2AuthCodeMismatch) => {}
        other => panic!("expected an auth failure, got {other:?}"),
    }

    handle.join().unwrap();
}

#[test]
fn bridged_request_is_wrapped_and_unwrapped() {
    let address = spawn_bmc(|mut bmc| {
        bmc.serve_session_establishment();

        let request = bmc.expect_request();

        // Outer envelope: Send Message to channel 7.
        assert_eq!(request.cmd, 0x34);
        assert_eq!(&request.raw_body[..3], &[0x20, 0x06 << 2, 0xC8]);
        assert_eq!(request.raw_body[6], 0x47);

        // Inner message addressed to the target controller.
        assert_eq!(request.data[1], 0x82);
        let inner = parse_request_body(&request.data[1..]);
        assert_eq!(inner.cmd, 0xA5);

        // Answer with the inner response embedded in the Send Message
        // response.
        let inner_response = response_body(inner.netfn, inner.seq, inner.cmd, 0x00, &[0x42]);
        bmc.send_response(&request, 0x00, &inner_response);
    });

    let mut session = LanPlus::open(address, test_params()).unwrap();

    session.set_target(crate::connection::Address(0x82), crate::connection::Channel::new(7).unwrap());

    let response = session.send_raw(NetFn::Unknown(0x30), 0xA5, Vec::new()).unwrap();
    assert_eq!(response.cc(), 0x00);
    assert_eq!(response.data(), &[0x42]);
}

#[test]
fn sol_partial_ack_resends_the_tail() {
    let address = spawn_bmc(|mut bmc| {
        bmc.serve_session_establishment();

        let recv_sol_payload = |bmc: &mut ScriptedBmc| match bmc.recv_packet() {
            InboundPacket::V2_0(message) if message.ty == PayloadType::Sol => message.payload,
            other => panic!("expected SOL, got {other:?}"),
        };

        // First SOL packet: 20 characters under sequence number 1.
        let first = recv_sol_payload(&mut bmc);
        assert_eq!(first[0] & 0x0F, 1);
        assert_eq!(first.len() - 4, 20);

        // Keep accepting prefixes; the console must retransmit exactly
        // the unaccepted suffix under a fresh sequence number each
        // time, until the cumulative count reaches 20.
        let mut expected = first[4..].to_vec();

        for (seq, accepted) in [(1u8, 12u8), (2, 3), (3, 5)] {
            let ack = write_sol_payload(0, seq, accepted, SolOperation::empty(), &[]);
            bmc.send_v2(PayloadType::Sol, &ack);

            expected.drain(..accepted as usize);

            if expected.is_empty() {
                break;
            }

            let resent = recv_sol_payload(&mut bmc);
            assert_eq!(resent[0] & 0x0F, seq + 1);
            assert_eq!(&resent[4..], &expected[..]);
        }
    });

    let mut session = LanPlus::open(address, test_params()).unwrap();

    let data: Vec<u8> = (0..20).collect();
    let ack = session.send_sol(&data, SolOperation::empty()).unwrap();

    assert_eq!(ack.acked_packet_number, 3);
    assert_eq!(ack.accepted_character_count, 5);
}

#[test]
fn long_duration_command_polls_upgrade_status() {
    let address = spawn_bmc(|mut bmc| {
        bmc.serve_session_establishment();

        // Prepare Components answers "in progress".
        let request = bmc.expect_request();
        assert_eq!(request.netfn, 0x2C);
        assert_eq!(request.cmd, 0x31);
        bmc.send_response(&request, 0x80, &[]);

        // First status poll: still in progress.
        let request = bmc.expect_request();
        assert_eq!(request.cmd, 0x34);
        bmc.send_response(&request, 0x00, &[0x00, 0x31, 0x80]);

        // Second status poll: done, final code 0x00.
        let request = bmc.expect_request();
        assert_eq!(request.cmd, 0x34);
        bmc.send_response(&request, 0x00, &[0x00, 0x00, 0x00]);
    });

    let mut session = LanPlus::open(address, test_params()).unwrap();

    let started = Instant::now();
    let response = session
        .send_long_duration(NetFn::Picmg, 0x31, vec![0x00])
        .unwrap();

    assert_eq!(response.cc(), 0x00);
    // Two polls at >= 100 ms apart.
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[test]
fn silent_bmc_times_out_after_restarting_the_handshake() {
    let open_requests = Arc::new(AtomicUsize::new(0));
    let seen = open_requests.clone();

    let address = spawn_bmc(move |mut bmc| {
        while let Some(packet) = bmc.try_recv_packet() {
            match packet {
                InboundPacket::Asf(AsfMessage {
                    message_tag,
                    message_type: AsfMessageType::Ping,
                }) => bmc.send_pong(message_tag),
                InboundPacket::Asf(_) => {}
                InboundPacket::V1_5(body) => {
                    let request = parse_request_body(&body);
                    bmc.send_v1_5_response(
                        &request,
                        0x00,
                        &[0x0E, 0x94, 0x06, 0x03, 0, 0, 0, 0],
                    );
                }
                InboundPacket::V2_0(message)
                    if message.ty == PayloadType::OpenSessionRequest =>
                {
                    // Stay silent: the console must restart the
                    // handshake, not retry the message.
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                InboundPacket::V2_0(_) => {}
            }
        }
    });

    let started = Instant::now();
    let error = LanPlus::open(address, test_params()).unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(error, LanPlusError::Timeout));
    assert!(elapsed <= Duration::from_secs(5), "took {elapsed:?}");

    // Give the last datagram time to land before counting.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(open_requests.load(Ordering::SeqCst), 4);
}

#[test]
fn keepalive_survives_interleaved_sol_data() {
    let address = spawn_bmc(|mut bmc| {
        bmc.serve_session_establishment();

        // Answer the keepalive's Get Device ID with SOL data first;
        // the real answer follows.
        let request = bmc.expect_request();
        assert_eq!(request.cmd, 0x01);

        let sol = write_sol_payload(1, 0, 0, SolOperation::empty(), b"console output");
        bmc.send_v2(PayloadType::Sol, &sol);

        // The console ACKs the SOL data.
        let ack = match bmc.recv_packet() {
            InboundPacket::V2_0(message) if message.ty == PayloadType::Sol => message.payload,
            other => panic!("expected a SOL ACK, got {other:?}"),
        };
        assert_eq!(ack[1] & 0x0F, 1);
        assert_eq!(ack[2], 14);

        let body = [
            0x20, 0x01, 0x02, 0x16, 0x02, 0xBF, 0x57, 0x01, 0x00, 0x03, 0x0C, 0x00, 0x01, 0x00,
            0x00,
        ];
        bmc.send_response(&request, 0x00, &body);
    });

    let mut session = LanPlus::open(address, test_params()).unwrap();

    session.keepalive().unwrap();

    // The interleaved SOL data is waiting for the consumer.
    let packet = session.recv_sol().unwrap();
    assert_eq!(packet.data, b"console output");
}

#[test]
fn sequence_numbers_wrap_after_64_requests() {
    let address = spawn_bmc(|mut bmc| {
        bmc.serve_session_establishment();

        for _ in 0..65 {
            let request = bmc.expect_request();
            bmc.send_response(&request, 0x00, &[0x00]);
        }
    });

    let mut session = LanPlus::open(address, test_params()).unwrap();

    let mut sequences = Vec::new();

    for _ in 0..65 {
        let response = session.send_raw(NetFn::App, 0x01, Vec::new()).unwrap();
        sequences.push(response.seq());
    }

    // The capability probe and privilege escalation used sequence
    // numbers 1 and 2, so raw requests start at 3 and wrap through 0.
    assert_eq!(sequences[0], 3);
    assert_eq!(sequences[61], 0);
    assert_eq!(sequences[62], 1);
    assert_eq!(sequences[64], 3);
}
