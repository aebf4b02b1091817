//! The RMCP+ session establishment state machine.

use std::time::Instant;

use crate::{
    app::auth::{
        ChannelAuthenticationCapabilities, GetChannelAuthenticationCapabilities, PrivilegeLevel,
    },
    app::SetSessionPrivilegeLevel,
    connection::Channel,
    Ipmi,
};

use super::{
    cipher::find_best_cipher_suite,
    codec::{PayloadType, SessionCipher},
    crypto::{
        constant_time_eq, rakp2_hmac, rakp3_authcode, rakp4_integrity_check_value, random_bytes,
        ConfidentialityAlgorithm, IntegrityAlgorithm, SessionKeys,
    },
    flatten_ipmi_error,
    messages::{
        OpenSessionRequest, OpenSessionResponse, ParseError, Rakp3Contents, RakpMessage1,
        RakpMessage2, RakpMessage3, RakpMessage4, RakpStatusCode,
    },
    AuthFailure, LanPlus, LanPlusError, MalformedPacket, OemQuirks, Poll, Unsupported,
};

use super::codec::InboundMessage;

/// The lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session traffic has been exchanged.
    Presession,
    /// The Open Session request is out.
    OpenSent,
    /// A valid Open Session response arrived; BMC session ID and
    /// algorithms are recorded.
    OpenReceived,
    /// RAKP 1 is out.
    Rakp1Sent,
    /// RAKP 2 arrived (its authcode may or may not have verified).
    Rakp2Received,
    /// RAKP 3 is out.
    Rakp3Sent,
    /// The session is established.
    Active,
    /// The session is over; the connection is unusable.
    Closed,
}

/// How a handshake step ended.
pub(super) enum HandshakeError {
    /// The response never arrived. The whole exchange restarts from
    /// [`SessionState::Presession`].
    Timeout,
    /// The handshake failed for good.
    Fatal(LanPlusError),
}

impl From<LanPlusError> for HandshakeError {
    fn from(value: LanPlusError) -> Self {
        HandshakeError::Fatal(value)
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(value: std::io::Error) -> Self {
        HandshakeError::Fatal(value.into())
    }
}

impl From<super::WriteError> for HandshakeError {
    fn from(value: super::WriteError) -> Self {
        HandshakeError::Fatal(value.into())
    }
}

fn handshake_parse_error(error: ParseError) -> HandshakeError {
    let error = match error {
        ParseError::Status(status) => LanPlusError::AuthFailed(AuthFailure::Status(status)),
        other => LanPlusError::MalformedPacket(MalformedPacket::Handshake(other)),
    };

    HandshakeError::Fatal(error)
}

impl LanPlus {
    /// Bring the session up: capability probe, cipher suite selection,
    /// and the Open Session / RAKP exchange with restart-on-timeout.
    pub(super) fn establish(&mut self) -> Result<(), LanPlusError> {
        self.state = SessionState::Presession;
        self.cipher = SessionCipher::Insecure;
        self.bmc_session_id = 0;
        self.out_sequence = 0;
        self.tracker.clear();
        self.rakp2_status = None;

        if self.params.quirks != OemQuirks::I82571Spt {
            let capabilities = self.get_authentication_capabilities()?;

            if !capabilities.ipmi2_connections_supported {
                log::error!("This BMC does not support IPMI v2.0 / RMCP+");
                self.state = SessionState::Closed;
                return Err(LanPlusError::Unsupported(Unsupported::V2SessionsNotSupported));
            }
        }

        let suite = match self.params.cipher_suite {
            Some(suite) => suite,
            None => find_best_cipher_suite(&mut Ipmi::new(&mut *self)),
        };

        self.cipher_suite = suite;

        let (_, integrity, confidentiality) = suite.algorithms();

        if integrity != IntegrityAlgorithm::None && integrity.hmac_kind().is_none() {
            self.state = SessionState::Closed;
            return Err(LanPlusError::Unsupported(Unsupported::IntegrityAlgorithm(
                integrity,
            )));
        }

        if matches!(
            confidentiality,
            ConfidentialityAlgorithm::Xrc4_128 | ConfidentialityAlgorithm::Xrc4_40
        ) {
            self.state = SessionState::Closed;
            return Err(LanPlusError::Unsupported(
                Unsupported::ConfidentialityAlgorithm(confidentiality),
            ));
        }

        // Open/RAKP1/RAKP3 are not individually retryable: the session
        // state advances with each message, so a timeout restarts the
        // whole exchange.
        let mut attempt = 0;

        loop {
            self.state = SessionState::Presession;
            self.bmc_session_id = 0;
            self.rakp2_status = None;

            match self.try_handshake() {
                Ok(()) => break,
                Err(HandshakeError::Fatal(e)) => {
                    log::error!("Unable to establish IPMI v2.0 / RMCP+ session");
                    self.state = SessionState::Closed;
                    return Err(e);
                }
                Err(HandshakeError::Timeout) => {
                    attempt += 1;

                    if attempt >= self.params.retries.max(1) {
                        log::error!("Unable to establish IPMI v2.0 / RMCP+ session");
                        self.state = SessionState::Closed;
                        return Err(LanPlusError::Timeout);
                    }

                    log::debug!("Handshake timed out, restarting ({attempt})");
                }
            }
        }

        log::debug!("IPMI v2.0 / RMCP+ session opened");

        if self.params.quirks != OemQuirks::I82571Spt
            && self.params.privilege_level > PrivilegeLevel::User
        {
            self.escalate_privilege()?;
        }

        Ok(())
    }

    /// Re-establish a session on the existing socket after the BMC
    /// became unreachable.
    pub(super) fn reopen(&mut self) -> Result<(), LanPlusError> {
        log::info!("Re-opening the session");
        self.establish()
    }

    fn try_handshake(&mut self) -> Result<(), HandshakeError> {
        self.open_session()?;
        self.rakp1()?;
        self.rakp3()
    }

    fn get_authentication_capabilities(
        &mut self,
    ) -> Result<ChannelAuthenticationCapabilities, LanPlusError> {
        log::debug!("Obtaining channel authentication capabilities");

        let command = GetChannelAuthenticationCapabilities::new(
            Channel::Current,
            self.params.privilege_level,
        );

        let first = Ipmi::new(&mut *self).send_recv(command.clone());

        match first {
            Ok(capabilities) => Ok(capabilities),
            Err(e) => {
                // Asking for IPMI v2 data upsets some BMCs; ask once
                // more without it.
                log::debug!("Authentication capability probe failed ({e:?}), retrying without the v2 data bit");

                Ipmi::new(&mut *self)
                    .send_recv(command.without_v2_data_bit())
                    .map_err(flatten_ipmi_error)
            }
        }
    }

    fn escalate_privilege(&mut self) -> Result<(), LanPlusError> {
        let level = self.params.privilege_level;

        let result = Ipmi::new(&mut *self).send_recv(SetSessionPrivilegeLevel::new(level));

        match result {
            Ok(granted) => {
                log::debug!("Set session privilege level to {granted:?}");
                Ok(())
            }
            Err(e) => {
                let e = flatten_ipmi_error(e);
                log::error!("Set Session Privilege Level to {level:?} failed: {e:?}");
                self.close_in_place();
                Err(e)
            }
        }
    }

    /// Send one handshake payload and wait for the answering handshake
    /// message, without retransmission.
    fn exchange_handshake(
        &mut self,
        ty: PayloadType,
        payload: &[u8],
        sent_state: SessionState,
    ) -> Result<Option<InboundMessage>, LanPlusError> {
        let wire = self.cipher.write_packet(ty, 0, 0, payload)?;

        self.socket.send(&wire)?;
        self.state = sent_state;

        let deadline = Instant::now() + self.timeout;

        loop {
            match self.poll_single(deadline)? {
                Poll::TimedOut => return Ok(None),
                Poll::Handshake(message) => return Ok(Some(message)),
                Poll::Response(response) => {
                    log::debug!(
                        "Dropping stale response to cmd 0x{:02X} during the handshake",
                        response.cmd()
                    );
                }
                Poll::ReadAgain | Poll::Sol(_) => {}
            }
        }
    }

    fn open_session(&mut self) -> Result<(), HandshakeError> {
        let (authentication, integrity, confidentiality) = self.cipher_suite.algorithms();

        // Zero asks for the highest privilege level matching the
        // proposed algorithms.
        let requested_max_privilege = if self.params.quirks == OemQuirks::IntelPlus
            || self.params.privilege_level != PrivilegeLevel::Administrator
        {
            Some(self.params.privilege_level)
        } else {
            None
        };

        let request = OpenSessionRequest {
            message_tag: 0,
            requested_max_privilege,
            console_session_id: self.console_session_id,
            authentication_algorithm: authentication,
            integrity_algorithm: integrity,
            confidentiality_algorithm: confidentiality,
        };

        let mut payload = Vec::new();
        request.write(&mut payload);

        log::debug!(">> Sending an Open Session request");

        let message = self.exchange_handshake(
            PayloadType::OpenSessionRequest,
            &payload,
            SessionState::OpenSent,
        )?;

        let Some(message) = message else {
            log::debug!("Timeout waiting for the Open Session response");
            return Err(HandshakeError::Timeout);
        };

        let response =
            OpenSessionResponse::from_data(&message.payload).map_err(handshake_parse_error)?;

        if response.console_session_id != self.console_session_id {
            log::warn!("Console session ID is not what we requested");
        }

        if response.authentication_algorithm != authentication
            || response.integrity_algorithm != integrity
            || response.confidentiality_algorithm != confidentiality
        {
            log::warn!(
                "BMC negotiated ({:?}, {:?}, {:?}) instead of the requested cipher suite {}",
                response.authentication_algorithm,
                response.integrity_algorithm,
                response.confidentiality_algorithm,
                self.cipher_suite.id()
            );
            return Err(HandshakeError::Fatal(LanPlusError::AuthFailed(
                AuthFailure::NegotiationMismatch,
            )));
        }

        self.bmc_session_id = response.bmc_session_id;
        self.state = SessionState::OpenReceived;

        Ok(())
    }

    fn rakp1(&mut self) -> Result<(), HandshakeError> {
        let (authentication, _, _) = self.cipher_suite.algorithms();

        self.console_random = random_bytes().map_err(|_| super::WriteError::EntropyUnavailable)?;

        self.requested_role = u8::from(self.params.privilege_level)
            | if self.params.name_only_lookup { 0x10 } else { 0x00 };

        let message = RakpMessage1 {
            message_tag: 0,
            bmc_session_id: self.bmc_session_id,
            console_random: self.console_random,
            requested_role: self.requested_role,
            username: &self.params.username,
            pad_username: self.params.quirks == OemQuirks::I82571Spt,
        };

        let mut payload = Vec::new();
        message.write(&mut payload);

        log::debug!(">> Sending RAKP 1");

        let inbound =
            self.exchange_handshake(PayloadType::Rakp1, &payload, SessionState::Rakp1Sent)?;

        let Some(inbound) = inbound else {
            log::debug!("Timeout waiting for RAKP 2");
            return Err(HandshakeError::Timeout);
        };

        let rakp2 = RakpMessage2::from_data(&inbound.payload).map_err(handshake_parse_error)?;

        self.bmc_random = rakp2.bmc_random;
        self.bmc_guid = rakp2.bmc_guid;
        self.state = SessionState::Rakp2Received;

        let expected = rakp2_hmac(
            authentication,
            &self.params.password,
            self.console_session_id,
            self.bmc_session_id,
            &self.console_random,
            &self.bmc_random,
            &self.bmc_guid,
            self.requested_role,
            &self.params.username,
        );

        let verified = match expected {
            Some(mac) => constant_time_eq(&mac, rakp2.key_exchange_auth_code),
            None => rakp2.key_exchange_auth_code.is_empty(),
        };

        if verified {
            self.rakp2_status = None;
        } else {
            log::error!("RAKP 2 key-exchange authcode is invalid (wrong password or K_G?)");
            self.rakp2_status = Some(RakpStatusCode::InvalidIntegrityCheckValue);
        }

        Ok(())
    }

    fn rakp3(&mut self) -> Result<(), HandshakeError> {
        let (authentication, integrity, confidentiality) = self.cipher_suite.algorithms();

        let auth_code;
        let keys;

        // When RAKP 2 failed to verify we still send RAKP 3, carrying
        // the status code instead of an authcode, so the BMC knows why
        // the exchange is abandoned.
        let contents = match self.rakp2_status {
            Some(status) => {
                keys = None;
                Rakp3Contents::Failure(status)
            }
            None => {
                keys = SessionKeys::derive(
                    authentication,
                    self.params.kg(),
                    &self.console_random,
                    &self.bmc_random,
                    self.requested_role,
                    &self.params.username,
                );

                auth_code = rakp3_authcode(
                    authentication,
                    &self.params.password,
                    &self.bmc_random,
                    self.console_session_id,
                    self.requested_role,
                    &self.params.username,
                )
                .unwrap_or_default();

                Rakp3Contents::Success(&auth_code)
            }
        };

        let message = RakpMessage3 {
            message_tag: 0,
            bmc_session_id: self.bmc_session_id,
            contents,
        };

        let mut payload = Vec::new();
        message.write(&mut payload);

        log::debug!(">> Sending RAKP 3");

        if message.is_failure() {
            let wire = self.cipher.write_packet(PayloadType::Rakp3, 0, 0, &payload)?;
            self.socket.send(&wire).map_err(LanPlusError::from)?;
            self.state = SessionState::Rakp3Sent;

            return Err(HandshakeError::Fatal(LanPlusError::AuthFailed(
                AuthFailure::Rakp2AuthCodeMismatch,
            )));
        }

        let inbound =
            self.exchange_handshake(PayloadType::Rakp3, &payload, SessionState::Rakp3Sent)?;

        let Some(inbound) = inbound else {
            log::debug!("Timeout waiting for RAKP 4");
            return Err(HandshakeError::Timeout);
        };

        let rakp4 = RakpMessage4::from_data(&inbound.payload).map_err(handshake_parse_error)?;

        let expected = keys.as_ref().and_then(|keys| {
            rakp4_integrity_check_value(
                authentication,
                keys.sik(),
                &self.console_random,
                self.bmc_session_id,
                &self.bmc_guid,
            )
        });

        let verified = match expected {
            Some(icv) => constant_time_eq(&icv, rakp4.integrity_check_value),
            None => rakp4.integrity_check_value.is_empty(),
        };

        if !verified {
            log::error!("RAKP 4 integrity check value is invalid");
            return Err(HandshakeError::Fatal(LanPlusError::AuthFailed(
                AuthFailure::Rakp4IntegrityCheckMismatch,
            )));
        }

        self.cipher = match keys {
            Some(keys)
                if integrity != IntegrityAlgorithm::None
                    || confidentiality != ConfidentialityAlgorithm::None =>
            {
                SessionCipher::Protected {
                    integrity,
                    confidentiality,
                    keys,
                    short_trailer_pad: self.params.quirks == OemQuirks::Icts,
                }
            }
            _ => SessionCipher::Insecure,
        };

        self.out_sequence = 0;
        self.state = SessionState::Active;

        Ok(())
    }
}
