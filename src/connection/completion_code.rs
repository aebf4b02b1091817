/// A non-zero IPMI completion code.
///
/// The generic codes from table 5-2 of the IPMI v2.0 specification get
/// their own variants; command-specific and OEM ranges are kept raw.
#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum CompletionErrorCode {
    NodeBusy,
    InvalidCommand,
    InvalidCommandForLun,
    ProcessingTimeout,
    OutOfSpace,
    ReservationCancelledOrInvalidId,
    RequestDataTruncated,
    RequestDataLenInvalid,
    RequestDataLengthLimitExceeded,
    ParameterOutOfRange,
    CannotReturnNumOfRequestedBytes,
    RequestedDatapointNotPresent,
    InvalidDataFieldInRequest,
    CommandIllegalForSensorOrRecord,
    ResponseUnavailable,
    CannotExecuteDuplicateRequest,
    DestinationUnavailable,
    InsufficientPrivilege,
    CannotExecuteCommandInCurrentState,
    SubFunctionDisabled,
    Unspecified,
    Oem(u8),
    CommandSpecific(u8),
    Reserved(u8),
}

impl TryFrom<u8> for CompletionErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => return Err(()),
            0xC0 => Self::NodeBusy,
            0xC1 => Self::InvalidCommand,
            0xC2 => Self::InvalidCommandForLun,
            0xC3 => Self::ProcessingTimeout,
            0xC4 => Self::OutOfSpace,
            0xC5 => Self::ReservationCancelledOrInvalidId,
            0xC6 => Self::RequestDataTruncated,
            0xC7 => Self::RequestDataLenInvalid,
            0xC8 => Self::RequestDataLengthLimitExceeded,
            0xC9 => Self::ParameterOutOfRange,
            0xCA => Self::CannotReturnNumOfRequestedBytes,
            0xCB => Self::RequestedDatapointNotPresent,
            0xCC => Self::InvalidDataFieldInRequest,
            0xCD => Self::CommandIllegalForSensorOrRecord,
            0xCE | 0xD0 | 0xD1 | 0xD2 => Self::ResponseUnavailable,
            0xCF => Self::CannotExecuteDuplicateRequest,
            0xD3 => Self::DestinationUnavailable,
            0xD4 => Self::InsufficientPrivilege,
            0xD5 => Self::CannotExecuteCommandInCurrentState,
            0xD6 => Self::SubFunctionDisabled,
            0xFF => Self::Unspecified,
            0x01..=0x7E => Self::Oem(value),
            0x80..=0xBE => Self::CommandSpecific(value),
            v => Self::Reserved(v),
        };

        Ok(value)
    }
}

impl CompletionErrorCode {
    /// Whether this completion code is a reserved value or not.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved(_))
    }
}

/// Raw completion codes that the request tracker treats specially.
pub(crate) mod raw {
    /// Long-duration command accepted and still running.
    pub const IN_PROGRESS: u8 = 0x80;
    /// Invalid data field; BMCs answer this to a retransmission whose
    /// original was already processed.
    pub const INVALID_DATA_FIELD: u8 = 0xCC;
    /// Duplicated request, the original response was already sent.
    pub const DUPLICATE_REQUEST: u8 = 0xCF;
    /// Processing timeout; seen while a controller reboots.
    pub const PROCESSING_TIMEOUT: u8 = 0xC3;
    /// Unspecified error; seen while a controller reboots.
    pub const UNSPECIFIED: u8 = 0xFF;
}

/// Whether `code` indicates that this request was already answered and the
/// real response is still in flight (retransmission collision).
pub(crate) fn is_duplicate_indication(code: u8) -> bool {
    code == raw::INVALID_DATA_FIELD || code == raw::DUPLICATE_REQUEST
}

/// Whether `code` hints that the management controller is temporarily
/// unreachable, e.g. because it is rebooting into new firmware.
pub(crate) fn indicates_inaccessible(code: u8) -> bool {
    code == raw::UNSPECIFIED || code == raw::PROCESSING_TIMEOUT
}

#[test]
fn tracker_codes_roundtrip() {
    assert_eq!(
        CompletionErrorCode::try_from(raw::DUPLICATE_REQUEST),
        Ok(CompletionErrorCode::CannotExecuteDuplicateRequest)
    );
    assert_eq!(
        CompletionErrorCode::try_from(raw::INVALID_DATA_FIELD),
        Ok(CompletionErrorCode::InvalidDataFieldInRequest)
    );
    assert!(is_duplicate_indication(0xCC));
    assert!(is_duplicate_indication(0xCF));
    assert!(!is_duplicate_indication(0x00));
    assert!(indicates_inaccessible(0xFF));
    assert!(indicates_inaccessible(0xC3));
    assert!(!indicates_inaccessible(0xC0));
}
