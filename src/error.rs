//! Error taxonomy for the zoned-storage engine.
//!
//! Activation precondition failures are deliberately *not* represented here:
//! per the activation engine's design they are reported inside the results
//! buffer ([`crate::activate::Outcome`]), not as a command failure.

use thiserror::Error;

/// SCSI sense key, carried alongside the ASC/ASCQ pair so the dispatcher can
/// build a CHECK CONDITION response without re-deriving it from the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    IllegalRequest,
    MediumError,
    HardwareError,
    Aborted,
    DataProtect,
}

/// Additional sense code / additional sense code qualifier, packed as one
/// 16-bit value (`(asc << 8) | ascq`), matching the wire layout used by
/// [`crate::report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asc(pub u16);

impl Asc {
    pub const READ_ERROR: Asc = Asc(0x1100);
    pub const WRITE_ERROR: Asc = Asc(0x0C00);
    pub const LBA_OUT_OF_RANGE: Asc = Asc(0x2100);
    pub const PARAMETER_LIST_LENGTH_ERROR: Asc = Asc(0x1A00);
    pub const INVALID_FIELD_IN_CDB: Asc = Asc(0x2400);
    pub const INVALID_FIELD_IN_PARAMETER_LIST: Asc = Asc(0x2600);
    pub const INTERNAL_TARGET_FAILURE: Asc = Asc(0x4400);
    pub const INVALID_COMMAND_OPERATION_CODE: Asc = Asc(0x2000);
    pub const UNALIGNED_WRITE_COMMAND: Asc = Asc(0x2104);
    pub const WRITE_BOUNDARY_VIOLATION: Asc = Asc(0x2105);
    pub const ATTEMPT_TO_READ_INVALID_DATA: Asc = Asc(0x2106);
    pub const READ_BOUNDARY_VIOLATION: Asc = Asc(0x2107);
    pub const INSUFFICIENT_ZONE_RESOURCES: Asc = Asc(0x550E);
    pub const ZONE_IS_OFFLINE: Asc = Asc(0x2C0E);
    pub const ZONE_IS_READ_ONLY: Asc = Asc(0x2708);
    pub const ZONE_RESET_WP_RECOMMENDED: Asc = Asc(0x2A16);
    pub const ZONE_IS_INACTIVE: Asc = Asc(0x2C12);
    pub const ATTEMPT_TO_ACCESS_GAP_ZONE: Asc = Asc(0x2109);
}

/// A fully-formed sense triple, ready for the dispatcher to wire onto a
/// CHECK CONDITION status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sense {
    pub key: SenseKey,
    pub asc: Asc,
}

impl Sense {
    pub const fn new(key: SenseKey, asc: Asc) -> Self {
        Self { key, asc }
    }
}

#[derive(Error, Debug)]
pub enum ZbcError {
    #[error("cfgstring validation failed: {0}")]
    Validation(String),

    #[error("zone protocol violation: {0}")]
    ZoneProtocol(String),

    /// A zone protocol violation with a precomputed sense triple, used by
    /// callers (e.g. the read/write precondition checks) that already know
    /// exactly which sense key/ASC applies instead of leaving it to
    /// [`ZbcError::sense`]'s generic fallback.
    #[error("zone protocol violation: {message}")]
    ZoneProtocolSense { message: String, sense: Sense },

    #[error("backing store I/O error: {0}")]
    BackingIo(#[from] std::io::Error),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl ZbcError {
    /// Best-effort mapping to a sense triple for the dispatcher. Variants
    /// that never reach the command surface directly (e.g. a validation
    /// error raised only at format time) still get a reasonable mapping so
    /// callers don't need a second switch.
    pub fn sense(&self) -> Sense {
        match self {
            ZbcError::Validation(_) => {
                Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_PARAMETER_LIST)
            }
            ZbcError::ZoneProtocol(_) => {
                Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB)
            }
            ZbcError::ZoneProtocolSense { sense, .. } => *sense,
            ZbcError::BackingIo(_) => {
                Sense::new(SenseKey::MediumError, Asc::WRITE_ERROR)
            }
            ZbcError::Internal(_) => {
                Sense::new(SenseKey::HardwareError, Asc::INTERNAL_TARGET_FAILURE)
            }
        }
    }
}

pub type ZbcResult<T> = Result<T, ZbcError>;
