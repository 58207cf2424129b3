//! Error types for the ranging service core.
//!
//! Wire-level outcomes that have a defined RAS-CP response code travel as
//! [`crate::codec::control_point::RspCode`] itself, the way the NFS layer
//! this crate grew out of threads `nfsstat3` through its handlers instead of
//! `anyhow::Error`. `RasError` is reserved for failures a caller cannot
//! recover from by sending a different wire response: resource exhaustion,
//! buffer misuse, and malformed input.

use std::fmt;

use crate::types::RangingCounter;

/// Errors surfaced by the buffer pool, ingest, and segmentation layers.
#[derive(Debug)]
pub enum RasError {
    /// The pool has no free slot and no evictable victim for a new
    /// `(connection, counter)` key.
    NoFreeBuffer,
    /// An operation that requires a buffer to have been opened for write
    /// (`open_for_write`) was attempted on a key with no such buffer.
    NoActiveBuffer,
    /// A claim was requested for a counter that is not `ready`.
    NotReady(RangingCounter),
    /// A wire frame ended before all declared fields were read.
    Truncated,
    /// An RAS-CP opcode byte did not match any recognised opcode.
    InvalidOpcode(u8),
    /// An RAS-CP response opcode byte did not match `COMPLETE_RD`,
    /// `COMPLETE_LOST_SEG_RSP`, or `RSP_CODE`.
    InvalidResponseOpcode(u8),
    /// A GATT send (notify or indicate) failed at the transport boundary.
    Transport(String),
    /// `RreqCore::get_ranging_data` was called while a GET was already in
    /// progress, or RAS-CP state was not `Idle`.
    GetInProgress,
    /// A receive-side reassembly error (out-of-order segment, gap, overrun,
    /// or overwritten-during-receive); the caller's completion is signalled
    /// exactly once with this error (§7).
    ReceiveFailed,
    /// An operation referenced a connection with no registered context
    /// (never connected, or already disconnected).
    UnknownConnection,
}

impl fmt::Display for RasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasError::NoFreeBuffer => write!(f, "ranging-data buffer pool exhausted"),
            RasError::NoActiveBuffer => write!(f, "no active write buffer for connection"),
            RasError::NotReady(counter) => write!(f, "counter {counter} has no ready buffer"),
            RasError::Truncated => write!(f, "wire frame truncated"),
            RasError::InvalidOpcode(op) => write!(f, "unrecognised RAS-CP opcode 0x{op:02x}"),
            RasError::InvalidResponseOpcode(op) => {
                write!(f, "unrecognised RAS-CP response opcode 0x{op:02x}")
            }
            RasError::Transport(msg) => write!(f, "transport error: {msg}"),
            RasError::GetInProgress => write!(f, "a ranging-data GET is already in progress"),
            RasError::ReceiveFailed => write!(f, "ranging-data receive failed"),
            RasError::UnknownConnection => write!(f, "no registered context for connection"),
        }
    }
}

impl std::error::Error for RasError {}

/// ATT-level application error codes returned synchronously from an
/// attribute write, as opposed to the business-logic outcomes carried on
/// the RAS-CP characteristic itself (see §6 of the design: writes are
/// rejected at the ATT layer only for subscription/pending-handler
/// violations; everything else flows through the deferred command work and
/// comes back as an RAS-CP response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttErrorCode {
    /// Write to RAS-CP attempted without a prior CCCD indicate subscription.
    CccdNotConfigured = 0xFD,
    /// Write to RAS-CP rejected because a command handler is already pending.
    ProcedureAlreadyInProgress = 0xFC,
}

impl fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttErrorCode::CccdNotConfigured => write!(f, "CCCD improperly configured (0xFD)"),
            AttErrorCode::ProcedureAlreadyInProgress => {
                write!(f, "procedure already in progress (0xFC)")
            }
        }
    }
}
