//! RAS-CP command and response frames (§4.1).
//!
//! A command frame is a 1-byte opcode followed by up to 4 bytes of
//! parameters. A response frame is a 1-byte response opcode followed by its
//! own parameters. Only `GET_RD` and `ACK_RD` are implemented; the other
//! recognised opcodes are decoded (so the core can tell "not supported"
//! apart from "garbage") but always rejected with `OPCODE_NOT_SUPPORTED`.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

use crate::types::RangingCounter;

const OPCODE_GET_RD: u8 = 0x00;
const OPCODE_ACK_RD: u8 = 0x01;
const OPCODE_RETRIEVE_LOST: u8 = 0x02;
const OPCODE_ABORT: u8 = 0x03;
const OPCODE_SET_FILTER: u8 = 0x04;

const RESPONSE_COMPLETE_RD: u8 = 0x00;
const RESPONSE_COMPLETE_LOST_SEG_RSP: u8 = 0x01;
const RESPONSE_RSP_CODE: u8 = 0x02;

/// A decoded RAS-CP command write. `RetrieveLost`/`Abort`/`SetFilter` are
/// recognised opcodes the core always rejects with `OPCODE_NOT_SUPPORTED`;
/// `Unknown` is any other byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpCommand {
    GetRd(RangingCounter),
    AckRd(RangingCounter),
    RetrieveLost,
    Abort,
    SetFilter,
    Unknown(u8),
}

/// Response codes carried in a `RSP_CODE` response frame (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum RspCode {
    Success = 0x01,
    OpcodeNotSupported = 0x02,
    InvalidParameter = 0x03,
    ProcedureNotCompleted = 0x06,
    ServerBusy = 0x07,
    NoRecordsFound = 0x08,
}

impl RspCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        FromPrimitive::from_u8(b)
    }
}

/// A RAS-CP response frame, sent by the server and received by the client
/// as an indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpResponse {
    CompleteRd(RangingCounter),
    CompleteLostSegRsp,
    Code(RspCode),
}

impl CpCommand {
    /// Maximum RAS-CP write length (opcode + 4 bytes of parameters).
    pub const MAX_WRITE_LEN: usize = 5;

    /// Decodes a RAS-CP command write. Fails only when the frame is empty
    /// or a recognised-length opcode (`GET_RD`/`ACK_RD`) carries the wrong
    /// parameter length; every other opcode byte decodes successfully so
    /// the caller can distinguish "not supported" from "malformed".
    pub fn decode(data: &[u8]) -> Result<CpCommand, RspCode> {
        let (&opcode, params) = data.split_first().ok_or(RspCode::InvalidParameter)?;
        match opcode {
            OPCODE_GET_RD => Ok(CpCommand::GetRd(decode_counter_param(params)?)),
            OPCODE_ACK_RD => Ok(CpCommand::AckRd(decode_counter_param(params)?)),
            OPCODE_RETRIEVE_LOST => Ok(CpCommand::RetrieveLost),
            OPCODE_ABORT => Ok(CpCommand::Abort),
            OPCODE_SET_FILTER => Ok(CpCommand::SetFilter),
            other => Ok(CpCommand::Unknown(other)),
        }
    }

    pub fn encode(self) -> Vec<u8> {
        match self {
            CpCommand::GetRd(c) => encode_opcode_and_counter(OPCODE_GET_RD, c),
            CpCommand::AckRd(c) => encode_opcode_and_counter(OPCODE_ACK_RD, c),
            CpCommand::RetrieveLost => vec![OPCODE_RETRIEVE_LOST],
            CpCommand::Abort => vec![OPCODE_ABORT],
            CpCommand::SetFilter => vec![OPCODE_SET_FILTER],
            CpCommand::Unknown(op) => vec![op],
        }
    }
}

fn decode_counter_param(params: &[u8]) -> Result<RangingCounter, RspCode> {
    if params.len() != 2 {
        return Err(RspCode::InvalidParameter);
    }
    Ok(RangingCounter::new(u16::from_le_bytes([params[0], params[1]])))
}

fn encode_opcode_and_counter(opcode: u8, counter: RangingCounter) -> Vec<u8> {
    let bytes = counter.get().to_le_bytes();
    vec![opcode, bytes[0], bytes[1]]
}

impl CpResponse {
    pub fn encode(self) -> Vec<u8> {
        match self {
            CpResponse::CompleteRd(counter) => {
                let bytes = counter.get().to_le_bytes();
                vec![RESPONSE_COMPLETE_RD, bytes[0], bytes[1]]
            }
            CpResponse::CompleteLostSegRsp => vec![RESPONSE_COMPLETE_LOST_SEG_RSP],
            CpResponse::Code(code) => vec![RESPONSE_RSP_CODE, code as u8],
        }
    }

    pub fn decode(data: &[u8]) -> Result<CpResponse, crate::error::RasError> {
        use crate::error::RasError;
        let (&opcode, params) = data.split_first().ok_or(RasError::Truncated)?;
        match opcode {
            RESPONSE_COMPLETE_RD => {
                if params.len() != 2 {
                    return Err(RasError::Truncated);
                }
                Ok(CpResponse::CompleteRd(RangingCounter::new(u16::from_le_bytes([
                    params[0], params[1],
                ]))))
            }
            RESPONSE_COMPLETE_LOST_SEG_RSP => Ok(CpResponse::CompleteLostSegRsp),
            RESPONSE_RSP_CODE => {
                let code = *params.first().ok_or(RasError::Truncated)?;
                RspCode::from_byte(code)
                    .map(CpResponse::Code)
                    .ok_or(RasError::InvalidResponseOpcode(code))
            }
            other => Err(RasError::InvalidResponseOpcode(other)),
        }
    }
}
