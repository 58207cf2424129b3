//! `ProducerIngest`: turns CS subevent results from the local controller
//! into appended `SubeventHeader` + step records in the buffer pool (§4.3).
//!
//! Ingest never blocks and never allocates beyond the pool's own storage;
//! resource exhaustion (no free buffer, or a procedure that would overrun
//! the worst-case storage bound) is logged and the procedure is dropped —
//! it is never surfaced as a connection-fatal error.

use std::sync::Arc;

use tracing::{error, trace};

use crate::codec::{DoneStatus, RangingHeader, SubeventHeader};
use crate::config::RasConfig;
use crate::pool::RdBufferPool;
use crate::types::{BufferKey, ConnectionId, RangingCounter};

/// Completion state of the procedure this subevent belongs to, as reported
/// by the controller alongside the subevent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureDoneStatus {
    Ongoing,
    Complete,
    Aborted,
}

/// One subevent result delivered by the controller for a CS procedure.
#[derive(Debug, Clone)]
pub struct SubeventResult {
    pub procedure_counter: RangingCounter,
    pub config_id: u8,
    pub start_acl_conn_event: u16,
    pub freq_compensation: i16,
    pub ranging_done_status: DoneStatus,
    pub subevent_done_status: DoneStatus,
    pub ranging_abort_reason: u8,
    pub subevent_abort_reason: u8,
    pub ref_power_level: i8,
    pub num_steps_reported: u8,
    /// Step-mode column, one byte per reported step.
    pub step_mode: Vec<u8>,
    /// Step-data bytes, as yielded by the controller's step parser.
    pub step_data: Vec<u8>,
    /// Per-step channel, silently dropped from the wire image (§9 Open
    /// Questions; kept here only so callers/tests can assert it was seen).
    pub step_channel: Vec<u8>,
    pub procedure_done_status: ProcedureDoneStatus,
}

pub struct ProducerIngest {
    pool: Arc<RdBufferPool>,
    tx_power_dbm: i8,
    antenna_paths_mask: u8,
}

impl ProducerIngest {
    pub fn new(pool: Arc<RdBufferPool>, config: &RasConfig) -> Self {
        ProducerIngest {
            pool,
            tx_power_dbm: config.tx_power_dbm(),
            antenna_paths_mask: config.antenna_paths_mask(),
        }
    }

    /// Appends one controller subevent result to the buffer for its
    /// `(conn, procedure_counter)`, initialising the buffer on the first
    /// subevent and finalising it when the procedure is done or aborted.
    pub fn on_subevent(&self, conn: ConnectionId, result: &SubeventResult) {
        let key = match self.pool.open_for_write(conn, result.procedure_counter) {
            Ok(key) => key,
            Err(e) => {
                error!(%conn, counter = %result.procedure_counter, error = %e, "dropping subevent, no buffer available");
                return;
            }
        };

        self.pool.set_header_once(
            key,
            RangingHeader {
                ranging_counter: result.procedure_counter,
                config_id: result.config_id,
                selected_tx_power: self.tx_power_dbm,
                antenna_paths_mask: self.antenna_paths_mask,
            },
        );

        if let Err(e) = self.append_subevent_bytes(key, result) {
            error!(%conn, counter = %result.procedure_counter, error = %e, "dropping procedure, storage exhausted");
            self.pool.discard(key);
            return;
        }

        match result.procedure_done_status {
            ProcedureDoneStatus::Complete => {
                trace!(%conn, counter = %result.procedure_counter, "procedure complete, marking ready");
                self.pool.mark_ready(key);
            }
            ProcedureDoneStatus::Aborted => {
                trace!(%conn, counter = %result.procedure_counter, "procedure aborted, discarding");
                self.pool.discard(key);
            }
            ProcedureDoneStatus::Ongoing => {}
        }
    }

    fn append_subevent_bytes(
        &self,
        key: BufferKey,
        result: &SubeventResult,
    ) -> Result<(), crate::error::RasError> {
        let header = SubeventHeader {
            start_acl_conn_event: result.start_acl_conn_event,
            freq_compensation: result.freq_compensation,
            ranging_done_status: result.ranging_done_status,
            subevent_done_status: result.subevent_done_status,
            ranging_abort_reason: result.ranging_abort_reason,
            subevent_abort_reason: result.subevent_abort_reason,
            ref_power_level: result.ref_power_level,
            num_steps_reported: result.num_steps_reported,
        };

        let mut bytes =
            Vec::with_capacity(SubeventHeader::WIRE_SIZE + result.step_mode.len() + result.step_data.len());
        header.encode(&mut bytes).expect("encoding into a Vec<u8> cannot fail");
        bytes.extend_from_slice(&result.step_mode);
        bytes.extend_from_slice(&result.step_data);

        self.pool.append_subevent(key, &bytes)
    }
}
