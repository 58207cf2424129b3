//! `RreqCore`: the per-connection client FSM — segment reassembly and the
//! RAS-CP write/indicate handshake (§4.5).

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{instrument, warn};

use crate::codec::{CpCommand, CpResponse, RspCode, SegmentHeader};
use crate::error::RasError;
use crate::gatt::GattTransport;
use crate::types::{ConnectionId, RangingCounter, RasCharacteristic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpState {
    Idle,
    GetRdWritten,
    AckRdWritten,
}

/// Result delivered to the caller of [`RreqCore::get_ranging_data`]: the
/// reassembled flat image on success, or `Err` on any reassembly or
/// protocol failure. Delivered exactly once per GET (§7).
pub type GetResult = Result<Vec<u8>, RasError>;

pub struct RreqCore {
    conn: ConnectionId,
    transport: Arc<dyn GattTransport>,
    cp_state: CpState,
    counter_in_progress: Option<RangingCounter>,
    next_expected_segment_counter: u8,
    last_segment_received: bool,
    error_flag: bool,
    output: Vec<u8>,
    max_output_len: usize,
    completion: Option<oneshot::Sender<GetResult>>,
}

impl RreqCore {
    pub fn new(conn: ConnectionId, transport: Arc<dyn GattTransport>) -> Self {
        RreqCore {
            conn,
            transport,
            cp_state: CpState::Idle,
            counter_in_progress: None,
            next_expected_segment_counter: 0,
            last_segment_received: false,
            error_flag: false,
            output: Vec::new(),
            max_output_len: 0,
            completion: None,
        }
    }

    /// Starts a GET for `counter`, writing `GET_RD` to the peer. Fails
    /// synchronously if a GET is already in progress or RAS-CP isn't idle.
    #[instrument(skip(self), fields(conn = %self.conn))]
    pub async fn get_ranging_data(
        &mut self,
        counter: RangingCounter,
        max_output_len: usize,
    ) -> Result<oneshot::Receiver<GetResult>, RasError> {
        if self.counter_in_progress.is_some() || self.cp_state != CpState::Idle {
            return Err(RasError::GetInProgress);
        }

        self.counter_in_progress = Some(counter);
        self.next_expected_segment_counter = 0;
        self.last_segment_received = false;
        self.error_flag = false;
        self.output.clear();
        self.max_output_len = max_output_len;
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);

        let bytes = CpCommand::GetRd(counter).encode();
        if let Err(e) = self
            .transport
            .write_without_response(self.conn, RasCharacteristic::RasControlPoint, bytes)
            .await
        {
            self.counter_in_progress = None;
            self.completion = None;
            return Err(e);
        }

        self.cp_state = CpState::GetRdWritten;
        Ok(rx)
    }

    /// Handles one On-demand RD notification/indication payload (§4.5).
    pub fn on_segment(&mut self, data: &[u8]) {
        if self.counter_in_progress.is_none() {
            return;
        }
        if data.len() < 2 {
            self.error_flag = true;
            return;
        }
        if self.last_segment_received || self.error_flag {
            return;
        }

        let mut cursor = data;
        let header = match SegmentHeader::decode(&mut cursor) {
            Ok(h) => h,
            Err(_) => {
                self.error_flag = true;
                return;
            }
        };
        let payload = cursor;

        if header.first_seg {
            if header.seg_counter != 0 {
                self.error_flag = true;
                return;
            }
        } else if header.seg_counter != self.next_expected_segment_counter {
            self.error_flag = true;
            return;
        }

        if self.output.len() + payload.len() > self.max_output_len {
            self.error_flag = true;
            return;
        }

        self.output.extend_from_slice(payload);
        if header.last_seg {
            self.last_segment_received = true;
        }
        self.next_expected_segment_counter =
            (header.seg_counter + 1) % SegmentHeader::COUNTER_MODULUS;
    }

    /// Handles a RAS-CP indication from the server (§4.5).
    pub async fn on_control_point_indication(&mut self, data: &[u8]) {
        let resp = match CpResponse::decode(data) {
            Ok(r) => r,
            Err(e) => {
                warn!(conn = %self.conn, error = %e, "malformed RAS-CP indication");
                return;
            }
        };

        match resp {
            CpResponse::CompleteRd(counter) => self.handle_complete_rd(counter).await,
            CpResponse::Code(code) => self.handle_rsp_code(code).await,
            CpResponse::CompleteLostSegRsp => {}
        }
    }

    async fn handle_complete_rd(&mut self, counter: RangingCounter) {
        if self.counter_in_progress != Some(counter) {
            warn!(conn = %self.conn, "COMPLETE_RD counter mismatch, ignoring");
            return;
        }

        let bytes = CpCommand::AckRd(counter).encode();
        if let Err(e) = self
            .transport
            .write_without_response(self.conn, RasCharacteristic::RasControlPoint, bytes)
            .await
        {
            warn!(conn = %self.conn, error = %e, "ACK_RD write failed");
            self.finalize_with_error();
            return;
        }
        self.cp_state = CpState::AckRdWritten;
    }

    async fn handle_rsp_code(&mut self, code: RspCode) {
        match self.cp_state {
            CpState::Idle => {
                if self.counter_in_progress.is_some() && code == RspCode::ProcedureNotCompleted {
                    self.finalize_with_error();
                }
            }
            CpState::GetRdWritten => {
                if code != RspCode::Success {
                    self.finalize_with_error();
                } else {
                    self.cp_state = CpState::Idle;
                }
            }
            CpState::AckRdWritten => {
                self.cp_state = CpState::Idle;
                self.finalize();
            }
        }
    }

    /// Handles an RD-Overwritten notification for `counter` (§4.5).
    pub fn on_overwritten(&mut self, counter: RangingCounter) {
        if self.counter_in_progress == Some(counter) && self.cp_state == CpState::Idle {
            self.finalize_with_error();
        }
        // Otherwise a RAS-CP write is outstanding; hold until the
        // RSP_CODE/COMPLETE_RD handshake decides the outcome.
    }

    fn finalize(&mut self) {
        let result = if !self.error_flag && self.last_segment_received {
            Ok(std::mem::take(&mut self.output))
        } else {
            Err(RasError::ReceiveFailed)
        };
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
        self.counter_in_progress = None;
    }

    fn finalize_with_error(&mut self) {
        self.error_flag = true;
        self.finalize();
    }
}
