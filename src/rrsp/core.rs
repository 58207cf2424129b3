//! `RrspCore`: the per-connection server FSM, command dispatch, and
//! segmented streamer (§4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::codec::{CpCommand, CpResponse, RspCode, SegmentHeader};
use crate::config::RasConfig;
use crate::error::RasError;
use crate::gatt::GattTransport;
use crate::pool::{PoolEvent, RdBufferPool};
use crate::types::{BufferKey, ConnectionId, RangingCounter, RasCharacteristic};

use super::work::RrspWork;

/// ATT overhead (4 bytes) plus the one-byte segment header subtracted from
/// MTU to get the data payload budget for one segment.
const SEGMENT_FRAME_OVERHEAD: u16 = 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RrspFsm {
    Idle,
    Streaming { buf: BufferKey, seg_counter: u8 },
    AwaitingAck { buf: BufferKey },
}

pub struct RrspCore {
    conn: ConnectionId,
    pool: Arc<RdBufferPool>,
    transport: Arc<dyn GattTransport>,
    ack_timeout: Duration,
    fsm: RrspFsm,
    pending_ready: Option<RangingCounter>,
    pending_overwritten: Option<RangingCounter>,
    ack_deadline: Option<Instant>,
    /// Handle back onto this connection's own work queue, used to
    /// reschedule the streamer after a rewind-and-retry (§4.4 step 4).
    self_tx: mpsc::UnboundedSender<RrspWork>,
    /// Shared with [`super::context::RrspContext::on_control_point_write`]:
    /// cleared as soon as a command's first response has been sent, which
    /// is well before a `GET_RD`'s streaming session finishes (§4.4 point 2
    /// guards "a handler already pending", not "still streaming" — the
    /// latter is the FSM's own `Streaming` -> `SERVER_BUSY` check).
    command_pending: Arc<AtomicBool>,
}

impl RrspCore {
    pub fn new(
        conn: ConnectionId,
        pool: Arc<RdBufferPool>,
        transport: Arc<dyn GattTransport>,
        config: &RasConfig,
        self_tx: mpsc::UnboundedSender<RrspWork>,
        command_pending: Arc<AtomicBool>,
    ) -> Self {
        RrspCore {
            conn,
            pool,
            transport,
            ack_timeout: config.ras_cp_ack_timeout(),
            fsm: RrspFsm::Idle,
            pending_ready: None,
            pending_overwritten: None,
            ack_deadline: None,
            self_tx,
            command_pending,
        }
    }

    /// Deadline for the `AwaitingAck` timer, if one is currently running.
    /// Polled by [`super::context::RrspContext`]'s select loop to drive the
    /// 10-second ack-timeout branch.
    pub fn ack_deadline(&self) -> Option<Instant> {
        match self.fsm {
            RrspFsm::AwaitingAck { .. } => self.ack_deadline,
            _ => None,
        }
    }

    pub async fn handle_work(&mut self, work: RrspWork) {
        match work {
            RrspWork::Command(bytes) => self.handle_command_write(bytes).await,
            RrspWork::Pool(event) => self.handle_pool_event(event).await,
            RrspWork::RetryStreamer => self.run_streamer().await,
            RrspWork::AckTimeout => self.on_ack_timeout().await,
        }
    }

    /// Clears the ATT-level "handler pending" guard. Called exactly once
    /// per command write, as soon as that command's first response has
    /// gone out — which for a successful `GET_RD` is well before the
    /// streaming session it kicks off has finished.
    fn clear_pending(&self) {
        self.command_pending.store(false, Ordering::Release);
    }

    async fn handle_command_write(&mut self, bytes: Vec<u8>) {
        match CpCommand::decode(&bytes) {
            Ok(cmd) => self.dispatch(cmd).await,
            Err(code) => {
                self.send_response(CpResponse::Code(code)).await;
                self.clear_pending();
            }
        }
    }

    async fn dispatch(&mut self, cmd: CpCommand) {
        if matches!(self.fsm, RrspFsm::Streaming { .. }) {
            self.send_response(CpResponse::Code(RspCode::ServerBusy)).await;
            self.clear_pending();
            return;
        }

        match cmd {
            CpCommand::GetRd(counter) => self.handle_get_rd(counter).await,
            CpCommand::AckRd(counter) => self.handle_ack_rd(counter).await,
            CpCommand::RetrieveLost | CpCommand::Abort | CpCommand::SetFilter | CpCommand::Unknown(_) => {
                self.send_response(CpResponse::Code(RspCode::OpcodeNotSupported)).await;
                self.clear_pending();
            }
        }
    }

    #[instrument(skip(self), fields(conn = %self.conn))]
    async fn handle_get_rd(&mut self, counter: RangingCounter) {
        if !matches!(self.fsm, RrspFsm::Idle) {
            self.send_response(CpResponse::Code(RspCode::ServerBusy)).await;
            self.clear_pending();
            return;
        }

        let key = BufferKey::new(self.conn, counter);
        if !self.pool.ready_check(key) {
            self.send_response(CpResponse::Code(RspCode::NoRecordsFound)).await;
            self.clear_pending();
            return;
        }

        if self.pool.claim(key).is_err() {
            self.send_response(CpResponse::Code(RspCode::NoRecordsFound)).await;
            self.clear_pending();
            return;
        }

        self.send_response(CpResponse::Code(RspCode::Success)).await;
        self.fsm = RrspFsm::Streaming { buf: key, seg_counter: 0 };
        self.clear_pending();
        self.run_streamer().await;
    }

    #[instrument(skip(self), fields(conn = %self.conn))]
    async fn handle_ack_rd(&mut self, counter: RangingCounter) {
        let active = match self.fsm {
            RrspFsm::AwaitingAck { buf } if buf.counter == counter => buf,
            _ => {
                self.send_response(CpResponse::Code(RspCode::NoRecordsFound)).await;
                self.clear_pending();
                return;
            }
        };

        self.pool.mark_acked(active);
        self.pool.release(active);
        self.fsm = RrspFsm::Idle;
        self.send_response(CpResponse::Code(RspCode::Success)).await;
        self.clear_pending();
    }

    /// Pulls and sends segments until the buffer is exhausted (then emits
    /// `COMPLETE_RD` and enters `AwaitingAck`) or a send fails (then rewinds
    /// and reschedules itself, per the "no busy-waiting" rule in §5).
    async fn run_streamer(&mut self) {
        let (buf, mut seg_counter) = match self.fsm {
            RrspFsm::Streaming { buf, seg_counter } => (buf, seg_counter),
            _ => return,
        };

        loop {
            let mtu = self.transport.get_mtu(self.conn);
            let max_data_len = mtu.saturating_sub(SEGMENT_FRAME_OVERHEAD).max(1) as usize;
            // `first_seg` marks the start of the read pass, not `seg_counter
            // == 0` — the latter recurs every 64 segments once the rolling
            // counter wraps, well before the read cursor itself loops back.
            let first_seg = self.pool.read_position(buf) == 0;

            let mut data = vec![0u8; max_data_len];
            let n = self.pool.pull(buf, &mut data);
            data.truncate(n);
            let last_seg = n < max_data_len;

            let header = SegmentHeader { first_seg, last_seg, seg_counter };
            let mut frame = Vec::with_capacity(SegmentHeader::WIRE_SIZE + data.len());
            header.encode(&mut frame).expect("encoding into a Vec<u8> cannot fail");
            frame.extend_from_slice(&data);

            let sent = self.send_segment(frame).await;
            match sent {
                Ok(()) => {
                    seg_counter = seg_counter.wrapping_add(1) % SegmentHeader::COUNTER_MODULUS;
                }
                Err(e) => {
                    warn!(conn = %self.conn, error = %e, "segment send failed, rewinding for retry");
                    self.pool.rewind(buf, n);
                    self.fsm = RrspFsm::Streaming { buf, seg_counter };
                    let _ = self.self_tx.send(RrspWork::RetryStreamer);
                    return;
                }
            }

            if last_seg {
                trace!(conn = %self.conn, counter = %buf.counter, "streaming complete, awaiting ack");
                self.fsm = RrspFsm::AwaitingAck { buf };
                self.ack_deadline = Some(Instant::now() + self.ack_timeout);
                self.send_response(CpResponse::CompleteRd(buf.counter)).await;
                return;
            }

            self.fsm = RrspFsm::Streaming { buf, seg_counter };
        }
    }

    async fn send_segment(&self, frame: Vec<u8>) -> Result<(), RasError> {
        let subs = self.transport.subscribed(self.conn, RasCharacteristic::OnDemandRd);
        if subs.notify() {
            self.transport.notify(self.conn, RasCharacteristic::OnDemandRd, frame).await
        } else if subs.indicate() {
            self.transport.indicate(self.conn, RasCharacteristic::OnDemandRd, frame).await
        } else {
            Err(RasError::Transport("peer not subscribed to On-demand RD".into()))
        }
    }

    async fn send_response(&self, resp: CpResponse) {
        if let Err(e) = self.transport.indicate(self.conn, RasCharacteristic::RasControlPoint, resp.encode()).await {
            warn!(conn = %self.conn, error = %e, "RAS-CP response indicate failed");
        }
    }

    async fn on_ack_timeout(&mut self) {
        if let RrspFsm::AwaitingAck { buf } = self.fsm {
            debug!(conn = %self.conn, counter = %buf.counter, "ack timeout, abandoning session");
            self.pool.release(buf);
            self.fsm = RrspFsm::Idle;
            self.ack_deadline = None;
        }
    }

    async fn handle_pool_event(&mut self, event: PoolEvent) {
        let (counter, kind) = match event {
            PoolEvent::Ready { conn, counter } if conn == self.conn => (counter, StatusKind::Ready),
            PoolEvent::Overwritten { conn, counter } if conn == self.conn => (counter, StatusKind::Overwritten),
            _ => return,
        };

        match kind {
            StatusKind::Ready => self.pending_ready = Some(counter),
            StatusKind::Overwritten => self.pending_overwritten = Some(counter),
        }

        self.flush_pending_status().await;
    }

    async fn flush_pending_status(&mut self) {
        if let Some(counter) = self.pending_ready.take() {
            self.send_status(RasCharacteristic::RdReady, counter).await;
        }
        if let Some(counter) = self.pending_overwritten.take() {
            self.send_status(RasCharacteristic::RdOverwritten, counter).await;
        }
    }

    async fn send_status(&self, characteristic: RasCharacteristic, counter: RangingCounter) {
        let payload = counter.get().to_le_bytes().to_vec();
        let subs = self.transport.subscribed(self.conn, characteristic);
        let result = if subs.notify() {
            self.transport.notify(self.conn, characteristic, payload).await
        } else if subs.indicate() {
            self.transport.indicate(self.conn, characteristic, payload).await
        } else {
            return;
        };
        if let Err(e) = result {
            warn!(conn = %self.conn, error = %e, "status notification failed");
        }
    }
}

enum StatusKind {
    Ready,
    Overwritten,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RangingHeader;
    use crate::config::RasConfig;
    use crate::pool::RdBufferPool;
    use crate::types::SubscriptionKind;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct NullTransport {
        indicated: StdMutex<Vec<(RasCharacteristic, Vec<u8>)>>,
        notified: StdMutex<Vec<(RasCharacteristic, Vec<u8>)>>,
    }

    #[async_trait]
    impl GattTransport for NullTransport {
        async fn notify(&self, _: ConnectionId, c: RasCharacteristic, d: Vec<u8>) -> Result<(), RasError> {
            self.notified.lock().unwrap().push((c, d));
            Ok(())
        }
        async fn indicate(&self, _: ConnectionId, c: RasCharacteristic, d: Vec<u8>) -> Result<(), RasError> {
            self.indicated.lock().unwrap().push((c, d));
            Ok(())
        }
        fn subscribed(&self, _: ConnectionId, _: RasCharacteristic) -> SubscriptionKind {
            SubscriptionKind::Both
        }
        fn get_mtu(&self, _: ConnectionId) -> u16 {
            247
        }
        async fn write_without_response(&self, _: ConnectionId, _: RasCharacteristic, _: Vec<u8>) -> Result<(), RasError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ack_timeout_releases_claim_and_returns_to_idle() {
        let config = RasConfig::default();
        let pool = Arc::new(RdBufferPool::new(&config));
        let conn = ConnectionId(1);
        let counter = RangingCounter::new(1);

        let key = pool.open_for_write(conn, counter).unwrap();
        pool.append_subevent(key, &[0u8; 4]).unwrap();
        pool.mark_ready(key);

        let transport: Arc<dyn GattTransport> = Arc::new(NullTransport { indicated: StdMutex::new(Vec::new()), notified: StdMutex::new(Vec::new()) });
        let (self_tx, _self_rx) = mpsc::unbounded_channel();
        let command_pending = Arc::new(AtomicBool::new(false));
        let mut core = RrspCore::new(conn, pool.clone(), transport, &config, self_tx, command_pending);

        core.handle_work(RrspWork::Command(CpCommand::GetRd(counter).encode())).await;
        assert!(matches!(core.fsm, RrspFsm::AwaitingAck { .. }));
        assert!(core.ack_deadline().is_some());

        core.handle_work(RrspWork::AckTimeout).await;

        assert!(matches!(core.fsm, RrspFsm::Idle));
        assert!(core.ack_deadline().is_none());
        // The abandoned claim is released: a fresh claim on the same key succeeds.
        assert!(pool.claim(key).is_ok());
    }

    #[tokio::test]
    async fn reclaim_after_ack_timeout_restreams_the_full_procedure() {
        let config = RasConfig::default();
        let pool = Arc::new(RdBufferPool::new(&config));
        let conn = ConnectionId(1);
        let counter = RangingCounter::new(1);

        let key = pool.open_for_write(conn, counter).unwrap();
        pool.append_subevent(key, &[1, 2, 3, 4]).unwrap();
        pool.mark_ready(key);

        let transport =
            Arc::new(NullTransport { indicated: StdMutex::new(Vec::new()), notified: StdMutex::new(Vec::new()) });
        let (self_tx, _self_rx) = mpsc::unbounded_channel();
        let command_pending = Arc::new(AtomicBool::new(false));
        let mut core = RrspCore::new(conn, pool.clone(), transport.clone(), &config, self_tx, command_pending);

        // First session streams to completion and is then abandoned by timeout,
        // leaving the buffer claimable but with its read cursor at `flat_len`.
        core.handle_work(RrspWork::Command(CpCommand::GetRd(counter).encode())).await;
        assert!(matches!(core.fsm, RrspFsm::AwaitingAck { .. }));
        core.handle_work(RrspWork::AckTimeout).await;
        assert!(matches!(core.fsm, RrspFsm::Idle));

        transport.notified.lock().unwrap().clear();

        // A second GET_RD for the same counter must re-stream the whole
        // image, not an immediate empty `first_seg && last_seg` segment.
        core.handle_work(RrspWork::Command(CpCommand::GetRd(counter).encode())).await;
        assert!(matches!(core.fsm, RrspFsm::AwaitingAck { .. }));

        let second_session = transport.notified.lock().unwrap().clone();
        assert!(!second_session.is_empty());
        let total_bytes: usize =
            second_session.iter().map(|(_, frame)| frame.len() - SegmentHeader::WIRE_SIZE).sum();
        assert_eq!(total_bytes, RangingHeader::WIRE_SIZE + 4);
        let first_byte = second_session[0].1[0];
        assert!(first_byte & 0b01 != 0, "re-streamed session's first segment must have first_seg set");
    }

    #[tokio::test]
    async fn server_busy_while_streaming_rejects_a_second_get_rd() {
        let config = RasConfig::default().with_buffers_per_connection(2);
        let pool = Arc::new(RdBufferPool::new(&config));
        let conn = ConnectionId(1);
        let counter = RangingCounter::new(1);

        let key = pool.open_for_write(conn, counter).unwrap();
        pool.append_subevent(key, &[0u8; 4]).unwrap();
        pool.mark_ready(key);

        let transport: Arc<dyn GattTransport> = Arc::new(NullTransport { indicated: StdMutex::new(Vec::new()), notified: StdMutex::new(Vec::new()) });
        let (self_tx, _self_rx) = mpsc::unbounded_channel();
        let command_pending = Arc::new(AtomicBool::new(false));
        let mut core = RrspCore::new(conn, pool.clone(), transport, &config, self_tx, command_pending);

        // Force the FSM into `Streaming` directly, as if the first segment of
        // a larger procedure were still in flight.
        core.fsm = RrspFsm::Streaming { buf: key, seg_counter: 1 };

        core.handle_work(RrspWork::Command(CpCommand::GetRd(RangingCounter::new(2)).encode())).await;

        assert!(matches!(core.fsm, RrspFsm::Streaming { .. }));
    }
}
