//! `RrspContext`: the per-connection handle the service layer and the GATT
//! callbacks hold. Owns the spawned work-queue task and the synchronous,
//! fast-path checks that must run inline in the attribute-write callback
//! (§4.4 points 1-2) before anything is deferred.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{trace, Instrument};

use crate::config::RasConfig;
use crate::error::AttErrorCode;
use crate::gatt::GattTransport;
use crate::pool::{PoolEvent, RdBufferPool};
use crate::types::{ConnectionId, RasCharacteristic};

use super::core::RrspCore;
use super::work::RrspWork;

pub struct RrspContext {
    work_tx: mpsc::UnboundedSender<RrspWork>,
    command_pending: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl RrspContext {
    /// Spawns the dedicated work-queue task for this connection and
    /// registers it with the pool's ready/overwritten callback list.
    pub fn spawn(
        conn: ConnectionId,
        pool: Arc<RdBufferPool>,
        transport: Arc<dyn GattTransport>,
        config: &RasConfig,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();
        pool.register_cb(conn, pool_tx);

        let command_pending = Arc::new(AtomicBool::new(false));
        let mut core = RrspCore::new(conn, pool, transport, config, work_tx.clone(), command_pending.clone());

        let span = tracing::debug_span!("rrsp", %conn);
        let handle = tokio::spawn(
            async move {
                run(conn, &mut core, work_rx, pool_rx).await;
            }
            .instrument(span),
        );

        RrspContext { work_tx, command_pending, handle }
    }

    /// Cancels this connection's work-queue task and deregisters its pool
    /// callback (§5 "disconnect cancels all per-connection work items and
    /// timers"). Called once, from `RasServer::on_disconnected`. The task's
    /// own `self_tx` clone inside `RrspCore` would otherwise keep
    /// `work_rx.recv()` from ever returning `None`, leaking the task for the
    /// life of the process.
    pub fn shutdown(&self, pool: &RdBufferPool, conn: ConnectionId) {
        self.handle.abort();
        pool.unregister_cb(conn);
    }

    /// The GATT attribute-write entrypoint for the RAS-CP characteristic.
    /// Validates the subscription and pending-handler preconditions inline
    /// and returns an ATT error synchronously on either failure; otherwise
    /// copies the payload and schedules the deferred command work — this
    /// call never runs the command itself (§4.4 point 3, §5).
    pub fn on_control_point_write(
        &self,
        transport: &dyn GattTransport,
        conn: ConnectionId,
        data: &[u8],
    ) -> Result<(), AttErrorCode> {
        if !transport.subscribed(conn, RasCharacteristic::RasControlPoint).indicate() {
            return Err(AttErrorCode::CccdNotConfigured);
        }
        if self.command_pending.swap(true, Ordering::AcqRel) {
            return Err(AttErrorCode::ProcedureAlreadyInProgress);
        }
        // The receiver side of this channel only closes when the context
        // task has exited (e.g. on disconnect); a send error there is a
        // harmless race with teardown, not a bug to propagate.
        let _ = self.work_tx.send(RrspWork::Command(data.to_vec()));
        Ok(())
    }
}

async fn run(
    conn: ConnectionId,
    core: &mut RrspCore,
    mut work_rx: mpsc::UnboundedReceiver<RrspWork>,
    mut pool_rx: mpsc::UnboundedReceiver<PoolEvent>,
) {
    loop {
        let deadline = core.ack_deadline();
        tokio::select! {
            work = work_rx.recv() => {
                match work {
                    Some(w) => core.handle_work(w).await,
                    None => break,
                }
            }
            Some(event) = pool_rx.recv() => {
                core.handle_work(RrspWork::Pool(event)).await;
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                core.handle_work(RrspWork::AckTimeout).await;
            }
        }
    }
    trace!(%conn, "rrsp context task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RasError;
    use crate::types::SubscriptionKind;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullTransport;

    #[async_trait]
    impl GattTransport for NullTransport {
        async fn notify(&self, _: ConnectionId, _: RasCharacteristic, _: Vec<u8>) -> Result<(), RasError> {
            Ok(())
        }
        async fn indicate(&self, _: ConnectionId, _: RasCharacteristic, _: Vec<u8>) -> Result<(), RasError> {
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
    async fn shutdown_aborts_the_work_queue_task_and_deregisters_the_pool_callback() {
        let config = RasConfig::default();
        let pool = Arc::new(RdBufferPool::new(&config));
        let transport: Arc<dyn GattTransport> = Arc::new(NullTransport);
        let conn = ConnectionId(1);

        let ctx = RrspContext::spawn(conn, pool.clone(), transport, &config);
        assert_eq!(pool.callback_count(), 1);

        ctx.shutdown(&pool, conn);
        assert_eq!(pool.callback_count(), 0);

        // Give the runtime a chance to actually poll and drop the aborted task.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(ctx.handle.is_finished());
    }
}
