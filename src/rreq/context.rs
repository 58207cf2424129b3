//! `RreqContext`: the per-connection handle for the client role. Unlike
//! `RrspContext`, the client side has no attribute-write callback that must
//! never block, so a plain mutex-guarded core (grounded in the teacher's
//! `TransactionTracker`) is sufficient rather than a dedicated work queue.

use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::error::RasError;
use crate::gatt::GattTransport;
use crate::types::ConnectionId;

use super::core::{GetResult, RreqCore};

pub struct RreqContext {
    core: Mutex<RreqCore>,
}

impl RreqContext {
    pub fn new(conn: ConnectionId, transport: Arc<dyn GattTransport>) -> Self {
        RreqContext { core: Mutex::new(RreqCore::new(conn, transport)) }
    }

    pub async fn get_ranging_data(
        &self,
        counter: crate::types::RangingCounter,
        max_output_len: usize,
    ) -> Result<oneshot::Receiver<GetResult>, RasError> {
        self.core.lock().await.get_ranging_data(counter, max_output_len).await
    }

    pub async fn on_demand_rd_segment(&self, data: &[u8]) {
        self.core.lock().await.on_segment(data);
    }

    pub async fn on_control_point_indication(&self, data: &[u8]) {
        self.core.lock().await.on_control_point_indication(data).await;
    }

    pub async fn on_overwritten(&self, counter: crate::types::RangingCounter) {
        self.core.lock().await.on_overwritten(counter);
    }
}
