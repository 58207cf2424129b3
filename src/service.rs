//! Service registration (§6): the fixed GATT service table and the
//! connection-lifecycle wiring that creates/destroys per-connection
//! contexts and routes attribute callbacks into `RrspCore`/`RreqCore`.

use std::sync::Arc;

use crate::config::RasConfig;
use crate::error::AttErrorCode;
use crate::gatt::GattTransport;
use crate::ingest::{ProducerIngest, SubeventResult};
use crate::pool::RdBufferPool;
use crate::registry::{RreqRegistry, RrspRegistry};
use crate::rreq::{GetResult, RreqContext};
use crate::rrsp::RrspContext;
use crate::types::{ConnectionId, RangingCounter};

/// Primary service UUID (§6).
pub const SERVICE_UUID: u16 = 0x185B;

pub const CHAR_FEATURES: u16 = 0x2C14;
pub const CHAR_REAL_TIME_RD: u16 = 0x2C15;
pub const CHAR_ON_DEMAND_RD: u16 = 0x2C16;
pub const CHAR_RAS_CONTROL_POINT: u16 = 0x2C17;
pub const CHAR_RD_READY: u16 = 0x2C18;
pub const CHAR_RD_OVERWRITTEN: u16 = 0x2C19;

/// The Features characteristic bitmap. Bit 0 (real-time) is the only bit
/// this core can ever set; bits 1-3 (retrieve-lost, abort, filter) are
/// always clear since those commands are recognised only to be rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub real_time: bool,
}

impl Features {
    pub fn to_le_bytes(self) -> [u8; 4] {
        let bitmap: u32 = if self.real_time { 1 } else { 0 };
        bitmap.to_le_bytes()
    }
}

/// The server (RRSP) side of the service: owns the buffer pool and ingest
/// path, and the registry of per-connection streamer contexts.
pub struct RasServer {
    pool: Arc<RdBufferPool>,
    transport: Arc<dyn GattTransport>,
    config: RasConfig,
    registry: RrspRegistry,
    ingest: ProducerIngest,
}

impl RasServer {
    pub fn new(transport: Arc<dyn GattTransport>, config: RasConfig) -> Self {
        let pool = Arc::new(RdBufferPool::new(&config));
        let ingest = ProducerIngest::new(pool.clone(), &config);
        RasServer { pool, transport, config, registry: RrspRegistry::new(), ingest }
    }

    /// Creates and registers a fresh `RrspContext` for a newly-connected peer.
    pub fn on_connected(&self, conn: ConnectionId) {
        let ctx = RrspContext::spawn(conn, self.pool.clone(), self.transport.clone(), &self.config);
        self.registry.insert(conn, Arc::new(ctx));
    }

    /// Tears down the connection's context and frees its pool buffers.
    pub fn on_disconnected(&self, conn: ConnectionId) {
        if let Some(ctx) = self.registry.remove(conn) {
            ctx.shutdown(&self.pool, conn);
        }
        self.pool.on_connection_lost(conn);
    }

    /// Routes an RAS-CP attribute write to the connection's context.
    pub fn on_control_point_write(&self, conn: ConnectionId, data: &[u8]) -> Result<(), AttErrorCode> {
        match self.registry.get(conn) {
            Some(ctx) => ctx.on_control_point_write(self.transport.as_ref(), conn, data),
            None => Err(AttErrorCode::CccdNotConfigured),
        }
    }

    /// Routes one controller subevent result into the buffer pool.
    pub fn on_subevent(&self, conn: ConnectionId, result: &SubeventResult) {
        self.ingest.on_subevent(conn, result);
    }

    /// The value returned for an attribute read of the Features
    /// characteristic.
    pub fn read_features(&self) -> [u8; 4] {
        Features::default().to_le_bytes()
    }
}

/// The client (RREQ) side of the service: a registry of per-connection
/// receive contexts, and the entrypoints the GATT stack's notification and
/// indication delivery calls into.
pub struct RasClient {
    transport: Arc<dyn GattTransport>,
    registry: RreqRegistry,
}

impl RasClient {
    pub fn new(transport: Arc<dyn GattTransport>) -> Self {
        RasClient { transport, registry: RreqRegistry::new() }
    }

    pub fn on_connected(&self, conn: ConnectionId) {
        self.registry.insert(conn, Arc::new(RreqContext::new(conn, self.transport.clone())));
    }

    pub fn on_disconnected(&self, conn: ConnectionId) {
        self.registry.remove(conn);
    }

    pub async fn get_ranging_data(
        &self,
        conn: ConnectionId,
        counter: RangingCounter,
        max_output_len: usize,
    ) -> Result<tokio::sync::oneshot::Receiver<GetResult>, crate::error::RasError> {
        let ctx = self.registry.get(conn).ok_or(crate::error::RasError::UnknownConnection)?;
        ctx.get_ranging_data(counter, max_output_len).await
    }

    pub async fn on_demand_rd_segment(&self, conn: ConnectionId, data: &[u8]) {
        if let Some(ctx) = self.registry.get(conn) {
            ctx.on_demand_rd_segment(data).await;
        }
    }

    pub async fn on_control_point_indication(&self, conn: ConnectionId, data: &[u8]) {
        if let Some(ctx) = self.registry.get(conn) {
            ctx.on_control_point_indication(data).await;
        }
    }

    pub async fn on_overwritten(&self, conn: ConnectionId, counter: RangingCounter) {
        if let Some(ctx) = self.registry.get(conn) {
            ctx.on_overwritten(counter).await;
        }
    }
}
