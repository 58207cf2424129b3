//! Runtime configuration for the ranging service core.
//!
//! Mirrors the way the teacher's TCP listener exposes its tunables through
//! builder-style setters (`NFSTcpListener::with_export_name`) rather than
//! public struct literals, so defaults stay centralised in one place.

use std::time::Duration;

/// Worst-case procedure size per spec §3: one `RangingHeader` + up to 32
/// `SubeventHeader`s + up to 256 step-mode bytes + up to 256 * 35 step-data
/// bytes.
pub const DEFAULT_MAX_PROCEDURE_BYTES: usize = 4 + 32 * 8 + 256 + 256 * 35;

/// Tunables for the pool, streamer, and control-point timeout. Constructed
/// with [`RasConfig::default`] and adjusted with the `with_*` setters.
#[derive(Debug, Clone)]
pub struct RasConfig {
    max_active_connections: usize,
    buffers_per_connection: usize,
    ras_cp_ack_timeout: Duration,
    max_procedure_bytes: usize,
    tx_power_dbm: i8,
    antenna_paths_mask: u8,
}

impl Default for RasConfig {
    fn default() -> Self {
        RasConfig {
            max_active_connections: 4,
            buffers_per_connection: 2,
            ras_cp_ack_timeout: Duration::from_secs(10),
            max_procedure_bytes: DEFAULT_MAX_PROCEDURE_BYTES,
            tx_power_dbm: 0,
            antenna_paths_mask: 1,
        }
    }
}

impl RasConfig {
    pub fn with_max_active_connections(mut self, n: usize) -> Self {
        self.max_active_connections = n;
        self
    }

    pub fn with_buffers_per_connection(mut self, n: usize) -> Self {
        self.buffers_per_connection = n;
        self
    }

    pub fn with_ras_cp_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ras_cp_ack_timeout = timeout;
        self
    }

    pub fn with_max_procedure_bytes(mut self, n: usize) -> Self {
        self.max_procedure_bytes = n;
        self
    }

    pub fn with_tx_power_dbm(mut self, dbm: i8) -> Self {
        self.tx_power_dbm = dbm;
        self
    }

    pub fn with_antenna_paths_mask(mut self, mask: u8) -> Self {
        self.antenna_paths_mask = mask;
        self
    }

    pub fn max_active_connections(&self) -> usize {
        self.max_active_connections
    }

    pub fn buffers_per_connection(&self) -> usize {
        self.buffers_per_connection
    }

    pub fn pool_capacity(&self) -> usize {
        self.max_active_connections * self.buffers_per_connection
    }

    pub fn ras_cp_ack_timeout(&self) -> Duration {
        self.ras_cp_ack_timeout
    }

    pub fn max_procedure_bytes(&self) -> usize {
        self.max_procedure_bytes
    }

    pub fn tx_power_dbm(&self) -> i8 {
        self.tx_power_dbm
    }

    pub fn antenna_paths_mask(&self) -> u8 {
        self.antenna_paths_mask
    }
}
