//! The GATT attribute-table/transport boundary (§6): the set of operations
//! the core consumes from the surrounding BLE stack but does not implement
//! itself. A real deployment backs this with its controller's attribute
//! server; tests back it with an in-memory fake (see `tests/support.rs`).

use async_trait::async_trait;

use crate::error::RasError;
use crate::types::{ConnectionId, RasCharacteristic, SubscriptionKind};

/// Sends and subscription queries the core needs from the GATT stack.
///
/// `notify` and `indicate` are async because both are "asynchronous-complete"
/// at the GATT layer (§5): the call resolves once the stack has accepted (for
/// notify) or the peer has confirmed (for indicate) the send. A failed send
/// is reported as `Err`, never as a panic or a dropped connection.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Sends a notification on `characteristic` to `conn`.
    async fn notify(
        &self,
        conn: ConnectionId,
        characteristic: RasCharacteristic,
        data: Vec<u8>,
    ) -> Result<(), RasError>;

    /// Sends an indication on `characteristic` to `conn` and awaits the
    /// peer's confirmation.
    async fn indicate(
        &self,
        conn: ConnectionId,
        characteristic: RasCharacteristic,
        data: Vec<u8>,
    ) -> Result<(), RasError>;

    /// The peer's current CCCD subscription on `characteristic`.
    fn subscribed(&self, conn: ConnectionId, characteristic: RasCharacteristic) -> SubscriptionKind;

    /// The connection's current ATT MTU, in bytes.
    fn get_mtu(&self, conn: ConnectionId) -> u16;

    /// Client-role write-without-response to a peer's characteristic,
    /// used by the RREQ side to send RAS-CP commands (§4.5: "write is
    /// write-without-response to the server's value handle").
    async fn write_without_response(
        &self,
        conn: ConnectionId,
        characteristic: RasCharacteristic,
        data: Vec<u8>,
    ) -> Result<(), RasError>;
}
