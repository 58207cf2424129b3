//! ras-cs - Ranging Service (RAS) over Bluetooth LE Channel Sounding
//!
//! This library implements the GATT-based transport that lets a Ranging
//! Requestor (RREQ, client) retrieve reassembled Channel Sounding procedure
//! results from a Ranging Responder (RRSP, server). CS procedures are
//! produced on the server side by the local controller as a stream of
//! subevent result fragments; this crate buffers them per connection,
//! notifies availability, and delivers the complete procedure over a
//! segmented on-demand transfer gated by a Control Point protocol.
//!
//! ## Supported Features
//!
//! - Ranging-data buffer pool with connection-scoped allocation, overwrite,
//!   and refcounted-claim policy
//! - RAS-CP control-point state machine and MTU-aware segmented streamer
//!   (server/RRSP role)
//! - Segment reassembly and the RAS-CP ACK handshake (client/RREQ role)
//! - Asynchronous operation with Tokio, with GATT callbacks never blocking
//!   on deferred work
//!
//! ## Main Components
//!
//! - `gatt`: The `GattTransport` trait — the boundary to the surrounding
//!   BLE stack's attribute table, notifications/indications, and
//!   subscription state. Implement this to back the service with a real
//!   controller.
//!
//! - `service`: `RasServer`/`RasClient` — the fixed GATT service table and
//!   connection-lifecycle wiring that creates and destroys per-connection
//!   contexts.
//!
//! - `pool`: The ranging-data buffer pool.
//!
//! - `ingest`: Turns controller subevent results into buffered ranging data.
//!
//! - `rrsp`/`rreq`: The server and client per-connection state machines.
//!
//! ## Out of scope
//!
//! GATT attribute-table machinery, low-level CS subevent delivery,
//! connection lifecycle, and pairing/encryption are external collaborators
//! consumed through `gatt::GattTransport`, not implemented here. Real-time
//! (un-reassembled) ranging, lost-segment retrieval, filter configuration,
//! and abort-in-progress are recognised on the wire only to be rejected.
//!
//! ## Usage
//!
//! Implement `GattTransport` against your BLE stack, construct a
//! `RasServer` and/or `RasClient` with it, and route `on_connected`,
//! `on_disconnected`, and the attribute callbacks listed in `service` into
//! the corresponding methods.

pub mod codec;
pub mod config;
pub mod error;
pub mod gatt;
pub mod ingest;
pub mod pool;
pub mod registry;
pub mod rreq;
pub mod rrsp;
pub mod service;
pub mod types;
