//! Tagged work-queue messages for the per-connection RRSP task (§9 design
//! note: replaces the source's pointer-to-function + back-pointer callback
//! chains with an explicit message variant).
//!
//! The source's `SegmentSent`/`IndicateConfirmed` continuations collapse
//! here into plain `.await` points inside the streamer loop: async Rust's
//! natural idiom is to await the send directly rather than re-post a
//! continuation once the GATT stack calls back.

use crate::pool::PoolEvent;

#[derive(Debug)]
pub enum RrspWork {
    /// A raw RAS-CP write, copied off the attribute write by
    /// [`super::context::RrspContext::on_control_point_write`]. Decoding
    /// happens on the work queue, not inline in the GATT callback.
    Command(Vec<u8>),
    /// A buffer-pool ready/overwritten event for this connection.
    Pool(PoolEvent),
    /// Resume the streamer after a rewind-and-retry.
    RetryStreamer,
    /// The `AwaitingAck` timer expired without an `ACK_RD`.
    AckTimeout,
}
