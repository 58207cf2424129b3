//! Bit-packed wire structures for the ranging-data image and the RAS-CP
//! protocol (§4.1).
//!
//! Every struct here implements its own explicit little-endian
//! `encode`/`decode` pair rather than relying on compiler bit-field layout,
//! since these bytes are an ABI contract with the peer.

pub mod control_point;
pub mod ranging_header;
pub mod segment_header;
pub mod subevent_header;

pub use control_point::{CpCommand, CpResponse, RspCode};
pub use ranging_header::RangingHeader;
pub use segment_header::SegmentHeader;
pub use subevent_header::{DoneStatus, SubeventHeader};
