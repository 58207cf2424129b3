//! `ProcedureBuffer`: one pool slot holding a reassembled (or in-progress)
//! ranging-data image (§3).

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::codec::RangingHeader;
use crate::types::{ConnectionId, RangingCounter};

/// `busy`/`ready`/`acked` bits (§3). `busy` and `ready` are mutually
/// exclusive; `acked` implies `ready`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub ready: bool,
    pub busy: bool,
    pub acked: bool,
}

/// One slot in the [`crate::pool::RdBufferPool`]. `conn: None` means the
/// slot is free.
#[derive(Debug)]
pub struct ProcedureBuffer {
    pub(crate) conn: Option<ConnectionId>,
    pub(crate) ranging_counter: RangingCounter,
    pub(crate) header: RangingHeader,
    pub(crate) flags: BufferFlags,
    pub(crate) refcount: AtomicUsize,
    pub(crate) write_cursor: usize,
    pub(crate) read_cursor: usize,
    pub(crate) storage: Vec<u8>,
}

impl ProcedureBuffer {
    pub(crate) fn new_busy(conn: ConnectionId, counter: RangingCounter, capacity: usize) -> Self {
        ProcedureBuffer {
            conn: Some(conn),
            ranging_counter: counter,
            header: RangingHeader {
                ranging_counter: counter,
                config_id: 0,
                selected_tx_power: 0,
                antenna_paths_mask: 1,
            },
            flags: BufferFlags { ready: false, busy: true, acked: false },
            refcount: AtomicUsize::new(0),
            write_cursor: 0,
            read_cursor: 0,
            storage: Vec::with_capacity(capacity),
        }
    }

    /// Recycles this slot in place for a new `(conn, counter)` key. Callers
    /// must already have established this buffer is evictable (ready, not
    /// busy, refcount zero).
    pub(crate) fn recycle_for(&mut self, conn: ConnectionId, counter: RangingCounter) {
        self.conn = Some(conn);
        self.ranging_counter = counter;
        self.header = RangingHeader {
            ranging_counter: counter,
            config_id: 0,
            selected_tx_power: 0,
            antenna_paths_mask: 1,
        };
        self.flags = BufferFlags { ready: false, busy: true, acked: false };
        *self.refcount.get_mut() = 0;
        self.write_cursor = 0;
        self.read_cursor = 0;
        self.storage.clear();
    }

    pub fn is_free(&self) -> bool {
        self.conn.is_none()
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// A buffer may be overwritten only when `ready && !busy && refcount == 0`.
    pub fn is_evictable(&self) -> bool {
        self.flags.ready && !self.flags.busy && self.refcount() == 0
    }

    /// Length of the flat on-wire image: `RangingHeader` followed by the
    /// subevents region written so far.
    pub fn flat_len(&self) -> usize {
        RangingHeader::WIRE_SIZE + self.write_cursor
    }

    /// Copies up to `out.len()` bytes starting at `read_cursor` into `out`,
    /// advancing `read_cursor`. Returns the number of bytes copied.
    pub fn pull(&mut self, out: &mut [u8]) -> usize {
        let total = self.flat_len();
        if self.read_cursor >= total {
            return 0;
        }
        let avail = total - self.read_cursor;
        let n = out.len().min(avail);
        let mut copied = 0;
        let header_len = RangingHeader::WIRE_SIZE;

        if self.read_cursor < header_len {
            let mut header_bytes = [0u8; RangingHeader::WIRE_SIZE];
            let mut cursor = &mut header_bytes[..];
            self.header.encode(&mut cursor).expect("encoding into a fixed in-memory buffer cannot fail");
            let from = self.read_cursor;
            let take = (header_len - from).min(n);
            out[..take].copy_from_slice(&header_bytes[from..from + take]);
            copied += take;
        }

        if copied < n {
            let storage_from = (self.read_cursor + copied).saturating_sub(header_len);
            let take = n - copied;
            out[copied..copied + take]
                .copy_from_slice(&self.storage[storage_from..storage_from + take]);
            copied += take;
        }

        self.read_cursor += copied;
        copied
    }

    /// Moves `read_cursor` back by `n` bytes, for retrying a failed send.
    pub fn rewind(&mut self, n: usize) {
        self.read_cursor = self.read_cursor.saturating_sub(n);
    }
}
