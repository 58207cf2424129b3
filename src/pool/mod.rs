//! `RdBufferPool`: the fixed pool of procedure buffers keyed by
//! `(connection, ranging_counter)` (§4.2).
//!
//! Sized at `max_active_connections * buffers_per_connection` slots. All
//! operations take the pool-wide mutex for a short critical section;
//! per-buffer `refcount` is additionally atomic per the design notes (§9),
//! since a future ingest path might run off the connection's own task.

mod buffer;

pub use buffer::{BufferFlags, ProcedureBuffer};

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::RangingHeader;
use crate::config::RasConfig;
use crate::error::RasError;
use crate::types::{BufferKey, ConnectionId, RangingCounter};

/// Emitted through channels registered with [`RdBufferPool::register_cb`]
/// when a buffer becomes ready or is about to be evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Ready { conn: ConnectionId, counter: RangingCounter },
    Overwritten { conn: ConnectionId, counter: RangingCounter },
}

struct PoolInner {
    slots: Vec<ProcedureBuffer>,
    callbacks: HashMap<ConnectionId, mpsc::UnboundedSender<PoolEvent>>,
}

pub struct RdBufferPool {
    buffers_per_connection: usize,
    buffer_capacity: usize,
    inner: Mutex<PoolInner>,
}

impl RdBufferPool {
    pub fn new(config: &RasConfig) -> Self {
        let capacity = config.pool_capacity();
        let slots = (0..capacity)
            .map(|_| ProcedureBuffer::new_busy(ConnectionId(0), RangingCounter::new(0), 0))
            .map(|mut b| {
                b.conn = None;
                b.flags = BufferFlags::default();
                b
            })
            .collect();
        RdBufferPool {
            buffers_per_connection: config.buffers_per_connection(),
            buffer_capacity: config.max_procedure_bytes(),
            inner: Mutex::new(PoolInner { slots, callbacks: HashMap::new() }),
        }
    }

    /// Registers `conn`'s ready/overwritten callback channel, replacing any
    /// previous registration for the same connection.
    pub fn register_cb(&self, conn: ConnectionId, sender: mpsc::UnboundedSender<PoolEvent>) {
        self.inner.lock().expect("pool mutex poisoned").callbacks.insert(conn, sender);
    }

    /// Removes `conn`'s callback registration. Called on disconnect so the
    /// pool doesn't keep sending to (or holding open) a channel whose
    /// receiving task has been torn down.
    pub fn unregister_cb(&self, conn: ConnectionId) {
        self.inner.lock().expect("pool mutex poisoned").callbacks.remove(&conn);
    }

    /// Number of connections with a live ready/overwritten callback
    /// registration. Exposed crate-wide for tests covering disconnect
    /// teardown.
    pub(crate) fn callback_count(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").callbacks.len()
    }

    fn emit(inner: &PoolInner, event: PoolEvent) {
        for cb in inner.callbacks.values() {
            let _ = cb.send(event);
        }
    }

    /// Opens (or reuses) the busy write buffer for `(conn, counter)`,
    /// applying the allocation/overwrite policy of §4.2.
    pub fn open_for_write(
        &self,
        conn: ConnectionId,
        counter: RangingCounter,
    ) -> Result<BufferKey, RasError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");

        if let Some(idx) = inner
            .slots
            .iter()
            .position(|b| b.conn == Some(conn) && b.ranging_counter == counter && b.flags.busy)
        {
            let _ = idx;
            return Ok(BufferKey::new(conn, counter));
        }

        let owned_by_conn = inner.slots.iter().filter(|b| b.conn == Some(conn)).count();

        if owned_by_conn < self.buffers_per_connection {
            if let Some(idx) = inner.slots.iter().position(ProcedureBuffer::is_free) {
                inner.slots[idx] = ProcedureBuffer::new_busy(conn, counter, self.buffer_capacity);
                return Ok(BufferKey::new(conn, counter));
            }
        }

        // No free slot for this connection (or it is already at quota):
        // evict the oldest ready/unclaimed/not-busy buffer for this
        // connection, 12-bit wrap-aware.
        let victim_idx = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, b)| b.conn == Some(conn) && b.is_evictable())
            .min_by(|(_, a), (_, b)| {
                if a.ranging_counter == b.ranging_counter {
                    std::cmp::Ordering::Equal
                } else if a.ranging_counter.precedes(b.ranging_counter) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                }
            })
            .map(|(idx, _)| idx);

        match victim_idx {
            Some(idx) => {
                let victim = &inner.slots[idx];
                let was_acked = victim.flags.acked;
                let victim_counter = victim.ranging_counter;
                if !was_acked {
                    Self::emit(&inner, PoolEvent::Overwritten { conn, counter: victim_counter });
                }
                debug!(%conn, %victim_counter, was_acked, "evicting ranging-data buffer");
                inner.slots[idx].recycle_for(conn, counter);
                Ok(BufferKey::new(conn, counter))
            }
            None => {
                warn!(%conn, %counter, "ranging-data buffer pool exhausted, dropping procedure");
                Err(RasError::NoFreeBuffer)
            }
        }
    }

    fn find_idx(inner: &PoolInner, key: BufferKey) -> Option<usize> {
        inner
            .slots
            .iter()
            .position(|b| b.conn == Some(key.conn) && b.ranging_counter == key.counter)
    }

    /// True iff a buffer for `key` exists in `ready && !busy` state, and is
    /// not `acked` (per the Open Question resolution in DESIGN.md, an acked
    /// buffer is immediately invisible to re-claim).
    pub fn ready_check(&self, key: BufferKey) -> bool {
        let inner = self.inner.lock().expect("pool mutex poisoned");
        match Self::find_idx(&inner, key) {
            Some(idx) => {
                let b = &inner.slots[idx];
                b.flags.ready && !b.flags.busy && !b.flags.acked
            }
            None => false,
        }
    }

    /// Increments refcount on a ready (and not yet acked) buffer and resets
    /// its read cursor to the start of the flat image: a claim always begins
    /// a fresh read pass, whether this is the buffer's first streaming
    /// session or a re-`GET_RD` of a buffer left claimable by an abandoned
    /// one (e.g. after the ack-timeout releases it without evicting it).
    pub fn claim(&self, key: BufferKey) -> Result<BufferKey, RasError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        match Self::find_idx(&inner, key) {
            Some(idx) => {
                let b = &mut inner.slots[idx];
                if !b.flags.ready || b.flags.busy || b.flags.acked {
                    return Err(RasError::NotReady(key.counter));
                }
                b.refcount.fetch_add(1, Ordering::AcqRel);
                b.read_cursor = 0;
                Ok(key)
            }
            None => Err(RasError::NotReady(key.counter)),
        }
    }

    /// Decrements refcount. The buffer is not freed; it remains available
    /// for re-claim until evicted.
    pub fn release(&self, key: BufferKey) {
        let inner = self.inner.lock().expect("pool mutex poisoned");
        if let Some(idx) = Self::find_idx(&inner, key) {
            inner.slots[idx].refcount.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Marks the buffer acked, which per the Open Question resolution also
    /// makes it invisible to `ready_check`/`claim` from this point on.
    pub fn mark_acked(&self, key: BufferKey) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if let Some(idx) = Self::find_idx(&inner, key) {
            inner.slots[idx].flags.acked = true;
        }
    }

    /// Current `read_cursor` offset into the flat image. Used by the
    /// streamer to decide `first_seg` (§4.4: "set iff `read_cursor` was zero
    /// before the pull") without relying on the rolling segment counter,
    /// which wraps back to 0 well before the read cursor does.
    pub fn read_position(&self, key: BufferKey) -> usize {
        let inner = self.inner.lock().expect("pool mutex poisoned");
        match Self::find_idx(&inner, key) {
            Some(idx) => inner.slots[idx].read_cursor,
            None => 0,
        }
    }

    pub fn pull(&self, key: BufferKey, out: &mut [u8]) -> usize {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        match Self::find_idx(&inner, key) {
            Some(idx) => inner.slots[idx].pull(out),
            None => 0,
        }
    }

    pub fn rewind(&self, key: BufferKey, n: usize) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if let Some(idx) = Self::find_idx(&inner, key) {
            inner.slots[idx].rewind(n);
        }
    }

    /// Frees every buffer owned by `conn`, ignoring refcounts: claims held
    /// across a disconnect are stale.
    pub fn on_connection_lost(&self, conn: ConnectionId) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        for slot in inner.slots.iter_mut().filter(|b| b.conn == Some(conn)) {
            slot.conn = None;
            slot.flags = BufferFlags::default();
            slot.storage.clear();
            *slot.refcount.get_mut() = 0;
        }
    }

    // --- Ingest-facing writers, used only by `crate::ingest::ProducerIngest`. ---

    pub(crate) fn set_header_once(&self, key: BufferKey, header: RangingHeader) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if let Some(idx) = Self::find_idx(&inner, key) {
            if inner.slots[idx].write_cursor == 0 {
                inner.slots[idx].header = header;
            }
        }
    }

    pub(crate) fn append_subevent(&self, key: BufferKey, bytes: &[u8]) -> Result<(), RasError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let idx = Self::find_idx(&inner, key).ok_or(RasError::NoActiveBuffer)?;
        let buf = &mut inner.slots[idx];
        if buf.storage.len() + bytes.len() > self.buffer_capacity {
            return Err(RasError::NoFreeBuffer);
        }
        buf.storage.extend_from_slice(bytes);
        buf.write_cursor = buf.storage.len();
        Ok(())
    }

    pub(crate) fn mark_ready(&self, key: BufferKey) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if let Some(idx) = Self::find_idx(&inner, key) {
            inner.slots[idx].flags.busy = false;
            inner.slots[idx].flags.ready = true;
        }
        Self::emit(&inner, PoolEvent::Ready { conn: key.conn, counter: key.counter });
    }

    /// Discards a buffer without ever marking it ready (aborted procedure).
    pub(crate) fn discard(&self, key: BufferKey) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if let Some(idx) = Self::find_idx(&inner, key) {
            inner.slots[idx].conn = None;
            inner.slots[idx].flags = BufferFlags::default();
            inner.slots[idx].storage.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(buffers_per_connection: usize) -> RdBufferPool {
        let config = RasConfig::default()
            .with_max_active_connections(1)
            .with_buffers_per_connection(buffers_per_connection);
        RdBufferPool::new(&config)
    }

    fn finish_procedure(pool: &RdBufferPool, conn: ConnectionId, counter: RangingCounter) {
        let key = pool.open_for_write(conn, counter).unwrap();
        pool.append_subevent(key, &[0u8; 8]).unwrap();
        pool.mark_ready(key);
    }

    #[test]
    fn pool_overwrite_evicts_oldest_unacked() {
        let pool = test_pool(2);
        let conn = ConnectionId(1);
        finish_procedure(&pool, conn, RangingCounter::new(1));
        finish_procedure(&pool, conn, RangingCounter::new(2));

        let mut rx_events = {
            let (tx, rx) = mpsc::unbounded_channel();
            pool.register_cb(conn, tx);
            rx
        };

        finish_procedure(&pool, conn, RangingCounter::new(3));

        assert!(!pool.ready_check(BufferKey::new(conn, RangingCounter::new(1))));
        assert!(pool.ready_check(BufferKey::new(conn, RangingCounter::new(2))));
        assert!(pool.ready_check(BufferKey::new(conn, RangingCounter::new(3))));

        let mut saw_overwritten_1 = false;
        while let Ok(ev) = rx_events.try_recv() {
            if ev == (PoolEvent::Overwritten { conn, counter: RangingCounter::new(1) }) {
                saw_overwritten_1 = true;
            }
        }
        assert!(saw_overwritten_1);
    }

    #[test]
    fn acked_buffer_is_evicted_without_overwritten_notification() {
        let pool = test_pool(2);
        let conn = ConnectionId(1);
        finish_procedure(&pool, conn, RangingCounter::new(1));
        finish_procedure(&pool, conn, RangingCounter::new(2));
        pool.mark_acked(BufferKey::new(conn, RangingCounter::new(1)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        pool.register_cb(conn, tx);

        finish_procedure(&pool, conn, RangingCounter::new(3));

        assert!(rx.try_recv().is_err());
        assert!(!pool.ready_check(BufferKey::new(conn, RangingCounter::new(1))));
    }

    #[test]
    fn exhausted_pool_with_no_victim_fails() {
        let pool = test_pool(1);
        let conn = ConnectionId(1);
        let key = pool.open_for_write(conn, RangingCounter::new(1)).unwrap();
        // Buffer is still busy (never marked ready) => not evictable.
        let err = pool.open_for_write(conn, RangingCounter::new(2));
        assert!(matches!(err, Err(RasError::NoFreeBuffer)));
        let _ = key;
    }

    #[test]
    fn on_connection_lost_frees_buffers_ignoring_refcount() {
        let pool = test_pool(1);
        let conn1 = ConnectionId(1);
        finish_procedure(&pool, conn1, RangingCounter::new(1));
        let key = BufferKey::new(conn1, RangingCounter::new(1));
        pool.claim(key).unwrap(); // refcount now 1, as if a streamer still held it

        pool.on_connection_lost(conn1);

        assert!(!pool.ready_check(key));
        // Capacity is one slot total (`buffers_per_connection(1)`,
        // `max_active_connections(1)`): a different connection can take it
        // even though the old claim's refcount was never explicitly released.
        let conn2 = ConnectionId(2);
        assert!(pool.open_for_write(conn2, RangingCounter::new(9)).is_ok());
    }

    #[test]
    fn claim_and_release_track_refcount() {
        let pool = test_pool(1);
        let conn = ConnectionId(1);
        finish_procedure(&pool, conn, RangingCounter::new(1));
        let key = BufferKey::new(conn, RangingCounter::new(1));
        pool.claim(key).unwrap();
        pool.claim(key).unwrap();
        pool.release(key);
        pool.release(key);
    }
}
