use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ras_cs::error::RasError;
use ras_cs::gatt::GattTransport;
use ras_cs::types::{ConnectionId, RasCharacteristic, SubscriptionKind};

/// An in-memory `GattTransport` fake: records every notify/indicate/write
/// and lets tests drive subscription state and MTU directly, without a real
/// BLE stack underneath.
#[derive(Default)]
pub struct FakeTransport {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    mtu: HashMap<ConnectionId, u16>,
    subscriptions: HashMap<(ConnectionId, RasCharacteristic), SubscriptionKind>,
    sent: Vec<(ConnectionId, RasCharacteristic, Vec<u8>)>,
    fail_sends: usize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mtu(&self, conn: ConnectionId, mtu: u16) {
        self.inner.lock().unwrap().mtu.insert(conn, mtu);
    }

    pub fn set_subscription(&self, conn: ConnectionId, characteristic: RasCharacteristic, kind: SubscriptionKind) {
        self.inner.lock().unwrap().subscriptions.insert((conn, characteristic), kind);
    }

    /// The next `n` notify/indicate calls fail with a transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.inner.lock().unwrap().fail_sends = n;
    }

    pub fn sent_frames(&self, conn: ConnectionId, characteristic: RasCharacteristic) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(c, ch, _)| *c == conn && *ch == characteristic)
            .map(|(_, _, data)| data.clone())
            .collect()
    }

    /// Polls `sent_frames` until at least `n` frames are present or the
    /// timeout elapses.
    pub async fn wait_for_frames(
        &self,
        conn: ConnectionId,
        characteristic: RasCharacteristic,
        n: usize,
    ) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let frames = self.sent_frames(conn, characteristic);
            if frames.len() >= n || tokio::time::Instant::now() >= deadline {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record_send(&self, conn: ConnectionId, characteristic: RasCharacteristic, data: Vec<u8>) -> Result<(), RasError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(RasError::Transport("simulated send failure".into()));
        }
        inner.sent.push((conn, characteristic, data));
        Ok(())
    }
}

#[async_trait]
impl GattTransport for FakeTransport {
    async fn notify(&self, conn: ConnectionId, characteristic: RasCharacteristic, data: Vec<u8>) -> Result<(), RasError> {
        self.record_send(conn, characteristic, data)
    }

    async fn indicate(&self, conn: ConnectionId, characteristic: RasCharacteristic, data: Vec<u8>) -> Result<(), RasError> {
        self.record_send(conn, characteristic, data)
    }

    fn subscribed(&self, conn: ConnectionId, characteristic: RasCharacteristic) -> SubscriptionKind {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .get(&(conn, characteristic))
            .copied()
            .unwrap_or(SubscriptionKind::None)
    }

    fn get_mtu(&self, conn: ConnectionId) -> u16 {
        self.inner.lock().unwrap().mtu.get(&conn).copied().unwrap_or(247)
    }

    async fn write_without_response(
        &self,
        conn: ConnectionId,
        characteristic: RasCharacteristic,
        data: Vec<u8>,
    ) -> Result<(), RasError> {
        self.record_send(conn, characteristic, data)
    }
}
