use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::network::Frame;
use crate::service::{AppError, AppResult};
use crate::transport::{ConnId, Link};

/// A logical, bidirectional, in-order message channel multiplexed over one
/// link. Payloads written on one side come out of `read` on the peer side in
/// the same order, for as long as the link session lasts.
///
/// The back reference to the link is non-owning; a conn never keeps its link
/// alive.
#[derive(Debug)]
pub struct Conn {
    id: ConnId,
    link: Weak<Link>,
    closed: AtomicBool,
    inbound_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound_rx: AsyncMutex<mpsc::Receiver<Bytes>>,
}

impl Conn {
    pub(crate) fn new(id: ConnId, link: Weak<Link>, pipelining: usize) -> Conn {
        let (inbound_tx, inbound_rx) = mpsc::channel(pipelining.max(1));
        Conn {
            id,
            link,
            closed: AtomicBool::new(false),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: AsyncMutex::new(inbound_rx),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// The link carrying this conn, while it is alive.
    pub fn link(&self) -> Option<Arc<Link>> {
        self.link.upgrade()
    }

    /// Next inbound payload, in FIFO order. Once the conn is closed and the
    /// queue drained, every call returns `Closed`.
    pub async fn read(&self) -> AppResult<Bytes> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        inbound_rx.recv().await.ok_or(AppError::Closed)
    }

    /// Send one payload to the peer. Fails fast once the conn or its link is
    /// closed.
    pub async fn write(&self, payload: Bytes) -> AppResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed);
        }
        let link = self.link.upgrade().ok_or(AppError::Closed)?;
        link.write(&Frame::Conn { id: self.id, payload }).await
    }

    /// Close this conn. Idempotent. The peer is notified best-effort; loss
    /// of the close frame is tolerated by the protocol.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(link) = self.link.upgrade() {
            if let Err(e) = link.write(&Frame::Close { id: self.id }).await {
                debug!("close frame for conn {} not sent: {}", self.id, e);
            }
            link.drop_conn(self.id);
        }
        self.shut_inbound().await;
    }

    /// Tear down without emitting a close frame: the parent link is going
    /// away, or the peer already closed its side.
    pub(crate) async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shut_inbound().await;
    }

    /// Called by the link read loop to enqueue an inbound payload. Payloads
    /// for a closed conn are dropped. A full queue blocks the read loop until
    /// the user drains it.
    pub(crate) async fn send_read(&self, payload: Bytes) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let inbound_tx = self.inbound_tx.lock().clone();
        if let Some(inbound_tx) = inbound_tx {
            // an Err means the conn closed while we waited for queue space;
            // the payload is dropped either way
            let _ = inbound_tx.send(payload).await;
        }
    }

    async fn shut_inbound(&self) {
        // dropping the sender first lets a reader blocked in `recv` observe
        // the closed queue before we contend for the receiver lock
        self.inbound_tx.lock().take();
        self.inbound_rx.lock().await.close();
    }
}
