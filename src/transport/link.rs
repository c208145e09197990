// Copyright 2026 The wiremux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::network::{Frame, FrameReader, FrameWriter, SwapConn};
use crate::service::{AppError, AppResult};
use crate::transport::{Addr, Conn, ConnId, LinkId};

pub(crate) type OnClose = Box<dyn Fn() + Send + Sync>;

/// All connectivity to one remote endpoint: owns the physical stream and
/// multiplexes logical conns over it.
///
/// One read loop task per link demultiplexes inbound frames to the conn
/// table. The state mutex guards the table together with the stream holder
/// and is never held across stream IO.
pub struct Link {
    addr: Addr,
    peer_id: Option<LinkId>,
    state: Mutex<LinkState>,
    accept_tx: mpsc::Sender<Arc<Conn>>,
    notify_shutdown: broadcast::Sender<()>,
    on_close: Mutex<Option<OnClose>>,
}

struct LinkState {
    /// `None` marks the link permanently closed.
    swap: Option<Arc<SwapConn>>,
    open: HashMap<ConnId, Arc<Conn>>,
}

impl Link {
    /// Wrap an established, handshaken stream and start the read loop.
    /// `peer_id` is known on accepted links; the dial handshake does not
    /// carry the acceptor's id. New inbound conns go out on `accept_tx`;
    /// `on_close` runs exactly once when the link dies.
    pub(crate) fn start(
        addr: Addr,
        peer_id: Option<LinkId>,
        swap: SwapConn,
        accept_tx: mpsc::Sender<Arc<Conn>>,
        on_close: OnClose,
    ) -> Arc<Link> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let link = Arc::new(Link {
            addr,
            peer_id,
            state: Mutex::new(LinkState {
                swap: Some(Arc::new(swap)),
                open: HashMap::new(),
            }),
            accept_tx,
            notify_shutdown,
            on_close: Mutex::new(Some(on_close)),
        });
        let read_link = link.clone();
        tokio::spawn(async move { read_link.read_loop().await });
        link
    }

    pub fn addr(&self) -> &Addr {
        &self.addr
    }

    /// The peer process identity learned during the handshake, on links that
    /// were accepted rather than dialed.
    pub fn peer_id(&self) -> Option<LinkId> {
        self.peer_id
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().swap.is_none()
    }

    /// Open a fresh logical conn and announce it to the peer.
    pub async fn open(self: &Arc<Link>) -> AppResult<Arc<Conn>> {
        self.open_with_id(ConnId::mint()).await
    }

    /// Open with a caller-chosen id. A collision is surfaced, not retried.
    /// If announcing the conn fails the conn is dropped and the link closes.
    pub(crate) async fn open_with_id(self: &Arc<Link>, id: ConnId) -> AppResult<Arc<Conn>> {
        let conn = self.add(id)?;
        if let Err(e) = self.write(&Frame::Open { id }).await {
            conn.shutdown().await;
            self.drop_conn(id);
            return Err(e);
        }
        Ok(conn)
    }

    /// Write a frame through the current physical stream. The state lock is
    /// released before the IO; a write failure closes the link.
    pub(crate) async fn write(&self, frame: &Frame) -> AppResult<()> {
        let swap = self.state.lock().swap.clone();
        let swap = swap.ok_or(AppError::Closed)?;
        if let Err(e) = swap.write(frame).await {
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Shut the link down. Idempotent. The open table is snapshotted and
    /// cleared under the lock, then the conns are shut outside it so their
    /// own teardown may re-enter `drop_conn`.
    pub async fn close(&self) {
        let (swap, conns) = {
            let mut state = self.state.lock();
            let Some(swap) = state.swap.take() else {
                return;
            };
            let conns: Vec<Arc<Conn>> = state.open.drain().map(|(_, conn)| conn).collect();
            (swap, conns)
        };
        if let Some(on_close) = self.on_close.lock().take() {
            on_close();
        }
        let _ = self.notify_shutdown.send(());
        swap.close();
        for conn in conns {
            conn.shutdown().await;
        }
        debug!("link to {} closed", self.addr);
    }

    /// Offer a replacement stream after a physical reconnect. The redial
    /// protocol is not defined yet, so the offer is always refused.
    pub(crate) fn accept_redial(
        &self,
        _reader: FrameReader,
        _writer: FrameWriter,
    ) -> AppResult<()> {
        Err(AppError::NotSupported)
    }

    fn add(self: &Arc<Link>, id: ConnId) -> AppResult<Arc<Conn>> {
        let mut state = self.state.lock();
        let swap = state.swap.as_ref().ok_or(AppError::Closed)?;
        let pipelining = swap.pipelining();
        if state.open.contains_key(&id) {
            return Err(AppError::IdCollision);
        }
        let conn = Arc::new(Conn::new(id, Arc::downgrade(self), pipelining));
        state.open.insert(id, conn.clone());
        Ok(conn)
    }

    fn lookup(&self, id: ConnId) -> Option<Arc<Conn>> {
        self.state.lock().open.get(&id).cloned()
    }

    /// Remove a conn from the table. Ids already gone are fine.
    pub(crate) fn drop_conn(&self, id: ConnId) {
        self.state.lock().open.remove(&id);
    }

    async fn read_loop(self: Arc<Link>) {
        let mut shutdown_rx = self.notify_shutdown.subscribe();
        loop {
            let swap = self.state.lock().swap.clone();
            let Some(swap) = swap else {
                return;
            };

            let result = tokio::select! {
                result = swap.read() => result,
                _ = shutdown_rx.recv() => {
                    debug!("link {} read loop stopping on shutdown signal", self.addr);
                    return;
                }
            };

            let frame = match result {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("peer {} closed the stream", self.addr);
                    self.close().await;
                    return;
                }
                Err(e) => {
                    error!("corrupt or failed read from {}: {}", self.addr, e);
                    self.close().await;
                    return;
                }
            };

            match frame {
                Frame::Open { id } => match self.add(id) {
                    Ok(conn) => {
                        if self.accept_tx.send(conn).await.is_err() {
                            // nobody is accepting anymore
                            self.close().await;
                            return;
                        }
                    }
                    Err(AppError::IdCollision) => {
                        warn!("conn id collision on open from {}, dropping", self.addr);
                    }
                    Err(_) => return,
                },
                Frame::Conn { id, payload } => match self.lookup(id) {
                    Some(conn) => conn.send_read(payload).await,
                    // usually a late frame arriving after a local close
                    None => {}
                },
                Frame::Close { id } => {
                    if let Some(conn) = self.lookup(id) {
                        self.drop_conn(id);
                        conn.shutdown().await;
                    }
                }
                Frame::Dial { .. } | Frame::Accept => {
                    warn!("unexpected handshake frame from {} mid-session, dropping", self.addr);
                }
                Frame::Unknown { tag } => {
                    debug!("unknown frame tag {:#04x} from {}, dropping", tag, self.addr);
                }
            }
        }
    }
}
