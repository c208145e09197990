use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::network::{framed, Frame, SwapConn};
use crate::service::{AppError, AppResult, TransportConfig};
use crate::transport::{Addr, Conn, Link, LinkId};

/// Accepts physical streams, handshakes them with bounded parallelism, and
/// routes each stream to a new or existing link keyed by the peer's link id.
/// Inbound logical conns from every link fan in to one bounded channel that
/// `accept` drains.
pub struct Listener {
    local_id: LinkId,
    local_addr: Addr,
    links: Arc<DashMap<LinkId, Arc<Link>>>,
    accept_rx: tokio::sync::Mutex<mpsc::Receiver<Arc<Conn>>>,
    notify_shutdown: broadcast::Sender<()>,
}

impl Listener {
    /// Bind `addr` and start accepting. Port 0 picks an ephemeral port; use
    /// `local_addr` to learn it.
    pub async fn bind(addr: impl Into<Addr>, config: TransportConfig) -> AppResult<Listener> {
        let addr = addr.into();
        let socket = TcpListener::bind(addr.as_str()).await?;
        let local_addr = Addr::new(socket.local_addr()?.to_string());
        let local_id = LinkId::mint();
        let links: Arc<DashMap<LinkId, Arc<Link>>> = Arc::new(DashMap::new());
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_buffer_len);
        let (notify_shutdown, shutdown_rx) = broadcast::channel(1);

        info!("transport listening on {} as link {}", local_addr, local_id);

        let accept_loop = AcceptLoop {
            socket,
            config,
            links: links.clone(),
            accept_tx,
        };
        tokio::spawn(accept_loop.run(shutdown_rx));

        Ok(Listener {
            local_id,
            local_addr,
            links,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            notify_shutdown,
        })
    }

    /// This process instance's identity, as peers will see it.
    pub fn local_id(&self) -> LinkId {
        self.local_id
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local_addr
    }

    /// Next inbound logical conn from any link. Returns `Closed` once the
    /// listener has shut down and the fan-in channel is drained.
    pub async fn accept(&self) -> AppResult<Arc<Conn>> {
        let mut accept_rx = self.accept_rx.lock().await;
        accept_rx.recv().await.ok_or(AppError::Closed)
    }

    /// Stop accepting new streams and close every live link.
    pub async fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
        let links: Vec<Arc<Link>> = self.links.iter().map(|entry| entry.value().clone()).collect();
        for link in links {
            link.close().await;
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.notify_shutdown.send(());
        debug!("listener on {} dropped", self.local_addr);
    }
}

struct AcceptLoop {
    socket: TcpListener,
    config: TransportConfig,
    links: Arc<DashMap<LinkId, Arc<Link>>>,
    accept_tx: mpsc::Sender<Arc<Conn>>,
}

impl AcceptLoop {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let handshakes = Arc::new(Semaphore::new(self.config.max_parallel_handshakes));
        loop {
            let permit = handshakes.clone().acquire_owned().await.unwrap();

            let socket = tokio::select! {
                result = self.accept_with_backoff() => match result {
                    Ok(socket) => socket,
                    Err(e) => {
                        // fatal for the whole listener: take the links down
                        // so accept() surfaces `Closed` once drained
                        error!("accept loop terminating: {}", e);
                        let links: Vec<Arc<Link>> =
                            self.links.iter().map(|entry| entry.value().clone()).collect();
                        for link in links {
                            link.close().await;
                        }
                        return;
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!("accept loop stopping on shutdown signal");
                    return;
                }
            };

            let handshake = Handshake {
                config: self.config.clone(),
                links: self.links.clone(),
                accept_tx: self.accept_tx.clone(),
            };
            tokio::spawn(async move {
                handshake.run(socket).await;
                drop(permit);
            });
        }
    }

    async fn accept_with_backoff(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;
        loop {
            match self.socket.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::DetailedIo(format!("accept error: {}", err)));
                    }
                }
            }
            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

/// Server side of the dial handshake, one task per accepted socket. A socket
/// that fails any step is dropped without ceremony.
struct Handshake {
    config: TransportConfig,
    links: Arc<DashMap<LinkId, Arc<Link>>>,
    accept_tx: mpsc::Sender<Arc<Conn>>,
}

impl Handshake {
    async fn run(self, socket: TcpStream) {
        let peer = match socket.peer_addr() {
            Ok(peer) => peer.to_string(),
            Err(_) => "unknown".to_string(),
        };
        let (mut reader, mut writer) = framed(socket, self.config.max_frame_size);

        let from_id = match reader.read_frame().await {
            Ok(Some(Frame::Dial { from_id })) => from_id,
            Ok(other) => {
                warn!("handshake from {} did not begin with a dial frame: {:?}", peer, other);
                return;
            }
            Err(e) => {
                warn!("handshake read from {} failed: {}", peer, e);
                return;
            }
        };
        if let Err(e) = writer.write_frame(&Frame::Accept).await {
            warn!("handshake ack to {} failed: {}", peer, e);
            return;
        }

        match self.links.entry(from_id) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let links = self.links.clone();
                let swap = SwapConn::new(reader, writer, self.config.pipelining);
                let link = Link::start(
                    Addr::new(peer.clone()),
                    Some(from_id),
                    swap,
                    self.accept_tx.clone(),
                    Box::new(move || {
                        links.remove(&from_id);
                    }),
                );
                entry.insert(link);
                debug!("new link from {} ({})", peer, from_id);
            }
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                // a second stream for a known peer is a redial candidate
                if let Err(e) = entry.get().accept_redial(reader, writer) {
                    warn!("redial from {} ({}) refused: {}", peer, from_id, e);
                }
            }
        }
    }
}
