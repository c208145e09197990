use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::network::{framed, Frame, SwapConn};
use crate::service::{AppError, AppResult, TransportConfig};
use crate::transport::{Addr, Conn, Link, LinkId};

/// One slot per dialed address, holding the current link behind its own
/// lock so same-address dials coalesce without touching other addresses.
type LinkSlot = Arc<Mutex<Option<Arc<Link>>>>;

/// Client side of the transport. Dials remote listeners and keeps one link
/// per remote address; dialing an address twice yields the same link.
pub struct Dialer {
    local_id: LinkId,
    config: TransportConfig,
    links: DashMap<Addr, LinkSlot>,
    accept_tx: mpsc::Sender<Arc<Conn>>,
    accept_rx: Mutex<mpsc::Receiver<Arc<Conn>>>,
}

impl Dialer {
    pub fn new(config: TransportConfig) -> Dialer {
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_buffer_len);
        Dialer {
            local_id: LinkId::mint(),
            config,
            links: DashMap::new(),
            accept_tx,
            accept_rx: Mutex::new(accept_rx),
        }
    }

    /// This process instance's identity, as sent in every dial handshake.
    pub fn local_id(&self) -> LinkId {
        self.local_id
    }

    /// The link to `addr`, establishing it on first use. Concurrent dials
    /// serialize per address: the first caller performs the handshake and
    /// the rest share its link, while dials to other addresses proceed
    /// independently. A link that has died since is replaced.
    pub async fn dial(&self, addr: impl Into<Addr>) -> AppResult<Arc<Link>> {
        let addr = addr.into();
        let slot = self
            .links
            .entry(addr.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        // only dials to this address wait here
        let mut slot = slot.lock().await;
        if let Some(link) = slot.as_ref() {
            if !link.is_closed() {
                return Ok(link.clone());
            }
        }
        let link = self.connect(&addr).await?;
        *slot = Some(link.clone());
        Ok(link)
    }

    /// Next peer-initiated conn on any dialed link. The frame protocol is
    /// symmetric, so a listener may open conns toward us just as we open
    /// conns toward it.
    pub async fn accept(&self) -> AppResult<Arc<Conn>> {
        let mut accept_rx = self.accept_rx.lock().await;
        accept_rx.recv().await.ok_or(AppError::Closed)
    }

    /// Close every dialed link.
    pub async fn shutdown(&self) {
        let slots: Vec<LinkSlot> = self.links.iter().map(|entry| entry.value().clone()).collect();
        for slot in slots {
            let link = slot.lock().await.take();
            if let Some(link) = link {
                link.close().await;
            }
        }
    }

    async fn connect(&self, addr: &Addr) -> AppResult<Arc<Link>> {
        let socket = TcpStream::connect(addr.as_str()).await?;
        let (mut reader, mut writer) = framed(socket, self.config.max_frame_size);

        writer.write_frame(&Frame::Dial { from_id: self.local_id }).await?;
        match reader.read_frame().await? {
            Some(Frame::Accept) => {}
            other => {
                return Err(AppError::DetailedIo(format!(
                    "handshake with {} not accepted: {:?}",
                    addr, other
                )));
            }
        }
        debug!("link to {} established as {}", addr, self.local_id);

        let swap = SwapConn::new(reader, writer, self.config.pipelining);
        // no unregister bookkeeping: the address slot holds at most one link
        // and the next dial replaces a dead one
        Ok(Link::start(
            addr.clone(),
            None,
            swap,
            self.accept_tx.clone(),
            Box::new(|| {}),
        ))
    }
}
