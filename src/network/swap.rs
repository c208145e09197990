use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::network::{Frame, FrameReader, FrameWriter};
use crate::service::{AppError, AppResult};

/// Holder of the current framed stream for one link.
///
/// Reads and writes go through whichever stream is installed at the moment
/// the call starts; `swap` installs a replacement without disturbing callers,
/// which then observe it on their next operation. This is the splice point
/// reserved for a future reconnect path; today nothing outside tests calls
/// `swap`.
#[derive(Debug)]
pub struct SwapConn {
    pipelining: usize,
    current: Mutex<Option<Session>>,
}

#[derive(Debug, Clone)]
struct Session {
    reader: Arc<AsyncMutex<FrameReader>>,
    writer: Arc<AsyncMutex<FrameWriter>>,
}

impl Session {
    fn new(reader: FrameReader, writer: FrameWriter) -> Session {
        Session {
            reader: Arc::new(AsyncMutex::new(reader)),
            writer: Arc::new(AsyncMutex::new(writer)),
        }
    }
}

impl SwapConn {
    /// `pipelining` is carried here as the sizing hint for the inbound
    /// queues of conns multiplexed over this stream.
    pub fn new(reader: FrameReader, writer: FrameWriter, pipelining: usize) -> SwapConn {
        SwapConn {
            pipelining,
            current: Mutex::new(Some(Session::new(reader, writer))),
        }
    }

    pub fn pipelining(&self) -> usize {
        self.pipelining
    }

    fn session(&self) -> AppResult<Session> {
        self.current.lock().clone().ok_or(AppError::Closed)
    }

    /// Read one frame from the currently installed stream. Single-reader:
    /// only the link read loop calls this.
    pub async fn read(&self) -> AppResult<Option<Frame>> {
        let session = self.session()?;
        let mut reader = session.reader.lock().await;
        reader.read_frame().await
    }

    /// Write one frame. Concurrent writers serialize on the stream itself,
    /// so frames never interleave.
    pub async fn write(&self, frame: &Frame) -> AppResult<()> {
        let session = self.session()?;
        let mut writer = session.writer.lock().await;
        writer.write_frame(frame).await
    }

    /// Atomically install a replacement stream.
    pub fn swap(&self, reader: FrameReader, writer: FrameWriter) {
        *self.current.lock() = Some(Session::new(reader, writer));
    }

    /// Drop the underlying stream. Idempotent; later reads and writes return
    /// `Closed`.
    pub fn close(&self) {
        self.current.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::network::framed;
    use crate::transport::ConnId;

    const MAX: usize = 16 * 1024 * 1024;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn swap_redirects_subsequent_traffic() {
        let (client_a, server_a) = socket_pair().await;
        let (reader_a, writer_a) = framed(client_a, MAX);
        let (mut peer_a_reader, _peer_a_writer) = framed(server_a, MAX);

        let swap = SwapConn::new(reader_a, writer_a, 8);
        swap.write(&Frame::Open { id: ConnId::from_u64(1) }).await.unwrap();
        assert_eq!(
            peer_a_reader.read_frame().await.unwrap(),
            Some(Frame::Open { id: ConnId::from_u64(1) })
        );

        let (client_b, server_b) = socket_pair().await;
        let (reader_b, writer_b) = framed(client_b, MAX);
        let (mut peer_b_reader, mut peer_b_writer) = framed(server_b, MAX);
        swap.swap(reader_b, writer_b);

        swap.write(&Frame::Open { id: ConnId::from_u64(2) }).await.unwrap();
        assert_eq!(
            peer_b_reader.read_frame().await.unwrap(),
            Some(Frame::Open { id: ConnId::from_u64(2) })
        );

        peer_b_writer.write_frame(&Frame::Accept).await.unwrap();
        assert_eq!(swap.read().await.unwrap(), Some(Frame::Accept));
    }

    #[tokio::test]
    async fn closed_swap_refuses_io() {
        let (client, _server) = socket_pair().await;
        let (reader, writer) = framed(client, MAX);
        let swap = SwapConn::new(reader, writer, 8);
        swap.close();
        swap.close();
        assert!(matches!(swap.read().await, Err(AppError::Closed)));
        assert!(matches!(
            swap.write(&Frame::Accept).await,
            Err(AppError::Closed)
        ));
    }
}
