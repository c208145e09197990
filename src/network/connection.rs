use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::network::Frame;
use crate::service::AppResult;

/// Split a socket into its framed halves.
pub fn framed(socket: TcpStream, max_frame_size: usize) -> (FrameReader, FrameWriter) {
    let (reader, writer) = socket.into_split();
    (
        FrameReader {
            reader,
            buffer: BytesMut::with_capacity(4 * 1024),
            max_frame_size,
        },
        FrameWriter {
            writer: BufWriter::new(writer),
            encode_buffer: BytesMut::with_capacity(4 * 1024),
        },
    )
}

/// Reading half of a framed stream: accumulates socket bytes until a whole
/// frame can be parsed.
#[derive(Debug)]
pub struct FrameReader {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameReader {
    /// Next frame off the wire. `Ok(None)` means the peer closed the stream
    /// at a frame boundary; an EOF mid-frame is an error, as is any frame
    /// that fails to parse.
    pub async fn read_frame(&mut self) -> AppResult<Option<Frame>> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    // peer closed the stream gracefully
                    Ok(None)
                } else {
                    // peer closed the stream while sending a frame
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}

/// Writing half of a framed stream.
#[derive(Debug)]
pub struct FrameWriter {
    writer: BufWriter<OwnedWriteHalf>,
    encode_buffer: BytesMut,
}

impl FrameWriter {
    /// Encode and flush one frame. Serialization across callers is the
    /// caller's concern.
    pub async fn write_frame(&mut self, frame: &Frame) -> AppResult<()> {
        self.encode_buffer.clear();
        frame.encode(&mut self.encode_buffer);
        self.writer.write_all(&self.encode_buffer).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
