//! Wire level of the transport: the frame codec, the framed halves of a
//! socket, and the hot-swappable stream holder links read and write through.
//!
//! Everything here is oblivious to links and conns; it moves `Frame` values
//! across one byte stream and nothing more.

pub use connection::{framed, FrameReader, FrameWriter};
pub use frame::Frame;
pub use swap::SwapConn;

mod connection;
mod frame;
mod swap;
