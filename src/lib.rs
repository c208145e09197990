pub mod network;
pub mod service;
pub mod transport;

pub use network::Frame;
pub use service::{setup_local_tracing, AppError, AppResult, TransportConfig};
pub use transport::{Addr, Conn, ConnId, Dialer, Link, LinkId, Listener};
