use std::fmt;

use rand::RngCore;

/// A remote endpoint address, "host:port".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Addr(String);

impl Addr {
    pub fn new(addr: impl Into<String>) -> Addr {
        Addr(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Addr {
    fn from(addr: &str) -> Addr {
        Addr(addr.to_string())
    }
}

impl From<String> for Addr {
    fn from(addr: String) -> Addr {
        Addr(addr)
    }
}

/// Nonce identifying one process instance of a transport endpoint. Minted
/// once per `Listener`/`Dialer` and exchanged during the handshake, so that a
/// restart of the same host:port is distinguishable from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    pub fn mint() -> LinkId {
        LinkId(rand::thread_rng().next_u64())
    }

    pub fn from_u64(id: u64) -> LinkId {
        LinkId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifier of one logical conn, unique within its link. Chosen at random
/// by the opening side; a collision is rejected by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub fn mint() -> ConnId {
        ConnId(rand::thread_rng().next_u64())
    }

    pub fn from_u64(id: u64) -> ConnId {
        ConnId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_distinct() {
        assert_ne!(ConnId::mint(), ConnId::mint());
        assert_ne!(LinkId::mint(), LinkId::mint());
    }

    #[test]
    fn id_display_is_fixed_width_hex() {
        assert_eq!(ConnId::from_u64(0x1f).to_string(), "000000000000001f");
    }
}
