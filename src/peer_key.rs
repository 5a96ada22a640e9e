use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;

/// Connections are identified by their peer's address, rendered as `"<ip>:<port>"`.
///
/// NB: IPv6 addresses are rendered *without* brackets (e.g. `::1:8080`), which is different
///      from [SocketAddr]'s `Display` implementation. The exact format is part of the protocol's
///      public behavior (it is used in logs and for lookup), so it must not be changed.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PeerKey(String);

impl PeerKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for PeerKey {
    fn from(addr: SocketAddr) -> Self {
        PeerKey(get_endpoint_str(addr))
    }
}

impl Display for PeerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for PeerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

pub fn get_endpoint_str(addr: SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}
