use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::{anyhow, bail};
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use crate::peer_key::PeerKey;
use crate::socket::SocketEvent;

/// The application's view of a connection. Handles are cheap to clone; all clones refer to the
///  same connection, which is owned by the socket's event loop.
///
/// Data can be sent through a handle right away, even before the handshake is complete: it is
///  queued and sent once the connection is established.
#[derive(Clone)]
pub struct ConnectionHandle {
    peer_addr: SocketAddr,
    peer_key: PeerKey,
    events: mpsc::UnboundedSender<SocketEvent>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    established: watch::Receiver<bool>,
}

impl Debug for ConnectionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionHandle{{{}}}", self.peer_key)
    }
}

impl ConnectionHandle {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        events: mpsc::UnboundedSender<SocketEvent>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        established: watch::Receiver<bool>,
    ) -> ConnectionHandle {
        ConnectionHandle {
            peer_addr,
            peer_key: peer_addr.into(),
            events,
            inbound: Arc::new(Mutex::new(inbound)),
            established,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn peer_key(&self) -> &PeerKey {
        &self.peer_key
    }

    pub fn is_established(&self) -> bool {
        *self.established.borrow()
    }

    /// Waits until the handshake is complete. This fails if the connection is removed (or the
    ///  socket closed) before that.
    pub async fn wait_established(&self) -> anyhow::Result<()> {
        let mut established = self.established.clone();
        if established.wait_for(|is_established| *is_established).await.is_err() {
            bail!("connection to {} was removed before it was established", self.peer_key);
        }
        Ok(())
    }

    /// Queues data for reliable, in-order delivery to the peer. Data is split into segments as
    ///  necessary, but the receiving side does not see segment boundaries as message boundaries.
    pub fn send(&self, data: impl Into<Bytes>) -> anyhow::Result<()> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }

        self.events.send(SocketEvent::Send { peer: self.peer_key.clone(), data })
            .map_err(|_| anyhow!("socket is closed"))
    }

    /// Waits for the next chunk of data received on this connection, in the order it was sent.
    ///  Returns `None` when the connection is removed (by either side) or the socket closed.
    pub async fn recv(&self) -> Option<Bytes> {
        self.inbound.lock().await
            .recv().await
    }

    /// Sends a (best-effort) FIN to the peer and removes the connection from its socket
    pub fn close(&self) -> anyhow::Result<()> {
        self.events.send(SocketEvent::CloseConnection { peer: self.peer_key.clone() })
            .map_err(|_| anyhow!("socket is closed"))
    }
}
