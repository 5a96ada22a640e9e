#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::debug;
use crate::connection_handle::ConnectionHandle;

/// Registered by a listening ('server role') socket: called exactly once per connection, when
///  the connection's handshake completes.
///
/// NB: This is called from inside the socket's event loop, so it must not block. Long-running
///      work per connection should be spawned.
#[cfg_attr(test, automock)]
pub trait ConnectionReceiver: Send + Sync + 'static {
    fn on_connection(&self, connection: ConnectionHandle);
}

/// Forwards new connections to a channel, which is convenient for accept-loop style servers
impl ConnectionReceiver for mpsc::UnboundedSender<ConnectionHandle> {
    fn on_connection(&self, connection: ConnectionHandle) {
        if let Err(e) = self.send(connection) {
            debug!("receiver channel is closed - dropping handle for {}", e.0.peer_key());
        }
    }
}
