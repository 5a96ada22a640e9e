use std::collections::hash_map::Entry;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use anyhow::{anyhow, bail};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::{lookup_host, UdpSocket};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use crate::config::RtpConfig;
use crate::connection::{Connection, RcvOutcome};
use crate::connection_handle::ConnectionHandle;
use crate::framing::unpack;
use crate::handshake::{HandshakePhase, HandshakeTransition};
use crate::peer_key::PeerKey;
use crate::receiver::ConnectionReceiver;
use crate::retransmit::TimerId;
use crate::send_pipeline::{SendPipeline, SendSocket};

/// Everything that happens to a socket apart from received datagrams is posted to its event loop
///  as a SocketEvent: API calls from [Socket] and [ConnectionHandle], and timeouts of
///  retransmission timers.
pub(crate) enum SocketEvent {
    CreateConnection { remote_addr: SocketAddr, reply: oneshot::Sender<ConnectionHandle> },
    CreateReceiver { receiver: Arc<dyn ConnectionReceiver> },
    Send { peer: PeerKey, data: Bytes },
    CloseConnection { peer: PeerKey },
    DeleteConnection { peer: PeerKey },
    RetransmitTimeout { peer: PeerKey, timer_id: TimerId },
    Close,
}

/// The state owned by a socket's event loop. All protocol state lives here, and since the event
///  loop handles one datagram or event at a time, none of it needs locking.
struct SocketState {
    config: Arc<RtpConfig>,
    send_pipeline: SendPipeline,
    connections: FxHashMap<PeerKey, Connection>,
    /// set for sockets in 'server role'
    receiver: Option<Arc<dyn ConnectionReceiver>>,
    valid: bool,
}

impl SocketState {
    fn new(config: Arc<RtpConfig>, send_pipeline: SendPipeline) -> SocketState {
        SocketState {
            config,
            send_pipeline,
            connections: FxHashMap::default(),
            receiver: None,
            valid: true,
        }
    }

    /// Routes a received datagram to its connection, creating the connection if this is the first
    ///  datagram from the peer
    async fn multiplex(&mut self, recv_result: io::Result<(usize, SocketAddr)>, buf: &[u8]) {
        if !self.valid {
            return;
        }

        let (num_read, from) = match recv_result {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                return;
            }
        };
        if num_read == 0 {
            trace!("received empty datagram from {:?} - ignoring", from);
            return;
        }

        let peer_key = PeerKey::from(from);
        let span = span!(Level::TRACE, "datagram_received", %peer_key);
        self.dispatch(peer_key, from, &buf[..num_read])
            .instrument(span)
            .await;
    }

    async fn dispatch(&mut self, peer_key: PeerKey, from: SocketAddr, datagram: &[u8]) {
        trace!("received {} bytes", datagram.len());

        let is_valid = match self.connections.entry(peer_key.clone()) {
            Entry::Occupied(e) => e.get().is_valid(),
            Entry::Vacant(e) => {
                debug!("first datagram from {} - creating connection", peer_key);
                e.insert(Connection::new(from, HandshakePhase::Listen, &self.config, &self.send_pipeline));
                false
            }
        };

        if is_valid {
            self.receive_on_connection(&peer_key, datagram).await;
        }
        else {
            self.connection_establishment(&peer_key, datagram).await;
        }
    }

    async fn receive_on_connection(&mut self, peer_key: &PeerKey, datagram: &[u8]) {
        let Some(connection) = self.connections.get_mut(peer_key) else {
            return;
        };
        if connection.handle_rcv(datagram, &self.send_pipeline).await == RcvOutcome::Closed {
            info!("connection closed by {}", peer_key);
            self.connections.remove(peer_key);
        }
    }

    /// Advances the handshake of a connection that is not established yet
    async fn connection_establishment(&mut self, peer_key: &PeerKey, datagram: &[u8]) {
        let segment = match unpack(datagram) {
            Ok(segment) => segment,
            Err(e) => {
                debug!("dropping malformed datagram: {}", e);
                return;
            }
        };
        if !segment.is_valid_header() {
            debug!("dropping {:?} with invalid header checksum", segment);
            return;
        }

        let Some(connection) = self.connections.get_mut(peer_key) else {
            return;
        };

        let Some(transition) = HandshakeTransition::for_segment(&segment, connection.sequence_no()) else {
            trace!("ignoring {:?} in handshake phase {:?}", segment, connection.phase());
            return;
        };
        debug!("{:?} in handshake phase {:?}: {:?}", segment, connection.phase(), transition);

        match transition {
            HandshakeTransition::SynReceived => {
                connection.on_syn_received(segment.receive_window, &self.send_pipeline).await;
            }
            HandshakeTransition::SynAckReceived => {
                connection.on_syn_ack_received(segment.receive_window, &self.send_pipeline).await;
                Self::notify_receiver(self.receiver.as_ref(), connection);
                connection.flush(&self.send_pipeline).await;
            }
            HandshakeTransition::AckReceived => {
                connection.establish();
                Self::notify_receiver(self.receiver.as_ref(), connection);
                connection.flush(&self.send_pipeline).await;
            }
            HandshakeTransition::DataReceived => {
                connection.establish();
                Self::notify_receiver(self.receiver.as_ref(), connection);
                connection.receive_segment(segment, &self.send_pipeline).await;
            }
        }
    }

    fn notify_receiver(receiver: Option<&Arc<dyn ConnectionReceiver>>, connection: &mut Connection) {
        if let Some(receiver) = receiver {
            if connection.take_receiver_notification() {
                info!("new connection from {}", connection.peer_key());
                receiver.on_connection(connection.handle().clone());
            }
        }
    }

    /// Registers a connection and sends the initial SYN. If there is a connection to the peer
    ///  already, that connection's handle is returned instead.
    async fn create_connection(&mut self, remote_addr: SocketAddr) -> ConnectionHandle {
        let peer_key = PeerKey::from(remote_addr);
        if let Some(connection) = self.connections.get(&peer_key) {
            debug!("connection to {} exists already", peer_key);
            return connection.handle().clone();
        }

        info!("connecting to {}", peer_key);
        let mut connection = Connection::new(remote_addr, HandshakePhase::SynSent, &self.config, &self.send_pipeline);
        connection.send_syn(&self.send_pipeline).await;

        let handle = connection.handle().clone();
        self.connections.insert(peer_key, connection);
        handle
    }

    fn create_receiver(&mut self, receiver: Arc<dyn ConnectionReceiver>) {
        if self.receiver.is_some() {
            warn!("replacing previously registered connection receiver");
        }
        info!("registered connection receiver - socket is in server role");
        self.receiver = Some(receiver);
    }

    async fn send_on_connection(&mut self, peer_key: &PeerKey, data: Bytes) {
        match self.connections.get_mut(peer_key) {
            Some(connection) => {
                connection.enqueue(data);
                connection.flush(&self.send_pipeline).await;
            }
            None => {
                debug!("no connection to {} - discarding {} bytes", peer_key, data.len());
            }
        }
    }

    fn delete_connection(&mut self, peer_key: &PeerKey) -> Option<Connection> {
        let result = self.connections.remove(peer_key);
        match &result {
            Some(_) => debug!("removed connection to {}", peer_key),
            None => debug!("no connection to {} - nothing to remove", peer_key),
        }
        result
    }

    async fn close_connection(&mut self, peer_key: &PeerKey) {
        if let Some(mut connection) = self.delete_connection(peer_key) {
            connection.retire_all_timers();
            connection.send_fin(&self.send_pipeline).await;
        }
    }

    async fn handle_retransmit_timeout(&mut self, peer_key: &PeerKey, timer_id: TimerId) {
        if !self.valid {
            return;
        }
        match self.connections.get_mut(peer_key) {
            Some(connection) => connection.on_retransmit_timeout(timer_id, &self.send_pipeline).await,
            None => trace!("timeout {} for {}, which is gone - ignoring", timer_id, peer_key),
        }
    }

    fn close(&mut self) {
        info!("closing socket");
        self.valid = false;
        for connection in self.connections.values_mut() {
            connection.retire_all_timers();
        }
        self.connections.clear();
    }

    /// returns `false` if the event loop should terminate
    async fn on_event(&mut self, event: SocketEvent) -> bool {
        match event {
            SocketEvent::CreateConnection { remote_addr, reply } => {
                let handle = self.create_connection(remote_addr).await;
                if reply.send(handle).is_err() {
                    debug!("caller of create_connection went away");
                }
            }
            SocketEvent::CreateReceiver { receiver } => self.create_receiver(receiver),
            SocketEvent::Send { peer, data } => self.send_on_connection(&peer, data).await,
            SocketEvent::CloseConnection { peer } => self.close_connection(&peer).await,
            SocketEvent::DeleteConnection { peer } => {
                self.delete_connection(&peer);
            }
            SocketEvent::RetransmitTimeout { peer, timer_id } => self.handle_retransmit_timeout(&peer, timer_id).await,
            SocketEvent::Close => {
                self.close();
                return false;
            }
        }
        true
    }
}

enum Next {
    Datagram(io::Result<(usize, SocketAddr)>),
    Event(Option<SocketEvent>),
}

/// A Socket is bound to a single UDP port through which it talks to any number of peers, with
///  one [Connection](ConnectionHandle) per peer address.
///
/// All protocol work happens in the socket's event loop, a single spawned task that owns all
///  connections. The socket and its connection handles talk to the event loop by message
///  passing. Dropping the socket terminates the event loop.
pub struct Socket {
    local_addr: SocketAddr,
    events: mpsc::UnboundedSender<SocketEvent>,
    event_loop: JoinHandle<()>,
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl Socket {
    /// Binds a socket to a textual IP address and port, using default settings otherwise
    pub async fn bind(ip: &str, port: &str, max_window_size: u32) -> anyhow::Result<Socket> {
        let ip: IpAddr = ip.parse()
            .map_err(|e| anyhow!("invalid IP address {:?}: {}", ip, e))?;
        let port: u16 = port.parse()
            .map_err(|e| anyhow!("invalid port {:?}: {}", port, e))?;

        Self::new(Arc::new(RtpConfig::new(SocketAddr::new(ip, port), max_window_size))).await
    }

    pub async fn new(config: Arc<RtpConfig>) -> anyhow::Result<Socket> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        info!("bound socket to {:?}", socket.local_addr()?);
        Self::new_with_send_socket(config, socket.clone(), Arc::new(socket))
    }

    pub(crate) fn new_with_send_socket(config: Arc<RtpConfig>, receive_socket: Arc<UdpSocket>, send_socket: Arc<dyn SendSocket>) -> anyhow::Result<Socket> {
        config.validate()?;
        let local_addr = receive_socket.local_addr()?;

        let (events, event_receiver) = mpsc::unbounded_channel();
        let send_pipeline = SendPipeline::new(send_socket, events.clone(), config.retransmit_interval);
        let state = SocketState::new(config, send_pipeline);

        let event_loop = tokio::spawn(Self::event_loop(state, receive_socket, event_receiver));

        Ok(Socket {
            local_addr,
            events,
            event_loop,
        })
    }

    /// There is always exactly one receive outstanding, into a fresh buffer. Datagrams and events
    ///  are handled strictly one at a time.
    async fn event_loop(mut state: SocketState, socket: Arc<UdpSocket>, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
        info!("starting event loop");

        loop {
            let mut buf = vec![0u8; state.config.max_datagram_size];
            let next = select! {
                recv_result = socket.recv_from(&mut buf) => Next::Datagram(recv_result),
                event = events.recv() => Next::Event(event),
            };

            match next {
                Next::Datagram(recv_result) => state.multiplex(recv_result, &buf).await,
                Next::Event(Some(event)) => {
                    if !state.on_event(event).await {
                        break;
                    }
                }
                Next::Event(None) => break,
            }
        }

        info!("event loop terminated");
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn post(&self, event: SocketEvent) -> anyhow::Result<()> {
        self.events.send(event)
            .map_err(|_| anyhow!("socket is closed"))
    }

    /// Resolves the destination (host names are allowed) and initiates a connection to it. The
    ///  returned handle can be used right away: data sent before the handshake completes is
    ///  queued.
    pub async fn create_connection(&self, ip: &str, port: &str) -> anyhow::Result<ConnectionHandle> {
        let port: u16 = port.parse()
            .map_err(|e| anyhow!("invalid port {:?}: {}", port, e))?;

        let candidates = lookup_host((ip, port)).await?
            .collect::<Vec<_>>();
        let remote_addr = candidates.iter()
            .find(|addr| addr.is_ipv6() == self.local_addr.is_ipv6())
            .or(candidates.first())
            .copied();
        let Some(remote_addr) = remote_addr else {
            bail!("{} does not resolve to any address", ip);
        };

        self.create_connection_to(remote_addr).await
    }

    pub async fn create_connection_to(&self, remote_addr: SocketAddr) -> anyhow::Result<ConnectionHandle> {
        let (reply, reply_receiver) = oneshot::channel();
        self.post(SocketEvent::CreateConnection { remote_addr, reply })?;
        reply_receiver.await
            .map_err(|_| anyhow!("socket is closed"))
    }

    /// Puts the socket in 'server role': the receiver is notified of every connection once its
    ///  handshake completes
    pub fn create_receiver(&self, receiver: impl ConnectionReceiver) -> anyhow::Result<()> {
        self.post(SocketEvent::CreateReceiver { receiver: Arc::new(receiver) })
    }

    /// Removes the connection without notifying the peer
    pub fn delete_connection(&self, peer: &PeerKey) -> anyhow::Result<()> {
        self.post(SocketEvent::DeleteConnection { peer: peer.clone() })
    }

    /// Stops the event loop, removing all connections. Operations on the socket's connection
    ///  handles fail afterwards.
    pub async fn close(&mut self) -> anyhow::Result<()> {
        if self.event_loop.is_finished() {
            return Ok(());
        }
        if self.post(SocketEvent::Close).is_err() {
            debug!("event loop is terminated already");
        }
        (&mut self.event_loop).await?;
        Ok(())
    }
}
