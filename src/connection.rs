use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};
use crate::config::RtpConfig;
use crate::connection_handle::ConnectionHandle;
use crate::framing::{pack, unpack};
use crate::handshake::{HandshakePhase, SEQUENCE_NO_ESTABLISHED};
use crate::peer_key::PeerKey;
use crate::retransmit::{RetransmitTarget, RetransmitTimer, RetransmitTimers, TimerId};
use crate::safe_converter::PrecheckedCast;
use crate::segment::Segment;
use crate::send_pipeline::SendPipeline;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RcvOutcome {
    Continue,
    /// the peer sent a FIN, the connection must be removed
    Closed,
}

/// The state of a connection to a single peer. Connections are owned by their socket's event
///  loop and never receive datagrams directly: the socket hands them over after demultiplexing.
///
/// Data sequence numbers start at 0 once the handshake is complete. Each data segment carries a
///  single sequence number, and acknowledgements are cumulative ('next expected'). The
///  number of unacknowledged segments in flight is bounded by the window the peer advertised.
pub struct Connection {
    remote_addr: SocketAddr,
    peer_key: PeerKey,
    max_window_size: u32,
    max_segment_payload: usize,

    phase: HandshakePhase,
    remote_window_size: u32,

    /// sequence number of the next data segment to be sent
    send_next: i32,
    /// lowest sequence number that was sent but not acknowledged yet
    send_unacked: i32,
    /// chunks of application data waiting for the connection to become valid or for the
    ///  peer's window to open
    outgoing: VecDeque<Bytes>,

    /// sequence number of the next data segment to be delivered to the application
    receive_next: i32,
    /// segments that arrived ahead of `receive_next`
    receive_buffer: BTreeMap<i32, Bytes>,
    inbound: mpsc::UnboundedSender<Bytes>,

    established: watch::Sender<bool>,
    handle: ConnectionHandle,
    receiver_notified: bool,

    timers: RetransmitTimers,
}

impl Connection {
    pub fn new(remote_addr: SocketAddr, phase: HandshakePhase, config: &RtpConfig, send_pipeline: &SendPipeline) -> Connection {
        let (inbound, inbound_receiver) = mpsc::unbounded_channel();
        let (established, established_receiver) = watch::channel(false);
        let handle = ConnectionHandle::new(remote_addr, send_pipeline.events().clone(), inbound_receiver, established_receiver);

        Connection {
            remote_addr,
            peer_key: remote_addr.into(),
            max_window_size: config.max_window_size,
            max_segment_payload: config.max_segment_payload,
            phase,
            remote_window_size: config.max_window_size,
            send_next: SEQUENCE_NO_ESTABLISHED,
            send_unacked: SEQUENCE_NO_ESTABLISHED,
            outgoing: VecDeque::new(),
            receive_next: SEQUENCE_NO_ESTABLISHED,
            receive_buffer: BTreeMap::new(),
            inbound,
            established,
            handle,
            receiver_notified: false,
            timers: RetransmitTimers::default(),
        }
    }

    pub fn peer_key(&self) -> &PeerKey {
        &self.peer_key
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// The connection's sequence number as it appears on the wire: a handshake sentinel until
    ///  the connection is established, the next data sequence number afterwards
    pub fn sequence_no(&self) -> i32 {
        self.phase.sentinel_sequence_no()
            .unwrap_or(self.send_next)
    }

    pub fn is_valid(&self) -> bool {
        self.phase == HandshakePhase::Established
    }

    pub fn num_pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn set_remote_window_size(&mut self, remote_window_size: u32) {
        if remote_window_size != self.remote_window_size {
            trace!("{}: remote window {} -> {}", self.peer_key, self.remote_window_size, remote_window_size);
        }
        self.remote_window_size = remote_window_size;
    }

    /// The receive window advertised to the peer: the number of segments that can still be
    ///  buffered out of order
    pub fn advertised_window(&self) -> u32 {
        let num_buffered: u32 = self.receive_buffer.len().prechecked_cast();
        self.max_window_size.saturating_sub(num_buffered)
    }

    fn in_flight(&self) -> u32 {
        (self.send_next - self.send_unacked).prechecked_cast()
    }

    /// Returns `true` exactly once, for the first caller: the application's receiver must see
    ///  each connection only once
    pub fn take_receiver_notification(&mut self) -> bool {
        !std::mem::replace(&mut self.receiver_notified, true)
    }

    pub fn establish(&mut self) {
        if self.is_valid() {
            return;
        }
        debug!("connection to {} is established", self.peer_key);

        self.phase = HandshakePhase::Established;
        self.established.send_replace(true);

        let sequence_no = self.sequence_no();
        let num_retired = self.timers.retire_matching(|target| matches!(target,
            RetransmitTarget::Handshake { next_sequence_no } if sequence_no >= *next_sequence_no));
        trace!("{}: retired {} handshake timer(s)", self.peer_key, num_retired);
    }

    /// Splits application data into segment-sized chunks and queues them. Nothing is sent before
    ///  the next call to [Connection::flush].
    pub fn enqueue(&mut self, mut data: Bytes) {
        while !data.is_empty() {
            let chunk_len = data.len().min(self.max_segment_payload);
            self.outgoing.push_back(data.split_to(chunk_len));
        }
    }

    /// Sends queued data for as long as the peer's window permits. A window of 0 is treated as 1
    ///  so that a connection can not stall.
    pub async fn flush(&mut self, send_pipeline: &SendPipeline) {
        while self.is_valid() && self.in_flight() < self.remote_window_size.max(1) {
            let Some(chunk) = self.outgoing.pop_front() else {
                break;
            };

            let sequence_no = self.send_next;
            let Some(send_next) = sequence_no.checked_add(1) else {
                error!("{}: sequence number space is exhausted - discarding {} queued segment(s)", self.peer_key, self.outgoing.len() + 1);
                self.outgoing.clear();
                break;
            };
            self.send_next = send_next;

            trace!("{}: sending data segment #{} with {} bytes", self.peer_key, sequence_no, chunk.len());
            let segment = Segment::data(sequence_no, self.advertised_window(), chunk);
            self.send_tracked(pack(&segment), RetransmitTarget::Data { sequence_no }, send_pipeline).await;
        }
    }

    /// Initial leg of the handshake, for connections created locally
    pub async fn send_syn(&mut self, send_pipeline: &SendPipeline) {
        self.phase = HandshakePhase::SynSent;
        let segment = Segment::syn(self.sequence_no(), self.advertised_window());
        debug!("{}: sending {:?}", self.peer_key, segment);
        self.send_tracked(pack(&segment), RetransmitTarget::Handshake { next_sequence_no: segment.sequence_no + 1 }, send_pipeline).await;
    }

    /// A SYN was received: reply with a SYN+ACK. A retransmitted SYN replaces the pending SYN+ACK
    ///  rather than adding a second one.
    pub async fn on_syn_received(&mut self, remote_window_size: u32, send_pipeline: &SendPipeline) {
        self.phase = HandshakePhase::SynReceived;
        self.set_remote_window_size(remote_window_size);

        self.timers.retire_matching(|target| target == &RetransmitTarget::Handshake { next_sequence_no: SEQUENCE_NO_ESTABLISHED });

        let segment = Segment::syn_ack(self.sequence_no(), self.advertised_window());
        debug!("{}: sending {:?}", self.peer_key, segment);
        self.send_tracked(pack(&segment), RetransmitTarget::Handshake { next_sequence_no: segment.sequence_no + 1 }, send_pipeline).await;
    }

    /// A SYN+ACK was received: the connection is established, and the final ACK is sent. The
    ///  final ACK is not retransmitted on a timer: if it is lost, the peer's SYN+ACK
    ///  retransmission triggers it again.
    pub async fn on_syn_ack_received(&mut self, remote_window_size: u32, send_pipeline: &SendPipeline) {
        self.set_remote_window_size(remote_window_size);
        self.establish();
        self.send_handshake_ack(send_pipeline).await;
    }

    async fn send_handshake_ack(&self, send_pipeline: &SendPipeline) {
        let segment = Segment::ack(SEQUENCE_NO_ESTABLISHED, self.advertised_window());
        debug!("{}: sending {:?}", self.peer_key, segment);
        self.send_untracked(&segment, send_pipeline).await;
    }

    /// Data path for an established connection
    pub async fn handle_rcv(&mut self, datagram: &[u8], send_pipeline: &SendPipeline) -> RcvOutcome {
        let segment = match unpack(datagram) {
            Ok(segment) => segment,
            Err(e) => {
                debug!("{}: dropping malformed datagram: {}", self.peer_key, e);
                return RcvOutcome::Continue;
            }
        };
        if !segment.is_valid_header() {
            debug!("{}: dropping segment with invalid header checksum", self.peer_key);
            return RcvOutcome::Continue;
        }
        trace!("{}: received {:?}", self.peer_key, segment);

        if segment.fin {
            debug!("{}: received FIN", self.peer_key);
            return RcvOutcome::Closed;
        }

        if segment.syn {
            if segment.ack {
                debug!("{}: duplicate SYN+ACK - the final ACK was probably lost, re-sending it", self.peer_key);
                self.send_handshake_ack(send_pipeline).await;
            }
            else {
                debug!("{}: ignoring SYN on an established connection", self.peer_key);
            }
        }
        else if segment.has_data() {
            self.receive_segment(segment, send_pipeline).await;
        }
        else if segment.ack {
            self.on_ack(&segment, send_pipeline).await;
        }
        else {
            trace!("{}: ignoring empty segment", self.peer_key);
        }
        RcvOutcome::Continue
    }

    /// Buffers a data segment, delivers what is contiguous to the application, and acknowledges
    pub async fn receive_segment(&mut self, segment: Segment, send_pipeline: &SendPipeline) {
        if !segment.is_valid_data() {
            debug!("{}: dropping segment #{} with invalid data checksum", self.peer_key, segment.sequence_no);
            return;
        }
        self.set_remote_window_size(segment.receive_window);

        let sequence_no = segment.sequence_no;
        if sequence_no < self.receive_next {
            debug!("{}: discarding duplicate segment #{}", self.peer_key, sequence_no);
        }
        else if i64::from(sequence_no) >= i64::from(self.receive_next) + i64::from(self.max_window_size) {
            debug!("{}: discarding segment #{} beyond the receive window ({} + {})", self.peer_key, sequence_no, self.receive_next, self.max_window_size);
        }
        else {
            match self.receive_buffer.entry(sequence_no) {
                Entry::Vacant(e) => {
                    e.insert(segment.data);
                }
                Entry::Occupied(_) => {
                    debug!("{}: discarding segment #{} which is buffered already", self.peer_key, sequence_no);
                }
            }
            self.deliver_contiguous();
        }

        self.send_ack(send_pipeline).await;
        self.flush(send_pipeline).await;
    }

    fn deliver_contiguous(&mut self) {
        while let Some(data) = self.receive_buffer.remove(&self.receive_next) {
            trace!("{}: delivering segment #{}", self.peer_key, self.receive_next);
            if self.inbound.send(data).is_err() {
                trace!("{}: nobody is receiving - discarding data", self.peer_key);
            }

            match self.receive_next.checked_add(1) {
                Some(receive_next) => self.receive_next = receive_next,
                None => {
                    error!("{}: sequence number space is exhausted", self.peer_key);
                    break;
                }
            }
        }
    }

    async fn on_ack(&mut self, segment: &Segment, send_pipeline: &SendPipeline) {
        let ack_no = segment.sequence_no;
        if ack_no < self.send_unacked || ack_no > self.send_next {
            trace!("{}: ignoring ACK #{} outside of [{}, {}]", self.peer_key, ack_no, self.send_unacked, self.send_next);
            return;
        }

        self.send_unacked = ack_no;
        let num_retired = self.timers.retire_matching(|target| matches!(target,
            RetransmitTarget::Data { sequence_no } if *sequence_no < ack_no));
        trace!("{}: ACK #{} retired {} timer(s)", self.peer_key, ack_no, num_retired);

        self.set_remote_window_size(segment.receive_window);
        self.flush(send_pipeline).await;
    }

    pub async fn send_ack(&self, send_pipeline: &SendPipeline) {
        let segment = Segment::ack(self.receive_next, self.advertised_window());
        self.send_untracked(&segment, send_pipeline).await;
    }

    /// best effort: a lost FIN is not retransmitted
    pub async fn send_fin(&self, send_pipeline: &SendPipeline) {
        let segment = Segment::fin(self.sequence_no(), self.advertised_window());
        debug!("{}: sending {:?}", self.peer_key, segment);
        self.send_untracked(&segment, send_pipeline).await;
    }

    async fn send_untracked(&self, segment: &Segment, send_pipeline: &SendPipeline) {
        if let Err(e) = send_pipeline.udp_send_to(&pack(segment), self.remote_addr).await {
            warn!("{}: error sending {:?}: {}", self.peer_key, segment, e);
        }
    }

    /// Sends a message and arms a retransmission timer for it. If the initial send fails, no
    ///  timer is armed, just as a failed retransmission retires its timer.
    async fn send_tracked(&mut self, message: Bytes, target: RetransmitTarget, send_pipeline: &SendPipeline) {
        if let Err(e) = send_pipeline.udp_send_to(&message, self.remote_addr).await {
            warn!("{}: error sending segment, not retransmitting: {}", self.peer_key, e);
            return;
        }

        let timer_id = self.timers.next_id();
        let timeout_handle = send_pipeline.schedule_retransmit(self.peer_key.clone(), timer_id);
        self.timers.insert(timer_id, RetransmitTimer::new(message, target, timeout_handle));
    }

    fn is_target_reached(&self, target: RetransmitTarget) -> bool {
        match target {
            RetransmitTarget::Handshake { next_sequence_no } => self.sequence_no() >= next_sequence_no,
            RetransmitTarget::Data { sequence_no } => sequence_no < self.send_unacked,
        }
    }

    /// Resends a timer's message verbatim and re-arms it, unless its target was reached in the
    ///  meantime
    pub async fn on_retransmit_timeout(&mut self, timer_id: TimerId, send_pipeline: &SendPipeline) {
        let Some(timer) = self.timers.get(timer_id) else {
            trace!("{}: timer {} was retired", self.peer_key, timer_id);
            return;
        };

        if self.is_target_reached(timer.target) {
            trace!("{}: target {:?} of timer {} is reached - retiring", self.peer_key, timer.target, timer_id);
            self.timers.retire(timer_id);
            return;
        }

        debug!("{}: timeout at sequence number {} - retransmitting {:?}", self.peer_key, self.sequence_no(), timer.target);
        let message = timer.message.clone();
        match send_pipeline.udp_send_to(&message, self.remote_addr).await {
            Ok(()) => {
                let timeout_handle = send_pipeline.schedule_retransmit(self.peer_key.clone(), timer_id);
                if let Some(timer) = self.timers.get_mut(timer_id) {
                    timer.rearm(timeout_handle);
                }
            }
            Err(e) => {
                warn!("{}: error retransmitting, retiring timer {}: {}", self.peer_key, timer_id, e);
                self.timers.retire(timer_id);
            }
        }
    }

    pub fn retire_all_timers(&mut self) {
        self.timers.retire_all();
    }
}
