use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use crate::peer_key::PeerKey;
use crate::retransmit::TimerId;
use crate::socket::SocketEvent;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending packet to {:?}", to);

        let num_sent = self.send_to(packet_buf, to).await?;
        if num_sent != packet_buf.len() {
            bail!("sent only {} of {} bytes to {:?}", num_sent, packet_buf.len(), to);
        }
        Ok(())
    }
}

/// The one place through which connections send datagrams and arm retransmission timers.
///
/// Sending is a thin pass-through without retries: retrying is the responsibility of whoever
///  armed the retransmission timer.
#[derive(Clone)]
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
    events: mpsc::UnboundedSender<SocketEvent>,
    retransmit_interval: Duration,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>, events: mpsc::UnboundedSender<SocketEvent>, retransmit_interval: Duration) -> SendPipeline {
        SendPipeline {
            socket,
            events,
            retransmit_interval,
        }
    }

    pub fn events(&self) -> &mpsc::UnboundedSender<SocketEvent> {
        &self.events
    }

    pub async fn udp_send_to(&self, message: &[u8], to: SocketAddr) -> anyhow::Result<()> {
        self.socket.do_send_packet(to, message).await
    }

    /// Posts a timeout event for the given timer to the socket's event loop after the retransmit
    ///  interval. The timer refers to its connection by key only: if the connection is gone by
    ///  then, the event is discarded.
    pub fn schedule_retransmit(&self, peer: PeerKey, timer_id: TimerId) -> JoinHandle<()> {
        let events = self.events.clone();
        let interval = self.retransmit_interval;

        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if events.send(SocketEvent::RetransmitTimeout { peer, timer_id }).is_err() {
                trace!("socket is closed - discarding retransmit timeout");
            }
        })
    }
}
