use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use crate::framing::unpack;
use crate::segment::Segment;
use crate::send_pipeline::SendSocket;

/// convenience for unit test code: a localhost address based on a number, the same number
///  generating the same address and different numbers different addresses
pub fn test_addr_from_number(number: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, number))
}

/// Records every datagram instead of sending it
#[derive(Default)]
pub struct CollectingSendSocket {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

impl CollectingSendSocket {
    pub fn new() -> Arc<CollectingSendSocket> {
        Default::default()
    }

    /// removes and returns the datagrams sent so far
    pub fn take(&self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// removes the datagrams sent so far, and returns them decoded
    pub fn take_segments(&self) -> Vec<(SocketAddr, Segment)> {
        self.take().into_iter()
            .map(|(to, buf)| (to, unpack(&buf).unwrap()))
            .collect()
    }

    pub fn num_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl SendSocket for CollectingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().unwrap()
            .push((to, Bytes::copy_from_slice(packet_buf)));
        Ok(())
    }
}

/// Sends through a real UDP socket, but silently drops the first `num_dropped_syns` initial SYN
///  segments. It counts all initial SYNs passed to it, dropped or not.
pub struct LossySendSocket {
    socket: Arc<UdpSocket>,
    syns_to_drop: AtomicUsize,
    num_syns: AtomicUsize,
}

impl LossySendSocket {
    pub fn new(socket: Arc<UdpSocket>, num_dropped_syns: usize) -> Arc<LossySendSocket> {
        Arc::new(LossySendSocket {
            socket,
            syns_to_drop: AtomicUsize::new(num_dropped_syns),
            num_syns: AtomicUsize::new(0),
        })
    }

    pub fn num_syns(&self) -> usize {
        self.num_syns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SendSocket for LossySendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> anyhow::Result<()> {
        let segment = unpack(packet_buf)?;
        if segment.syn && !segment.ack {
            self.num_syns.fetch_add(1, Ordering::SeqCst);
            let dropped = self.syns_to_drop
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if dropped {
                return Ok(());
            }
        }
        self.socket.do_send_packet(to, packet_buf).await
    }
}
