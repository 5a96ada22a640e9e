//! RTP ('reliable transport protocol', no relation to the real-time media protocol) is a
//!  connection-oriented transport on top of UDP, providing ordered, checksummed and retransmitted
//!  delivery between two endpoints over a network that may drop, duplicate, reorder or corrupt
//!  datagrams.
//!
//! ## Design
//!
//! * A [Socket](socket::Socket) is bound to a single UDP port, and all connections go through it
//!   * connections are identified by the peer's address, rendered as `"<ip>:<port>"`
//!   * a connection is created when the first datagram from an unknown peer arrives, or when the
//!      application initiates it
//! * Connections are set up by a three-way handshake (SYN, SYN+ACK, ACK), see [handshake]
//! * Every segment carries a CRC-32 checksum of its header, and a separate checksum of its
//!    payload. Corrupted segments are dropped silently; recovery is by retransmission only
//! * Unacknowledged segments are retransmitted at a fixed interval (200ms by default) until they
//!    are acknowledged. There is no backoff and no limit for the number of retries
//! * Flow control is by receive window: each side advertises how many segments it is willing to
//!    buffer, and a sender never has more unacknowledged data segments in flight
//!   * acknowledgements are cumulative, i.e. they carry the next expected sequence number
//!   * the receiver buffers segments that arrive out of order, and delivers data to the
//!      application strictly in order
//! * There is no congestion control, no encryption, and no path MTU discovery
//!
//! ## Concurrency
//!
//! Each socket has an event loop running in a single tokio task. It owns all connections and
//!  handles received datagrams, API calls and timer expiry strictly one at a time, so protocol
//!  state needs no locks. Application code talks to the event loop through
//!  [ConnectionHandle](connection_handle::ConnectionHandle)s, which can be cloned and shared
//!  between tasks freely.
//!
//! ## Segment format
//!
//! One segment per UDP datagram - all numbers in network byte order (BE):
//! ```ascii
//!  0: length of the rest of the datagram (u32)
//!  4: flags (u8):
//!     * bit 0: SYN
//!     * bit 1: ACK
//!     * bit 2: FIN
//!  5: sequence number (i32) - negative numbers are used during the handshake
//!  9: receive window (u32)
//! 13: header checksum (u32)
//! 17: data checksum (u32) - 0 if there is no payload
//! 21: payload
//! ```
//!
//! The header checksum is calculated over the sequence number, the ACK, SYN and FIN flags (one
//!  byte each, in that order) and the receive window.
//!
//! Data segments have no flags set. Pure acknowledgements have the ACK flag and no payload, and
//!  their sequence number is the next sequence number the sender expects to receive.

pub mod checksum;
pub mod config;
mod connection;
pub mod connection_handle;
pub mod framing;
pub mod handshake;
pub mod peer_key;
pub mod receiver;
mod retransmit;
mod safe_converter;
pub mod segment;
mod send_pipeline;
pub mod socket;

#[cfg(test)]
mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
