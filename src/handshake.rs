//! Connection establishment is a three-way handshake in which sequence numbers on the wire double
//!  as markers for the handshake's progress:
//!
//! ```ascii
//!  initiator                                   responder
//!  SynSent     -- SYN       seq=-2 ------->    Listen -> SynReceived
//!  Established <- SYN+ACK   seq=-1 --------    SynReceived
//!              -- ACK       seq=0  ------->    Established
//! ```
//!
//! The final ACK may be overtaken (or replaced, if it gets lost) by the initiator's first data
//!  segment, which has sequence number 0 as well, so that completes the handshake too.
//!
//! Internally, the handshake's progress is tracked as an explicit [HandshakePhase], and the
//!  sentinel sequence numbers exist only at the wire boundary.

use crate::segment::Segment;

/// sequence number of a connection before the handshake, and of the initial SYN
pub const SEQUENCE_NO_INITIAL: i32 = -2;
/// sequence number of the responder after receiving a SYN, and of the SYN+ACK
pub const SEQUENCE_NO_SYN_RECEIVED: i32 = -1;
/// sequence number at which the handshake is complete, and of the first data segment
pub const SEQUENCE_NO_ESTABLISHED: i32 = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HandshakePhase {
    /// created locally, SYN is sent
    SynSent,
    /// created because a datagram from an unknown peer arrived
    Listen,
    /// SYN was received, SYN+ACK is sent
    SynReceived,
    Established,
}

impl HandshakePhase {
    /// The sentinel sequence number representing this phase on the wire, or `None` if the
    ///  handshake is complete and the data sequence number applies
    pub fn sentinel_sequence_no(&self) -> Option<i32> {
        match self {
            HandshakePhase::SynSent | HandshakePhase::Listen => Some(SEQUENCE_NO_INITIAL),
            HandshakePhase::SynReceived => Some(SEQUENCE_NO_SYN_RECEIVED),
            HandshakePhase::Established => None,
        }
    }
}

/// The four ways a segment can advance a connection that is not established yet
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HandshakeTransition {
    /// initial SYN from the initiator: reply with SYN+ACK
    SynReceived,
    /// SYN+ACK from the responder: reply with the final ACK, connection is established
    SynAckReceived,
    /// final ACK from the initiator: connection is established
    AckReceived,
    /// The initiator's first data segment arrived before (or instead of) the final ACK:
    ///  connection is established, and the segment's payload must be delivered
    DataReceived,
}

impl HandshakeTransition {
    /// Determines the transition for a segment with valid header checksum. `own_sequence_no` is
    ///  the receiving connection's current sequence number.
    ///
    /// Returns `None` for segments that do not match any transition: they are stray or
    ///  duplicate packets and must be ignored.
    pub fn for_segment(segment: &Segment, own_sequence_no: i32) -> Option<HandshakeTransition> {
        if segment.syn && segment.sequence_no == SEQUENCE_NO_INITIAL {
            Some(HandshakeTransition::SynReceived)
        }
        else if segment.syn && segment.ack && segment.sequence_no == SEQUENCE_NO_SYN_RECEIVED {
            Some(HandshakeTransition::SynAckReceived)
        }
        else if segment.ack && !segment.syn && segment.sequence_no == SEQUENCE_NO_ESTABLISHED {
            Some(HandshakeTransition::AckReceived)
        }
        else if segment.has_data()
            && segment.sequence_no == SEQUENCE_NO_ESTABLISHED
            && own_sequence_no == SEQUENCE_NO_SYN_RECEIVED
        {
            Some(HandshakeTransition::DataReceived)
        }
        else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rstest::rstest;

    #[rstest]
    #[case::syn_sent(HandshakePhase::SynSent, Some(-2))]
    #[case::listen(HandshakePhase::Listen, Some(-2))]
    #[case::syn_received(HandshakePhase::SynReceived, Some(-1))]
    #[case::established(HandshakePhase::Established, None)]
    fn test_sentinel_sequence_no(#[case] phase: HandshakePhase, #[case] expected: Option<i32>) {
        assert_eq!(phase.sentinel_sequence_no(), expected);
    }

    #[rstest]
    #[case::syn(Segment::syn(-2, 5), -2, Some(HandshakeTransition::SynReceived))]
    #[case::syn_while_syn_received(Segment::syn(-2, 5), -1, Some(HandshakeTransition::SynReceived))]
    #[case::syn_ack(Segment::syn_ack(-1, 5), -2, Some(HandshakeTransition::SynAckReceived))]
    #[case::ack(Segment::ack(0, 5), -1, Some(HandshakeTransition::AckReceived))]
    #[case::ack_without_syn_received(Segment::ack(0, 5), -2, Some(HandshakeTransition::AckReceived))]
    #[case::data(Segment::data(0, 5, Bytes::from_static(b"a")), -1, Some(HandshakeTransition::DataReceived))]
    #[case::data_before_syn(Segment::data(0, 5, Bytes::from_static(b"a")), -2, None)]
    #[case::data_later_seq(Segment::data(1, 5, Bytes::from_static(b"a")), -1, None)]
    #[case::syn_wrong_seq(Segment::syn(0, 5), -2, None)]
    #[case::syn_ack_wrong_seq(Segment::syn_ack(-2, 5), -2, Some(HandshakeTransition::SynReceived))]
    #[case::syn_ack_seq_0(Segment::syn_ack(0, 5), -2, None)]
    #[case::ack_wrong_seq(Segment::ack(1, 5), -1, None)]
    #[case::empty_data(Segment::data(0, 5, Bytes::new()), -1, None)]
    #[case::fin(Segment::fin(0, 5), -1, None)]
    fn test_for_segment(#[case] segment: Segment, #[case] own_sequence_no: i32, #[case] expected: Option<HandshakeTransition>) {
        assert_eq!(HandshakeTransition::for_segment(&segment, own_sequence_no), expected);
    }
}
