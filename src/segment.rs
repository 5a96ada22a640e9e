use std::fmt::{Debug, Formatter};
use bytes::Bytes;
use crate::checksum::{check_data_checksum, check_header_checksum, create_data_checksum, create_header_checksum};

/// A Segment is the protocol's unit of transmission: one segment per UDP datagram.
///
/// Segments are created through the constructor functions below which initialize both
///  checksums, so a freshly created segment is always valid.
#[derive(Clone, Eq, PartialEq)]
pub struct Segment {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    /// Negative values are used as handshake markers, see [crate::handshake]
    pub sequence_no: i32,
    /// The sender's advertised receive window, in segments
    pub receive_window: u32,
    pub header_checksum: u32,
    /// 0 if and only if `data` is empty
    pub data_checksum: u32,
    pub data: Bytes,
}

impl Debug for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SEG{{")?;
        if self.syn { write!(f, "SYN ")?; }
        if self.ack { write!(f, "ACK ")?; }
        if self.fin { write!(f, "FIN ")?; }
        write!(f, "#{} W{} {}B}}", self.sequence_no, self.receive_window, self.data.len())
    }
}

impl Segment {
    fn new(syn: bool, ack: bool, fin: bool, sequence_no: i32, receive_window: u32, data: Bytes) -> Segment {
        let mut result = Segment {
            syn,
            ack,
            fin,
            sequence_no,
            receive_window,
            header_checksum: 0,
            data_checksum: create_data_checksum(&data),
            data,
        };
        result.header_checksum = create_header_checksum(&result);
        result
    }

    /// first leg of the handshake
    pub fn syn(sequence_no: i32, receive_window: u32) -> Segment {
        Self::new(true, false, false, sequence_no, receive_window, Bytes::new())
    }

    /// second leg of the handshake
    pub fn syn_ack(sequence_no: i32, receive_window: u32) -> Segment {
        Self::new(true, true, false, sequence_no, receive_window, Bytes::new())
    }

    /// Final leg of the handshake, and cumulative acknowledgement afterwards: `sequence_no` is
    ///  the next sequence number the sender expects to receive.
    pub fn ack(sequence_no: i32, receive_window: u32) -> Segment {
        Self::new(false, true, false, sequence_no, receive_window, Bytes::new())
    }

    pub fn data(sequence_no: i32, receive_window: u32, data: Bytes) -> Segment {
        Self::new(false, false, false, sequence_no, receive_window, data)
    }

    pub fn fin(sequence_no: i32, receive_window: u32) -> Segment {
        Self::new(false, false, true, sequence_no, receive_window, Bytes::new())
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn is_valid_header(&self) -> bool {
        check_header_checksum(self)
    }

    pub fn is_valid_data(&self) -> bool {
        check_data_checksum(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::syn(Segment::syn(-2, 16), true, false, false, -2, 16)]
    #[case::syn_ack(Segment::syn_ack(-1, 8), true, true, false, -1, 8)]
    #[case::ack(Segment::ack(0, 4), false, true, false, 0, 4)]
    #[case::fin(Segment::fin(17, 3), false, false, true, 17, 3)]
    fn test_control_segments(#[case] segment: Segment, #[case] syn: bool, #[case] ack: bool, #[case] fin: bool, #[case] sequence_no: i32, #[case] receive_window: u32) {
        assert_eq!(segment.syn, syn);
        assert_eq!(segment.ack, ack);
        assert_eq!(segment.fin, fin);
        assert_eq!(segment.sequence_no, sequence_no);
        assert_eq!(segment.receive_window, receive_window);
        assert!(!segment.has_data());
        assert_eq!(segment.data_checksum, 0);
        assert!(segment.is_valid_header());
        assert!(segment.is_valid_data());
    }

    #[test]
    fn test_data_segment() {
        let segment = Segment::data(5, 9, Bytes::from_static(b"abc"));
        assert!(!segment.syn && !segment.ack && !segment.fin);
        assert!(segment.has_data());
        assert_ne!(segment.data_checksum, 0);
        assert!(segment.is_valid_header());
        assert!(segment.is_valid_data());
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", Segment::syn_ack(-1, 8)), "SEG{SYN ACK #-1 W8 0B}");
        assert_eq!(format!("{:?}", Segment::data(3, 2, Bytes::from_static(b"xy"))), "SEG{#3 W2 2B}");
    }
}
