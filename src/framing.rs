use std::mem::size_of;
use anyhow::bail;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::safe_converter::PrecheckedCast;
use crate::segment::Segment;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    struct Flags: u8 {
        const SYN = 0b0000_0001;
        const ACK = 0b0000_0010;
        const FIN = 0b0000_0100;
    }
}

/// The length prefix of an encoded segment: the number of bytes following the prefix. It can be
///  decoded on its own to learn the segment's length before decoding the segment itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub segment_len: u32,
}

impl FrameHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u32>();

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.segment_len);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("buffer underflow reading frame header");
        }
        Ok(FrameHeader {
            segment_len: buf.get_u32(),
        })
    }
}

/// Length of the fixed part of a segment, i.e. everything except the payload
pub const SEGMENT_HEADER_LEN: usize =
    size_of::<u8>()        // flags
    + size_of::<i32>()     // sequence number
    + size_of::<u32>()     // receive window
    + size_of::<u32>()     // header checksum
    + size_of::<u32>();    // data checksum

/// Number of bytes an encoded segment needs in addition to its payload
pub const FRAMING_OVERHEAD: usize = FrameHeader::SERIALIZED_LEN + SEGMENT_HEADER_LEN;

/// Encode a segment into a self-contained, length-prefixed buffer
pub fn pack(segment: &Segment) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAMING_OVERHEAD + segment.data.len());

    FrameHeader {
        segment_len: (SEGMENT_HEADER_LEN + segment.data.len()).prechecked_cast(),
    }.ser(&mut buf);

    let mut flags = Flags::empty();
    flags.set(Flags::SYN, segment.syn);
    flags.set(Flags::ACK, segment.ack);
    flags.set(Flags::FIN, segment.fin);

    buf.put_u8(flags.bits());
    buf.put_i32(segment.sequence_no);
    buf.put_u32(segment.receive_window);
    buf.put_u32(segment.header_checksum);
    buf.put_u32(segment.data_checksum);
    buf.put_slice(&segment.data);

    buf.freeze()
}

/// First decoding phase: the length of the segment following the length prefix, as declared by
///  the sender
pub fn decode_len(mut buf: &[u8]) -> anyhow::Result<usize> {
    let header = FrameHeader::deser(&mut buf)?;
    Ok(usize::try_from(header.segment_len)?)
}

/// Decode a complete datagram into a segment.
///
/// A datagram whose declared length does not match the number of bytes actually received is
///  rejected as malformed. Checksums are *not* verified here.
pub fn unpack(datagram: &[u8]) -> anyhow::Result<Segment> {
    let segment_len = decode_len(datagram)?;
    let mut buf = &datagram[FrameHeader::SERIALIZED_LEN..];

    if segment_len != buf.len() {
        bail!("declared segment length {} does not match the {} bytes available", segment_len, buf.len());
    }
    if segment_len < SEGMENT_HEADER_LEN {
        bail!("declared segment length {} is shorter than the segment header", segment_len);
    }

    let raw_flags = buf.get_u8();
    let flags = match Flags::from_bits(raw_flags) {
        Some(flags) => flags,
        None => bail!("unsupported segment flags {:#010b}", raw_flags),
    };

    let sequence_no = buf.get_i32();
    let receive_window = buf.get_u32();
    let header_checksum = buf.get_u32();
    let data_checksum = buf.get_u32();
    let data = Bytes::copy_from_slice(buf);

    Ok(Segment {
        syn: flags.contains(Flags::SYN),
        ack: flags.contains(Flags::ACK),
        fin: flags.contains(Flags::FIN),
        sequence_no,
        receive_window,
        header_checksum,
        data_checksum,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(17)]
    #[case(99999)]
    #[case(u32::MAX)]
    fn test_frame_header_ser(#[case] len: u32) {
        let original = FrameHeader { segment_len: len };

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        let mut b: &[u8] = &buf;
        let deser = FrameHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
    }

    #[test]
    fn test_pack_layout() {
        let segment = Segment {
            syn: true,
            ack: true,
            fin: false,
            sequence_no: -1,
            receive_window: 0x0102,
            header_checksum: 0x0a0b0c0d,
            data_checksum: 0x11223344,
            data: Bytes::from_static(&[7, 8, 9]),
        };

        assert_eq!(pack(&segment).to_vec(), vec![
            0,0,0,20,
            3,
            0xff,0xff,0xff,0xff,
            0,0,1,2,
            0x0a,0x0b,0x0c,0x0d,
            0x11,0x22,0x33,0x44,
            7,8,9,
        ]);
    }

    #[rstest]
    #[case::syn(Segment::syn(-2, 10))]
    #[case::syn_ack(Segment::syn_ack(-1, 10))]
    #[case::ack(Segment::ack(0, 3))]
    #[case::fin(Segment::fin(12, 3))]
    #[case::data(Segment::data(4, 3, Bytes::from_static(b"hello")))]
    fn test_unpack_packed(#[case] segment: Segment) {
        let packed = pack(&segment);
        assert_eq!(decode_len(&packed).unwrap(), packed.len() - FrameHeader::SERIALIZED_LEN);

        let unpacked = unpack(&packed).unwrap();
        assert_eq!(unpacked, segment);
        assert!(unpacked.is_valid_header());
        assert!(unpacked.is_valid_data());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::incomplete_len(vec![0,0,0])]
    #[case::len_too_big(vec![0,0,0,18, 1, 0,0,0,0, 0,0,0,1, 0,0,0,0, 0,0,0,0])]
    #[case::len_too_small(vec![0,0,0,16, 1, 0,0,0,0, 0,0,0,1, 0,0,0,0, 0,0,0,0, 5])]
    #[case::len_below_header(vec![0,0,0,3, 1,0,0])]
    #[case::huge_len(vec![0xff,0xff,0xff,0xff, 1, 0,0,0,0, 0,0,0,1, 0,0,0,0, 0,0,0,0])]
    #[case::unknown_flags(vec![0,0,0,17, 8, 0,0,0,0, 0,0,0,1, 0,0,0,0, 0,0,0,0])]
    fn test_unpack_malformed(#[case] datagram: Vec<u8>) {
        assert!(unpack(&datagram).is_err());
    }

    #[test]
    fn test_unpack_minimal() {
        let datagram = vec![0,0,0,17, 4, 0,0,0,5, 0,0,0,1, 0,0,0,9, 0,0,0,0];
        let segment = unpack(&datagram).unwrap();
        assert!(segment.fin && !segment.syn && !segment.ack);
        assert_eq!(segment.sequence_no, 5);
        assert_eq!(segment.receive_window, 1);
        assert_eq!(segment.header_checksum, 9);
        assert!(segment.data.is_empty());
    }
}
