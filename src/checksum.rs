use bytes::BufMut;
use crc::{Crc, CRC_32_ISO_HDLC};
use crate::segment::Segment;

/// CRC-32 with the parameters of the 'classic' zlib / Ethernet checksum
const CRC_32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The header checksum is calculated over a canonical representation of the header fields it
///  covers rather than over their in-memory layout, so it is independent of platform, padding
///  and field order in the wire encoding:
///
/// ```ascii
///  0: sequence number (i32 BE)
///  4: ack (u8, 0 or 1)
///  5: syn (u8, 0 or 1)
///  6: fin (u8, 0 or 1)
///  7: receive window (u32 BE)
/// ```
pub const HEADER_CHECKSUM_INPUT_LEN: usize = 11;

fn header_checksum_input(segment: &Segment) -> [u8; HEADER_CHECKSUM_INPUT_LEN] {
    let mut result = [0u8; HEADER_CHECKSUM_INPUT_LEN];
    let mut buf = &mut result[..];
    buf.put_i32(segment.sequence_no);
    buf.put_u8(segment.ack as u8);
    buf.put_u8(segment.syn as u8);
    buf.put_u8(segment.fin as u8);
    buf.put_u32(segment.receive_window);
    result
}

pub fn create_header_checksum(segment: &Segment) -> u32 {
    CRC_32.checksum(&header_checksum_input(segment))
}

pub fn check_header_checksum(segment: &Segment) -> bool {
    segment.header_checksum == create_header_checksum(segment)
}

/// The checksum covers the entire payload. An empty payload has checksum 0 by definition.
pub fn create_data_checksum(data: &[u8]) -> u32 {
    if data.is_empty() {
        0
    }
    else {
        CRC_32.checksum(data)
    }
}

pub fn check_data_checksum(segment: &Segment) -> bool {
    if segment.data.is_empty() {
        // a checksum without data means the segment was mangled
        segment.data_checksum == 0
    }
    else {
        segment.data_checksum == create_data_checksum(&segment.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rstest::rstest;

    fn segment(syn: bool, ack: bool, fin: bool, sequence_no: i32, receive_window: u32) -> Segment {
        Segment {
            syn,
            ack,
            fin,
            sequence_no,
            receive_window,
            header_checksum: 0,
            data_checksum: 0,
            data: Bytes::new(),
        }
    }

    #[test]
    fn test_crc_parameters() {
        // well-known check value for CRC-32/ISO-HDLC
        assert_eq!(create_data_checksum(b"123456789"), 0xcbf4_3926);
    }

    #[rstest]
    #[case::syn(true, false, false, -2, 10, vec![0xff,0xff,0xff,0xfe, 0, 1, 0, 0,0,0,10])]
    #[case::syn_ack(true, true, false, -1, 10, vec![0xff,0xff,0xff,0xff, 1, 1, 0, 0,0,0,10])]
    #[case::ack(false, true, false, 0, 256, vec![0,0,0,0, 1, 0, 0, 0,0,1,0])]
    #[case::fin(false, false, true, 0x01020304, 0, vec![1,2,3,4, 0, 0, 1, 0,0,0,0])]
    fn test_header_checksum_input(#[case] syn: bool, #[case] ack: bool, #[case] fin: bool, #[case] sequence_no: i32, #[case] receive_window: u32, #[case] expected: Vec<u8>) {
        let segment = segment(syn, ack, fin, sequence_no, receive_window);
        assert_eq!(header_checksum_input(&segment).to_vec(), expected);
    }

    #[rstest]
    #[case(true, false, false, -2, 10)]
    #[case(true, true, false, -1, 10)]
    #[case(false, true, false, 0, 0)]
    #[case(false, false, false, 12345, 99)]
    #[case(true, true, true, i32::MIN, u32::MAX)]
    #[case(false, false, true, i32::MAX, 1)]
    fn test_header_checksum_round_trip(#[case] syn: bool, #[case] ack: bool, #[case] fin: bool, #[case] sequence_no: i32, #[case] receive_window: u32) {
        let mut segment = segment(syn, ack, fin, sequence_no, receive_window);
        segment.header_checksum = create_header_checksum(&segment);
        assert!(check_header_checksum(&segment));

        let mut mutated = segment.clone();
        mutated.syn = !mutated.syn;
        assert!(!check_header_checksum(&mutated));

        let mut mutated = segment.clone();
        mutated.ack = !mutated.ack;
        assert!(!check_header_checksum(&mutated));

        let mut mutated = segment.clone();
        mutated.fin = !mutated.fin;
        assert!(!check_header_checksum(&mutated));

        let mut mutated = segment.clone();
        mutated.sequence_no = mutated.sequence_no.wrapping_add(1);
        assert!(!check_header_checksum(&mutated));

        let mut mutated = segment.clone();
        mutated.receive_window = mutated.receive_window.wrapping_sub(1);
        assert!(!check_header_checksum(&mutated));

        let mut mutated = segment;
        mutated.header_checksum ^= 1;
        assert!(!check_header_checksum(&mutated));
    }

    #[test]
    fn test_header_checksum_ignores_payload() {
        let mut segment = segment(false, false, false, 3, 7);
        segment.header_checksum = create_header_checksum(&segment);
        segment.data = Bytes::from_static(b"payload");
        assert!(check_header_checksum(&segment));
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::single(b"x")]
    #[case::text(b"hello world")]
    #[case::binary(&[0, 255, 0, 255, 1, 2, 3])]
    fn test_data_checksum(#[case] data: &[u8]) {
        let mut segment = segment(false, false, false, 0, 1);
        segment.data = Bytes::copy_from_slice(data);
        segment.data_checksum = create_data_checksum(data);
        assert!(check_data_checksum(&segment));

        for i in 0..data.len() {
            let mut mutated_data = data.to_vec();
            mutated_data[i] ^= 0x10;
            let mut mutated = segment.clone();
            mutated.data = Bytes::from(mutated_data);
            assert!(!check_data_checksum(&mutated), "mutation at offset {} was not detected", i);
        }
    }

    #[test]
    fn test_data_checksum_without_data() {
        let mut segment = segment(false, false, false, 0, 1);
        segment.data_checksum = 5;
        assert!(!check_data_checksum(&segment));
    }

    #[test]
    fn test_data_checksum_missing() {
        let mut segment = segment(false, false, false, 0, 1);
        segment.data = Bytes::from_static(b"abc");
        assert!(!check_data_checksum(&segment));
    }
}
