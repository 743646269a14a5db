//! # Variable-Length Integer Encoding (RFC 9000 Section 16)
//!
//! The first two bits of the first byte select the length class:
//! 00=1 byte, 01=2 bytes, 10=4 bytes, 11=8 bytes. Remaining bits are the
//! value, big-endian. Maximum value: 2^62 - 1.
//!
//! The encoder always picks the minimal length class. The decoder accepts
//! any legally-sized encoding, including non-minimal ones a peer may send.

#![forbid(unsafe_code)]

use crate::types::{VarInt, VARINT_MAX};
use bytes::{BufMut, BytesMut};

/// VarInt encoding and decoding utilities
pub struct VarIntCodec;

impl VarIntCodec {
    /// Decode a VarInt from a byte slice, returning (value, bytes_consumed)
    ///
    /// Returns None on buffer underrun; callers map that to the typed
    /// malformed-frame error.
    pub fn decode(buf: &[u8]) -> Option<(VarInt, usize)> {
        let first = *buf.first()?;
        let tag = first >> 6;

        match tag {
            0b00 => Some((first as u64 & 0x3f, 1)),
            0b01 => {
                if buf.len() < 2 {
                    return None;
                }
                let value = ((first as u64 & 0x3f) << 8) | buf[1] as u64;
                Some((value, 2))
            }
            0b10 => {
                if buf.len() < 4 {
                    return None;
                }
                let value = ((first as u64 & 0x3f) << 24)
                    | ((buf[1] as u64) << 16)
                    | ((buf[2] as u64) << 8)
                    | (buf[3] as u64);
                Some((value, 4))
            }
            0b11 => {
                if buf.len() < 8 {
                    return None;
                }
                let value = ((first as u64 & 0x3f) << 56)
                    | ((buf[1] as u64) << 48)
                    | ((buf[2] as u64) << 40)
                    | ((buf[3] as u64) << 32)
                    | ((buf[4] as u64) << 24)
                    | ((buf[5] as u64) << 16)
                    | ((buf[6] as u64) << 8)
                    | (buf[7] as u64);
                Some((value, 8))
            }
            _ => unreachable!(),
        }
    }

    /// Append the minimal encoding of `value` to `buf`, returning bytes written
    ///
    /// Returns None if value exceeds VARINT_MAX.
    pub fn put(value: VarInt, buf: &mut BytesMut) -> Option<usize> {
        if value > VARINT_MAX {
            return None;
        }

        if value < 0x40 {
            buf.put_u8(value as u8);
            Some(1)
        } else if value < 0x4000 {
            buf.put_u8(0x40 | (value >> 8) as u8);
            buf.put_u8(value as u8);
            Some(2)
        } else if value < 0x4000_0000 {
            buf.put_u8(0x80 | (value >> 24) as u8);
            buf.put_u8((value >> 16) as u8);
            buf.put_u8((value >> 8) as u8);
            buf.put_u8(value as u8);
            Some(4)
        } else {
            buf.put_u8(0xc0 | (value >> 56) as u8);
            buf.put_u8((value >> 48) as u8);
            buf.put_u8((value >> 40) as u8);
            buf.put_u8((value >> 32) as u8);
            buf.put_u8((value >> 24) as u8);
            buf.put_u8((value >> 16) as u8);
            buf.put_u8((value >> 8) as u8);
            buf.put_u8(value as u8);
            Some(8)
        }
    }

    /// Encoded size of the minimal length class for `value`
    pub fn size(value: VarInt) -> usize {
        if value < 0x40 {
            1
        } else if value < 0x4000 {
            2
        } else if value < 0x4000_0000 {
            4
        } else {
            8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_length_class_boundaries() {
        // 1-byte class: 0..=63
        assert_eq!(VarIntCodec::decode(&[0x00]), Some((0, 1)));
        assert_eq!(VarIntCodec::decode(&[0x3f]), Some((63, 1)));
        // 2-byte class starts at 64
        assert_eq!(VarIntCodec::decode(&[0x40, 0x40]), Some((64, 2)));
        assert_eq!(VarIntCodec::decode(&[0x7f, 0xff]), Some((16383, 2)));
        // 4-byte class starts at 16384
        assert_eq!(VarIntCodec::decode(&[0x80, 0x00, 0x40, 0x00]), Some((16384, 4)));
        assert_eq!(
            VarIntCodec::decode(&[0xbf, 0xff, 0xff, 0xff]),
            Some((1073741823, 4))
        );
        // 8-byte class starts at 1073741824
        assert_eq!(
            VarIntCodec::decode(&[0xc0, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00]),
            Some((1073741824, 8))
        );
        assert_eq!(
            VarIntCodec::decode(&[0xff; 8]),
            Some((VARINT_MAX, 8))
        );
    }

    #[test]
    fn test_decode_underrun() {
        assert!(VarIntCodec::decode(&[]).is_none());
        assert!(VarIntCodec::decode(&[0x40]).is_none());
        assert!(VarIntCodec::decode(&[0x80, 0x00, 0x00]).is_none());
        assert!(VarIntCodec::decode(&[0xc0, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_decode_accepts_non_minimal_encodings() {
        // 37 in every legal length class
        assert_eq!(VarIntCodec::decode(&[0x25]), Some((37, 1)));
        assert_eq!(VarIntCodec::decode(&[0x40, 0x25]), Some((37, 2)));
        assert_eq!(VarIntCodec::decode(&[0x80, 0x00, 0x00, 0x25]), Some((37, 4)));
        assert_eq!(
            VarIntCodec::decode(&[0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x25]),
            Some((37, 8))
        );
    }

    #[test]
    fn test_put_minimal_class() {
        let cases: [(u64, &[u8]); 4] = [
            (37, &[0x25]),
            (494, &[0x41, 0xee]),
            (494878333, &[0x9d, 0x7f, 0x3e, 0x7d]),
            (
                151288809941952652,
                &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c],
            ),
        ];

        for (value, expected) in cases {
            let mut buf = BytesMut::new();
            let written = VarIntCodec::put(value, &mut buf).unwrap();
            assert_eq!(written, expected.len(), "length for {}", value);
            assert_eq!(&buf[..], expected, "encoding for {}", value);
        }
    }

    #[test]
    fn test_put_rejects_out_of_range() {
        let mut buf = BytesMut::new();
        assert!(VarIntCodec::put(VARINT_MAX + 1, &mut buf).is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_class_boundaries() {
        let values = [
            0,
            1,
            63,
            64,
            16383,
            16384,
            1073741823,
            1073741824,
            VARINT_MAX,
        ];

        for &value in &values {
            let mut buf = BytesMut::new();
            let written = VarIntCodec::put(value, &mut buf).unwrap();
            let (decoded, consumed) = VarIntCodec::decode(&buf).unwrap();
            assert_eq!(decoded, value, "roundtrip failed for {}", value);
            assert_eq!(consumed, written);
            assert_eq!(written, VarIntCodec::size(value));
        }
    }

    #[test]
    fn test_size() {
        assert_eq!(VarIntCodec::size(0), 1);
        assert_eq!(VarIntCodec::size(63), 1);
        assert_eq!(VarIntCodec::size(64), 2);
        assert_eq!(VarIntCodec::size(16383), 2);
        assert_eq!(VarIntCodec::size(16384), 4);
        assert_eq!(VarIntCodec::size(1073741823), 4);
        assert_eq!(VarIntCodec::size(1073741824), 8);
        assert_eq!(VarIntCodec::size(VARINT_MAX), 8);
    }
}
