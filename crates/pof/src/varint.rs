//! Little-endian base-128 varint encoding shared by the envelope (§6) and
//! every integer-valued POF intrinsic (§4.1).
//!
//! Unsigned values use plain LEB128: seven payload bits per byte, the high
//! bit set on every byte but the last. Signed values are zigzag-mapped onto
//! the unsigned encoding so that small negative numbers (in particular POF's
//! negative intrinsic type indicators) stay short.

use crate::error::{PofError, PofResult};
use bytes::{Buf, BufMut};

pub fn write_uvarint(out: &mut impl BufMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            break;
        }
        out.put_u8(byte | 0x80);
    }
}

pub fn read_uvarint(buf: &mut impl Buf) -> PofResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(PofError::Io("truncated varint".into()));
        }
        if shift >= 64 {
            return Err(PofError::Io("varint too long".into()));
        }
        let byte = buf.get_u8();
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_svarint(out: &mut impl BufMut, value: i64) {
    write_uvarint(out, zigzag_encode(value));
}

pub fn read_svarint(buf: &mut impl Buf) -> PofResult<i64> {
    Ok(zigzag_decode(read_uvarint(buf)?))
}

pub fn write_svarint32(out: &mut impl BufMut, value: i32) {
    write_svarint(out, i64::from(value));
}

pub fn read_svarint32(buf: &mut impl Buf) -> PofResult<i32> {
    let v = read_svarint(buf)?;
    i32::try_from(v).map_err(|_| PofError::Io(format!("varint {v} out of i32 range")))
}

fn zigzag_encode128(value: i128) -> u128 {
    ((value << 1) ^ (value >> 127)) as u128
}

fn zigzag_decode128(value: u128) -> i128 {
    ((value >> 1) as i128) ^ -((value & 1) as i128)
}

/// 128-bit varint, used for `int128` and for decimal unscaled values, both
/// of which the spec requires to be "zigzag varint" (§4.1) rather than a
/// fixed-width encoding.
pub fn write_svarint128(out: &mut impl BufMut, value: i128) {
    let mut v = zigzag_encode128(value);
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.put_u8(byte);
            break;
        }
        out.put_u8(byte | 0x80);
    }
}

pub fn read_svarint128(buf: &mut impl Buf) -> PofResult<i128> {
    let mut result: u128 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(PofError::Io("truncated varint".into()));
        }
        if shift >= 128 {
            return Err(PofError::Io("varint too long".into()));
        }
        let byte = buf.get_u8();
        result |= u128::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(zigzag_decode128(result));
        }
        shift += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn uvarint_roundtrip() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            write_uvarint(&mut buf, v);
            let mut b = buf.freeze();
            assert_eq!(read_uvarint(&mut b).unwrap(), v);
        }
    }

    #[test]
    fn svarint_roundtrip_including_negative() {
        for v in [0i64, 1, -1, 63, -64, 1_000_000, -1_000_000, i32::MIN as i64] {
            let mut buf = BytesMut::new();
            write_svarint(&mut buf, v);
            let mut b = buf.freeze();
            assert_eq!(read_svarint(&mut b).unwrap(), v);
        }
    }

    #[test]
    fn small_values_stay_one_byte() {
        let mut buf = BytesMut::new();
        write_svarint32(&mut buf, -1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn svarint128_roundtrip() {
        for v in [0i128, 1, -1, i64::MAX as i128 + 1, i128::MIN, i128::MAX] {
            let mut buf = BytesMut::new();
            write_svarint128(&mut buf, v);
            let mut b = buf.freeze();
            assert_eq!(read_svarint128(&mut b).unwrap(), v);
        }
    }

    #[test]
    fn truncated_varint_is_io_error() {
        let mut b = bytes::Bytes::from_static(&[0x80]);
        assert!(matches!(read_uvarint(&mut b), Err(PofError::Io(_))));
    }
}
