//! Encoding utilities for the persisted layout.
//!
//! - Variable-length integers (VarInt) for header strings
//! - Length-prefixed bytes
//! - The code-point codec used for edge labels and shortcut targets

use smallvec::SmallVec;

use crate::buffer::ExtendableBuffer;
use crate::error::{DictError, Result};
use crate::MAX_WORD_LENGTH;

/// Code points of one label or word, inline for typical word lengths.
pub type CodePoints = SmallVec<[u32; 16]>;

/// Terminates an encoded code-point sequence.
pub const LABEL_TERMINATOR: u8 = 0x1F;

/// Smallest code point stored in a single byte.
const MIN_SINGLE_BYTE_CODE_POINT: u32 = 0x20;
/// Largest code point stored in a single byte.
const MAX_SINGLE_BYTE_CODE_POINT: u32 = 0xFF;
const MAX_CODE_POINT: u32 = 0x10FFFF;

/// Encode a u64 as a variable-length integer.
///
/// Uses 1-10 bytes depending on the value.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    buf.len() - start
}

/// Decode a variable-length integer.
///
/// Returns (value, bytes_consumed), or `None` if `buf` ends mid-value or the
/// value does not fit in 64 bits.
pub fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Encode a length-prefixed byte slice.
pub fn encode_bytes(data: &[u8], buf: &mut Vec<u8>) {
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

/// Decode a length-prefixed byte slice.
///
/// Returns (data, bytes_consumed).
pub fn decode_bytes(buf: &[u8]) -> Option<(&[u8], usize)> {
    let (len, len_size) = decode_varint(buf)?;
    let len = usize::try_from(len).ok()?;
    let data = buf.get(len_size..len_size.checked_add(len)?)?;
    Some((data, len_size + len))
}

/// Shared prefix length of two sequences.
pub fn common_prefix_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[inline]
fn code_point_size(cp: u32) -> usize {
    if (MIN_SINGLE_BYTE_CODE_POINT..=MAX_SINGLE_BYTE_CODE_POINT).contains(&cp) {
        1
    } else {
        3
    }
}

/// Encoded size of `code_points`, terminator included.
pub fn code_points_size(code_points: &[u32]) -> usize {
    code_points.iter().map(|&cp| code_point_size(cp)).sum::<usize>() + 1
}

/// Append `code_points` followed by [`LABEL_TERMINATOR`].
///
/// Code points in 0x20..=0xFF take one byte; everything else takes three
/// bytes big-endian, whose first byte is always below 0x11 and so never
/// collides with the terminator or a single-byte code point.
pub fn encode_code_points(code_points: &[u32], out: &mut Vec<u8>) -> Result<()> {
    for &cp in code_points {
        if cp > MAX_CODE_POINT {
            return Err(DictError::InvalidWord(format!("code point {cp:#x} out of range")));
        }
        if code_point_size(cp) == 1 {
            out.push(cp as u8);
        } else {
            out.extend_from_slice(&cp.to_be_bytes()[1..]);
        }
    }
    out.push(LABEL_TERMINATOR);
    Ok(())
}

/// Decode a terminated code-point sequence at `*pos`, advancing past the
/// terminator. More than `MAX_WORD_LENGTH` code points is corruption.
pub fn decode_code_points(buffer: &ExtendableBuffer, pos: &mut usize) -> Result<CodePoints> {
    let mut out = CodePoints::new();
    loop {
        let first = buffer.read_uint_and_advance(1, pos)?;
        if first == u32::from(LABEL_TERMINATOR) {
            return Ok(out);
        }
        if out.len() >= MAX_WORD_LENGTH {
            return Err(DictError::corrupt(format!(
                "code-point sequence longer than {MAX_WORD_LENGTH}"
            )));
        }
        let cp = if first >= MIN_SINGLE_BYTE_CODE_POINT {
            first
        } else if first <= MAX_CODE_POINT >> 16 {
            let rest = buffer.read_uint_and_advance(2, pos)?;
            (first << 16) | rest
        } else {
            return Err(DictError::corrupt(format!("invalid code-point lead byte {first:#x}")));
        };
        out.push(cp);
    }
}

/// Code points of a word.
pub fn word_to_code_points(word: &str) -> CodePoints {
    word.chars().map(u32::from).collect()
}

/// Word of a code-point sequence; `None` if some code point is not a scalar value.
pub fn code_points_to_word(code_points: &[u32]) -> Option<String> {
    code_points.iter().map(|&cp| char::from_u32(cp)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let test_values = [0, 1, 127, 128, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let mut buf = Vec::new();
            let size = encode_varint(value, &mut buf);
            let (decoded, decoded_size) = decode_varint(&buf).unwrap();

            assert_eq!(decoded, value);
            assert_eq!(size, decoded_size);
        }
    }

    #[test]
    fn test_truncated_varint() {
        assert_eq!(decode_varint(&[0x80, 0x80]), None);
        assert_eq!(decode_varint(&[]), None);
        assert_eq!(decode_bytes(&[5, b'a', b'b']), None);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let data = b"en_US";
        let mut buf = Vec::new();
        encode_bytes(data, &mut buf);

        let (decoded, size) = decode_bytes(&buf).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(size, buf.len());
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len(b"hello", b"help"), 3);
        assert_eq!(common_prefix_len(b"hello", b"world"), 0);
        assert_eq!(common_prefix_len(&[1u32, 2, 3], &[1, 2, 3]), 3);
        assert_eq!(common_prefix_len::<u32>(&[], &[1]), 0);
    }

    #[test]
    fn test_code_point_widths() {
        let mut out = Vec::new();
        encode_code_points(&[u32::from('a'), 0xE9, 0x3042, 0x1F600, 0x0A], &mut out).unwrap();
        assert_eq!(
            out,
            [b'a', 0xE9, 0x00, 0x30, 0x42, 0x01, 0xF6, 0x00, 0x00, 0x00, 0x0A, LABEL_TERMINATOR]
        );
        assert_eq!(code_points_size(&[u32::from('a'), 0xE9, 0x3042, 0x1F600, 0x0A]), out.len());

        let mut buf = ExtendableBuffer::new(64);
        buf.append(&out).unwrap();
        let mut pos = 0;
        let decoded = decode_code_points(&buf, &mut pos).unwrap();
        assert_eq!(decoded.as_slice(), &[u32::from('a'), 0xE9, 0x3042, 0x1F600, 0x0A]);
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_code_point_errors() {
        let mut out = Vec::new();
        assert!(encode_code_points(&[0x110000], &mut out).is_err());

        let mut buf = ExtendableBuffer::new(128);
        buf.append(&[0x15, LABEL_TERMINATOR]).unwrap();
        assert!(decode_code_points(&buf, &mut 0).is_err());

        // Unterminated label runs off the tail.
        let mut buf = ExtendableBuffer::new(128);
        buf.append(b"abc").unwrap();
        assert!(decode_code_points(&buf, &mut 0).is_err());

        // Over-long label.
        let mut buf = ExtendableBuffer::new(128);
        buf.append(&[b'a'; MAX_WORD_LENGTH + 1]).unwrap();
        buf.append(&[LABEL_TERMINATOR]).unwrap();
        assert!(matches!(decode_code_points(&buf, &mut 0), Err(DictError::CorruptStructure(_))));
    }

    #[test]
    fn test_word_conversion() {
        let cps = word_to_code_points("naïve");
        assert_eq!(cps.len(), 5);
        assert_eq!(code_points_to_word(&cps).as_deref(), Some("naïve"));
        assert_eq!(code_points_to_word(&[0xD800]), None);
    }
}
