//! Varint and length-prefixed slice coding used by the batch encoding.

use bytes::{BufMut, BytesMut};

/// Longest encoding of a 32-bit varint.
pub const MAX_VARINT32_LEN: usize = 5;

pub fn put_varint32(dst: &mut BytesMut, mut value: u32) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Decode a varint32 from the front of `input`, advancing it.
pub fn get_varint32(input: &mut &[u8]) -> Option<u32> {
    let mut result: u32 = 0;
    for (i, &byte) in input.iter().take(MAX_VARINT32_LEN).enumerate() {
        let shift = 7 * i as u32;
        result |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Some(result);
        }
    }
    None
}

pub fn put_length_prefixed_slice(dst: &mut BytesMut, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.put_slice(value);
}

/// Decode a length-prefixed slice from the front of `input`, advancing it.
pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let mut rest = *input;
    let len = get_varint32(&mut rest)? as usize;
    if rest.len() < len {
        return None;
    }
    let (value, tail) = rest.split_at(len);
    *input = tail;
    Some(value)
}
