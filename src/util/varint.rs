//! Variable-length integer encoding utilities.
//!
//! 7 bits per byte with a continuation bit, least-significant group first.
//! This is the integer primitive for posting deltas, lengths and offsets.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, SalixError};

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value from a byte slice, returning the value and the number
/// of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(SalixError::storage("varint overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(SalixError::storage("incomplete varint"))
}

/// Write a variable-length encoded u64 to a writer, returning the number of
/// bytes written.
pub fn write_u64<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        if shift >= 64 {
            return Err(SalixError::storage("varint overflow"));
        }

        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Write a variable-length encoded u32.
pub fn write_u32<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<usize> {
    write_u64(writer, value as u64)
}

/// Read a variable-length encoded u32.
pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    let value = read_u64(reader)?;
    if value > u32::MAX as u64 {
        return Err(SalixError::storage("varint does not fit in u32"));
    }
    Ok(value as u32)
}

/// Number of bytes the varint encoding of `value` occupies.
pub fn encoded_len(value: u64) -> usize {
    let mut len = 1;
    let mut val = value >> 7;
    while val != 0 {
        len += 1;
        val >>= 7;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_small() {
        for value in [0u64, 1, 127, 128, 255, 16_383, 16_384] {
            let encoded = encode_u64(value);
            let (decoded, consumed) = decode_u64(&encoded).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, encoded.len());
            assert_eq!(encoded_len(value), encoded.len());
        }
    }

    #[test]
    fn test_roundtrip_large() {
        for value in [u64::MAX, u64::MAX - 1, 1 << 63, (1 << 56) + 17] {
            let encoded = encode_u64(value);
            let (decoded, _) = decode_u64(&encoded).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_reader_writer() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 300).unwrap();
        write_u32(&mut buf, 7).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_u64(&mut cursor).unwrap(), 300);
        assert_eq!(read_u32(&mut cursor).unwrap(), 7);
    }

    #[test]
    fn test_incomplete_varint() {
        assert!(decode_u64(&[0x80]).is_err());
        assert!(decode_u64(&[]).is_err());
    }
}
