//! Variable-width integer codec used by every binary field of a B1 volume.
//!
//! # Encoding
//! Unsigned values are written as base-128 groups, least significant group
//! first.  Every byte except the last carries the continuation bit `0x80`.
//! A `u64` never needs more than [`MAX_LONG_SIZE`] bytes.
//!
//! # Padded encoding
//! A value may also be written at an exact width by emitting redundant
//! continuation groups (`0x80`) before a final `0x00`.  Readers decode the
//! padded form with the ordinary [`read_u64`], which is what makes a reserved
//! placeholder patchable in place: the slot is always `MAX_LONG_SIZE` bytes
//! wide no matter which value ends up in it.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Maximum encoded width of a `u64`.
pub const MAX_LONG_SIZE: usize = 10;

/// Upper bound on length-prefixed strings; entry names are short.
pub const MAX_STRING_LEN: u64 = 64 * 1024;

// ── Unsigned ──────────────────────────────────────────────────────────────────

pub fn write_u64<W: Write + ?Sized>(writer: &mut W, mut value: u64) -> io::Result<()> {
    while value >= 0x80 {
        writer.write_u8((value as u8 & 0x7f) | 0x80)?;
        value >>= 7;
    }
    writer.write_u8(value as u8)
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for index in 0..MAX_LONG_SIZE {
        let byte = reader.read_u8()?;
        let shift = 7 * index as u32;
        let group = (byte & 0x7f) as u64;
        if shift == 63 && group > 1 {
            return Err(invalid("integer overflows 64 bits"));
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(invalid("integer encoding exceeds 10 bytes"))
}

// ── Padded ────────────────────────────────────────────────────────────────────

/// Encode `value` at exactly `width` bytes.  The returned array is only
/// meaningful up to `width`.
pub fn encode_padded(mut value: u64, width: usize) -> io::Result<[u8; MAX_LONG_SIZE]> {
    if width == 0 || width > MAX_LONG_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("padded width {width} outside 1..={MAX_LONG_SIZE}"),
        ));
    }
    let mut out = [0u8; MAX_LONG_SIZE];
    for byte in out.iter_mut().take(width - 1) {
        *byte = (value as u8 & 0x7f) | 0x80;
        value >>= 7;
    }
    if value >= 0x80 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("value does not fit in {width} bytes"),
        ));
    }
    out[width - 1] = value as u8;
    Ok(out)
}

pub fn write_padded<W: Write + ?Sized>(writer: &mut W, value: u64, width: usize) -> io::Result<()> {
    let bytes = encode_padded(value, width)?;
    writer.write_all(&bytes[..width])
}

// ── Signed ────────────────────────────────────────────────────────────────────

pub fn write_i64<W: Write + ?Sized>(writer: &mut W, value: i64) -> io::Result<()> {
    write_u64(writer, ((value << 1) ^ (value >> 63)) as u64)
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> io::Result<i64> {
    let raw = read_u64(reader)?;
    Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
}

// ── Strings ───────────────────────────────────────────────────────────────────

pub fn write_str<W: Write + ?Sized>(writer: &mut W, value: &str) -> io::Result<()> {
    write_u64(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let len = read_u64(reader)?;
    if len > MAX_STRING_LEN {
        return Err(invalid("string length exceeds limit"));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| invalid("string is not valid UTF-8"))
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_u64(&mut out, value).unwrap();
        out
    }

    #[test]
    fn small_values_take_one_byte() {
        assert_eq!(encode(0), vec![0]);
        assert_eq!(encode(13), vec![13]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
    }

    #[test]
    fn max_value_decodes() {
        let bytes = encode(u64::MAX);
        assert_eq!(bytes.len(), MAX_LONG_SIZE);
        assert_eq!(read_u64(&mut Cursor::new(bytes)).unwrap(), u64::MAX);
    }

    #[test]
    fn padded_value_decodes_with_plain_reader() {
        let mut out = Vec::new();
        write_padded(&mut out, 13, MAX_LONG_SIZE).unwrap();
        assert_eq!(out.len(), MAX_LONG_SIZE);
        assert_eq!(out[0], 0x8d);
        assert_eq!(out[MAX_LONG_SIZE - 1], 0x00);
        assert_eq!(read_u64(&mut Cursor::new(out)).unwrap(), 13);
    }

    #[test]
    fn padded_max_value_fits_full_width() {
        let bytes = encode_padded(u64::MAX, MAX_LONG_SIZE).unwrap();
        assert_eq!(read_u64(&mut Cursor::new(bytes.to_vec())).unwrap(), u64::MAX);
    }

    #[test]
    fn padded_rejects_narrow_width() {
        assert!(encode_padded(300, 1).is_err());
        assert!(encode_padded(1, 0).is_err());
        assert!(encode_padded(1, MAX_LONG_SIZE + 1).is_err());
    }

    #[test]
    fn overlong_encoding_is_rejected() {
        let bytes = vec![0x80u8; 11];
        let err = read_u64(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn overflowing_tenth_byte_is_rejected() {
        let mut bytes = vec![0xffu8; 9];
        bytes.push(0x02);
        assert!(read_u64(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn signed_values_zigzag() {
        for value in [0i64, -1, 1, -64, 64, i64::MIN, i64::MAX, 1_700_000_000_000] {
            let mut out = Vec::new();
            write_i64(&mut out, value).unwrap();
            assert_eq!(read_i64(&mut Cursor::new(out)).unwrap(), value);
        }
    }

    #[test]
    fn string_length_is_bounded() {
        let mut out = Vec::new();
        write_u64(&mut out, MAX_STRING_LEN + 1).unwrap();
        assert!(read_string(&mut Cursor::new(out)).is_err());
    }
}
