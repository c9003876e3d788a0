use std::convert::TryInto;
use std::mem::size_of;

use crate::error::{EngineError, EngineResult};

/// A growable byte buffer that `Encodeable` values append themselves
/// onto; used to build up a page or metadata blob before it is written
/// to disk in one shot.
pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        SmallWriter { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for SmallWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable: Sized {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self>;
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> EngineResult<Vec<u8>> {
    let mut buffer = vec![0u8; bytes_count];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// # Format
///
/// - 2 bytes: bit count (LE)
/// - ceil(n/8) bytes: packed bits
impl Encodeable for bit_vec::BitVec {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let len = self.len() as u16;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.to_bytes());
        buf
    }
}

impl Decodeable for bit_vec::BitVec {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let len_bytes = read_exact(reader, 2)?;
        let bit_count = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        let byte_count = (bit_count + 7) / 8;
        let payload = read_exact(reader, byte_count)?;
        let mut bv = bit_vec::BitVec::from_bytes(&payload);
        bv.truncate(bit_count);
        Ok(bv)
    }
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        Ok(u8::decode_from(reader)? == 1)
    }
}

/// # Format
///
/// - 1 byte: presence flag
/// - 8 bytes: value (present or not; absent values encode as 0 and are
///   ignored on decode, kept only so every column slot is fixed-width)
impl Encodeable for Option<i64> {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Some(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            None => {
                buf.push(0);
                buf.extend_from_slice(&0i64.to_le_bytes());
            }
        }
        buf
    }
}

impl Decodeable for Option<i64> {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let present = bool::decode_from(reader)?;
        let value = i64::decode_from(reader)?;
        Ok(if present { Some(value) } else { None })
    }
}

/// # Format
///
/// - 1 byte: length-prefixed string (range 0-255)
/// - n bytes: UTF-8 payload
impl Encodeable for str {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let bytes = self.as_bytes();
        assert!(bytes.len() <= u8::MAX as usize, "string too long to encode");
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
        buf
    }
}

impl Encodeable for String {
    fn encode(&self) -> Vec<u8> {
        self.as_str().encode()
    }
}

impl Decodeable for String {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let size = u8::decode_from(reader)?;
        let bytes = read_exact(reader, size as usize)?;
        String::from_utf8(bytes).map_err(|e| EngineError::Corrupt(e.to_string()))
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
                    let bytes = read_exact(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bitvec_round_trips() {
        let mut bv = bit_vec::BitVec::from_elem(5, false);
        bv.set(1, true);
        bv.set(4, true);
        let encoded = bv.encode();
        let decoded = bit_vec::BitVec::decode_from(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(decoded, bv);
    }

    #[test]
    fn option_i64_round_trips() {
        let mut w = SmallWriter::new();
        w.write(&Some(42i64));
        w.write(&None::<i64>);
        let bytes = w.into_bytes();
        let mut cursor = Cursor::new(bytes);
        assert_eq!(Option::<i64>::decode_from(&mut cursor).unwrap(), Some(42));
        assert_eq!(Option::<i64>::decode_from(&mut cursor).unwrap(), None);
    }
}
