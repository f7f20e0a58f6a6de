//! Wire primitives for the rewind replay index.
//!
//! Everything the index persists or hands to a sink goes through the [`Encode`] and [`Decode`]
//! traits defined here. Integers are big-endian, lengths and ids are LEB128 varints, and
//! packets are wrapped in the length-prefixed [`frame`] codec.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod frame;

#[cfg(feature = "derive")]
pub use rewind_protocol_derive::{Decode, Encode};

pub use frame::{read_frame, read_framed, write_frame, write_framed};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("VarInt too large")]
    VarIntTooLarge,
    #[error("String too long: {len} > {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("Invalid enum variant: {0}")]
    InvalidEnumVariant(i32),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Longest string accepted by [`String::decode`].
pub const MAX_STRING_LEN: usize = 32767;

pub trait Encode {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()>;
}

pub trait Decode: Sized {
    fn decode<R: Read>(reader: &mut R) -> Result<Self>;
}

// VarInt encoding/decoding
pub fn read_varint<R: Read>(reader: &mut R) -> Result<i32> {
    let mut result = 0i32;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 32 {
            return Err(ProtocolError::VarIntTooLarge);
        }
    }
    Ok(result)
}

pub fn write_varint<W: Write>(writer: &mut W, mut value: i32) -> Result<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_u8(byte)?;
        if value == 0 {
            break;
        }
    }
    Ok(())
}

// VarLong encoding/decoding
pub fn read_varlong<R: Read>(reader: &mut R) -> Result<i64> {
    let mut result = 0i64;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8()?;
        result |= ((byte & 0x7F) as i64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(ProtocolError::VarIntTooLarge);
        }
    }
    Ok(result)
}

pub fn write_varlong<W: Write>(writer: &mut W, mut value: i64) -> Result<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u64) >> 7) as i64;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_u8(byte)?;
        if value == 0 {
            break;
        }
    }
    Ok(())
}

/// Length prefixes are written as varints; anything that does not fit an `i32` is rejected.
pub fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<()> {
    let len = i32::try_from(len).map_err(|_| ProtocolError::VarIntTooLarge)?;
    write_varint(writer, len)
}

pub fn read_len<R: Read>(reader: &mut R) -> Result<usize> {
    let len = read_varint(reader)?;
    usize::try_from(len).map_err(|_| ProtocolError::VarIntTooLarge)
}

// Primitive implementations
impl Encode for bool {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(if *self { 1 } else { 0 })?;
        Ok(())
    }
}

impl Decode for bool {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u8()? != 0)
    }
}

impl Encode for u8 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)?;
        Ok(())
    }
}

impl Decode for u8 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u8()?)
    }
}

impl Encode for i16 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i16::<BigEndian>(*self)?;
        Ok(())
    }
}

impl Decode for i16 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_i16::<BigEndian>()?)
    }
}

impl Encode for i32 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(*self)?;
        Ok(())
    }
}

impl Decode for i32 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_i32::<BigEndian>()?)
    }
}

impl Encode for i64 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i64::<BigEndian>(*self)?;
        Ok(())
    }
}

impl Decode for i64 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_i64::<BigEndian>()?)
    }
}

impl Encode for u64 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<BigEndian>(*self)?;
        Ok(())
    }
}

impl Decode for u64 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u64::<BigEndian>()?)
    }
}

impl Encode for f32 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_f32::<BigEndian>(*self)?;
        Ok(())
    }
}

impl Decode for f32 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_f32::<BigEndian>()?)
    }
}

impl Encode for f64 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_f64::<BigEndian>(*self)?;
        Ok(())
    }
}

impl Decode for f64 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_f64::<BigEndian>()?)
    }
}

// VarInt wrapper type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VarInt(pub i32);

impl Encode for VarInt {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.0)
    }
}

impl Decode for VarInt {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarInt(read_varint(reader)?))
    }
}

impl From<i32> for VarInt {
    fn from(v: i32) -> Self {
        VarInt(v)
    }
}

impl From<VarInt> for i32 {
    fn from(v: VarInt) -> Self {
        v.0
    }
}

// VarLong wrapper type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VarLong(pub i64);

impl Encode for VarLong {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varlong(writer, self.0)
    }
}

impl Decode for VarLong {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(VarLong(read_varlong(reader)?))
    }
}

// String encoding (length-prefixed with VarInt)
impl Encode for str {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.as_bytes();
        write_len(writer, bytes.len())?;
        writer.write_all(bytes)?;
        Ok(())
    }
}

impl Encode for String {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.as_str().encode(writer)
    }
}

impl Decode for String {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = read_len(reader)?;
        if len > MAX_STRING_LEN {
            return Err(ProtocolError::StringTooLong {
                len,
                max: MAX_STRING_LEN,
            });
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

// Option<T> encoding (bool prefix)
impl<T: Encode> Encode for Option<T> {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Some(v) => {
                true.encode(writer)?;
                v.encode(writer)
            }
            None => false.encode(writer),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        if bool::decode(reader)? {
            Ok(Some(T::decode(reader)?))
        } else {
            Ok(None)
        }
    }
}

// Vec<T> encoding (VarInt length prefix)
impl<T: Encode> Encode for Vec<T> {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, self.len())?;
        for item in self {
            item.encode(writer)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = read_len(reader)?;
        // Cap the preallocation; a corrupt length must fail on read, not on allocation.
        let mut vec = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            vec.push(T::decode(reader)?);
        }
        Ok(vec)
    }
}

/// Raw byte run (VarInt length prefix, bytes copied as-is).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteArray(pub Vec<u8>);

impl Encode for ByteArray {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_len(writer, self.0.len())?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

impl Decode for ByteArray {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let len = read_len(reader)?;
        let mut buf = Vec::with_capacity(len.min(1 << 16));
        reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(ProtocolError::LengthMismatch {
                expected: len,
                actual: buf.len(),
            });
        }
        Ok(ByteArray(buf))
    }
}

// UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Uuid(pub u128);

impl Encode for Uuid {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<BigEndian>((self.0 >> 64) as u64)?;
        writer.write_u64::<BigEndian>(self.0 as u64)?;
        Ok(())
    }
}

impl Decode for Uuid {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let high = reader.read_u64::<BigEndian>()? as u128;
        let low = reader.read_u64::<BigEndian>()? as u128;
        Ok(Uuid((high << 64) | low))
    }
}

// Position (packed x/y/z)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i16,
    pub z: i32,
}

impl Position {
    #[must_use]
    pub const fn new(x: i32, y: i16, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Coordinates of the chunk column containing this block.
    #[must_use]
    pub const fn chunk(self) -> (i32, i32) {
        (self.x >> 4, self.z >> 4)
    }
}

impl Encode for Position {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        let packed = ((self.x as i64 & 0x3FFFFFF) << 38)
            | ((self.z as i64 & 0x3FFFFFF) << 12)
            | (self.y as i64 & 0xFFF);
        writer.write_i64::<BigEndian>(packed)?;
        Ok(())
    }
}

impl Decode for Position {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let packed = reader.read_i64::<BigEndian>()?;
        let x = (packed >> 38) as i32;
        let y = (packed << 52 >> 52) as i16;
        let z = (packed << 26 >> 38) as i32;
        Ok(Position { x, y, z })
    }
}

/// Global block-state id (VarInt encoded). State 0 is air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockState(pub i32);

impl BlockState {
    pub const AIR: BlockState = BlockState(0);

    #[must_use]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

impl Encode for BlockState {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_varint(writer, self.0)
    }
}

impl Decode for BlockState {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(BlockState(read_varint(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encoded<T: Encode>(value: &T) -> Vec<u8> {
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_varint_known_bytes() {
        assert_eq!(encoded(&VarInt(0)), [0x00]);
        assert_eq!(encoded(&VarInt(1)), [0x01]);
        assert_eq!(encoded(&VarInt(127)), [0x7F]);
        assert_eq!(encoded(&VarInt(128)), [0x80, 0x01]);
        assert_eq!(encoded(&VarInt(300)), [0xAC, 0x02]);
        assert_eq!(encoded(&VarInt(-1)), [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_varint_too_large() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let err = read_varint(&mut Cursor::new(&bytes[..])).unwrap_err();
        assert!(matches!(err, ProtocolError::VarIntTooLarge));
    }

    #[test]
    fn test_varlong_max() {
        let bytes = encoded(&VarLong(i64::MAX));
        assert_eq!(bytes.len(), 9);
        let decoded = VarLong::decode(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(decoded, VarLong(i64::MAX));
    }

    #[test]
    fn test_position_negative_coordinates() {
        let pos = Position::new(-30_000, -64, 12_345);
        let bytes = encoded(&pos);
        let decoded = Position::decode(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(decoded, pos);
        assert_eq!(pos.chunk(), (-1875, 771));
    }

    #[test]
    fn test_byte_array_truncated() {
        let mut bytes = Vec::new();
        write_varint(&mut bytes, 8).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        let err = ByteArray::decode(&mut Cursor::new(&bytes[..])).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthMismatch {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_string_rejects_oversize_length() {
        let mut bytes = Vec::new();
        write_len(&mut bytes, MAX_STRING_LEN + 1).unwrap();
        let err = String::decode(&mut Cursor::new(&bytes[..])).unwrap_err();
        assert!(matches!(err, ProtocolError::StringTooLong { .. }));
    }
}
