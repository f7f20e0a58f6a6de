//! Length-prefixed packet frames with optional zlib compression.
//!
//! # Frame Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  prefix: VarInt        (len << 1) | compressed                │
//! ├───────────────────────────────────────────────────────────────┤
//! │  compressed = 0:  len raw payload bytes                       │
//! │  compressed = 1:  uncompressed_len: VarInt                    │
//! │                   len zlib-deflated bytes                     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads shorter than the compression threshold are always stored raw.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::{Decode, Encode, ProtocolError, Result, read_len, write_len};

const COMPRESSED_FLAG: usize = 1;

/// Write `payload` as one frame.
///
/// `threshold` of `None` disables compression entirely.
pub fn write_frame<W: Write>(
    writer: &mut W,
    payload: &[u8],
    threshold: Option<usize>,
) -> Result<()> {
    match threshold {
        Some(threshold) if payload.len() >= threshold => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload)?;
            let compressed = encoder.finish()?;

            write_len(writer, (compressed.len() << 1) | COMPRESSED_FLAG)?;
            write_len(writer, payload.len())?;
            writer.write_all(&compressed)?;
        }
        _ => {
            write_len(writer, payload.len() << 1)?;
            writer.write_all(payload)?;
        }
    }
    Ok(())
}

/// Read one frame and return its (decompressed) payload.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let prefix = read_len(reader)?;
    let len = prefix >> 1;

    let mut stored = Vec::with_capacity(len.min(1 << 16));
    if prefix & COMPRESSED_FLAG != 0 {
        let uncompressed_len = read_len(reader)?;
        read_exactly(reader, &mut stored, len)?;

        let mut payload = Vec::with_capacity(uncompressed_len.min(1 << 20));
        ZlibDecoder::new(stored.as_slice()).read_to_end(&mut payload)?;
        if payload.len() != uncompressed_len {
            return Err(ProtocolError::LengthMismatch {
                expected: uncompressed_len,
                actual: payload.len(),
            });
        }
        Ok(payload)
    } else {
        read_exactly(reader, &mut stored, len)?;
        Ok(stored)
    }
}

fn read_exactly<R: Read>(reader: &mut R, buf: &mut Vec<u8>, len: usize) -> Result<()> {
    reader.by_ref().take(len as u64).read_to_end(buf)?;
    if buf.len() != len {
        return Err(ProtocolError::LengthMismatch {
            expected: len,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Encode `value` and write it as one frame.
pub fn write_framed<T: Encode + ?Sized, W: Write>(
    writer: &mut W,
    value: &T,
    threshold: Option<usize>,
) -> Result<()> {
    let mut payload = Vec::new();
    value.encode(&mut payload)?;
    write_frame(writer, &payload, threshold)
}

/// Read one frame and decode its payload as `T`.
///
/// The whole payload must be consumed; trailing bytes mean the frame and the type disagree.
pub fn read_framed<T: Decode, R: Read>(reader: &mut R) -> Result<T> {
    let payload = read_frame(reader)?;
    let mut cursor = payload.as_slice();
    let value = T::decode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(ProtocolError::LengthMismatch {
            expected: payload.len() - cursor.len(),
            actual: payload.len(),
        });
    }
    Ok(value)
}
