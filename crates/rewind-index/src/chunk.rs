//! Chunk column codec and block diffing.
//!
//! A chunk column is a stack of 16×16×16 sections, lowest first. Each section on the wire:
//!
//! ```text
//! ┌────────────────────┬─────────────────────────────┬──────────────────────────┐
//! │ block_count: i16   │ block states (4096 entries) │ biomes (64 entries)      │
//! └────────────────────┴─────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Each of the two paletted containers:
//!
//! ```text
//! bits: u8
//!   0                  → value: VarInt                       (single valued)
//!   1..=max_indirect   → palette_len: VarInt, palette: VarInt*, longs: u64 BE*
//!   otherwise          → longs: u64 BE*                      (global ids)
//! ```
//!
//! Entries never span two longs; the first entry sits in the low bits. Entry index is
//! `y << 8 | z << 4 | x` for blocks and `y << 4 | z << 2 | x` for biomes.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rewind_packets::{BlockState, Position};
use rewind_protocol::{Decode, Encode, read_len, read_varint, write_len, write_varint};

use crate::{IndexError, IndexResult};

/// One block changing state, reversible by swapping `from` and `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct BlockChange {
    pub position: Position,
    pub from: BlockState,
    pub to: BlockState,
}

/// Shape parameters of a paletted container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerKind {
    pub entries: usize,
    pub min_bits: u8,
    pub max_indirect_bits: u8,
    pub global_bits: u8,
}

impl ContainerKind {
    pub const BLOCKS: Self = Self {
        entries: 4096,
        min_bits: 4,
        max_indirect_bits: 8,
        global_bits: 15,
    };

    pub const BIOMES: Self = Self {
        entries: 64,
        min_bits: 1,
        max_indirect_bits: 3,
        global_bits: 6,
    };
}

/// Fixed-width unsigned values packed into longs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BitStorage {
    bits: u8,
    len: usize,
    data: Vec<u64>,
}

impl BitStorage {
    fn longs_for(bits: u8, len: usize) -> usize {
        len.div_ceil(64 / bits as usize)
    }

    fn new(bits: u8, len: usize) -> Self {
        Self {
            bits,
            len,
            data: vec![0; Self::longs_for(bits, len)],
        }
    }

    fn per_long(&self) -> usize {
        64 / self.bits as usize
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    fn get(&self, index: usize) -> u64 {
        let per_long = self.per_long();
        let shift = (index % per_long) * self.bits as usize;
        (self.data[index / per_long] >> shift) & self.mask()
    }

    fn set(&mut self, index: usize, value: u64) {
        let per_long = self.per_long();
        let shift = (index % per_long) * self.bits as usize;
        let mask = self.mask();
        let long = &mut self.data[index / per_long];
        *long = (*long & !(mask << shift)) | ((value & mask) << shift);
    }

    fn read<R: Read>(reader: &mut R, bits: u8, len: usize) -> IndexResult<Self> {
        let longs = Self::longs_for(bits, len);
        let mut data = Vec::with_capacity(longs);
        for _ in 0..longs {
            data.push(reader.read_u64::<BigEndian>()?);
        }
        Ok(Self { bits, len, data })
    }

    fn write<W: Write>(&self, writer: &mut W) -> IndexResult<()> {
        for long in &self.data {
            writer.write_u64::<BigEndian>(*long)?;
        }
        Ok(())
    }

    /// Same values, repacked at a different width.
    fn resized(&self, bits: u8) -> Self {
        let mut resized = Self::new(bits, self.len);
        for i in 0..self.len {
            resized.set(i, self.get(i));
        }
        resized
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Single(i32),
    Indirect { palette: Vec<i32>, data: BitStorage },
    Direct(BitStorage),
}

/// Smallest width able to index `n` distinct values.
fn bits_for(n: usize) -> u8 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as u8
    }
}

/// A palette-compressed array of ids, as sent in chunk sections.
///
/// Equality compares the stored ids, not the encoding.
#[derive(Debug, Clone)]
pub struct PalettedContainer {
    kind: ContainerKind,
    storage: Storage,
}

impl PalettedContainer {
    #[must_use]
    pub fn single(kind: ContainerKind, value: i32) -> Self {
        Self {
            kind,
            storage: Storage::Single(value),
        }
    }

    pub fn decode<R: Read>(reader: &mut R, kind: ContainerKind) -> IndexResult<Self> {
        let bits = reader.read_u8()?;
        let storage = if bits == 0 {
            Storage::Single(read_varint(reader)?)
        } else if bits <= kind.max_indirect_bits {
            let len = read_len(reader)?;
            if len == 0 || len > 1 << bits {
                return Err(IndexError::MalformedChunk("palette size does not match width"));
            }
            let mut palette = Vec::with_capacity(len);
            for _ in 0..len {
                palette.push(read_varint(reader)?);
            }
            let data = BitStorage::read(reader, bits, kind.entries)?;
            if (0..kind.entries).any(|i| data.get(i) as usize >= palette.len()) {
                return Err(IndexError::MalformedChunk("palette index out of range"));
            }
            Storage::Indirect { palette, data }
        } else if bits <= 32 {
            Storage::Direct(BitStorage::read(reader, bits, kind.entries)?)
        } else {
            return Err(IndexError::MalformedChunk("entry width above 32 bits"));
        };
        Ok(Self { kind, storage })
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> IndexResult<()> {
        match &self.storage {
            Storage::Single(value) => {
                writer.write_u8(0)?;
                write_varint(writer, *value)?;
            }
            Storage::Indirect { palette, data } => {
                writer.write_u8(data.bits)?;
                write_len(writer, palette.len())?;
                for id in palette {
                    write_varint(writer, *id)?;
                }
                data.write(writer)?;
            }
            Storage::Direct(data) => {
                writer.write_u8(data.bits)?;
                data.write(writer)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, index: usize) -> i32 {
        match &self.storage {
            Storage::Single(value) => *value,
            Storage::Indirect { palette, data } => palette[data.get(index) as usize],
            Storage::Direct(data) => data.get(index) as i32,
        }
    }

    /// Store `value` at `index`, growing the palette as needed. Returns the previous id.
    pub fn set(&mut self, index: usize, value: i32) -> i32 {
        let previous = self.get(index);
        if previous == value {
            return previous;
        }

        let kind = self.kind;
        match &mut self.storage {
            Storage::Single(current) => {
                let mut data = BitStorage::new(kind.min_bits.max(1), kind.entries);
                data.set(index, 1);
                self.storage = Storage::Indirect {
                    palette: vec![*current, value],
                    data,
                };
            }
            Storage::Indirect { palette, data } => {
                if let Some(slot) = palette.iter().position(|&id| id == value) {
                    data.set(index, slot as u64);
                } else if palette.len() < 1 << data.bits {
                    palette.push(value);
                    data.set(index, (palette.len() - 1) as u64);
                } else {
                    let bits = bits_for(palette.len() + 1).max(kind.min_bits);
                    if bits <= kind.max_indirect_bits {
                        *data = data.resized(bits);
                        palette.push(value);
                        data.set(index, (palette.len() - 1) as u64);
                    } else {
                        let mut direct = BitStorage::new(kind.global_bits, kind.entries);
                        for i in 0..kind.entries {
                            direct.set(i, palette[data.get(i) as usize] as u64);
                        }
                        direct.set(index, value as u64);
                        self.storage = Storage::Direct(direct);
                    }
                }
            }
            Storage::Direct(data) => data.set(index, value as u64),
        }
        previous
    }
}

impl PartialEq for PalettedContainer {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && (0..self.kind.entries).all(|i| self.get(i) == other.get(i))
    }
}

const SECTION_BLOCKS: i16 = 4096;

/// One 16×16×16 section.
#[derive(Debug, Clone)]
pub struct ChunkSection {
    block_count: i16,
    blocks: PalettedContainer,
    biomes: PalettedContainer,
}

impl ChunkSection {
    /// All air, single biome.
    #[must_use]
    pub fn empty(biome: i32) -> Self {
        Self {
            block_count: 0,
            blocks: PalettedContainer::single(ContainerKind::BLOCKS, BlockState::AIR.0),
            biomes: PalettedContainer::single(ContainerKind::BIOMES, biome),
        }
    }

    pub fn decode<R: Read>(reader: &mut R) -> IndexResult<Self> {
        let block_count = reader.read_i16::<BigEndian>()?;
        if !(0..=SECTION_BLOCKS).contains(&block_count) {
            return Err(IndexError::MalformedChunk("block count outside section"));
        }
        let blocks = PalettedContainer::decode(reader, ContainerKind::BLOCKS)?;
        let biomes = PalettedContainer::decode(reader, ContainerKind::BIOMES)?;
        Ok(Self {
            block_count,
            blocks,
            biomes,
        })
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> IndexResult<()> {
        writer.write_i16::<BigEndian>(self.block_count)?;
        self.blocks.encode(writer)?;
        self.biomes.encode(writer)
    }

    /// Non-air blocks, as last written to or read from the wire.
    #[must_use]
    pub fn block_count(&self) -> i16 {
        self.block_count
    }

    #[must_use]
    pub fn block(&self, index: usize) -> BlockState {
        BlockState(self.blocks.get(index))
    }

    /// Store a block and keep `block_count` in step. Returns the previous state.
    pub fn set_block(&mut self, index: usize, state: BlockState) -> BlockState {
        let previous = BlockState(self.blocks.set(index, state.0));
        match (previous.is_air(), state.is_air()) {
            (true, false) => self.block_count += 1,
            (false, true) => self.block_count -= 1,
            _ => {}
        }
        previous
    }

    #[must_use]
    pub fn biomes(&self) -> &PalettedContainer {
        &self.biomes
    }
}

impl PartialEq for ChunkSection {
    fn eq(&self, other: &Self) -> bool {
        self.blocks == other.blocks && self.biomes == other.biomes
    }
}

fn block_index(x: i32, y: i32, z: i32) -> usize {
    (((y & 15) << 8) | ((z & 15) << 4) | (x & 15)) as usize
}

/// A decoded chunk column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    sections: Vec<ChunkSection>,
}

impl Column {
    #[must_use]
    pub fn new(sections: Vec<ChunkSection>) -> Self {
        Self { sections }
    }

    /// Decode sections until `data` is exhausted.
    pub fn decode(mut data: &[u8]) -> IndexResult<Self> {
        let mut sections = Vec::new();
        while !data.is_empty() {
            sections.push(ChunkSection::decode(&mut data)?);
        }
        Ok(Self { sections })
    }

    pub fn encode(&self) -> IndexResult<Vec<u8>> {
        let mut out = Vec::new();
        for section in &self.sections {
            section.encode(&mut out)?;
        }
        Ok(out)
    }

    #[must_use]
    pub fn sections(&self) -> &[ChunkSection] {
        &self.sections
    }

    fn locate(&self, position: Position, min_y: i32) -> Option<(usize, usize)> {
        let y = i32::from(position.y) - min_y;
        if y < 0 {
            return None;
        }
        let section = (y >> 4) as usize;
        if section >= self.sections.len() {
            return None;
        }
        Some((section, block_index(position.x, y, position.z)))
    }

    /// Block at `position`, or `None` outside the column's height.
    #[must_use]
    pub fn block(&self, position: Position, min_y: i32) -> Option<BlockState> {
        let (section, index) = self.locate(position, min_y)?;
        Some(self.sections[section].block(index))
    }

    /// Store a block, returning the previous state, or `None` outside the column's height.
    pub fn set_block(
        &mut self,
        position: Position,
        min_y: i32,
        state: BlockState,
    ) -> Option<BlockState> {
        let (section, index) = self.locate(position, min_y)?;
        Some(self.sections[section].set_block(index, state))
    }

    /// Whether `other` can be reached from `self` with block changes alone.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.sections.len() == other.sections.len()
            && self
                .sections
                .iter()
                .zip(&other.sections)
                .all(|(a, b)| a.biomes == b.biomes)
    }

    /// Block changes turning `self` into `new`, or `None` if the shapes differ.
    #[must_use]
    pub fn diff(
        &self,
        new: &Self,
        chunk_x: i32,
        chunk_z: i32,
        min_y: i32,
    ) -> Option<Vec<BlockChange>> {
        if !self.same_shape(new) {
            return None;
        }
        let mut changes = Vec::new();
        for (s, (old, new)) in self.sections.iter().zip(&new.sections).enumerate() {
            if old.blocks == new.blocks {
                continue;
            }
            for index in 0..ContainerKind::BLOCKS.entries {
                let (from, to) = (old.block(index), new.block(index));
                if from != to {
                    let local = index as i32;
                    let position = Position::new(
                        (chunk_x << 4) | (local & 15),
                        (min_y + ((s as i32) << 4) + (local >> 8)) as i16,
                        (chunk_z << 4) | ((local >> 4) & 15),
                    );
                    changes.push(BlockChange { position, from, to });
                }
            }
        }
        Some(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(section: &ChunkSection) -> Vec<u8> {
        let mut buf = Vec::new();
        section.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_single_valued_section_bytes() {
        let section = ChunkSection::empty(3);
        assert_eq!(encoded(&section), vec![0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn test_indirect_section_bit_exact() {
        // 4-bit palette [air, stone]; entry 1 is stone, so long 0 = 0x10.
        let mut bytes = vec![0x00, 0x01, 4, 2, 0, 1];
        for i in 0..256u32 {
            let long: u64 = if i == 0 { 0x10 } else { 0 };
            bytes.extend_from_slice(&long.to_be_bytes());
        }
        bytes.extend_from_slice(&[0, 7]);

        let section = ChunkSection::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(section.block(0), BlockState(0));
        assert_eq!(section.block(1), BlockState(1));
        assert_eq!(section.block_count(), 1);
        assert_eq!(encoded(&section), bytes);
    }

    #[test]
    fn test_direct_section_roundtrip() {
        let mut section = ChunkSection::empty(0);
        for i in 0..300 {
            section.set_block(i, BlockState(i as i32 + 1));
        }
        let bytes = encoded(&section);
        assert_eq!(bytes[2], 15);
        let decoded = ChunkSection::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(encoded(&decoded), bytes);
        assert_eq!(decoded, section);
    }

    #[test]
    fn test_palette_growth_preserves_values() {
        let mut container = PalettedContainer::single(ContainerKind::BLOCKS, 0);
        for i in 0..40 {
            container.set(i * 7, i as i32 + 100);
            for j in 0..=i {
                assert_eq!(container.get(j * 7), j as i32 + 100);
            }
        }
        // 41 distinct ids need 6 bits
        let mut buf = Vec::new();
        container.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 6);
        assert_eq!(container.get(1), 0);
    }

    #[test]
    fn test_growth_past_indirect_goes_global() {
        let mut container = PalettedContainer::single(ContainerKind::BIOMES, 0);
        for i in 0..9 {
            container.set(i, i as i32 + 1);
        }
        let mut buf = Vec::new();
        container.encode(&mut buf).unwrap();
        assert_eq!(buf[0], ContainerKind::BIOMES.global_bits);
        for i in 0..9 {
            assert_eq!(container.get(i), i as i32 + 1);
        }
        assert_eq!(container.get(63), 0);
    }

    #[test]
    fn test_bits_never_span_longs() {
        let mut storage = BitStorage::new(5, 4096);
        // 12 entries per long, 4 bits left unused
        assert_eq!(storage.data.len(), 342);
        storage.set(11, 31);
        storage.set(12, 31);
        assert_eq!(storage.data[0], 31 << 55);
        assert_eq!(storage.data[1], 31);
    }

    #[test]
    fn test_malformed_palette_index() {
        let mut bytes = vec![0x00, 0x01, 4, 1, 0];
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend(std::iter::repeat_n(0u8, 255 * 8));
        let err = ChunkSection::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err, IndexError::MalformedChunk(_)));
    }

    #[test]
    fn test_block_count_out_of_range() {
        let mut bytes = encoded(&ChunkSection::empty(0));
        bytes[..2].copy_from_slice(&i16::MAX.to_be_bytes());
        let err = Column::decode(&bytes).unwrap_err();
        assert!(matches!(err, IndexError::MalformedChunk(_)));

        bytes[..2].copy_from_slice(&(-1i16).to_be_bytes());
        assert!(ChunkSection::decode(&mut bytes.as_slice()).is_err());

        bytes[..2].copy_from_slice(&4096i16.to_be_bytes());
        let section = ChunkSection::decode(&mut bytes.as_slice()).unwrap();
        assert_eq!(section.block_count(), 4096);
    }

    #[test]
    fn test_column_positions_and_diff() {
        let min_y = -64;
        let mut old = Column::new(vec![ChunkSection::empty(1), ChunkSection::empty(1)]);
        let decoded = Column::decode(&old.encode().unwrap()).unwrap();
        assert_eq!(decoded, old);

        let pos = Position::new(-15, -47, 33);
        assert_eq!(old.set_block(pos, min_y, BlockState(9)), Some(BlockState::AIR));
        assert_eq!(old.block(pos, min_y), Some(BlockState(9)));
        assert_eq!(old.block(Position::new(0, -32, 0), min_y), None);
        assert_eq!(old.block(Position::new(0, -65, 0), min_y), None);

        let mut new = old.clone();
        new.set_block(pos, min_y, BlockState(4));
        let other = Position::new(-16, -64, 47);
        new.set_block(other, min_y, BlockState(2));

        let mut changes = old.diff(&new, -1, 2, min_y).unwrap();
        changes.sort_by_key(|c| c.position);
        assert_eq!(
            changes,
            vec![
                BlockChange {
                    position: other,
                    from: BlockState::AIR,
                    to: BlockState(2),
                },
                BlockChange {
                    position: pos,
                    from: BlockState(9),
                    to: BlockState(4),
                },
            ]
        );
    }

    #[test]
    fn test_diff_requires_same_shape() {
        let one = Column::new(vec![ChunkSection::empty(1)]);
        let two = Column::new(vec![ChunkSection::empty(1), ChunkSection::empty(1)]);
        let other_biome = Column::new(vec![ChunkSection::empty(2)]);
        assert!(one.diff(&two, 0, 0, 0).is_none());
        assert!(one.diff(&other_biome, 0, 0, 0).is_none());
        assert_eq!(one.diff(&one.clone(), 0, 0, 0), Some(vec![]));
    }

    #[test]
    fn test_block_count_tracks_sets() {
        let mut section = ChunkSection::empty(0);
        section.set_block(0, BlockState(1));
        section.set_block(1, BlockState(1));
        section.set_block(0, BlockState(2));
        section.set_block(1, BlockState::AIR);
        assert_eq!(section.block_count(), 1);
    }
}
