//! Time-indexed value trees persisted in the cache.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────┬──────────────────┬─────────┬──────────────────┬─────────┬─────
//! │ count:VarInt │ Δtime:VarLong    │ value   │ Δtime:VarLong    │ value   │ ...
//! └──────────────┴──────────────────┴─────────┴──────────────────┴─────────┴─────
//! ```
//!
//! The first delta is relative to time 0. Keys are strictly increasing.
//!
//! A [`StateTree`] only holds its values between [`StateTree::load`] and
//! [`StateTree::unload`]; the rest of the time it is just a handle.

use std::collections::BTreeMap;
use std::ops::Bound;

use rewind_cache::{CacheReader, Deferred, Handle, ReadCache, WriteCache};
use rewind_packets::{Location, Packet};
use rewind_protocol::{
    Decode, Encode, read_framed, read_len, read_varlong, write_framed, write_len, write_varlong,
};
use tracing::trace;

use crate::chunk::BlockChange;
use crate::{IndexError, IndexResult, Time};

/// Codec for values stored in a tree.
pub trait TreeValue: Sized {
    fn write(&self, out: &mut Deferred) -> IndexResult<()>;
    fn read(input: &mut CacheReader<'_>) -> IndexResult<Self>;
}

macro_rules! plain_tree_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TreeValue for $ty {
                fn write(&self, out: &mut Deferred) -> IndexResult<()> {
                    self.encode(out)?;
                    Ok(())
                }

                fn read(input: &mut CacheReader<'_>) -> IndexResult<Self> {
                    Ok(<$ty>::decode(input)?)
                }
            }
        )*
    };
}

pub(crate) use plain_tree_value;

plain_tree_value!(Location, f32, Vec<BlockChange>);

// Packets are framed so large ones (chunk data) get compressed.
impl TreeValue for Packet {
    fn write(&self, out: &mut Deferred) -> IndexResult<()> {
        let threshold = out.compression_threshold();
        write_framed(out, self, threshold)?;
        Ok(())
    }

    fn read(input: &mut CacheReader<'_>) -> IndexResult<Self> {
        Ok(read_framed(input)?)
    }
}

impl TreeValue for Vec<Packet> {
    fn write(&self, out: &mut Deferred) -> IndexResult<()> {
        write_len(out, self.len())?;
        for packet in self {
            packet.write(out)?;
        }
        Ok(())
    }

    fn read(input: &mut CacheReader<'_>) -> IndexResult<Self> {
        let len = read_len(input)?;
        let mut packets = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            packets.push(Packet::read(input)?);
        }
        Ok(packets)
    }
}

/// A sorted time → value map that lives in the cache and is loaded on demand.
#[derive(Debug)]
pub struct StateTree<T> {
    handle: Handle,
    entries: Option<BTreeMap<Time, T>>,
}

impl<T: TreeValue> StateTree<T> {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            entries: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// Read the tree from the cache. Loading an already loaded tree re-reads it.
    pub fn load(&mut self, cache: &dyn ReadCache) -> IndexResult<()> {
        let mut input = cache.seek(self.handle)?;
        let count = read_len(&mut input)?;

        let mut entries = BTreeMap::new();
        let mut time: Time = 0;
        for i in 0..count {
            let previous = time;
            time = time
                .checked_add(read_varlong(&mut input)?)
                .ok_or(IndexError::KeyOrder { previous, time })?;
            if i > 0 && time <= previous {
                return Err(IndexError::KeyOrder { previous, time });
            }
            entries.insert(time, T::read(&mut input)?);
        }

        trace!(handle = self.handle, count, "loaded state tree");
        self.entries = Some(entries);
        Ok(())
    }

    /// Drop every value; the tree reverts to a bare handle.
    pub fn unload(&mut self) {
        self.entries = None;
    }

    pub fn entries(&self) -> IndexResult<&BTreeMap<Time, T>> {
        self.entries
            .as_ref()
            .ok_or(IndexError::NotLoaded(self.handle))
    }

    pub fn entries_mut(&mut self) -> IndexResult<&mut BTreeMap<Time, T>> {
        self.entries
            .as_mut()
            .ok_or(IndexError::NotLoaded(self.handle))
    }

    /// Entry with the greatest key `<= time`.
    pub fn floor(&self, time: Time) -> IndexResult<Option<(Time, &T)>> {
        Ok(self
            .entries()?
            .range(..=time)
            .next_back()
            .map(|(&key, value)| (key, value)))
    }

    pub fn floor_key(&self, time: Time) -> IndexResult<Option<Time>> {
        Ok(self.floor(time)?.map(|(key, _)| key))
    }

    /// Entries with keys in `(from, to]`, ascending. Empty unless `from < to`.
    pub fn between(
        &self,
        from: Time,
        to: Time,
    ) -> IndexResult<impl DoubleEndedIterator<Item = (&Time, &T)>> {
        let entries = self.entries()?;
        // BTreeMap::range panics on inverted bounds
        let (lo, hi) = if from < to { (from, to) } else { (to, to) };
        Ok(entries.range((Bound::Excluded(lo), Bound::Included(hi))))
    }
}

/// Write-once builder for a [`StateTree`].
#[derive(Debug)]
pub struct StateTreeBuilder<T> {
    entries: BTreeMap<Time, T>,
}

impl<T> Default for StateTreeBuilder<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: TreeValue> StateTreeBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` at `time`, replacing anything already there.
    pub fn put(&mut self, time: Time, value: T) {
        self.entries.insert(time, value);
    }

    /// Value with the greatest key.
    #[must_use]
    pub fn latest(&self) -> Option<(Time, &T)> {
        self.entries
            .last_key_value()
            .map(|(&time, value)| (time, value))
    }

    /// Value at `time`, inserting `f()` first if there is none.
    pub fn entry_or_insert_with(&mut self, time: Time, f: impl FnOnce() -> T) -> &mut T {
        self.entries.entry(time).or_insert_with(f)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize into a new cache region and clear the builder.
    pub fn build(&mut self, cache: &mut dyn WriteCache) -> IndexResult<Handle> {
        let entries = std::mem::take(&mut self.entries);
        let mut out = cache.deferred();
        write_len(&mut out, entries.len())?;

        let mut previous: Time = 0;
        for (time, value) in &entries {
            write_varlong(&mut out, time - previous)?;
            value.write(&mut out)?;
            previous = *time;
        }

        Ok(cache.commit(out)?)
    }
}
