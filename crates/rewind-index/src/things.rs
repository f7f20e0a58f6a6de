//! The set of things alive in one world, maintained incrementally across seeks.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use rewind_cache::{Handle, ReadCache, WriteCache};
use rewind_protocol::{read_len, write_len};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::sink::PacketSink;
use crate::thing::{ThingRecord, TransientThing};
use crate::tree::TreeValue;
use crate::{IndexError, IndexResult, ORIGIN, Time};

type ThingIds = SmallVec<[usize; 2]>;

/// Validity of the materialised active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSet {
    /// Nothing materialised yet; the next step takes the slow path.
    Uninitialized,
    /// The active set holds exactly the things alive at this time.
    ValidAt(Time),
}

#[derive(Debug)]
pub struct TransientThings {
    handle: Handle,
    things: Vec<TransientThing>,
    spawns: BTreeMap<Time, ThingIds>,
    despawns: BTreeMap<Time, ThingIds>,
    active: BTreeSet<usize>,
    state: ActiveSet,
    loaded: bool,
}

fn in_range(
    index: &BTreeMap<Time, ThingIds>,
    after: Time,
    up_to: Time,
) -> impl Iterator<Item = usize> + '_ {
    let (lo, hi) = if after < up_to { (after, up_to) } else { (up_to, up_to) };
    index
        .range((Bound::Excluded(lo), Bound::Included(hi)))
        .flat_map(|(_, ids)| ids.iter().copied())
}

impl TransientThings {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            things: Vec::new(),
            spawns: BTreeMap::new(),
            despawns: BTreeMap::new(),
            active: BTreeSet::new(),
            state: ActiveSet::Uninitialized,
            loaded: false,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[must_use]
    pub fn state(&self) -> ActiveSet {
        self.state
    }

    /// Things currently materialised, in record order.
    pub fn active(&self) -> impl Iterator<Item = &TransientThing> + '_ {
        self.active.iter().map(|&i| &self.things[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.things.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    /// Read every thing record; inner trees stay unloaded until a thing becomes active.
    pub fn load(&mut self, cache: &dyn ReadCache) -> IndexResult<()> {
        let mut input = cache.seek(self.handle)?;
        let count = read_len(&mut input)?;

        self.release();
        self.things = Vec::with_capacity(count);
        self.spawns.clear();
        self.despawns.clear();
        for i in 0..count {
            let thing = TransientThing::from_record(ThingRecord::read(&mut input)?);
            self.spawns.entry(thing.spawn()).or_default().push(i);
            self.despawns.entry(thing.despawn()).or_default().push(i);
            self.things.push(thing);
        }

        debug!(handle = self.handle, count, "loaded things");
        self.loaded = true;
        Ok(())
    }

    /// Drop every record. The client is not told; callers discard its state wholesale.
    pub fn unload(&mut self) {
        self.release();
        self.things.clear();
        self.spawns.clear();
        self.despawns.clear();
        self.loaded = false;
    }

    fn release(&mut self) {
        for i in std::mem::take(&mut self.active) {
            self.things[i].release();
        }
        self.state = ActiveSet::Uninitialized;
    }

    fn ensure_loaded(&self) -> IndexResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(IndexError::NotLoaded(self.handle))
        }
    }

    /// Slow path: rebuild the active set from scratch for `time`.
    pub fn compute_active_things(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        time: Time,
    ) -> IndexResult<()> {
        self.ensure_loaded()?;
        for i in std::mem::take(&mut self.active) {
            self.things[i].unload(sink);
        }

        let alive: Vec<usize> = in_range(&self.spawns, ORIGIN, time)
            .filter(|&i| self.things[i].despawn() > time)
            .collect();
        debug!(time, count = alive.len(), "recomputed active things");

        for i in alive {
            self.things[i].activate(cache, sink, time)?;
            self.active.insert(i);
        }
        self.state = ActiveSet::ValidAt(time);
        Ok(())
    }

    fn ensure_valid_at(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        time: Time,
    ) -> IndexResult<()> {
        if self.state != ActiveSet::ValidAt(time) {
            self.compute_active_things(cache, sink, time)?;
        }
        Ok(())
    }

    pub fn play(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
    ) -> IndexResult<()> {
        if from >= to {
            return Ok(());
        }
        self.ensure_valid_at(cache, sink, from)?;

        let leaving: Vec<usize> = in_range(&self.despawns, from, to)
            .filter(|i| self.active.contains(i))
            .collect();
        for &i in &leaving {
            self.active.remove(&i);
            self.things[i].unload(sink);
        }

        let previous: Vec<usize> = self.active.iter().copied().collect();
        let entering: Vec<usize> = in_range(&self.spawns, from, to)
            .filter(|&i| self.things[i].despawn() > to)
            .collect();
        for &i in &entering {
            self.things[i].activate(cache, sink, to)?;
            self.active.insert(i);
        }
        trace!(from, to, left = leaving.len(), entered = entering.len(), "played things");
        self.state = ActiveSet::ValidAt(to);

        for i in previous {
            self.things[i].play(sink, from, to)?;
        }
        Ok(())
    }

    pub fn rewind(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
    ) -> IndexResult<()> {
        if to >= from {
            return Ok(());
        }
        self.ensure_valid_at(cache, sink, from)?;

        let leaving: Vec<usize> = in_range(&self.spawns, to, from)
            .filter(|i| self.active.contains(i))
            .collect();
        for &i in &leaving {
            self.active.remove(&i);
            self.things[i].unload(sink);
        }

        let previous: Vec<usize> = self.active.iter().copied().collect();
        let entering: Vec<usize> = in_range(&self.despawns, to, from)
            .filter(|&i| self.things[i].spawn() <= to)
            .collect();
        for &i in &entering {
            self.things[i].activate(cache, sink, to)?;
            self.active.insert(i);
        }
        trace!(from, to, left = leaving.len(), entered = entering.len(), "rewound things");
        self.state = ActiveSet::ValidAt(to);

        for i in previous {
            self.things[i].rewind(sink, from, to)?;
        }
        Ok(())
    }
}

/// Collects finished thing records for one world.
#[derive(Debug, Default)]
pub struct TransientThingsBuilder {
    records: Vec<ThingRecord>,
}

impl TransientThingsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ThingRecord) -> IndexResult<()> {
        if record.spawn >= record.despawn {
            return Err(IndexError::InvalidInterval {
                spawn: record.spawn,
                despawn: record.despawn,
            });
        }
        self.records.push(record);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize every record and clear the builder.
    pub fn build(&mut self, cache: &mut dyn WriteCache) -> IndexResult<Handle> {
        let records = std::mem::take(&mut self.records);
        let mut out = cache.deferred();
        write_len(&mut out, records.len())?;
        for record in &records {
            record.write(&mut out)?;
        }
        Ok(cache.commit(out)?)
    }
}
