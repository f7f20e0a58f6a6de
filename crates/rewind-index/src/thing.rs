//! Objects with a bounded lifetime inside one world.
//!
//! A thing is alive on the half-open interval `[spawn, despawn)`. Becoming active replays its
//! spawn packets, becoming inactive replays its despawn packets, and while active it forwards
//! `play`/`rewind` to the one inner tree its kind carries.

use rewind_cache::{CacheReader, Deferred, Handle, ReadCache};
use rewind_packets::{BlockUpdate, GameEvent, Location, Packet, TeleportEntity, VarInt};
use rewind_protocol::{Decode, Encode};

use crate::chunk::BlockChange;
use crate::playback::PlaybackTree;
use crate::sink::PacketSink;
use crate::tree::TreeValue;
use crate::{IndexError, IndexResult, ORIGIN, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThingKind {
    Entity = 0,
    Chunk = 1,
    Weather = 2,
}

impl TryFrom<u8> for ThingKind {
    type Error = IndexError;

    fn try_from(tag: u8) -> IndexResult<Self> {
        match tag {
            0 => Ok(Self::Entity),
            1 => Ok(Self::Chunk),
            2 => Ok(Self::Weather),
            other => Err(IndexError::UnknownThingKind(other)),
        }
    }
}

/// What a thing is, beyond its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThingKey {
    Entity { entity_id: i32 },
    Chunk { x: i32, z: i32 },
    Weather,
}

impl ThingKey {
    #[must_use]
    pub fn kind(self) -> ThingKind {
        match self {
            Self::Entity { .. } => ThingKind::Entity,
            Self::Chunk { .. } => ThingKind::Chunk,
            Self::Weather => ThingKind::Weather,
        }
    }
}

impl TreeValue for ThingKey {
    fn write(&self, out: &mut Deferred) -> IndexResult<()> {
        (self.kind() as u8).encode(out)?;
        match *self {
            Self::Entity { entity_id } => entity_id.encode(out)?,
            Self::Chunk { x, z } => {
                x.encode(out)?;
                z.encode(out)?;
            }
            Self::Weather => {}
        }
        Ok(())
    }

    fn read(input: &mut CacheReader<'_>) -> IndexResult<Self> {
        Ok(match ThingKind::try_from(u8::decode(input)?)? {
            ThingKind::Entity => Self::Entity {
                entity_id: i32::decode(input)?,
            },
            ThingKind::Chunk => Self::Chunk {
                x: i32::decode(input)?,
                z: i32::decode(input)?,
            },
            ThingKind::Weather => Self::Weather,
        })
    }
}

/// Persisted form of a thing.
///
/// ```text
/// spawn: VarLong | despawn: VarLong | kind: u8 | key fields
/// spawn packets | despawn packets | inner tree handle: u64
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ThingRecord {
    pub spawn: Time,
    pub despawn: Time,
    pub key: ThingKey,
    pub spawn_packets: Vec<Packet>,
    pub despawn_packets: Vec<Packet>,
    pub inner: Handle,
}

impl TreeValue for ThingRecord {
    fn write(&self, out: &mut Deferred) -> IndexResult<()> {
        rewind_protocol::write_varlong(&mut *out, self.spawn)?;
        rewind_protocol::write_varlong(&mut *out, self.despawn)?;
        self.key.write(out)?;
        self.spawn_packets.write(out)?;
        self.despawn_packets.write(out)?;
        self.inner.encode(out)?;
        Ok(())
    }

    fn read(input: &mut CacheReader<'_>) -> IndexResult<Self> {
        let spawn = rewind_protocol::read_varlong(&mut *input)?;
        let despawn = rewind_protocol::read_varlong(&mut *input)?;
        if spawn >= despawn {
            return Err(IndexError::InvalidInterval { spawn, despawn });
        }
        Ok(Self {
            spawn,
            despawn,
            key: ThingKey::read(input)?,
            spawn_packets: Vec::read(input)?,
            despawn_packets: Vec::read(input)?,
            inner: u64::decode(input)?,
        })
    }
}

/// The inner tree, specialised per kind.
#[derive(Debug)]
pub enum ThingState {
    /// Location snapshots, replayed as teleports.
    Entity(PlaybackTree<Location>),
    /// Block changes, replayed as block updates.
    Chunk(PlaybackTree<Vec<BlockChange>>),
    /// Rain strength snapshots.
    Weather(PlaybackTree<f32>),
}

impl ThingState {
    fn new(key: ThingKey, handle: Handle) -> Self {
        match key {
            ThingKey::Entity { entity_id } => {
                Self::Entity(PlaybackTree::full(handle, move |location: &Location, sink| {
                    sink.accept(Packet::from(TeleportEntity {
                        entity_id: VarInt(entity_id),
                        location: *location,
                        on_ground: false,
                    }));
                }))
            }
            ThingKey::Chunk { .. } => Self::Chunk(PlaybackTree::diff(
                handle,
                |changes: &Vec<BlockChange>, sink| {
                    for change in changes {
                        sink.accept(Packet::from(BlockUpdate {
                            position: change.position,
                            state: change.to,
                        }));
                    }
                },
                |changes: &Vec<BlockChange>, sink| {
                    for change in changes.iter().rev() {
                        sink.accept(Packet::from(BlockUpdate {
                            position: change.position,
                            state: change.from,
                        }));
                    }
                },
            )),
            ThingKey::Weather => Self::Weather(PlaybackTree::full(handle, |level: &f32, sink| {
                sink.accept(Packet::from(GameEvent::rain_level(*level)));
            })),
        }
    }
}

macro_rules! with_tree {
    ($state:expr, $tree:ident => $body:expr) => {
        match $state {
            ThingState::Entity($tree) => $body,
            ThingState::Chunk($tree) => $body,
            ThingState::Weather($tree) => $body,
        }
    };
}

#[derive(Debug)]
pub struct TransientThing {
    spawn: Time,
    despawn: Time,
    key: ThingKey,
    spawn_packets: Vec<Packet>,
    despawn_packets: Vec<Packet>,
    state: ThingState,
}

impl TransientThing {
    #[must_use]
    pub fn from_record(record: ThingRecord) -> Self {
        Self {
            spawn: record.spawn,
            despawn: record.despawn,
            key: record.key,
            spawn_packets: record.spawn_packets,
            despawn_packets: record.despawn_packets,
            state: ThingState::new(record.key, record.inner),
        }
    }

    #[must_use]
    pub fn spawn(&self) -> Time {
        self.spawn
    }

    #[must_use]
    pub fn despawn(&self) -> Time {
        self.despawn
    }

    #[must_use]
    pub fn key(&self) -> ThingKey {
        self.key
    }

    #[must_use]
    pub fn is_alive_at(&self, time: Time) -> bool {
        self.spawn <= time && time < self.despawn
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        with_tree!(&self.state, tree => tree.is_loaded())
    }

    /// Emit the spawn packets and load the inner tree.
    pub fn load(&mut self, cache: &dyn ReadCache, sink: &mut dyn PacketSink) -> IndexResult<()> {
        for packet in &self.spawn_packets {
            sink.accept(packet.clone());
        }
        with_tree!(&mut self.state, tree => tree.load(cache))
    }

    /// Load and bring the inner state from empty up to `to`.
    pub fn activate(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        to: Time,
    ) -> IndexResult<()> {
        self.load(cache, sink)?;
        self.play(sink, ORIGIN, to)
    }

    /// Emit the despawn packets and drop the inner tree.
    pub fn unload(&mut self, sink: &mut dyn PacketSink) {
        for packet in &self.despawn_packets {
            sink.accept(packet.clone());
        }
        self.release();
    }

    /// Drop the inner tree without telling the client.
    pub fn release(&mut self) {
        with_tree!(&mut self.state, tree => tree.unload());
    }

    pub fn play(&self, sink: &mut dyn PacketSink, from: Time, to: Time) -> IndexResult<()> {
        with_tree!(&self.state, tree => tree.play(sink, from, to))
    }

    pub fn rewind(&self, sink: &mut dyn PacketSink, from: Time, to: Time) -> IndexResult<()> {
        with_tree!(&self.state, tree => tree.rewind(sink, from, to))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rewind_cache::{MemoryCache, WriteCache};
    use rewind_packets::{RemoveEntities, SpawnEntity};

    use super::*;
    use crate::tree::StateTreeBuilder;

    fn entity_record(cache: &mut MemoryCache) -> ThingRecord {
        let mut locations = StateTreeBuilder::new();
        locations.put(10, Location::new(0.0, 64.0, 0.0, 0.0, 0.0));
        locations.put(20, Location::new(5.0, 64.0, 0.0, 0.0, 0.0));
        ThingRecord {
            spawn: 10,
            despawn: 30,
            key: ThingKey::Entity { entity_id: 7 },
            spawn_packets: vec![Packet::from(SpawnEntity {
                entity_id: VarInt(7),
                ..SpawnEntity::default()
            })],
            despawn_packets: vec![Packet::from(RemoveEntities {
                entity_ids: vec![VarInt(7)],
            })],
            inner: locations.build(cache).unwrap(),
        }
    }

    fn teleport(x: f64) -> Packet {
        Packet::from(TeleportEntity {
            entity_id: VarInt(7),
            location: Location::new(x, 64.0, 0.0, 0.0, 0.0),
            on_ground: false,
        })
    }

    #[test]
    fn test_record_persists() {
        let mut cache = MemoryCache::new();
        let record = entity_record(&mut cache);
        let mut out = cache.deferred();
        record.write(&mut out).unwrap();
        let handle = cache.commit(out).unwrap();

        let decoded = ThingRecord::read(&mut cache.seek(handle).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut cache = MemoryCache::new();
        let mut out = cache.deferred();
        out.write_all(&[9]).unwrap();
        let handle = cache.commit(out).unwrap();
        let err = ThingKey::read(&mut cache.seek(handle).unwrap()).unwrap_err();
        assert!(matches!(err, IndexError::UnknownThingKind(9)));
    }

    #[test]
    fn test_empty_interval_rejected() {
        let mut cache = MemoryCache::new();
        let mut record = entity_record(&mut cache);
        record.despawn = record.spawn;
        let mut out = cache.deferred();
        record.write(&mut out).unwrap();
        let handle = cache.commit(out).unwrap();
        let err = ThingRecord::read(&mut cache.seek(handle).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            IndexError::InvalidInterval {
                spawn: 10,
                despawn: 10
            }
        ));
    }

    #[test]
    fn test_lifecycle_packets() {
        let mut cache = MemoryCache::new();
        let record = entity_record(&mut cache);
        let spawn = record.spawn_packets[0].clone();
        let despawn = record.despawn_packets[0].clone();
        let mut thing = TransientThing::from_record(record);
        assert!(thing.is_alive_at(10));
        assert!(!thing.is_alive_at(30));

        let mut out: Vec<Packet> = Vec::new();
        thing.activate(&cache, &mut out, 25).unwrap();
        assert_eq!(out, vec![spawn, teleport(5.0)]);
        assert!(thing.is_loaded());

        out.clear();
        thing.rewind(&mut out, 25, 15).unwrap();
        assert_eq!(out, vec![teleport(0.0)]);

        out.clear();
        thing.unload(&mut out);
        assert_eq!(out, vec![despawn]);
        assert!(!thing.is_loaded());
    }

    #[test]
    fn test_chunk_replays_changes_in_reverse() {
        use rewind_packets::{BlockState, Position};

        let pos = Position::new(1, 2, 3);
        let mut cache = MemoryCache::new();
        let mut changes = StateTreeBuilder::new();
        changes.put(
            5,
            vec![
                BlockChange {
                    position: pos,
                    from: BlockState(0),
                    to: BlockState(1),
                },
                BlockChange {
                    position: pos,
                    from: BlockState(1),
                    to: BlockState(2),
                },
            ],
        );
        let inner = changes.build(&mut cache).unwrap();
        let mut thing = TransientThing::from_record(ThingRecord {
            spawn: 0,
            despawn: 100,
            key: ThingKey::Chunk { x: 0, z: 0 },
            spawn_packets: vec![],
            despawn_packets: vec![],
            inner,
        });

        let update = |state| {
            Packet::from(BlockUpdate {
                position: pos,
                state: BlockState(state),
            })
        };
        let mut out: Vec<Packet> = Vec::new();
        thing.activate(&cache, &mut out, 10).unwrap();
        assert_eq!(out, vec![update(1), update(2)]);

        out.clear();
        thing.rewind(&mut out, 10, 0).unwrap();
        assert_eq!(out, vec![update(1), update(0)]);
    }
}
