//! Forward analysis pass turning a recording into a seekable index.
//!
//! ```text
//! (time, packet) ──► Analyzer ──┬─► tags snapshot tree
//!                               └─► world tree ─► per world: things + channels
//! ```
//!
//! Every thing that is still alive when its world ends (or when the recording ends) is closed
//! at that moment; things whose lifetime would be empty are dropped.

use rewind_cache::{Handle, WriteCache};
use rewind_packets::{
    ChunkData, GameEvent, JoinGame, Location, Packet, RemoveEntities, Respawn, SetChunkCacheCenter,
    SetChunkCacheRadius, SetTime, SpawnEntity, UnloadChunk, VarInt,
};
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::chunk::{BlockChange, Column};
use crate::replay::{ReplayBuilder, TagKey, Tags};
use crate::thing::{ThingKey, ThingRecord};
use crate::things::TransientThingsBuilder;
use crate::tree::{StateTreeBuilder, TreeValue};
use crate::world::{WorldBuilder, WorldInfo};
use crate::{IndexError, IndexResult, Time};

/// Counters reported when analysis finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    pub packets: u64,
    pub worlds: u64,
    pub things: u64,
    /// Things that ended in the same millisecond they started.
    pub discarded: u64,
    /// Packets referring to something the analyzer was not tracking.
    pub untracked: u64,
}

/// A thing that has spawned and not yet ended.
#[derive(Debug)]
struct LiveThing<T> {
    spawn: Time,
    key: ThingKey,
    spawn_packets: Vec<Packet>,
    despawn_packets: Vec<Packet>,
    tree: StateTreeBuilder<T>,
}

impl<T: TreeValue> LiveThing<T> {
    fn new(spawn: Time, key: ThingKey, spawn_packet: Packet, despawn_packet: Packet) -> Self {
        Self {
            spawn,
            key,
            spawn_packets: vec![spawn_packet],
            despawn_packets: vec![despawn_packet],
            tree: StateTreeBuilder::new(),
        }
    }

    /// End the thing at `despawn` and hand its record to `things`.
    fn retire(
        mut self,
        cache: &mut dyn WriteCache,
        things: &mut TransientThingsBuilder,
        despawn: Time,
        stats: &mut AnalysisStats,
    ) -> IndexResult<()> {
        if despawn <= self.spawn {
            trace!(key = ?self.key, spawn = self.spawn, "discarding empty lifetime");
            stats.discarded += 1;
            return Ok(());
        }
        let inner = self.tree.build(cache)?;
        things.push(ThingRecord {
            spawn: self.spawn,
            despawn,
            key: self.key,
            spawn_packets: self.spawn_packets,
            despawn_packets: self.despawn_packets,
            inner,
        })?;
        stats.things += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct LiveChunk {
    thing: LiveThing<Vec<BlockChange>>,
    column: Column,
}

/// Channel values a world starts with.
struct Seeds {
    view_center: Packet,
    view_distance: Packet,
    clock: Packet,
}

impl Seeds {
    fn join(join: &JoinGame) -> Self {
        Self {
            view_center: Packet::from(SetChunkCacheCenter::default()),
            view_distance: Packet::from(SetChunkCacheRadius {
                distance: join.settings.view_distance,
            }),
            clock: Packet::from(SetTime::default()),
        }
    }

    /// A respawn keeps the view and the clock of the world it leaves.
    fn carried(previous: &WorldBuilder) -> Self {
        let latest = |tree: &StateTreeBuilder<Packet>, fallback: Packet| {
            tree.latest().map_or(fallback, |(_, packet)| packet.clone())
        };
        Self {
            view_center: latest(
                &previous.view_center,
                Packet::from(SetChunkCacheCenter::default()),
            ),
            view_distance: latest(
                &previous.view_distance,
                Packet::from(SetChunkCacheRadius {
                    distance: previous.info.join.view_distance,
                }),
            ),
            clock: latest(&previous.clock, Packet::from(SetTime::default())),
        }
    }
}

/// The world currently being recorded.
#[derive(Debug)]
struct OpenWorld {
    start: Time,
    builder: WorldBuilder,
    entities: FxHashMap<i32, LiveThing<Location>>,
    chunks: FxHashMap<(i32, i32), LiveChunk>,
    weather: Option<LiveThing<f32>>,
}

impl OpenWorld {
    fn new(start: Time, info: WorldInfo, seeds: Seeds) -> Self {
        let mut builder = WorldBuilder::new(info);
        builder.view_center.put(start, seeds.view_center);
        builder.view_distance.put(start, seeds.view_distance);
        builder.clock.put(start, seeds.clock);
        builder
            .thunder
            .put(start, Packet::from(GameEvent::thunder_level(0.0)));
        Self {
            start,
            builder,
            entities: FxHashMap::default(),
            chunks: FxHashMap::default(),
            weather: None,
        }
    }

    fn min_y(&self) -> i32 {
        self.builder.info.respawn.min_y
    }

    fn push(
        &mut self,
        cache: &mut dyn WriteCache,
        time: Time,
        packet: &Packet,
        stats: &mut AnalysisStats,
    ) -> IndexResult<()> {
        match packet {
            Packet::SpawnEntity(spawn) => self.spawn_entity(cache, time, spawn, stats)?,
            Packet::TeleportEntity(teleport) => {
                match self.entities.get_mut(&teleport.entity_id.0) {
                    Some(entity) => entity.tree.put(time, teleport.location),
                    None => {
                        warn!(time, entity_id = teleport.entity_id.0, "teleport of unknown entity");
                        stats.untracked += 1;
                    }
                }
            }
            Packet::RemoveEntities(remove) => {
                for id in &remove.entity_ids {
                    match self.entities.remove(&id.0) {
                        Some(entity) => {
                            entity.retire(cache, &mut self.builder.things, time, stats)?;
                        }
                        None => {
                            warn!(time, entity_id = id.0, "removal of unknown entity");
                            stats.untracked += 1;
                        }
                    }
                }
            }
            Packet::ChunkData(chunk) => self.chunk_data(cache, time, chunk, stats)?,
            Packet::UnloadChunk(unload) => {
                if let Some(live) = self.chunks.remove(&(unload.x, unload.z)) {
                    live.thing
                        .retire(cache, &mut self.builder.things, time, stats)?;
                }
            }
            Packet::BlockUpdate(update) => {
                let min_y = self.min_y();
                let Some(live) = self.chunks.get_mut(&update.position.chunk()) else {
                    warn!(time, position = ?update.position, "block update in unloaded chunk");
                    stats.untracked += 1;
                    return Ok(());
                };
                match live.column.set_block(update.position, min_y, update.state) {
                    Some(from) if from != update.state => {
                        live.thing
                            .tree
                            .entry_or_insert_with(time, Vec::new)
                            .push(BlockChange {
                                position: update.position,
                                from,
                                to: update.state,
                            });
                    }
                    Some(_) => {}
                    None => {
                        warn!(time, position = ?update.position, "block update outside column");
                        stats.untracked += 1;
                    }
                }
            }
            Packet::GameEvent(event) => self.game_event(cache, time, *event, stats)?,
            Packet::SetTime(_) => self.builder.clock.put(time, packet.clone()),
            Packet::SetChunkCacheCenter(_) => self.builder.view_center.put(time, packet.clone()),
            Packet::SetChunkCacheRadius(_) => {
                self.builder.view_distance.put(time, packet.clone());
            }
            // handled by the analyzer itself
            Packet::JoinGame(_)
            | Packet::Respawn(_)
            | Packet::PlayerPosition(_)
            | Packet::ChangeDifficulty(_)
            | Packet::Opaque(_) => {}
        }
        Ok(())
    }

    fn spawn_entity(
        &mut self,
        cache: &mut dyn WriteCache,
        time: Time,
        spawn: &SpawnEntity,
        stats: &mut AnalysisStats,
    ) -> IndexResult<()> {
        let entity_id = spawn.entity_id.0;
        if let Some(previous) = self.entities.remove(&entity_id) {
            previous.retire(cache, &mut self.builder.things, time, stats)?;
        }

        let mut entity = LiveThing::new(
            time,
            ThingKey::Entity { entity_id },
            Packet::from(spawn.clone()),
            Packet::from(RemoveEntities {
                entity_ids: vec![VarInt(entity_id)],
            }),
        );
        // a rewind to the spawn moment needs a location to fall back to
        entity.tree.put(time, spawn.location);
        self.entities.insert(entity_id, entity);
        Ok(())
    }

    fn chunk_data(
        &mut self,
        cache: &mut dyn WriteCache,
        time: Time,
        chunk: &ChunkData,
        stats: &mut AnalysisStats,
    ) -> IndexResult<()> {
        let column = Column::decode(&chunk.data.0)?;
        let key = (chunk.x, chunk.z);
        let min_y = self.min_y();

        if let Some(live) = self.chunks.get_mut(&key) {
            if let Some(changes) = live.column.diff(&column, chunk.x, chunk.z, min_y) {
                if !changes.is_empty() {
                    live.thing
                        .tree
                        .entry_or_insert_with(time, Vec::new)
                        .extend(changes);
                }
                live.column = column;
                return Ok(());
            }
            debug!(time, x = chunk.x, z = chunk.z, "chunk changed shape, replacing");
            if let Some(previous) = self.chunks.remove(&key) {
                previous
                    .thing
                    .retire(cache, &mut self.builder.things, time, stats)?;
            }
        }

        let thing = LiveThing::new(
            time,
            ThingKey::Chunk {
                x: chunk.x,
                z: chunk.z,
            },
            Packet::from(chunk.clone()),
            Packet::from(UnloadChunk {
                x: chunk.x,
                z: chunk.z,
            }),
        );
        self.chunks.insert(key, LiveChunk { thing, column });
        Ok(())
    }

    fn game_event(
        &mut self,
        cache: &mut dyn WriteCache,
        time: Time,
        event: GameEvent,
        stats: &mut AnalysisStats,
    ) -> IndexResult<()> {
        match event.event {
            // a repeated begin only resets the strength
            GameEvent::BEGIN_RAINING => match &mut self.weather {
                Some(weather) => weather.tree.put(time, 0.0),
                None => {
                    let mut weather = LiveThing::new(
                        time,
                        ThingKey::Weather,
                        Packet::from(GameEvent::begin_raining()),
                        Packet::from(GameEvent::end_raining()),
                    );
                    weather.tree.put(time, 0.0);
                    self.weather = Some(weather);
                }
            },
            GameEvent::END_RAINING => {
                if let Some(weather) = self.weather.take() {
                    weather.retire(cache, &mut self.builder.things, time, stats)?;
                }
            }
            GameEvent::RAIN_LEVEL_CHANGE => {
                if let Some(weather) = &mut self.weather {
                    weather.tree.put(time, event.value);
                }
            }
            GameEvent::THUNDER_LEVEL_CHANGE => {
                self.builder.thunder.put(time, Packet::from(event));
            }
            _ => {}
        }
        Ok(())
    }

    /// Close every live thing at `at`.
    fn end_all(
        &mut self,
        cache: &mut dyn WriteCache,
        at: Time,
        stats: &mut AnalysisStats,
    ) -> IndexResult<()> {
        let things = &mut self.builder.things;

        let mut entities: Vec<_> = self.entities.drain().collect();
        entities.sort_unstable_by_key(|(id, _)| *id);
        for (_, entity) in entities {
            entity.retire(cache, things, at, stats)?;
        }

        let mut chunks: Vec<_> = self.chunks.drain().collect();
        chunks.sort_unstable_by_key(|(key, _)| *key);
        for (_, live) in chunks {
            live.thing.retire(cache, things, at, stats)?;
        }

        if let Some(weather) = self.weather.take() {
            weather.retire(cache, things, at, stats)?;
        }
        Ok(())
    }
}

/// Builds an index from packets fed in time order.
pub struct Analyzer<'c> {
    cache: &'c mut dyn WriteCache,
    last: Time,
    replay: ReplayBuilder,
    tags: Tags,
    world: Option<OpenWorld>,
    stats: AnalysisStats,
}

impl std::fmt::Debug for Analyzer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("last", &self.last)
            .field("world_start", &self.world.as_ref().map(|w| w.start))
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<'c> Analyzer<'c> {
    pub fn new(cache: &'c mut dyn WriteCache) -> Self {
        Self {
            cache,
            last: 0,
            replay: ReplayBuilder::new(),
            tags: Tags::new(),
            world: None,
            stats: AnalysisStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> AnalysisStats {
        self.stats
    }

    /// Feed one packet. Times must be non-negative and non-decreasing.
    pub fn push(&mut self, time: Time, packet: &Packet) -> IndexResult<()> {
        if time < self.last {
            return Err(IndexError::TimeOrder {
                previous: self.last,
                time,
            });
        }
        self.last = time;
        self.stats.packets += 1;

        match packet {
            Packet::JoinGame(join) => self.join(time, join),
            Packet::Respawn(respawn) => self.respawn(time, respawn),
            Packet::ChangeDifficulty(_) | Packet::Opaque(_) => {
                self.tag(time, packet);
                Ok(())
            }
            Packet::PlayerPosition(_) => Ok(()),
            _ => {
                let Some(world) = self.world.as_mut() else {
                    warn!(time, packet = packet.name(), "packet before any world");
                    self.stats.untracked += 1;
                    return Ok(());
                };
                world.push(&mut *self.cache, time, packet, &mut self.stats)
            }
        }
    }

    fn join(&mut self, time: Time, join: &JoinGame) -> IndexResult<()> {
        self.tags.clear();
        self.replay.tags.put(time, Vec::new());

        let info = WorldInfo {
            join: join.settings.clone(),
            respawn: join.respawn.clone(),
        };
        self.start_world(time, info, Seeds::join(join))
    }

    fn respawn(&mut self, time: Time, respawn: &Respawn) -> IndexResult<()> {
        let Some(previous) = &self.world else {
            warn!(time, "respawn before join");
            self.stats.untracked += 1;
            return Ok(());
        };
        let info = WorldInfo {
            join: previous.builder.info.join.clone(),
            respawn: respawn.clone(),
        };
        let seeds = Seeds::carried(&previous.builder);
        self.start_world(time, info, seeds)
    }

    fn tag(&mut self, time: Time, packet: &Packet) {
        if let Some(key) = TagKey::of(packet) {
            self.tags.insert(key, packet.clone());
            self.replay
                .tags
                .put(time, self.tags.values().cloned().collect());
        }
    }

    fn start_world(&mut self, time: Time, info: WorldInfo, seeds: Seeds) -> IndexResult<()> {
        self.close_world(time)?;
        debug!(time, dimension = %info.respawn.dimension, "world started");
        self.world = Some(OpenWorld::new(time, info, seeds));
        self.stats.worlds += 1;
        Ok(())
    }

    fn close_world(&mut self, at: Time) -> IndexResult<()> {
        let Some(mut world) = self.world.take() else {
            return Ok(());
        };
        world.end_all(&mut *self.cache, at, &mut self.stats)?;
        let header = world.builder.build(&mut *self.cache)?;
        self.replay.worlds.put(world.start, header);
        Ok(())
    }

    /// Close everything still open and write the root; returns the handle to open a
    /// [`crate::Seeker`] with.
    pub fn finish(mut self) -> IndexResult<Handle> {
        self.close_world(Time::MAX)?;
        let root = self.replay.build(&mut *self.cache)?;
        let AnalysisStats {
            packets,
            worlds,
            things,
            discarded,
            untracked,
        } = self.stats;
        info!(
            root,
            packets, worlds, things, discarded, untracked, "analysis complete"
        );
        Ok(root)
    }
}

/// Analyze a whole recording in one go.
pub fn analyze<'p>(
    cache: &mut dyn WriteCache,
    recording: impl IntoIterator<Item = &'p (Time, Packet)>,
) -> IndexResult<Handle> {
    let mut analyzer = Analyzer::new(cache);
    for (time, packet) in recording {
        analyzer.push(*time, packet)?;
    }
    analyzer.finish()
}
