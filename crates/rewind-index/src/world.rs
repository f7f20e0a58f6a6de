//! Worlds (one per dimension switch) and the tree that sequences them.
//!
//! # Switching
//!
//! ```text
//!   active world == floor(to)?
//!        │ yes                         │ no
//!        ▼                             ▼
//!   world.play/rewind           unload active world
//!                                      │
//!                     ┌────────────────┴─────────────────┐
//!          respawn sufficient                  no previous world / join differs
//!                     │                                  │
//!           Respawn, PlayerPosition      JoinGame, restore(tags), Respawn,
//!                     │                        PlayerPosition
//!                     └────────────────┬─────────────────┘
//!                                      ▼
//!                       load target, play(ORIGIN, to)
//! ```

use rewind_cache::{CacheReader, Deferred, Handle, ReadCache, WriteCache};
use rewind_packets::{JoinGame, JoinSettings, Packet, PlayerPosition, Respawn};
use rewind_protocol::{Decode, Encode};
use tracing::debug;

use crate::playback::PlaybackTree;
use crate::sink::PacketSink;
use crate::things::{TransientThings, TransientThingsBuilder};
use crate::tree::{StateTree, StateTreeBuilder, TreeValue, plain_tree_value};
use crate::{IndexError, IndexResult, ORIGIN, Time};

/// Re-emits the corrective tags in effect at a time, after a synthesized join wiped them.
pub type Restore<'a> = dyn FnMut(&mut dyn PacketSink, Time) -> IndexResult<()> + 'a;

/// Descriptor deciding how a world is entered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct WorldInfo {
    pub join: JoinSettings,
    pub respawn: Respawn,
}

impl WorldInfo {
    /// A respawn is enough to move between worlds that share the join-level settings.
    #[must_use]
    pub fn is_respawn_sufficient(&self, other: &Self) -> bool {
        self.join == other.join
    }

    #[must_use]
    pub fn join_packet(&self) -> Packet {
        Packet::from(JoinGame {
            settings: self.join.clone(),
            respawn: self.respawn.clone(),
        })
    }

    #[must_use]
    pub fn respawn_packet(&self) -> Packet {
        Packet::from(self.respawn.clone())
    }
}

/// Persisted form of a [`World`]: its info plus the handles of its children.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct WorldHeader {
    pub info: WorldInfo,
    pub things: Handle,
    pub view_center: Handle,
    pub view_distance: Handle,
    pub clock: Handle,
    pub thunder: Handle,
}

plain_tree_value!(WorldHeader);

fn channel(handle: Handle) -> PlaybackTree<Packet> {
    PlaybackTree::full(handle, |packet: &Packet, sink| sink.accept(packet.clone()))
}

/// One dimension's trackable state.
#[derive(Debug)]
pub struct World {
    info: WorldInfo,
    things: TransientThings,
    view_center: PlaybackTree<Packet>,
    view_distance: PlaybackTree<Packet>,
    clock: PlaybackTree<Packet>,
    thunder: PlaybackTree<Packet>,
}

impl World {
    #[must_use]
    pub fn from_header(header: WorldHeader) -> Self {
        Self {
            info: header.info,
            things: TransientThings::new(header.things),
            view_center: channel(header.view_center),
            view_distance: channel(header.view_distance),
            clock: channel(header.clock),
            thunder: channel(header.thunder),
        }
    }

    #[must_use]
    pub fn header(&self) -> WorldHeader {
        WorldHeader {
            info: self.info.clone(),
            things: self.things.handle(),
            view_center: self.view_center.handle(),
            view_distance: self.view_distance.handle(),
            clock: self.clock.handle(),
            thunder: self.thunder.handle(),
        }
    }

    #[must_use]
    pub fn info(&self) -> &WorldInfo {
        &self.info
    }

    #[must_use]
    pub fn things(&self) -> &TransientThings {
        &self.things
    }

    fn channels(&self) -> [&PlaybackTree<Packet>; 4] {
        [
            &self.view_center,
            &self.view_distance,
            &self.clock,
            &self.thunder,
        ]
    }

    pub fn load(&mut self, cache: &dyn ReadCache) -> IndexResult<()> {
        self.things.load(cache)?;
        self.view_center.load(cache)?;
        self.view_distance.load(cache)?;
        self.clock.load(cache)?;
        self.thunder.load(cache)
    }

    pub fn unload(&mut self) {
        self.things.unload();
        self.view_center.unload();
        self.view_distance.unload();
        self.clock.unload();
        self.thunder.unload();
    }

    pub fn play(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
    ) -> IndexResult<()> {
        self.things.play(cache, sink, from, to)?;
        for channel in self.channels() {
            channel.play(sink, from, to)?;
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
        self.things.rewind(cache, sink, from, to)?;
        for channel in self.channels() {
            channel.rewind(sink, from, to)?;
        }
        Ok(())
    }
}

impl TreeValue for World {
    fn write(&self, out: &mut Deferred) -> IndexResult<()> {
        self.header().write(out)
    }

    fn read(input: &mut CacheReader<'_>) -> IndexResult<Self> {
        Ok(Self::from_header(WorldHeader::read(input)?))
    }
}

/// Collects one world's state during analysis.
#[derive(Debug)]
pub struct WorldBuilder {
    pub info: WorldInfo,
    pub things: TransientThingsBuilder,
    pub view_center: StateTreeBuilder<Packet>,
    pub view_distance: StateTreeBuilder<Packet>,
    pub clock: StateTreeBuilder<Packet>,
    pub thunder: StateTreeBuilder<Packet>,
}

impl WorldBuilder {
    #[must_use]
    pub fn new(info: WorldInfo) -> Self {
        Self {
            info,
            things: TransientThingsBuilder::new(),
            view_center: StateTreeBuilder::new(),
            view_distance: StateTreeBuilder::new(),
            clock: StateTreeBuilder::new(),
            thunder: StateTreeBuilder::new(),
        }
    }

    pub fn build(&mut self, cache: &mut dyn WriteCache) -> IndexResult<WorldHeader> {
        Ok(WorldHeader {
            info: self.info.clone(),
            things: self.things.build(cache)?,
            view_center: self.view_center.build(cache)?,
            view_distance: self.view_distance.build(cache)?,
            clock: self.clock.build(cache)?,
            thunder: self.thunder.build(cache)?,
        })
    }
}

/// Worlds keyed by the moment they were entered, plus the one currently shown.
#[derive(Debug)]
pub struct WorldStateTree {
    tree: StateTree<World>,
    active: Option<Time>,
}

impl WorldStateTree {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            tree: StateTree::new(handle),
            active: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.tree.handle()
    }

    /// Key of the world currently shown.
    #[must_use]
    pub fn active(&self) -> Option<Time> {
        self.active
    }

    pub fn active_world(&self) -> IndexResult<Option<&World>> {
        match self.active {
            Some(key) => Ok(self.tree.entries()?.get(&key)),
            None => Ok(None),
        }
    }

    pub fn load(&mut self, cache: &dyn ReadCache) -> IndexResult<()> {
        self.tree.load(cache)?;
        self.active = None;
        Ok(())
    }

    pub fn unload(&mut self) {
        self.tree.unload();
        self.active = None;
    }

    fn world_mut(&mut self, key: Time) -> IndexResult<&mut World> {
        let handle = self.tree.handle();
        self.tree
            .entries_mut()?
            .get_mut(&key)
            .ok_or(IndexError::NotLoaded(handle))
    }

    pub fn play(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
        restore: &mut Restore<'_>,
    ) -> IndexResult<()> {
        let target = self.tree.floor_key(to)?;
        match (self.active, target) {
            (Some(active), Some(key)) if active == key => {
                self.world_mut(key)?.play(cache, sink, from, to)
            }
            _ => self.switch(cache, sink, target, to, restore),
        }
    }

    pub fn rewind(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
        restore: &mut Restore<'_>,
    ) -> IndexResult<()> {
        let target = self.tree.floor_key(to)?;
        match (self.active, target) {
            (Some(active), Some(key)) if active == key => {
                self.world_mut(key)?.rewind(cache, sink, from, to)
            }
            _ => self.switch(cache, sink, target, to, restore),
        }
    }

    fn switch(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        target: Option<Time>,
        to: Time,
        restore: &mut Restore<'_>,
    ) -> IndexResult<()> {
        let previous = match self.active.take() {
            Some(key) => {
                let world = self.world_mut(key)?;
                world.unload();
                Some(world.info.clone())
            }
            None => None,
        };

        let Some(key) = target else {
            debug!(to, "no world before target");
            return Ok(());
        };

        let world = self.world_mut(key)?;
        let info = world.info.clone();
        match previous {
            Some(previous) if previous.is_respawn_sufficient(&info) => {
                debug!(key, to, dimension = %info.respawn.dimension, "respawning into world");
                sink.accept(info.respawn_packet());
                sink.accept(Packet::from(PlayerPosition::neutral()));
            }
            _ => {
                debug!(key, to, dimension = %info.respawn.dimension, "rejoining into world");
                sink.accept(info.join_packet());
                restore(sink, to)?;
                sink.accept(info.respawn_packet());
                sink.accept(Packet::from(PlayerPosition::neutral()));
            }
        }

        let world = self.world_mut(key)?;
        world.load(cache)?;
        world.play(cache, sink, ORIGIN, to)?;
        self.active = Some(key);
        Ok(())
    }
}
