//! Root of a built index: corrective tags plus the world sequence.

use std::collections::BTreeMap;

use rewind_cache::{Handle, ReadCache, WriteCache};
use rewind_packets::Packet;
use rewind_protocol::{Decode, Encode};
use tracing::debug;

use crate::playback::PlaybackTree;
use crate::sink::PacketSink;
use crate::tree::StateTreeBuilder;
use crate::world::{WorldHeader, WorldStateTree};
use crate::{IndexError, IndexResult, ORIGIN, Time};

/// Which corrective slot a packet occupies; a newer packet replaces the older one in its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKey {
    Difficulty,
    Opaque(i32),
}

impl TagKey {
    /// Slot for `packet`, or `None` if it is not a corrective packet.
    #[must_use]
    pub fn of(packet: &Packet) -> Option<Self> {
        match packet {
            Packet::ChangeDifficulty(_) => Some(Self::Difficulty),
            Packet::Opaque(opaque) => Some(Self::Opaque(opaque.id.0)),
            _ => None,
        }
    }
}

/// Latest corrective packet per slot.
pub type Tags = BTreeMap<TagKey, Packet>;

fn tags_tree(handle: Handle) -> PlaybackTree<Vec<Packet>> {
    PlaybackTree::full(handle, |snapshot: &Vec<Packet>, sink| {
        for packet in snapshot {
            sink.accept(packet.clone());
        }
    })
}

/// Persisted root region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct Root {
    tags: Handle,
    worlds: Handle,
}

/// A loaded replay index.
#[derive(Debug)]
pub struct Replay {
    tags: PlaybackTree<Vec<Packet>>,
    worlds: WorldStateTree,
}

impl Replay {
    /// Load the index rooted at `root`.
    pub fn load(cache: &dyn ReadCache, root: Handle) -> IndexResult<Self> {
        let Root { tags, worlds } = Root::decode(&mut cache.seek(root)?)?;
        let mut replay = Self {
            tags: tags_tree(tags),
            worlds: WorldStateTree::new(worlds),
        };
        replay.tags.load(cache)?;
        replay.worlds.load(cache)?;
        debug!(root, "loaded replay");
        Ok(replay)
    }

    pub fn unload(&mut self) {
        self.tags.unload();
        self.worlds.unload();
    }

    #[must_use]
    pub fn worlds(&self) -> &WorldStateTree {
        &self.worlds
    }

    /// Emit the packets moving the client from the state at `from` to the state at `to`.
    pub fn play(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
    ) -> IndexResult<()> {
        if from > to {
            return Err(IndexError::Direction {
                op: "play",
                from,
                to,
            });
        }
        let Self { tags, worlds } = self;
        tags.play(sink, from, to)?;
        worlds.play(cache, sink, from, to, &mut |sink, t| tags.play(sink, ORIGIN, t))
    }

    /// Emit the packets moving the client from the state at `from` back to the state at `to`.
    pub fn rewind(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        from: Time,
        to: Time,
    ) -> IndexResult<()> {
        if to > from {
            return Err(IndexError::Direction {
                op: "rewind",
                from,
                to,
            });
        }
        let Self { tags, worlds } = self;
        tags.rewind(sink, from, to)?;
        worlds.rewind(cache, sink, from, to, &mut |sink, t| tags.play(sink, ORIGIN, t))
    }
}

/// Collects the replay root during analysis.
#[derive(Debug, Default)]
pub struct ReplayBuilder {
    pub tags: StateTreeBuilder<Vec<Packet>>,
    pub worlds: StateTreeBuilder<WorldHeader>,
}

impl ReplayBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write both trees and the root region; returns the root handle.
    pub fn build(&mut self, cache: &mut dyn WriteCache) -> IndexResult<Handle> {
        let root = Root {
            tags: self.tags.build(cache)?,
            worlds: self.worlds.build(cache)?,
        };
        let mut out = cache.deferred();
        root.encode(&mut out)?;
        Ok(cache.commit(out)?)
    }
}

#[cfg(test)]
mod tests {
    use rewind_cache::MemoryCache;
    use rewind_packets::{ByteArray, ChangeDifficulty, Opaque, SetTime, VarInt};

    use super::*;
    use crate::world::{WorldBuilder, WorldInfo};

    #[test]
    fn test_tag_keys() {
        let difficulty = Packet::from(ChangeDifficulty::default());
        let opaque = Packet::from(Opaque {
            id: VarInt(0x33),
            data: ByteArray(vec![]),
        });
        assert_eq!(TagKey::of(&difficulty), Some(TagKey::Difficulty));
        assert_eq!(TagKey::of(&opaque), Some(TagKey::Opaque(0x33)));
        assert_eq!(TagKey::of(&Packet::from(SetTime::default())), None);
    }

    #[test]
    fn test_direction_is_checked() {
        let mut cache = MemoryCache::new();
        let root = ReplayBuilder::new().build(&mut cache).unwrap();
        let mut replay = Replay::load(&cache, root).unwrap();
        let mut out: Vec<Packet> = Vec::new();
        assert!(matches!(
            replay.play(&cache, &mut out, 10, 5),
            Err(IndexError::Direction { op: "play", .. })
        ));
        assert!(matches!(
            replay.rewind(&cache, &mut out, 5, 10),
            Err(IndexError::Direction { op: "rewind", .. })
        ));
    }

    #[test]
    fn test_rejoin_restores_tags_at_target() {
        let hard = Packet::from(ChangeDifficulty {
            difficulty: 3,
            locked: false,
        });
        let mut cache = MemoryCache::new();
        let mut builder = ReplayBuilder::new();
        builder.tags.put(0, vec![]);
        builder.tags.put(30, vec![hard.clone()]);
        let info = WorldInfo::default();
        let header = WorldBuilder::new(info.clone()).build(&mut cache).unwrap();
        builder.worlds.put(0, header);
        let root = builder.build(&mut cache).unwrap();

        let mut replay = Replay::load(&cache, root).unwrap();
        let mut out: Vec<Packet> = Vec::new();
        replay.play(&cache, &mut out, ORIGIN, 40).unwrap();
        assert_eq!(
            out,
            vec![
                hard.clone(),
                info.join_packet(),
                hard,
                info.respawn_packet(),
                Packet::from(rewind_packets::PlayerPosition::neutral()),
            ]
        );
    }
}
