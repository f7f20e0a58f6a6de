//! A model of what a client shows after receiving a packet stream.
//!
//! Seeking is correct when the mirror fed by a seek equals the mirror fed the recording
//! linearly up to the same time.

use std::collections::BTreeMap;

use rewind_packets::{GameEvent, JoinSettings, Location, Packet, Respawn, SetTime, Uuid};
use tracing::warn;

use crate::chunk::Column;
use crate::replay::{TagKey, Tags};
use crate::sink::PacketSink;

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntity {
    pub uuid: Uuid,
    pub kind: i32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientMirror {
    pub join: Option<JoinSettings>,
    pub dimension: Option<Respawn>,
    pub entities: BTreeMap<i32, MirrorEntity>,
    pub chunks: BTreeMap<(i32, i32), Column>,
    pub raining: bool,
    pub rain_level: f32,
    pub thunder_level: f32,
    pub clock: SetTime,
    pub view_center: (i32, i32),
    pub view_distance: i32,
    pub tags: Tags,
}

impl ClientMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn min_y(&self) -> i32 {
        self.dimension.as_ref().map_or(0, |d| d.min_y)
    }

    /// Forget everything tied to the current dimension.
    fn reset_world(&mut self) {
        self.entities.clear();
        self.chunks.clear();
        self.raining = false;
        self.rain_level = 0.0;
        self.thunder_level = 0.0;
    }

    pub fn apply(&mut self, packet: &Packet) {
        match packet {
            Packet::JoinGame(join) => {
                *self = Self {
                    join: Some(join.settings.clone()),
                    dimension: Some(join.respawn.clone()),
                    view_distance: join.settings.view_distance.0,
                    ..Self::default()
                };
            }
            Packet::Respawn(respawn) => {
                self.reset_world();
                self.dimension = Some(respawn.clone());
            }
            Packet::PlayerPosition(_) => {}
            Packet::SpawnEntity(spawn) => {
                self.entities.insert(
                    spawn.entity_id.0,
                    MirrorEntity {
                        uuid: spawn.uuid,
                        kind: spawn.kind.0,
                        location: spawn.location,
                    },
                );
            }
            Packet::TeleportEntity(teleport) => {
                if let Some(entity) = self.entities.get_mut(&teleport.entity_id.0) {
                    entity.location = teleport.location;
                }
            }
            Packet::RemoveEntities(remove) => {
                for id in &remove.entity_ids {
                    self.entities.remove(&id.0);
                }
            }
            Packet::ChunkData(chunk) => match Column::decode(&chunk.data.0) {
                Ok(column) => {
                    self.chunks.insert((chunk.x, chunk.z), column);
                }
                Err(err) => warn!(x = chunk.x, z = chunk.z, %err, "mirror dropped malformed chunk"),
            },
            Packet::UnloadChunk(unload) => {
                self.chunks.remove(&(unload.x, unload.z));
            }
            Packet::BlockUpdate(update) => {
                let min_y = self.min_y();
                if let Some(column) = self.chunks.get_mut(&update.position.chunk()) {
                    column.set_block(update.position, min_y, update.state);
                }
            }
            Packet::GameEvent(event) => match event.event {
                GameEvent::BEGIN_RAINING => {
                    self.raining = true;
                    self.rain_level = 0.0;
                }
                GameEvent::END_RAINING => {
                    self.raining = false;
                    self.rain_level = 0.0;
                }
                GameEvent::RAIN_LEVEL_CHANGE if self.raining => self.rain_level = event.value,
                GameEvent::THUNDER_LEVEL_CHANGE => self.thunder_level = event.value,
                _ => {}
            },
            Packet::SetTime(time) => self.clock = *time,
            Packet::SetChunkCacheCenter(center) => self.view_center = (center.x.0, center.z.0),
            Packet::SetChunkCacheRadius(radius) => self.view_distance = radius.distance.0,
            Packet::ChangeDifficulty(_) | Packet::Opaque(_) => {
                if let Some(key) = TagKey::of(packet) {
                    self.tags.insert(key, packet.clone());
                }
            }
        }
    }
}

impl PacketSink for ClientMirror {
    fn accept(&mut self, packet: Packet) {
        self.apply(&packet);
    }
}

#[cfg(test)]
mod tests {
    use rewind_packets::{
        BlockState, BlockUpdate, ByteArray, ChangeDifficulty, ChunkData, JoinGame, Position,
        SpawnEntity, VarInt,
    };

    use super::*;
    use crate::chunk::ChunkSection;

    fn join() -> Packet {
        Packet::from(JoinGame {
            settings: JoinSettings {
                view_distance: VarInt(12),
                ..JoinSettings::default()
            },
            respawn: Respawn {
                min_y: -64,
                ..Respawn::default()
            },
        })
    }

    #[test]
    fn test_join_resets_everything() {
        let mut mirror = ClientMirror::new();
        mirror.apply(&Packet::from(ChangeDifficulty::default()));
        mirror.apply(&Packet::from(SetTime {
            world_age: 5,
            time_of_day: 5,
        }));
        mirror.apply(&join());
        assert!(mirror.tags.is_empty());
        assert_eq!(mirror.clock, SetTime::default());
        assert_eq!(mirror.view_distance, 12);
        assert_eq!(mirror.min_y(), -64);
    }

    #[test]
    fn test_respawn_keeps_view_and_tags() {
        let mut mirror = ClientMirror::new();
        mirror.apply(&join());
        mirror.apply(&Packet::from(ChangeDifficulty::default()));
        mirror.apply(&Packet::from(SpawnEntity::default()));
        mirror.apply(&Packet::from(GameEvent::thunder_level(1.0)));
        mirror.apply(&Packet::from(Respawn::default()));
        assert!(mirror.entities.is_empty());
        assert_eq!(mirror.thunder_level, 0.0);
        assert_eq!(mirror.view_distance, 12);
        assert_eq!(mirror.tags.len(), 1);
    }

    #[test]
    fn test_rain_level_needs_rain() {
        let mut mirror = ClientMirror::new();
        mirror.apply(&Packet::from(GameEvent::rain_level(0.5)));
        assert_eq!(mirror.rain_level, 0.0);
        mirror.apply(&Packet::from(GameEvent::begin_raining()));
        mirror.apply(&Packet::from(GameEvent::rain_level(0.5)));
        assert_eq!(mirror.rain_level, 0.5);
    }

    #[test]
    fn test_block_update_edits_column() {
        let mut mirror = ClientMirror::new();
        mirror.apply(&join());
        let column = Column::new(vec![ChunkSection::empty(0)]);
        mirror.apply(&Packet::from(ChunkData {
            x: 0,
            z: 0,
            data: ByteArray(column.encode().unwrap()),
        }));
        let pos = Position::new(3, -60, 4);
        mirror.apply(&Packet::from(BlockUpdate {
            position: pos,
            state: BlockState(7),
        }));
        assert_eq!(mirror.chunks[&(0, 0)].block(pos, -64), Some(BlockState(7)));
    }
}
