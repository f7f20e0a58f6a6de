// Play-state packets the replay index understands.
//
// Variant order of `Packet` is its wire tag; append new variants at the end.

use rewind_protocol::{BlockState, ByteArray, Decode, Encode, Position, Uuid, VarInt};
use serde::{Deserialize, Serialize};

/// Entity or player transform.
#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, yaw: f32, pitch: f32) -> Self {
        Self {
            x,
            y,
            z,
            yaw,
            pitch,
        }
    }
}

/// Session-level settings only a full join can change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct JoinSettings {
    pub entity_id: i32,
    pub hardcore: bool,
    pub max_players: VarInt,
    pub view_distance: VarInt,
    /// Opaque registry data sent with the join.
    pub registry: ByteArray,
}

/// Dimension-level settings; also the body of a respawn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct Respawn {
    pub dimension: String,
    pub hashed_seed: i64,
    pub game_mode: u8,
    pub flat: bool,
    /// Lowest buildable y coordinate; section 0 of every chunk column starts here.
    pub min_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct JoinGame {
    pub settings: JoinSettings,
    pub respawn: Respawn,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub location: Location,
    pub teleport_id: VarInt,
}

impl PlayerPosition {
    /// Origin, facing south, used after synthesized joins and respawns.
    #[must_use]
    pub fn neutral() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct SpawnEntity {
    pub entity_id: VarInt,
    pub uuid: Uuid,
    pub kind: VarInt,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct TeleportEntity {
    pub entity_id: VarInt,
    pub location: Location,
    pub on_ground: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct RemoveEntities {
    pub entity_ids: Vec<VarInt>,
}

/// A full chunk column; `data` holds the concatenated section encodings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct ChunkData {
    pub x: i32,
    pub z: i32,
    pub data: ByteArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct UnloadChunk {
    pub x: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub position: Position,
    pub state: BlockState,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct GameEvent {
    pub event: u8,
    pub value: f32,
}

impl GameEvent {
    pub const END_RAINING: u8 = 1;
    pub const BEGIN_RAINING: u8 = 2;
    pub const RAIN_LEVEL_CHANGE: u8 = 7;
    pub const THUNDER_LEVEL_CHANGE: u8 = 8;

    #[must_use]
    pub const fn begin_raining() -> Self {
        Self {
            event: Self::BEGIN_RAINING,
            value: 0.0,
        }
    }

    #[must_use]
    pub const fn end_raining() -> Self {
        Self {
            event: Self::END_RAINING,
            value: 0.0,
        }
    }

    #[must_use]
    pub const fn rain_level(value: f32) -> Self {
        Self {
            event: Self::RAIN_LEVEL_CHANGE,
            value,
        }
    }

    #[must_use]
    pub const fn thunder_level(value: f32) -> Self {
        Self {
            event: Self::THUNDER_LEVEL_CHANGE,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct SetTime {
    pub world_age: i64,
    pub time_of_day: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct SetChunkCacheCenter {
    pub x: VarInt,
    pub z: VarInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct SetChunkCacheRadius {
    pub distance: VarInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct ChangeDifficulty {
    pub difficulty: u8,
    pub locked: bool,
}

/// A packet the index does not interpret, carried through by id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize)]
pub struct Opaque {
    pub id: VarInt,
    pub data: ByteArray,
}

/// Every packet the index reads from a recording or emits to a sink.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum Packet {
    JoinGame(JoinGame),
    Respawn(Respawn),
    PlayerPosition(PlayerPosition),
    SpawnEntity(SpawnEntity),
    TeleportEntity(TeleportEntity),
    RemoveEntities(RemoveEntities),
    ChunkData(ChunkData),
    UnloadChunk(UnloadChunk),
    BlockUpdate(BlockUpdate),
    GameEvent(GameEvent),
    SetTime(SetTime),
    SetChunkCacheCenter(SetChunkCacheCenter),
    SetChunkCacheRadius(SetChunkCacheRadius),
    ChangeDifficulty(ChangeDifficulty),
    Opaque(Opaque),
}

impl Packet {
    /// Packet name for logs (e.g., "BlockUpdate").
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinGame(_) => "JoinGame",
            Self::Respawn(_) => "Respawn",
            Self::PlayerPosition(_) => "PlayerPosition",
            Self::SpawnEntity(_) => "SpawnEntity",
            Self::TeleportEntity(_) => "TeleportEntity",
            Self::RemoveEntities(_) => "RemoveEntities",
            Self::ChunkData(_) => "ChunkData",
            Self::UnloadChunk(_) => "UnloadChunk",
            Self::BlockUpdate(_) => "BlockUpdate",
            Self::GameEvent(_) => "GameEvent",
            Self::SetTime(_) => "SetTime",
            Self::SetChunkCacheCenter(_) => "SetChunkCacheCenter",
            Self::SetChunkCacheRadius(_) => "SetChunkCacheRadius",
            Self::ChangeDifficulty(_) => "ChangeDifficulty",
            Self::Opaque(_) => "Opaque",
        }
    }
}

macro_rules! impl_from_packet {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Packet {
                fn from(packet: $variant) -> Self {
                    Self::$variant(packet)
                }
            }
        )*
    };
}

impl_from_packet!(
    JoinGame,
    Respawn,
    PlayerPosition,
    SpawnEntity,
    TeleportEntity,
    RemoveEntities,
    ChunkData,
    UnloadChunk,
    BlockUpdate,
    GameEvent,
    SetTime,
    SetChunkCacheCenter,
    SetChunkCacheRadius,
    ChangeDifficulty,
    Opaque,
);

#[cfg(test)]
mod tests {
    use rewind_protocol::{ProtocolError, write_varint};

    use super::*;

    fn roundtrip(packet: &Packet) -> Packet {
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut cursor = buf.as_slice();
        let decoded = Packet::decode(&mut cursor).unwrap();
        assert!(cursor.is_empty(), "{} left trailing bytes", packet.name());
        decoded
    }

    #[test]
    fn test_variant_tag_is_declaration_index() {
        let packet = Packet::from(UnloadChunk { x: 3, z: -4 });
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 7);
        assert_eq!(buf.len(), 1 + 4 + 4);
    }

    #[test]
    fn test_nested_struct_packets() {
        let join = Packet::from(JoinGame {
            settings: JoinSettings {
                entity_id: 42,
                hardcore: false,
                max_players: VarInt(20),
                view_distance: VarInt(10),
                registry: ByteArray(vec![1, 2, 3]),
            },
            respawn: Respawn {
                dimension: "minecraft:overworld".into(),
                hashed_seed: -7,
                game_mode: 1,
                flat: true,
                min_y: -64,
            },
        });
        assert_eq!(roundtrip(&join), join);

        let remove = Packet::from(RemoveEntities {
            entity_ids: vec![VarInt(1), VarInt(300)],
        });
        assert_eq!(roundtrip(&remove), remove);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 99).unwrap();
        let err = Packet::decode(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnumVariant(99)));
    }

    #[test]
    fn test_json_recording_shape() {
        let packet = Packet::from(GameEvent::thunder_level(0.5));
        let json = serde_json::to_string(&packet).unwrap();
        assert_eq!(json, r#"{"GameEvent":{"event":8,"value":0.5}}"#);
        let back: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, packet);
    }
}
