// Decoded packet model shared by the analyzer, the index and its sinks.
//
// Per-version field encodings live outside this workspace; readers translate into these
// structures before analysis and writers translate back out of them.

// Re-export protocol types
pub use rewind_protocol::{BlockState, ByteArray, Position, Uuid, VarInt};

pub mod play;

pub use play::{
    BlockUpdate, ChangeDifficulty, ChunkData, GameEvent, JoinGame, JoinSettings, Location, Opaque,
    Packet, PlayerPosition, RemoveEntities, Respawn, SetChunkCacheCenter, SetChunkCacheRadius,
    SetTime, SpawnEntity, TeleportEntity, UnloadChunk,
};
