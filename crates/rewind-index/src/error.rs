//! Index error types.

use rewind_cache::CacheError;
use rewind_protocol::ProtocolError;
use thiserror::Error;

use crate::Time;

/// Index error type.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Cache could not be read or written.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Stored bytes did not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reading or writing raw section bytes failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Thing record carries a kind tag this build does not know.
    #[error("unknown thing kind: {0}")]
    UnknownThingKind(u8),

    /// Thing record with `spawn >= despawn`.
    #[error("invalid interval: spawn {spawn} must precede despawn {despawn}")]
    InvalidInterval { spawn: Time, despawn: Time },

    /// Persisted tree keys are not strictly increasing.
    #[error("tree keys out of order: {time} after {previous}")]
    KeyOrder { previous: Time, time: Time },

    /// Recording fed to the analyzer went backwards in time.
    #[error("packet at {time} arrived after {previous}")]
    TimeOrder { previous: Time, time: Time },

    /// `play` called with `from > to`, or `rewind` with `from < to`.
    #[error("cannot {op} from {from} to {to}")]
    Direction {
        op: &'static str,
        from: Time,
        to: Time,
    },

    /// Seek target before the start of the replay.
    #[error("cannot seek to negative time {0}")]
    NegativeTime(Time),

    /// Tree accessed before `load`.
    #[error("state tree at handle {0} is not loaded")]
    NotLoaded(u64),

    /// Chunk section bytes are inconsistent.
    #[error("malformed chunk data: {0}")]
    MalformedChunk(&'static str),

    /// An earlier seek failed part-way; the client state is unknown.
    #[error("seeker poisoned by an earlier failure")]
    Poisoned,
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
