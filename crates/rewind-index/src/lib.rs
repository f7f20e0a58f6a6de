//! Random-access seeking over recorded packet streams.
//!
//! A recording is a linear list of `(time, packet)` pairs. Replaying it from the start to reach
//! minute 40 is too slow, so a single forward [`Analyzer`] pass turns it into an index of
//! time-keyed trees stored in a [`rewind_cache`] cache. A [`Seeker`] then moves a client to any
//! time, forwards or backwards, by emitting only the packets needed to get there.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Replay                                                              │
//! │    tags   : PlaybackTree<Vec<Packet>>   corrective snapshot          │
//! │    worlds : WorldStateTree              one World per join/respawn   │
//! └──────────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  World                                                               │
//! │    things       : TransientThings  entities, chunks, weather         │
//! │    view_center  ┐                                                    │
//! │    view_distance│ PlaybackTree<Packet>, latest value wins            │
//! │    clock        │                                                    │
//! │    thunder      ┘                                                    │
//! └──────────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  TransientThing  alive in [spawn, despawn)                           │
//! │    spawn/despawn packets + inner PlaybackTree (diff or full)         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Time is in milliseconds from the start of the recording. [`ORIGIN`] sits just before the
//! first packet, so playing from it includes everything at time 0.

mod analyze;
pub mod chunk;
mod error;
mod mirror;
pub mod playback;
pub mod replay;
mod seek;
mod sink;
pub mod thing;
pub mod things;
pub mod tree;
pub mod world;

pub use analyze::{AnalysisStats, Analyzer, analyze};
pub use error::{IndexError, IndexResult};
pub use mirror::{ClientMirror, MirrorEntity};
pub use replay::{Replay, ReplayBuilder, TagKey, Tags};
pub use seek::Seeker;
pub use sink::PacketSink;

/// Milliseconds since the start of the recording.
pub type Time = i64;

/// The moment before anything happened.
pub const ORIGIN: Time = -1;
