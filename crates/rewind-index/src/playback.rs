//! Playback disciplines over a [`StateTree`].
//!
//! - **Diff**: every entry is a reversible delta. Playing applies each delta in `(from, to]`
//!   in ascending order; rewinding undoes each delta in `(to, from]` in descending order.
//! - **Full**: every entry is a complete snapshot and only the latest one at or before the
//!   target matters. Nothing is emitted when that snapshot is already the one in effect.

use rewind_cache::{Handle, ReadCache};

use crate::sink::PacketSink;
use crate::tree::{StateTree, TreeValue};
use crate::{IndexResult, Time};

/// Turns a stored value into packets.
pub type Apply<T> = Box<dyn Fn(&T, &mut dyn PacketSink)>;

pub enum Discipline<T> {
    Diff { forward: Apply<T>, backward: Apply<T> },
    Full { apply: Apply<T> },
}

impl<T> std::fmt::Debug for Discipline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Diff { .. } => f.write_str("Diff"),
            Self::Full { .. } => f.write_str("Full"),
        }
    }
}

/// A state tree paired with the way its values are replayed.
#[derive(Debug)]
pub struct PlaybackTree<T> {
    tree: StateTree<T>,
    discipline: Discipline<T>,
}

impl<T: TreeValue> PlaybackTree<T> {
    pub fn diff(
        handle: Handle,
        forward: impl Fn(&T, &mut dyn PacketSink) + 'static,
        backward: impl Fn(&T, &mut dyn PacketSink) + 'static,
    ) -> Self {
        Self {
            tree: StateTree::new(handle),
            discipline: Discipline::Diff {
                forward: Box::new(forward),
                backward: Box::new(backward),
            },
        }
    }

    pub fn full(handle: Handle, apply: impl Fn(&T, &mut dyn PacketSink) + 'static) -> Self {
        Self {
            tree: StateTree::new(handle),
            discipline: Discipline::Full {
                apply: Box::new(apply),
            },
        }
    }

    #[must_use]
    pub fn tree(&self) -> &StateTree<T> {
        &self.tree
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.tree.handle()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.tree.is_loaded()
    }

    pub fn load(&mut self, cache: &dyn ReadCache) -> IndexResult<()> {
        self.tree.load(cache)
    }

    pub fn unload(&mut self) {
        self.tree.unload();
    }

    /// Move forward from `from` to `to`. No-op unless `from < to`.
    pub fn play(&self, sink: &mut dyn PacketSink, from: Time, to: Time) -> IndexResult<()> {
        if from >= to {
            return Ok(());
        }
        match &self.discipline {
            Discipline::Diff { forward, .. } => {
                for (_, delta) in self.tree.between(from, to)? {
                    forward(delta, sink);
                }
            }
            Discipline::Full { apply } => {
                if let Some((key, snapshot)) = self.tree.floor(to)? {
                    if key > from {
                        apply(snapshot, sink);
                    }
                }
            }
        }
        Ok(())
    }

    /// Move backward from `from` to `to`. No-op unless `to < from`.
    pub fn rewind(&self, sink: &mut dyn PacketSink, from: Time, to: Time) -> IndexResult<()> {
        if to >= from {
            return Ok(());
        }
        match &self.discipline {
            Discipline::Diff { backward, .. } => {
                for (_, delta) in self.tree.between(to, from)?.rev() {
                    backward(delta, sink);
                }
            }
            Discipline::Full { apply } => {
                if let Some((key, snapshot)) = self.tree.floor(to)? {
                    if Some(key) != self.tree.floor_key(from)? {
                        apply(snapshot, sink);
                    }
                }
            }
        }
        Ok(())
    }
}
