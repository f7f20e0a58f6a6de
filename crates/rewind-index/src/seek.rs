use rewind_cache::{Handle, ReadCache};
use tracing::{debug, warn};

use crate::replay::Replay;
use crate::sink::PacketSink;
use crate::{IndexError, IndexResult, ORIGIN, Time};

/// Cursor over a loaded [`Replay`] that remembers what the client is showing.
///
/// A failed seek leaves the client in an unknown state, so the seeker refuses further work
/// once any seek has failed; build a new one to recover.
#[derive(Debug)]
pub struct Seeker {
    replay: Replay,
    current: Option<Time>,
    poisoned: bool,
}

impl Seeker {
    #[must_use]
    pub fn new(replay: Replay) -> Self {
        Self {
            replay,
            current: None,
            poisoned: false,
        }
    }

    pub fn open(cache: &dyn ReadCache, root: Handle) -> IndexResult<Self> {
        Ok(Self::new(Replay::load(cache, root)?))
    }

    /// Time the client currently shows, if any seek has happened.
    #[must_use]
    pub fn current(&self) -> Option<Time> {
        self.current
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[must_use]
    pub fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Emit the packets taking the client to `to`.
    pub fn seek(
        &mut self,
        cache: &dyn ReadCache,
        sink: &mut dyn PacketSink,
        to: Time,
    ) -> IndexResult<()> {
        if self.poisoned {
            return Err(IndexError::Poisoned);
        }
        if to < 0 {
            return Err(IndexError::NegativeTime(to));
        }

        if self.current == Some(to) {
            return Ok(());
        }

        let from = self.current.unwrap_or(ORIGIN);
        let result = if to >= from {
            self.replay.play(cache, sink, from, to)
        } else {
            self.replay.rewind(cache, sink, from, to)
        };

        match result {
            Ok(()) => {
                debug!(from, to, "seeked");
                self.current = Some(to);
                Ok(())
            }
            Err(err) => {
                warn!(from, to, %err, "seek failed, poisoning seeker");
                self.poisoned = true;
                Err(err)
            }
        }
    }
}
