use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use crate::PropagationError;

/// Unique, monotonically increasing identifier of a turn.
///
/// Ids are assigned at submission time, so FIFO dispatch order and id order
/// coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TurnId(pub u64);

impl TurnId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn#{}", self.0)
    }
}

bitflags! {
    /// Per-turn behavior flags carried on the turn object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TurnFlags: u8 {
        /// The submitter permits this turn to be coalesced with adjacent
        /// submissions. The core engine carries the flag but does not act
        /// on it; coalescing is a front-end concern.
        const ALLOW_MERGING = 1 << 0;
    }
}

/// One externally initiated propagation pass.
///
/// A turn is created by submitting inputs to the engine. The submitter can
/// block on [`Turn::wait`] until the engine has driven the turn to
/// completion and recorded its outcome.
#[derive(Debug)]
pub struct Turn {
    id: TurnId,
    flags: TurnFlags,
    barrier: TurnBarrier,
}

impl Turn {
    pub(crate) fn new(id: TurnId, flags: TurnFlags) -> Self {
        Self {
            id,
            flags,
            barrier: TurnBarrier::default(),
        }
    }

    /// The unique id of this turn.
    #[inline]
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// The behavior flags this turn was submitted with.
    #[inline]
    pub fn flags(&self) -> TurnFlags {
        self.flags
    }

    /// Block until the turn has run to completion, returning its outcome.
    pub fn wait(&self) -> Result<(), PropagationError> {
        self.barrier.wait()
    }

    /// Returns the turn's outcome if it has already completed.
    pub fn outcome(&self) -> Option<Result<(), PropagationError>> {
        self.barrier.done.lock().clone()
    }

    pub(crate) fn complete(&self, outcome: Result<(), PropagationError>) {
        self.barrier.complete(outcome);
    }
}

/// Completion barrier: the engine signals it once per turn, submitters wait.
#[derive(Debug, Default)]
struct TurnBarrier {
    done: Mutex<Option<Result<(), PropagationError>>>,
    signal: Condvar,
}

impl TurnBarrier {
    fn wait(&self) -> Result<(), PropagationError> {
        let mut done = self.done.lock();
        while done.is_none() {
            self.signal.wait(&mut done);
        }
        done.clone().unwrap_or(Ok(()))
    }

    fn complete(&self, outcome: Result<(), PropagationError>) {
        let mut done = self.done.lock();
        *done = Some(outcome);
        self.signal.notify_all();
    }
}
