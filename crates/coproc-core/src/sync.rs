//! Bus-ownership state shared between the VCS loop and debugger threads.
//!
//! The synchronization state and the current yield reason are packed into a
//! single atomic word. Writers update one half at a time; readers always see
//! both halves from the same instant, without blocking either side.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::YieldReason;

/// Who currently owns VCS-visible bus cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum SynchronizationState {
    /// The coprocessor is not running.
    #[default]
    Idle = 0x00,
    /// The VCS is being fed NOP bytes while the coprocessor computes.
    NOPFeed = 0x01,
    /// The coprocessor is feeding the VCS bus directly.
    StrongARMFeed = 0x02,
    /// Both run and the coprocessor waits for the next VCS access.
    Parallel = 0x03,
}

impl SynchronizationState {
    /// Converts the state to its stable byte tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte tag back into a state.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Idle),
            0x01 => Some(Self::NOPFeed),
            0x02 => Some(Self::StrongARMFeed),
            0x03 => Some(Self::Parallel),
            _ => None,
        }
    }

    /// The other member of this state's alternating pair.
    #[must_use]
    pub const fn partner(self) -> Self {
        match self {
            Self::Idle => Self::NOPFeed,
            Self::NOPFeed => Self::Idle,
            Self::StrongARMFeed => Self::Parallel,
            Self::Parallel => Self::StrongARMFeed,
        }
    }

    /// Legal moves are staying put or switching within a pair.
    ///
    /// `Idle` is the reset state, so moves into or out of it are always legal.
    #[must_use]
    pub fn is_legal_transition(from: Self, to: Self) -> bool {
        from == to || from.partner() == to || from == Self::Idle || to == Self::Idle
    }
}

impl fmt::Display for SynchronizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "Idle",
            Self::NOPFeed => "NOP feed",
            Self::StrongARMFeed => "StrongARM feed",
            Self::Parallel => "Parallel",
        };
        f.write_str(label)
    }
}

/// Consistent snapshot of synchronization and yield state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExecutionState {
    /// Current bus owner.
    pub sync: SynchronizationState,
    /// Most recent yield reason, `Running` while a burst is in progress.
    pub yield_reason: YieldReason,
}

impl ExecutionState {
    const fn pack(self) -> u16 {
        ((self.yield_reason.as_u8() as u16) << 8) | self.sync.as_u8() as u16
    }

    fn unpack(word: u16) -> Self {
        let [sync, reason] = word.to_le_bytes();
        Self {
            sync: SynchronizationState::from_u8(sync).unwrap_or_default(),
            yield_reason: YieldReason::from_u8(reason).unwrap_or_default(),
        }
    }
}

/// Race-free single source of truth for [`ExecutionState`].
#[derive(Debug)]
pub struct ExecutionTracker {
    word: AtomicU16,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    /// Creates a tracker in the `Idle` / `Running` state.
    #[must_use]
    pub const fn new() -> Self {
        let initial = ExecutionState {
            sync: SynchronizationState::Idle,
            yield_reason: YieldReason::Running,
        };
        Self {
            word: AtomicU16::new(initial.pack()),
        }
    }

    /// Current bus owner.
    #[must_use]
    pub fn current_state(&self) -> SynchronizationState {
        self.snapshot().sync
    }

    /// Most recent yield reason.
    #[must_use]
    pub fn yield_reason(&self) -> YieldReason {
        self.snapshot().yield_reason
    }

    /// Both fields, read as one unit.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionState {
        ExecutionState::unpack(self.word.load(Ordering::Acquire))
    }

    /// Records a new bus owner, returning the previous one.
    pub fn set_state(&self, sync: SynchronizationState) -> SynchronizationState {
        let previous = self.update(|state| ExecutionState { sync, ..state }).sync;
        if !SynchronizationState::is_legal_transition(previous, sync) {
            log::warn!("unexpected synchronization transition {previous} -> {sync}");
        } else if previous != sync {
            log::trace!("synchronization {previous} -> {sync}");
        }
        previous
    }

    /// Records a new yield reason, returning the previous one.
    pub fn set_yield_reason(&self, yield_reason: YieldReason) -> YieldReason {
        self.update(|state| ExecutionState {
            yield_reason,
            ..state
        })
        .yield_reason
    }

    /// Replaces both fields at once.
    pub fn store(&self, state: ExecutionState) {
        self.word.store(state.pack(), Ordering::Release);
    }

    fn update(&self, f: impl Fn(ExecutionState) -> ExecutionState) -> ExecutionState {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = f(ExecutionState::unpack(current)).pack();
            match self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(previous) => return ExecutionState::unpack(previous),
                Err(actual) => current = actual,
            }
        }
    }
}
