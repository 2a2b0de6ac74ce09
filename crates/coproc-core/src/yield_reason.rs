//! Yield classification and the host-side yield hook.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::CoprocError;

/// Why the coprocessor handed control back to the VCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum YieldReason {
    /// The coprocessor program returned.
    ProgramEnded = 0x00,
    /// The program is waiting for the VCS to catch up.
    SyncWithVCS = 0x01,
    /// A developer breakpoint was hit.
    Breakpoint = 0x02,
    /// The program did something the architecture leaves undefined.
    UndefinedBehaviour = 0x03,
    /// The program used a feature the emulation does not provide.
    UnimplementedFeature = 0x04,
    /// An access to memory failed.
    MemoryAccessError = 0x05,
    /// The stack collided with program data.
    StackError = 0x06,
    /// Instruction execution failed.
    ExecutionError = 0x07,
    /// The burst ran past its cycle budget.
    CycleLimit = 0x08,
    /// No yield has happened yet in the current burst.
    #[default]
    Running = 0x09,
}

impl YieldReason {
    /// Converts the reason to its stable byte tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte tag back into a reason.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::ProgramEnded),
            0x01 => Some(Self::SyncWithVCS),
            0x02 => Some(Self::Breakpoint),
            0x03 => Some(Self::UndefinedBehaviour),
            0x04 => Some(Self::UnimplementedFeature),
            0x05 => Some(Self::MemoryAccessError),
            0x06 => Some(Self::StackError),
            0x07 => Some(Self::ExecutionError),
            0x08 => Some(Self::CycleLimit),
            0x09 => Some(Self::Running),
            _ => None,
        }
    }

    /// Reasons that are part of ordinary cartridge operation.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        matches!(self, Self::ProgramEnded | Self::SyncWithVCS | Self::Running)
    }

    /// Reasons caused by a defect in the coprocessor program.
    #[must_use]
    pub const fn is_bug(self) -> bool {
        matches!(
            self,
            Self::UndefinedBehaviour
                | Self::UnimplementedFeature
                | Self::MemoryAccessError
                | Self::StackError
                | Self::ExecutionError
        )
    }

    /// `false` only for the `Running` placeholder.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether a debugger may edit coprocessor registers and memory.
    ///
    /// Only a finished program is safe to edit; any other yield leaves the
    /// coprocessor live and expecting to resume with its state intact.
    #[must_use]
    pub const fn allows_state_mutation(self) -> bool {
        matches!(self, Self::ProgramEnded)
    }
}

impl fmt::Display for YieldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ProgramEnded => "program ended",
            Self::SyncWithVCS => "sync with VCS",
            Self::Breakpoint => "breakpoint",
            Self::UndefinedBehaviour => "undefined behaviour",
            Self::UnimplementedFeature => "unimplemented feature",
            Self::MemoryAccessError => "memory access error",
            Self::StackError => "stack error",
            Self::ExecutionError => "execution error",
            Self::CycleLimit => "cycle limit",
            Self::Running => "running",
        };
        f.write_str(label)
    }
}

/// One return-of-control event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoprocYield {
    /// Classification of the event.
    pub reason: YieldReason,
    /// Detail supplied by the execution engine, if any.
    pub error: Option<CoprocError>,
}

impl CoprocYield {
    /// Creates a yield without an error payload.
    #[must_use]
    pub const fn new(reason: YieldReason) -> Self {
        Self {
            reason,
            error: None,
        }
    }

    /// Creates a yield carrying an error payload.
    #[must_use]
    pub const fn with_error(reason: YieldReason, error: CoprocError) -> Self {
        Self {
            reason,
            error: Some(error),
        }
    }
}

impl fmt::Display for CoprocYield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}: {error}", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// The host's answer to a yield notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum YieldHookResponse {
    /// Coprocessor execution may proceed.
    Continue,
    /// Coprocessor execution must stop.
    End,
}

/// Host callback notified every time the coprocessor yields.
///
/// Implementations are called with no diagnostics lock held, so they may
/// freely query the fault log or the disassembly recorder.
pub trait YieldHook: Send + Sync {
    /// Decides whether execution may continue after `event`.
    fn on_yield(&self, event: &CoprocYield) -> YieldHookResponse;
}

/// Policy used when no debugger is attached.
///
/// Continues after normal yields and ends after everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultYieldHook;

impl DefaultYieldHook {
    /// The stub policy as a free function.
    #[must_use]
    pub const fn decide(reason: YieldReason) -> YieldHookResponse {
        if reason.is_normal() {
            YieldHookResponse::Continue
        } else {
            YieldHookResponse::End
        }
    }
}

impl YieldHook for DefaultYieldHook {
    fn on_yield(&self, event: &CoprocYield) -> YieldHookResponse {
        Self::decide(event.reason)
    }
}

/// Debugger-aware hook that remembers the latest abnormal yield.
///
/// With `halt_on_bug` cleared, bug yields continue so that non-interactive
/// playback keeps running; the event is still captured for inspection.
#[derive(Debug, Default)]
pub struct CapturingYieldHook {
    halt_on_bug: bool,
    last_abnormal: Mutex<Option<CoprocYield>>,
}

impl CapturingYieldHook {
    /// Creates a hook with the given bug policy.
    #[must_use]
    pub const fn new(halt_on_bug: bool) -> Self {
        Self {
            halt_on_bug,
            last_abnormal: Mutex::new(None),
        }
    }

    /// Returns the most recent abnormal yield, if one has happened.
    #[must_use]
    pub fn last_abnormal(&self) -> Option<CoprocYield> {
        self.last_abnormal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forgets the captured yield.
    pub fn clear(&self) {
        *self
            .last_abnormal
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl YieldHook for CapturingYieldHook {
    fn on_yield(&self, event: &CoprocYield) -> YieldHookResponse {
        if event.reason.is_normal() {
            return YieldHookResponse::Continue;
        }

        *self
            .last_abnormal
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(event.clone());

        if event.reason.is_bug() && !self.halt_on_bug {
            YieldHookResponse::Continue
        } else {
            YieldHookResponse::End
        }
    }
}
