//! Coprocessor synchronization, yield handling and diagnostics for cartridge
//! coprocessors running alongside the VCS CPU.

/// Error types for map file loading and yield payloads.
pub mod error;
pub use error::{CoprocError, SymbolError};

/// Yield classification and host yield hooks.
pub mod yield_reason;
pub use yield_reason::{
    CapturingYieldHook, CoprocYield, DefaultYieldHook, YieldHook, YieldHookResponse, YieldReason,
};

/// Bus ownership state and its lock-free tracker.
pub mod sync;
pub use sync::{ExecutionState, ExecutionTracker, SynchronizationState};

/// Deduplicating fault log.
pub mod fault;
pub use fault::{FaultCategory, FaultEntry, FaultKey, FaultLog};

/// Linker map file parsing and address-to-function lookup.
pub mod symbols;
pub use symbols::{
    parse_integer_literal, MapCandidate, MapSearchPaths, SymbolEntry, SymbolTable, MAP_MARKER,
};

/// Per-burst and cumulative disassembly capture.
pub mod disasm;
pub use disasm::{
    Disassembler, DisassemblyRecorder, DisasmEntry, ExecutionSummary, TvCoords,
    CLOCKS_PER_CPU_CYCLE, CLOCKS_PER_SCANLINE,
};

/// Developer hooks composing the fault log and symbols.
pub mod developer;
pub use developer::{Developer, DeveloperTools, YieldReport};

/// Session configuration.
pub mod config;
pub use config::CoprocConfig;

/// Cartridge mapper facade and the per-mapper session.
pub mod bus;
pub use bus::{CoprocBus, CoprocRegisters, CoprocSession, RegisterSpec};

#[cfg(test)]
use proptest as _;
