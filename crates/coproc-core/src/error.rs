//! Error types surfaced by the coprocessor diagnostics layer.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to load or parse a linker map file.
#[derive(Debug, Error)]
pub enum SymbolError {
    /// None of the probed candidate paths could be opened.
    #[error("map file not available (searched {} locations)", searched.len())]
    NotFound {
        /// Every path that was probed, in probe order.
        searched: Vec<PathBuf>,
    },
    /// A map file was opened but could not be read.
    #[error("failed to read map file {}: {source}", path.display())]
    Io {
        /// Path of the map file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The address field of an object-file line is not an integer literal.
    #[error("map file line {line}: malformed address field '{field}'")]
    MalformedAddress {
        /// 1-indexed line in the map file.
        line: usize,
        /// The offending field text.
        field: String,
    },
    /// The address parsed but does not fit the 32-bit coprocessor address space.
    #[error("map file line {line}: address 0x{address:x} exceeds 32 bits")]
    AddressOutOfRange {
        /// 1-indexed line in the map file.
        line: usize,
        /// The parsed 64-bit value.
        address: u64,
    },
}

impl SymbolError {
    /// Returns `true` when execution should simply proceed without symbols.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Error payload attached to an abnormal coprocessor yield.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CoprocError {
    /// Access to an address outside every mapped region.
    #[error("illegal access of {access_addr:08x} at PC {instruction_addr:08x}")]
    IllegalAccess {
        /// Address of the faulting instruction.
        instruction_addr: u32,
        /// Address being accessed.
        access_addr: u32,
    },
    /// Word or halfword access on an unaligned address.
    #[error("misaligned access of {access_addr:08x} at PC {instruction_addr:08x}")]
    Misaligned {
        /// Address of the faulting instruction.
        instruction_addr: u32,
        /// Address being accessed.
        access_addr: u32,
    },
    /// The stack pointer descended into program data.
    #[error("stack collision: SP {stack_pointer:08x} below high address {high_address:08x}")]
    StackCollision {
        /// Stack pointer at the time of detection.
        stack_pointer: u32,
        /// Highest address used by program data.
        high_address: u32,
    },
    /// Opcode with no defined behaviour.
    #[error("undefined instruction {opcode:08x} at PC {instruction_addr:08x}")]
    UndefinedInstruction {
        /// Address of the instruction.
        instruction_addr: u32,
        /// Raw opcode bits.
        opcode: u32,
    },
    /// Instruction or feature the emulation does not implement.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// The burst consumed more cycles than its budget.
    #[error("cycle limit of {limit} exceeded")]
    CycleLimit {
        /// Configured cycle budget.
        limit: u64,
    },
    /// Anything else reported by the execution engine.
    #[error("{0}")]
    Other(String),
}
