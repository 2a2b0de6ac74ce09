//! Classified memory faults raised by the coprocessor program.
//!
//! Faults are deduplicated by `(instruction_addr, access_addr)`: a tight loop
//! hitting the same bad access produces one entry with a growing count, and
//! entries keep first-seen order for display.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Category of an abnormal memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultCategory {
    /// Access through a null pointer.
    NullDereference,
    /// Word or halfword access on an unaligned address.
    MisalignedAccess,
    /// The stack grew into program data.
    StackCollision,
    /// Access outside every mapped region.
    IllegalAddress,
    /// Reference to a symbol the program never defined.
    UndefinedSymbol,
    /// Write into program memory.
    ProgramMemory,
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NullDereference => "null dereference",
            Self::MisalignedAccess => "misaligned access",
            Self::StackCollision => "stack collision",
            Self::IllegalAddress => "illegal address",
            Self::UndefinedSymbol => "undefined symbol",
            Self::ProgramMemory => "program memory",
        };
        f.write_str(label)
    }
}

/// Identity of a fault: the faulting instruction and the address it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FaultKey {
    /// Address of the faulting instruction.
    pub instruction_addr: u32,
    /// Address being accessed.
    pub access_addr: u32,
}

/// One deduplicated fault.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FaultEntry {
    /// Category assigned when the fault was first seen.
    pub category: FaultCategory,
    /// Description supplied with the first occurrence.
    pub event: String,
    /// Address of the faulting instruction.
    pub instruction_addr: u32,
    /// Address being accessed.
    pub access_addr: u32,
    /// Number of occurrences.
    pub count: u32,
}

impl FaultEntry {
    /// Identity of this entry.
    #[must_use]
    pub const fn key(&self) -> FaultKey {
        FaultKey {
            instruction_addr: self.instruction_addr,
            access_addr: self.access_addr,
        }
    }
}

impl fmt::Display for FaultEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {:08x} (PC: {:08x})",
            self.category, self.event, self.access_addr, self.instruction_addr
        )
    }
}

#[derive(Debug, Default)]
struct FaultLogInner {
    entries: HashMap<FaultKey, FaultEntry>,
    ordered: Vec<FaultKey>,
    stack_collision: bool,
}

/// Thread-safe, deduplicating fault log.
///
/// Every operation takes the internal lock for the duration of one call
/// only; readers receive owned snapshots.
#[derive(Debug, Default)]
pub struct FaultLog {
    inner: Mutex<FaultLogInner>,
}

impl FaultLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FaultLogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one fault occurrence and returns the entry's updated count.
    ///
    /// The category and event of an existing entry are never replaced.
    pub fn record(
        &self,
        event: &str,
        category: FaultCategory,
        instruction_addr: u32,
        access_addr: u32,
    ) -> u32 {
        let key = FaultKey {
            instruction_addr,
            access_addr,
        };

        let mut inner = self.lock();
        if category == FaultCategory::StackCollision && !inner.stack_collision {
            inner.stack_collision = true;
            log::warn!(
                "stack collision at PC {instruction_addr:08x}; later faults may be unreliable"
            );
        }

        let FaultLogInner {
            entries, ordered, ..
        } = &mut *inner;
        let entry = entries.entry(key).or_insert_with(|| {
            ordered.push(key);
            log::debug!("{category}: {event}: {access_addr:08x} (PC: {instruction_addr:08x})");
            FaultEntry {
                category,
                event: event.to_string(),
                instruction_addr,
                access_addr,
                count: 0,
            }
        });
        entry.count = entry.count.saturating_add(1);
        entry.count
    }

    /// Forgets every entry. The stack-collision latch is kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.ordered.clear();
    }

    /// `true` once any stack collision has been recorded by this log.
    #[must_use]
    pub fn stack_collision_latched(&self) -> bool {
        self.lock().stack_collision
    }

    /// Looks up a single entry.
    #[must_use]
    pub fn get(&self, key: FaultKey) -> Option<FaultEntry> {
        self.lock().entries.get(&key).cloned()
    }

    /// Entries keyed by identity.
    #[must_use]
    pub fn entries(&self) -> HashMap<FaultKey, FaultEntry> {
        self.lock().entries.clone()
    }

    /// Entries in first-seen order.
    #[must_use]
    pub fn ordered_log(&self) -> Vec<FaultEntry> {
        let inner = self.lock();
        inner
            .ordered
            .iter()
            .filter_map(|key| inner.entries.get(key).cloned())
            .collect()
    }

    /// Number of distinct faults.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    /// `true` when no fault is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes one line per fault in first-seen order.
    ///
    /// The snapshot is taken before writing, so a slow sink never holds the
    /// lock.
    ///
    /// # Errors
    ///
    /// Returns any error produced by `sink`.
    pub fn write_log(&self, sink: &mut impl Write) -> io::Result<()> {
        for entry in self.ordered_log() {
            writeln!(sink, "{entry}")?;
        }
        Ok(())
    }
}
