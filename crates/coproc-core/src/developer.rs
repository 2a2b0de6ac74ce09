//! Developer hooks: fault reporting, breakpoints and symbolised yields.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    CoprocYield, FaultCategory, FaultLog, MapSearchPaths, SymbolEntry, SymbolError, SymbolTable,
    YieldReason,
};

/// Callbacks a cartridge mapper makes into developer tooling.
pub trait Developer: Send + Sync {
    /// A classified memory fault occurred.
    fn memory_fault(
        &self,
        event: &str,
        category: FaultCategory,
        instruction_addr: u32,
        access_addr: u32,
    );

    /// Highest address occupied by program data; the stack must stay above it.
    fn high_address(&self) -> u32;

    /// Whether execution should stop before the instruction at `addr`.
    fn check_breakpoint(&self, addr: u32) -> bool;

    /// The coprocessor yielded.
    fn on_yield(&self, instruction_pc: u32, current_pc: u32, event: &CoprocYield);
}

/// Record of the most recent yield, resolved against the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldReport {
    /// Address of the instruction that caused the yield.
    pub instruction_pc: u32,
    /// Program counter after the yield.
    pub current_pc: u32,
    /// Reason for the yield.
    pub reason: YieldReason,
    /// Function containing `instruction_pc`, when symbols are available.
    pub function: Option<String>,
}

/// Standard [`Developer`] implementation.
#[derive(Debug)]
pub struct DeveloperTools {
    faults: Arc<FaultLog>,
    symbols: Option<SymbolTable>,
    high_address: AtomicU32,
    breakpoints: Mutex<BTreeSet<u32>>,
    last_yield: Mutex<Option<YieldReport>>,
}

impl DeveloperTools {
    /// Creates tools over an existing fault log.
    #[must_use]
    pub fn new(faults: Arc<FaultLog>, symbols: Option<SymbolTable>) -> Self {
        Self {
            faults,
            symbols,
            high_address: AtomicU32::new(0),
            breakpoints: Mutex::new(BTreeSet::new()),
            last_yield: Mutex::new(None),
        }
    }

    /// Creates tools for a ROM, loading symbols when a map file exists.
    ///
    /// A missing map file is not an error: the tools run without symbols.
    ///
    /// # Errors
    ///
    /// Propagates read and parse failures of a map file that was found.
    pub fn for_rom(
        faults: Arc<FaultLog>,
        rom_dir: &Path,
        search: &MapSearchPaths,
    ) -> Result<Self, SymbolError> {
        let symbols = match SymbolTable::load(rom_dir, search) {
            Ok(table) => Some(table),
            Err(err) if err.is_recoverable() => {
                log::debug!("{err}; continuing without symbols");
                None
            }
            Err(err) => return Err(err),
        };
        Ok(Self::new(faults, symbols))
    }

    /// Shared fault log.
    #[must_use]
    pub fn faults(&self) -> &Arc<FaultLog> {
        &self.faults
    }

    /// Loaded symbol table, if any.
    #[must_use]
    pub const fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    /// Function containing `pc`, or `None` when unknown.
    #[must_use]
    pub fn resolve(&self, pc: u32) -> Option<&SymbolEntry> {
        self.symbols.as_ref()?.resolve(pc)
    }

    /// Sets the program's high address.
    pub fn set_high_address(&self, addr: u32) {
        self.high_address.store(addr, Ordering::Release);
    }

    /// Adds a breakpoint; returns `false` if it was already set.
    pub fn add_breakpoint(&self, addr: u32) -> bool {
        lock(&self.breakpoints).insert(addr)
    }

    /// Removes a breakpoint; returns `false` if it was not set.
    pub fn remove_breakpoint(&self, addr: u32) -> bool {
        lock(&self.breakpoints).remove(&addr)
    }

    /// All breakpoints in address order.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<u32> {
        lock(&self.breakpoints).iter().copied().collect()
    }

    /// The most recent yield.
    #[must_use]
    pub fn last_yield(&self) -> Option<YieldReport> {
        lock(&self.last_yield).clone()
    }

    fn function_name(&self, pc: u32) -> Option<String> {
        self.resolve(pc).map(|entry| entry.function_name.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Developer for DeveloperTools {
    fn memory_fault(
        &self,
        event: &str,
        category: FaultCategory,
        instruction_addr: u32,
        access_addr: u32,
    ) {
        self.faults.record(event, category, instruction_addr, access_addr);
    }

    fn high_address(&self) -> u32 {
        self.high_address.load(Ordering::Acquire)
    }

    fn check_breakpoint(&self, addr: u32) -> bool {
        lock(&self.breakpoints).contains(&addr)
    }

    fn on_yield(&self, instruction_pc: u32, current_pc: u32, event: &CoprocYield) {
        let function = self.function_name(instruction_pc);
        if event.reason.is_bug() {
            log::warn!(
                "coprocessor yield: {event} at {instruction_pc:08x} in {}",
                function.as_deref().unwrap_or("unknown function")
            );
        } else {
            log::debug!("coprocessor yield: {event} at {instruction_pc:08x}");
        }

        *lock(&self.last_yield) = Some(YieldReport {
            instruction_pc,
            current_pc,
            reason: event.reason,
            function,
        });
    }
}
