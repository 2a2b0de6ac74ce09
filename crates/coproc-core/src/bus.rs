//! The surface a coprocessor cartridge mapper exposes to the emulator.
//!
//! [`CoprocRegisters`] and [`CoprocBus`] are implemented per mapper.
//! [`CoprocSession`] is the composition of tracker, hook, disassembler and
//! developer wiring that each mapper embeds and drives while the coprocessor
//! runs.

use std::sync::Arc;

use crate::{
    CoprocConfig, CoprocError, CoprocYield, Developer, Disassembler, DisasmEntry,
    ExecutionState, ExecutionSummary, ExecutionTracker, FaultCategory, SynchronizationState,
    TvCoords, YieldHook, YieldHookResponse, YieldReason,
};

/// Layout of the coprocessor register file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterSpec {
    /// Register names indexed by register number.
    pub names: Vec<String>,
    /// Index of the program counter.
    pub program_counter: usize,
    /// Index of the stack pointer.
    pub stack_pointer: usize,
    /// Index of the link register, if the architecture has one.
    pub link_register: Option<usize>,
}

impl RegisterSpec {
    /// The ARM core register file: `R0`..`R12`, `SP`, `LR`, `PC`.
    #[must_use]
    pub fn arm() -> Self {
        let mut names: Vec<String> = (0..13).map(|n| format!("R{n}")).collect();
        names.extend(["SP", "LR", "PC"].map(String::from));
        Self {
            names,
            program_counter: 15,
            stack_pointer: 13,
            link_register: Some(14),
        }
    }

    /// Name of register `register`.
    #[must_use]
    pub fn name(&self, register: usize) -> Option<&str> {
        self.names.get(register).map(String::as_str)
    }

    /// Number of registers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// `true` for an empty register file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Register and memory introspection of a coprocessor.
pub trait CoprocRegisters {
    /// Short identifier of the processor, e.g. `"ARM7TDMI"`.
    fn processor_id(&self) -> &str;

    /// Turns breakpoint checking on or off.
    fn enable_breakpoints(&mut self, on: bool);

    /// Register file layout.
    fn register_spec(&self) -> RegisterSpec;

    /// Raw value of a register.
    fn read_register(&self, register: usize) -> Option<u32>;

    /// Register value formatted for display.
    fn read_register_formatted(&self, register: usize) -> Option<String> {
        self.read_register(register).map(|value| format!("{value:08x}"))
    }

    /// Changes a register; returns `false` when refused.
    ///
    /// Implementations refuse while the coprocessor is live, see
    /// [`YieldReason::allows_state_mutation`].
    fn write_register(&mut self, register: usize, value: u32) -> bool;

    /// Current stack frame address.
    fn stack_frame(&self) -> u32;

    /// Reads a word of coprocessor memory without side effects.
    fn peek_memory(&self, addr: u32) -> Option<u32>;
}

/// The aggregate surface consumed by the CPU core, debugger and UI.
pub trait CoprocBus: CoprocRegisters {
    /// Synchronization and yield state read as one unit.
    fn execution_state(&self) -> ExecutionState;

    /// Replaces the yield hook.
    fn set_yield_hook(&mut self, hook: Arc<dyn YieldHook>);

    /// Installs or removes the disassembler.
    fn set_disassembler(&mut self, disassembler: Option<Arc<dyn Disassembler>>);

    /// Installs or removes developer hooks.
    fn set_developer(&mut self, developer: Option<Arc<dyn Developer>>);
}

/// Per-mapper coordination of one coprocessor.
///
/// No lock is held across any callback: the wiring is cloned out of the
/// session before each call, so a replacement takes effect at the next event
/// while an in-flight event completes with what it started with.
pub struct CoprocSession {
    tracker: Arc<ExecutionTracker>,
    hook: Arc<dyn YieldHook>,
    disassembler: Option<Arc<dyn Disassembler>>,
    developer: Option<Arc<dyn Developer>>,
    cycle_limit: Option<u64>,
    burst_cycles: u64,
}

impl CoprocSession {
    /// Creates a session with the stub yield hook.
    #[must_use]
    pub fn new(config: &CoprocConfig) -> Self {
        Self {
            tracker: Arc::new(ExecutionTracker::new()),
            hook: CoprocConfig::default_hook(),
            disassembler: None,
            developer: None,
            cycle_limit: config.cycle_limit,
            burst_cycles: 0,
        }
    }

    /// Handle for readers on other threads.
    #[must_use]
    pub fn tracker(&self) -> Arc<ExecutionTracker> {
        Arc::clone(&self.tracker)
    }

    /// Synchronization and yield state read as one unit.
    #[must_use]
    pub fn execution_state(&self) -> ExecutionState {
        self.tracker.snapshot()
    }

    /// Current bus owner.
    #[must_use]
    pub fn current_state(&self) -> SynchronizationState {
        self.tracker.current_state()
    }

    /// Records the bus owner chosen by the mapper.
    pub fn set_sync_state(&self, state: SynchronizationState) {
        self.tracker.set_state(state);
    }

    /// Replaces the yield hook.
    pub fn set_yield_hook(&mut self, hook: Arc<dyn YieldHook>) {
        self.hook = hook;
    }

    /// Installs or removes the disassembler.
    pub fn set_disassembler(&mut self, disassembler: Option<Arc<dyn Disassembler>>) {
        self.disassembler = disassembler;
    }

    /// Installs or removes developer hooks.
    pub fn set_developer(&mut self, developer: Option<Arc<dyn Developer>>) {
        self.developer = developer;
    }

    /// Installed developer hooks.
    #[must_use]
    pub const fn developer(&self) -> Option<&Arc<dyn Developer>> {
        self.developer.as_ref()
    }

    /// Whether a debugger may currently edit registers and memory.
    #[must_use]
    pub fn can_mutate_state(&self) -> bool {
        self.tracker.yield_reason().allows_state_mutation()
    }

    /// The coprocessor regains the bus; `coords` is the triggering VCS instruction.
    pub fn begin_burst(&mut self, coords: TvCoords) {
        self.tracker.set_yield_reason(YieldReason::Running);
        self.burst_cycles = 0;
        log::debug!("coprocessor burst at {coords}");
        if let Some(disassembler) = self.disassembler.clone() {
            disassembler.start(coords);
        }
    }

    /// Forwards one executed instruction to the disassembler.
    pub fn step(&self, entry: Arc<dyn DisasmEntry>) {
        if let Some(disassembler) = self.disassembler.clone() {
            disassembler.step(entry);
        }
    }

    /// Adds to the burst's cycle count.
    ///
    /// Returns a `CycleLimit` yield once the configured budget is exceeded;
    /// the engine passes it to [`CoprocSession::end_burst`].
    pub fn charge_cycles(&mut self, cycles: u64) -> Option<CoprocYield> {
        self.burst_cycles = self.burst_cycles.saturating_add(cycles);
        let limit = self.cycle_limit?;
        (self.burst_cycles > limit).then(|| {
            CoprocYield::with_error(YieldReason::CycleLimit, CoprocError::CycleLimit { limit })
        })
    }

    /// Cycles consumed so far by the current burst.
    #[must_use]
    pub const fn burst_cycles(&self) -> u64 {
        self.burst_cycles
    }

    /// Reports a classified memory fault to the developer hooks.
    pub fn memory_fault(
        &self,
        event: &str,
        category: FaultCategory,
        instruction_addr: u32,
        access_addr: u32,
    ) {
        if let Some(developer) = self.developer.clone() {
            developer.memory_fault(event, category, instruction_addr, access_addr);
        }
    }

    /// Whether a developer breakpoint is set at `addr`.
    #[must_use]
    pub fn check_breakpoint(&self, addr: u32) -> bool {
        self.developer
            .as_ref()
            .is_some_and(|developer| developer.check_breakpoint(addr))
    }

    /// The coprocessor hands control back to the VCS.
    ///
    /// Records the yield, closes the disassembly burst, informs the
    /// developer hooks and finally asks the yield hook whether execution may
    /// continue.
    pub fn end_burst(
        &mut self,
        event: CoprocYield,
        instruction_pc: u32,
        current_pc: u32,
    ) -> YieldHookResponse {
        let event = if event.reason.is_terminal() {
            event
        } else {
            log::warn!("burst ended without a yield reason at {instruction_pc:08x}");
            CoprocYield::with_error(
                YieldReason::ExecutionError,
                CoprocError::Other("burst ended while still running".to_string()),
            )
        };

        self.tracker.set_yield_reason(event.reason);

        if let Some(disassembler) = self.disassembler.clone() {
            disassembler.end(ExecutionSummary {
                cycles: self.burst_cycles,
                reason: event.reason,
            });
        }
        if let Some(developer) = self.developer.clone() {
            developer.on_yield(instruction_pc, current_pc, &event);
        }

        let hook = Arc::clone(&self.hook);
        hook.on_yield(&event)
    }
}
