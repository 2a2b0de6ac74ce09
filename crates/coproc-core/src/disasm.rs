//! Capture of coprocessor disassembly as the program runs.
//!
//! Two views are kept: the instructions of the most recent execution burst,
//! for single-step style displays, and a cumulative map of every instruction
//! ever seen, for whole-program listings.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{CoprocBus, YieldReason};

/// Colour clocks in one VCS scanline.
pub const CLOCKS_PER_SCANLINE: u32 = 228;

/// Colour clocks in one VCS CPU cycle.
pub const CLOCKS_PER_CPU_CYCLE: u32 = 3;

/// One disassembled coprocessor instruction.
///
/// The recorder is independent of any instruction encoding and relies only
/// on these capabilities.
pub trait DisasmEntry: fmt::Debug + Send + Sync {
    /// Human-readable line for listings.
    fn display_string(&self) -> String;
    /// Identity of the instruction, normally derived from its address.
    ///
    /// Keys are compared lexicographically to order listings, so addresses
    /// should be zero padded.
    fn key(&self) -> String;
    /// Comma separated form for export.
    fn csv_string(&self) -> String;
    /// Encoded size of the instruction in bytes.
    fn byte_size(&self) -> u32;
}

/// Position on the VCS television timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TvCoords {
    /// Frame number.
    pub frame: u32,
    /// Scanline within the frame.
    pub scanline: u32,
    /// Colour clock within the scanline.
    pub clock: u32,
}

impl TvCoords {
    /// Creates a coordinate.
    #[must_use]
    pub const fn new(frame: u32, scanline: u32, clock: u32) -> Self {
        Self {
            frame,
            scanline,
            clock,
        }
    }

    /// The coordinate one CPU cycle later, wrapping onto the next scanline.
    ///
    /// Frames are never wrapped: scanlines per frame vary by ROM.
    #[must_use]
    pub const fn next_cycle(self) -> Self {
        let clock = self.clock + CLOCKS_PER_CPU_CYCLE;
        if clock >= CLOCKS_PER_SCANLINE {
            Self {
                frame: self.frame,
                scanline: self.scanline + 1,
                clock: clock - CLOCKS_PER_SCANLINE,
            }
        } else {
            Self { clock, ..self }
        }
    }
}

impl fmt::Display for TvCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.frame, self.scanline, self.clock)
    }
}

/// What the execution engine reports at the end of a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExecutionSummary {
    /// Coprocessor cycles consumed by the burst.
    pub cycles: u64,
    /// Why the burst ended.
    pub reason: YieldReason,
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cycles ({})", self.cycles, self.reason)
    }
}

/// Receiver of disassembly events from the execution engine.
///
/// Calls arrive in `start`, `step`*, `end` order for each burst.
pub trait Disassembler: Send + Sync {
    /// A burst begins at `coords`.
    fn start(&self, coords: TvCoords);
    /// One instruction was executed.
    fn step(&self, entry: Arc<dyn DisasmEntry>);
    /// The burst finished.
    fn end(&self, summary: ExecutionSummary);
}

#[derive(Debug, Default)]
struct RecorderState {
    enabled: bool,
    cumulative: HashMap<String, Arc<dyn DisasmEntry>>,
    cumulative_keys: Vec<String>,
    last_execution: Vec<Arc<dyn DisasmEntry>>,
    last_summary: Option<ExecutionSummary>,
    last_start: Option<TvCoords>,
}

/// Thread-safe disassembly store.
#[derive(Debug, Default)]
pub struct DisassemblyRecorder {
    state: Mutex<RecorderState>,
}

impl DisassemblyRecorder {
    /// Creates a disabled, empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Turns capture on or off and (un)installs the recorder on `bus`.
    ///
    /// The lock is released before `bus` is touched.
    pub fn enable(self: &Arc<Self>, on: bool, bus: &mut dyn CoprocBus) {
        self.set_enabled(on);
        if on {
            bus.set_disassembler(Some(Arc::clone(self) as Arc<dyn Disassembler>));
        } else {
            bus.set_disassembler(None);
        }
    }

    /// Turns capture on or off without touching any bus.
    ///
    /// Disabling drops the last burst; the cumulative map is kept.
    pub fn set_enabled(&self, on: bool) {
        let mut state = self.lock();
        state.enabled = on;
        if !on {
            state.last_execution.clear();
        }
    }

    /// `true` while capture is on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Starts a new burst triggered by the VCS instruction at `coords`.
    pub fn on_burst_start(&self, coords: TvCoords) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }
        // timeline bookkeeping has not yet advanced past the triggering instruction
        state.last_start = Some(coords.next_cycle());
        state.last_execution.clear();
    }

    /// Appends one executed instruction; ignored while disabled.
    pub fn on_step(&self, entry: Arc<dyn DisasmEntry>) {
        let mut state = self.lock();
        if state.enabled {
            state.last_execution.push(entry);
        }
    }

    /// Finishes the burst and folds its instructions into the cumulative map.
    pub fn on_burst_end(&self, summary: ExecutionSummary) {
        let mut state = self.lock();
        state.last_summary = Some(summary);

        let RecorderState {
            cumulative,
            cumulative_keys,
            last_execution,
            ..
        } = &mut *state;

        let mut added = false;
        for entry in last_execution.iter() {
            let key = entry.key();
            if cumulative.insert(key.clone(), Arc::clone(entry)).is_none() {
                cumulative_keys.push(key);
                added = true;
            }
        }
        if added {
            cumulative_keys.sort_unstable();
        }

        log::trace!(
            "disassembly burst ended: {summary}, {} instructions, {} known",
            last_execution.len(),
            cumulative_keys.len()
        );
    }

    /// Instructions of the most recent burst in execution order.
    #[must_use]
    pub fn last_execution(&self) -> Vec<Arc<dyn DisasmEntry>> {
        self.lock().last_execution.clone()
    }

    /// Summary of the most recent completed burst.
    #[must_use]
    pub fn last_execution_summary(&self) -> Option<ExecutionSummary> {
        self.lock().last_summary
    }

    /// Adjusted start coordinate of the most recent burst.
    #[must_use]
    pub fn last_execution_start(&self) -> Option<TvCoords> {
        self.lock().last_start
    }

    /// Every instruction ever seen, in key order.
    #[must_use]
    pub fn cumulative(&self) -> Vec<Arc<dyn DisasmEntry>> {
        let state = self.lock();
        state
            .cumulative_keys
            .iter()
            .filter_map(|key| state.cumulative.get(key).cloned())
            .collect()
    }

    /// Keys of the cumulative map, sorted.
    #[must_use]
    pub fn cumulative_keys(&self) -> Vec<String> {
        self.lock().cumulative_keys.clone()
    }

    /// Looks up one cumulative entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn DisasmEntry>> {
        self.lock().cumulative.get(key).cloned()
    }

    /// Writes the cumulative listing, one display string per line.
    ///
    /// # Errors
    ///
    /// Returns any error produced by `sink`.
    pub fn write_listing(&self, sink: &mut impl Write) -> io::Result<()> {
        for entry in self.cumulative() {
            writeln!(sink, "{}", entry.display_string())?;
        }
        Ok(())
    }

    /// Writes the cumulative listing as CSV rows.
    ///
    /// # Errors
    ///
    /// Returns any error produced by `sink`.
    pub fn write_csv(&self, sink: &mut impl Write) -> io::Result<()> {
        for entry in self.cumulative() {
            writeln!(sink, "{}", entry.csv_string())?;
        }
        Ok(())
    }
}

impl Disassembler for DisassemblyRecorder {
    fn start(&self, coords: TvCoords) {
        self.on_burst_start(coords);
    }

    fn step(&self, entry: Arc<dyn DisasmEntry>) {
        self.on_step(entry);
    }

    fn end(&self, summary: ExecutionSummary) {
        self.on_burst_end(summary);
    }
}
