//! Runtime configuration for a coprocessor session.

use std::path::Path;
use std::sync::Arc;

use crate::{
    CapturingYieldHook, DefaultYieldHook, DeveloperTools, DisassemblyRecorder, FaultLog,
    MapSearchPaths, SymbolError, YieldHook,
};

/// Top-level configuration for coprocessor supervision.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoprocConfig {
    /// Where to look for the linker map file.
    pub map_search: MapSearchPaths,
    /// Capture disassembly from the start of the session.
    pub disassembly_enabled: bool,
    /// End execution after bug yields instead of continuing playback.
    pub halt_on_bug: bool,
    /// Cycle budget of one burst; `None` is unlimited.
    pub cycle_limit: Option<u64>,
}

impl Default for CoprocConfig {
    fn default() -> Self {
        Self {
            map_search: MapSearchPaths::default(),
            disassembly_enabled: false,
            halt_on_bug: true,
            cycle_limit: None,
        }
    }
}

impl CoprocConfig {
    /// Stub hook for headless use.
    #[must_use]
    pub fn default_hook() -> Arc<dyn YieldHook> {
        Arc::new(DefaultYieldHook)
    }

    /// Debugger hook honouring `halt_on_bug`.
    #[must_use]
    pub fn capturing_hook(&self) -> Arc<CapturingYieldHook> {
        Arc::new(CapturingYieldHook::new(self.halt_on_bug))
    }

    /// Recorder whose capture starts as `disassembly_enabled` says.
    #[must_use]
    pub fn recorder(&self) -> Arc<DisassemblyRecorder> {
        let recorder = Arc::new(DisassemblyRecorder::new());
        recorder.set_enabled(self.disassembly_enabled);
        recorder
    }

    /// Developer tools for a ROM in `rom_dir`, probing `map_search` for symbols.
    ///
    /// # Errors
    ///
    /// Propagates map files that exist but cannot be read or parsed; a
    /// missing map file only leaves the tools without symbols.
    pub fn developer_tools(
        &self,
        faults: Arc<FaultLog>,
        rom_dir: &Path,
    ) -> Result<DeveloperTools, SymbolError> {
        DeveloperTools::for_rom(faults, rom_dir, &self.map_search)
    }
}
