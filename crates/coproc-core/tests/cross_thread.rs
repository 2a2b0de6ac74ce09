//! Debugger-thread reads racing the emulation thread.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use coproc_core::{
    DisassemblyRecorder, DisasmEntry, ExecutionState, ExecutionSummary, ExecutionTracker,
    FaultCategory, FaultLog, SynchronizationState, TvCoords, YieldReason,
};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;

#[derive(Debug)]
struct Word(u32);

impl DisasmEntry for Word {
    fn display_string(&self) -> String {
        format!("{:08x}", self.0)
    }

    fn key(&self) -> String {
        format!("{:08x}", self.0)
    }

    fn csv_string(&self) -> String {
        format!("{:08x}", self.0)
    }

    fn byte_size(&self) -> u32 {
        4
    }
}

const RUNNING: ExecutionState = ExecutionState {
    sync: SynchronizationState::StrongARMFeed,
    yield_reason: YieldReason::Running,
};

const SYNCED: ExecutionState = ExecutionState {
    sync: SynchronizationState::Parallel,
    yield_reason: YieldReason::SyncWithVCS,
};

#[test]
fn execution_state_never_tears() {
    let tracker = Arc::new(ExecutionTracker::new());
    tracker.store(RUNNING);
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let tracker = Arc::clone(&tracker);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0u64;
            while !done.load(Ordering::Acquire) {
                let state = tracker.snapshot();
                assert!(state == RUNNING || state == SYNCED, "torn read {state:?}");
                reads += 1;
            }
            reads
        })
    };

    for i in 0..20_000 {
        tracker.store(if i % 2 == 0 { SYNCED } else { RUNNING });
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().expect("reader thread") > 0);
}

#[test]
fn fault_log_readers_see_consistent_snapshots() {
    let log = Arc::new(FaultLog::new());

    let writer = {
        let log = Arc::clone(&log);
        thread::spawn(move || {
            for i in 0..2_000u32 {
                log.record("loop", FaultCategory::IllegalAddress, 0x100, i % 16);
            }
        })
    };

    for _ in 0..200 {
        let ordered = log.ordered_log();
        assert!(ordered.len() <= 16);
        assert_eq!(ordered.len(), log.entries().len().min(ordered.len()));
    }

    writer.join().expect("writer thread");
    let total: u32 = log.ordered_log().iter().map(|entry| entry.count).sum();
    assert_eq!(total, 2_000);
    assert_eq!(log.len(), 16);
}

#[test]
fn disabling_mid_burst_is_silent() {
    let recorder = Arc::new(DisassemblyRecorder::new());
    recorder.set_enabled(true);
    recorder.on_burst_start(TvCoords::default());

    let producer = {
        let recorder = Arc::clone(&recorder);
        thread::spawn(move || {
            for addr in 0..1_000u32 {
                recorder.on_step(Arc::new(Word(addr * 2)));
            }
            recorder.on_burst_end(ExecutionSummary {
                cycles: 1_000,
                reason: YieldReason::SyncWithVCS,
            });
        })
    };

    recorder.set_enabled(false);
    producer.join().expect("producer thread");

    assert!(recorder.last_execution().is_empty());
    let keys = recorder.cumulative_keys();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}
