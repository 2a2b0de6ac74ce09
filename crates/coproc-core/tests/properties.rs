//! Property coverage for fault deduplication and symbol resolution.

#![allow(clippy::pedantic, clippy::nursery, clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::fmt::Write as _;

use coproc_core::{FaultCategory, FaultKey, FaultLog, SymbolTable, MAP_MARKER};
use log as _;
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;

fn category() -> impl Strategy<Value = FaultCategory> {
    prop_oneof![
        Just(FaultCategory::NullDereference),
        Just(FaultCategory::MisalignedAccess),
        Just(FaultCategory::StackCollision),
        Just(FaultCategory::IllegalAddress),
        Just(FaultCategory::UndefinedSymbol),
        Just(FaultCategory::ProgramMemory),
    ]
}

fn map_file(addresses: &[u32]) -> String {
    let mut map = format!("{MAP_MARKER}\n\n");
    for (idx, addr) in addresses.iter().enumerate() {
        writeln!(map, " .text.fn{idx}").expect("string write");
        writeln!(map, "                0x{addr:08x}       0x10 obj{idx}.o").expect("string write");
    }
    map
}

proptest! {
    #[test]
    fn property_one_entry_per_key_counting_every_call(
        calls in prop::collection::vec((0u32..8, 0u32..8, category()), 0..64)
    ) {
        let log = FaultLog::new();
        let mut expected: HashMap<FaultKey, (u32, FaultCategory)> = HashMap::new();
        let mut first_seen: Vec<FaultKey> = Vec::new();

        for (pc, addr, category) in &calls {
            log.record("event", *category, *pc, *addr);
            let key = FaultKey { instruction_addr: *pc, access_addr: *addr };
            let slot = expected.entry(key).or_insert_with(|| {
                first_seen.push(key);
                (0, *category)
            });
            slot.0 += 1;
        }

        let entries = log.entries();
        prop_assert_eq!(entries.len(), expected.len());
        for (key, (count, category)) in &expected {
            let entry = &entries[key];
            prop_assert_eq!(entry.count, *count);
            prop_assert_eq!(entry.category, *category);
        }

        let order: Vec<FaultKey> = log.ordered_log().iter().map(|entry| entry.key()).collect();
        prop_assert_eq!(order, first_seen);

        let collided = calls.iter().any(|(_, _, c)| *c == FaultCategory::StackCollision);
        prop_assert_eq!(log.stack_collision_latched(), collided);
        log.clear();
        prop_assert_eq!(log.stack_collision_latched(), collided);
    }

    #[test]
    fn property_resolve_returns_last_entry_at_or_below_pc(
        mut addresses in prop::collection::btree_set(0u32..0x1_0000, 1..16)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>()),
        pc in 0u32..0x1_1000,
    ) {
        addresses.sort_unstable();
        let table = SymbolTable::parse(&map_file(&addresses)).expect("generated map parses");
        prop_assert_eq!(table.len(), addresses.len());

        let expected = addresses.iter().rposition(|addr| *addr <= pc);
        let resolved = table.resolve(pc).map(|entry| entry.function_name.clone());
        prop_assert_eq!(resolved, expected.map(|idx| format!("fn{idx}")));
    }
}

#[test]
fn synthetic_map_resolves_foo_and_bar() {
    let map = format!(
        "{MAP_MARKER}\n .text.foo\n                0x00001000       0x100 foo.o\n \
         .text.bar\n                0x00002000       0x100 bar.o\n"
    );
    let table = SymbolTable::parse(&map).expect("valid map");

    assert_eq!(table.resolve(0x1500).map(|e| e.function_name.as_str()), Some("foo"));
    assert!(table.resolve(0x0500).is_none());
    assert_eq!(table.resolve(0x2500).map(|e| e.function_name.as_str()), Some("bar"));
    assert_eq!(table.resolve(0x2500).map(|e| e.object_file.as_str()), Some("bar.o"));
}
