//! Readers racing writers on the shared register map.
//!
//! Every read of a field must return the bytes of exactly one complete
//! write (or the initial value), never a mix of two.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use voltage_sunspec::catalog::{sunspec_registry, COMMON_MODEL_ID, INVERTER_MODEL_ID, METER_MODEL_ID};
use voltage_sunspec::codec::encode_field;
use voltage_sunspec::{FieldSlot, RegisterMap, SampleValue};

fn new_map() -> Arc<RegisterMap> {
    Arc::new(RegisterMap::new(&sunspec_registry().unwrap(), 40000).unwrap())
}

fn encoded(slot: &FieldSlot, value: impl Into<SampleValue>) -> Vec<u8> {
    encode_field(slot.field(), &value.into()).unwrap()
}

/// Span around `slot` for block readers: up to ten registers either side,
/// clipped to the map.
fn span_around(map: &RegisterMap, slot: &FieldSlot) -> (u16, u16) {
    let first = map.base_address();
    let last = first + (map.size() - 1) as u16;
    let start = slot.address().saturating_sub(10).max(first);
    let end = (slot.address() + slot.field().width - 1 + 10).min(last);
    (start, end - start + 1)
}

/// Apply `writes` from `writers` threads while `readers` threads read `slot`
/// directly and another `readers` threads read a register block around it.
/// Returns every distinct field value observed.
fn race(
    map: &Arc<RegisterMap>,
    slot: &FieldSlot,
    writes: Vec<Vec<u8>>,
    writers: usize,
    readers: usize,
) -> HashSet<Vec<u8>> {
    let done = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(writes);
    let (start, count) = span_around(map, slot);
    let offset = usize::from(slot.address() - start) * 2;

    let field_readers = (0..readers).map(|_| {
        let map = Arc::clone(map);
        let slot = slot.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = HashSet::new();
            while !done.load(Ordering::Acquire) {
                seen.insert(map.read_field(&slot).unwrap().to_vec());
            }
            seen.insert(map.read_field(&slot).unwrap().to_vec());
            seen
        })
    });
    let block_readers = (0..readers).map(|_| {
        let map = Arc::clone(map);
        let len = slot.byte_len();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = HashSet::new();
            loop {
                let finished = done.load(Ordering::Acquire);
                let block = map.get_registers(start, count).unwrap();
                seen.insert(block[offset..offset + len].to_vec());
                if finished {
                    break seen;
                }
            }
        })
    });
    let reader_handles: Vec<_> = field_readers.chain(block_readers).collect();

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let map = Arc::clone(map);
            let slot = slot.clone();
            let writes = Arc::clone(&writes);
            thread::spawn(move || {
                for round in 0..50 {
                    for (i, bytes) in writes.iter().enumerate() {
                        if (i + w + round) % writers == 0 || writers == 1 {
                            map.set_field(&slot, bytes).unwrap();
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    reader_handles
        .into_iter()
        .flat_map(|reader| reader.join().unwrap())
        .collect()
}

#[test]
fn test_string_field_never_torn() {
    let map = new_map();
    let sn = map.locate(COMMON_MODEL_ID, "SN").unwrap();
    let initial = map.read_field(&sn).unwrap().to_vec();

    let writes = vec![encoded(&sn, "A".repeat(32)), encoded(&sn, "B".repeat(32)), encoded(&sn, "C")];
    let seen = race(&map, &sn, writes.clone(), 3, 2);

    for value in &seen {
        assert!(
            writes.contains(value) || *value == initial,
            "torn read: {:?}",
            String::from_utf8_lossy(value)
        );
    }
}

#[test]
fn test_disjoint_fields_do_not_interfere() {
    let map = new_map();
    let inverter_w = map.locate(INVERTER_MODEL_ID, "W").unwrap();
    let meter_w = map.locate(METER_MODEL_ID, "W").unwrap();

    let inverter_writes: Vec<Vec<u8>> = (0..20).map(|i| encoded(&inverter_w, i as f64 * 100.5)).collect();
    let meter_writes: Vec<Vec<u8>> = (0..20).map(|i| encoded(&meter_w, -(i as f64) * 7.25)).collect();

    let other = {
        let map = Arc::clone(&map);
        let slot = meter_w.clone();
        let writes = meter_writes.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                for bytes in &writes {
                    map.set_field(&slot, bytes).unwrap();
                }
            }
        })
    };
    let seen = race(&map, &inverter_w, inverter_writes.clone(), 1, 2);
    other.join().unwrap();

    let initial = vec![0x7F, 0xC0, 0x00, 0x00];
    for value in &seen {
        assert!(inverter_writes.contains(value) || *value == initial);
    }
    assert_eq!(map.read_field(&inverter_w).unwrap().to_vec(), inverter_writes[19]);
    assert_eq!(map.read_field(&meter_w).unwrap().to_vec(), meter_writes[19]);
}

#[test]
fn test_block_reads_see_whole_fields() {
    let map = new_map();
    let sn = map.locate(COMMON_MODEL_ID, "SN").unwrap();
    let a = encoded(&sn, "X".repeat(32));
    let b = encoded(&sn, "Y".repeat(32));

    let writer = {
        let map = Arc::clone(&map);
        let slot = sn.clone();
        let (a, b) = (a.clone(), b.clone());
        thread::spawn(move || {
            for _ in 0..500 {
                map.set_field(&slot, &a).unwrap();
                map.set_field(&slot, &b).unwrap();
            }
        })
    };

    let offset = ((sn.address() - 40000) * 2) as usize;
    while !writer.is_finished() {
        let block = map.get_registers(40000, 125).unwrap();
        let field = &block[offset..offset + sn.byte_len()];
        assert!(field.iter().all(|&c| c == field[0]), "torn block read");
    }
    writer.join().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_same_field_reads_are_complete_writes(
        values in prop::collection::vec(-1.0e6f32..1.0e6f32, 1..16),
        writers in 1usize..4,
        readers in 1usize..4,
    ) {
        let map = new_map();
        let slot = map.locate(INVERTER_MODEL_ID, "Hz").unwrap();
        let writes: Vec<Vec<u8>> = values.iter().map(|v| encoded(&slot, *v)).collect();

        let seen = race(&map, &slot, writes.clone(), writers, readers);
        let initial = vec![0x7F, 0xC0, 0x00, 0x00];
        for value in &seen {
            prop_assert!(writes.contains(value) || *value == initial, "torn read {:?}", value);
        }
    }
}
