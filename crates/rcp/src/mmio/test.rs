use std::cell::RefCell;

use rustc_hash::FxHashMap;

use super::*;
use crate::sim::Sim;

/// A word-only bus that records every access.
#[derive(Default)]
struct RecordingBus {
    words: RefCell<FxHashMap<u32, u32>>,
    stores: RefCell<Vec<(u32, u32)>>,
}

impl Bus for RecordingBus {
    fn load(&self, addr: PhysAddr) -> u32 {
        assert_eq!(addr.value() % 4, 0);
        self.words.borrow().get(&addr.value()).copied().unwrap_or(0)
    }

    fn store(&self, addr: PhysAddr, value: u32) {
        assert_eq!(addr.value() % 4, 0);
        self.words.borrow_mut().insert(addr.value(), value);
        self.stores.borrow_mut().push((addr.value(), value));
    }
}

#[test]
fn write_io_aligned() {
    let bus = RecordingBus::default();
    write_io_on(&bus, PhysAddr(0x100), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(
        *bus.stores.borrow(),
        [(0x100, 0x0102_0304), (0x104, 0x0506_0708)]
    );
}

#[test]
fn write_io_merges_partial_words() {
    let bus = RecordingBus::default();
    bus.words.borrow_mut().insert(0x100, 0xAABB_CCDD);
    bus.words.borrow_mut().insert(0x108, 0x1122_3344);

    write_io_on(&bus, PhysAddr(0x102), &[1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(
        *bus.stores.borrow(),
        [
            (0x100, 0xAABB_0102),
            (0x104, 0x0304_0506),
            (0x108, 0x0722_3344)
        ]
    );
}

#[test]
fn read_io_partial_words() {
    let bus = RecordingBus::default();
    bus.words.borrow_mut().insert(0x200, 0x0001_0203);
    bus.words.borrow_mut().insert(0x204, 0x0405_0607);

    let mut out = [0; 5];
    read_io_on(&bus, PhysAddr(0x201), &mut out);
    assert_eq!(out, [1, 2, 3, 4, 5]);

    let mut out = [0; 1];
    read_io_on(&bus, PhysAddr(0x207), &mut out);
    assert_eq!(out, [7]);
}

#[test]
fn io_round_trip_through_dmem() {
    let _guard = crate::sim::exclusive();
    Sim::install();

    let dmem = PhysAddr(0x0400_0800);
    let data = *b"unaligned bytes!";
    write_io(dmem + 3, &data);

    let mut out = [0; 16];
    read_io(dmem + 3, &mut out);
    assert_eq!(out, data);
}

#[test]
fn reg_modify() {
    let _guard = crate::sim::exclusive();
    Sim::install();

    let reg: Reg = Reg::at(0x0400_0FF0);
    reg.store(0x10);
    reg.modify(|v| v | 0x01);
    assert_eq!(reg.load(), 0x11);
    assert_eq!(reg.addr(), PhysAddr(0x0400_0FF0));
}
