use super::*;
use crate::sim::{self, Sim};

#[test]
fn probe_sizes() {
    let _guard = sim::exclusive();
    let sim = Sim::install();

    sim.set_eeprom(None);
    assert_eq!(probe(), None);
    assert!(Eeprom::open().is_none());

    sim.set_eeprom(Some(512));
    assert_eq!(probe(), Some(EepromKind::K4));

    sim.set_eeprom(Some(2048));
    let eeprom = Eeprom::open().unwrap();
    assert_eq!(eeprom.kind(), EepromKind::K16);
    assert_eq!(eeprom.size(), 2048);
}

#[test]
fn unaligned_io() {
    let _guard = sim::exclusive();
    let sim = Sim::install();
    sim.set_eeprom(Some(512));

    let mut eeprom = Eeprom::open().unwrap();
    eeprom.write_at(&[0xFF; 512], 0).unwrap();

    assert_eq!(eeprom.write_at(b"save slot 1", 5).unwrap(), 11);
    let mut out = [0; 13];
    eeprom.read_at(&mut out, 4).unwrap();
    assert_eq!(&out, b"\xFFsave slot 1\xFF");

    let stored = sim.with(|state| state.pif.eeprom.clone().unwrap());
    assert_eq!(&stored[5..16], b"save slot 1");

    assert_eq!(eeprom.write_at(&[1; 16], 504).unwrap(), 8);
    assert!(matches!(
        eeprom.read_at(&mut out, 513),
        Err(AccessoryError::OutOfRange)
    ));
}

#[test]
fn cursor() {
    let _guard = sim::exclusive();
    Sim::install().set_eeprom(Some(512));

    let mut eeprom = Eeprom::open().unwrap();
    eeprom.seek(SeekFrom::End(-8)).unwrap();
    eeprom.write_all(&[7; 8]).unwrap();
    assert_eq!(eeprom.write(&[1]).unwrap(), 0);

    eeprom.rewind().unwrap();
    let mut all = Vec::new();
    eeprom.read_to_end(&mut all).unwrap();
    assert_eq!(all.len(), 512);
    assert_eq!(&all[504..], &[7; 8]);
}
