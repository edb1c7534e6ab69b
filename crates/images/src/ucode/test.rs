use std::io::Cursor;

use super::*;
use crate::elf::test::{Sect, assemble};
use crate::elf::{FLAG_ALLOC, FLAG_EXEC, FLAG_WRITE, SECTION_PROGBITS};

#[test]
fn container_layout() {
    let image = UcodeImage::new("rspq", 0x80, vec![1, 2, 3, 4], vec![5, 6]).unwrap();

    let mut bytes = Cursor::new(Vec::new());
    image.write(&mut bytes).unwrap();
    let bytes = bytes.into_inner();
    insta::assert_snapshot!(format!("{bytes:02x?}"), @"[00, 00, 00, 04, 72, 73, 70, 71, 00, 00, 00, 80, 00, 00, 00, 04, 01, 02, 03, 04, 00, 00, 00, 02, 05, 06]");

    let read = UcodeImage::read(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(read, image);
}

#[test]
fn sections_must_fit() {
    let err = UcodeImage::new("big", 0, vec![0; MEM_SIZE + 4], Vec::new()).unwrap_err();
    assert!(matches!(err, UcodeImageError::TooLarge { section: "text", .. }));

    let err = UcodeImage::new("big", 0, Vec::new(), vec![0; MEM_SIZE + 1]).unwrap_err();
    assert!(matches!(err, UcodeImageError::TooLarge { section: "data", .. }));
}

#[test]
fn invalid_name() {
    let bytes = [0, 0, 0, 1, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    assert!(matches!(
        UcodeImage::read(&mut Cursor::new(bytes)),
        Err(UcodeImageError::Name)
    ));
}

#[test]
fn from_elf() {
    let bytes = assemble(
        0x0400_1040,
        &[
            Sect {
                name: ".text",
                kind: SECTION_PROGBITS,
                flags: FLAG_ALLOC | FLAG_EXEC,
                addr: 0x0400_1000,
                data: vec![0xAA; 0x100],
            },
            Sect {
                name: ".data",
                kind: SECTION_PROGBITS,
                flags: FLAG_ALLOC | FLAG_WRITE,
                addr: 0x0400_0000,
                data: vec![0xBB; 0x20],
            },
        ],
    );

    let mut elf = Elf::read(Cursor::new(bytes)).unwrap();
    let image = UcodeImage::from_elf(&mut elf, "test").unwrap();
    assert_eq!(image.entry, 0x40);
    assert_eq!(image.text, [0xAA; 0x100]);
    assert_eq!(image.data, [0xBB; 0x20]);
}
