use std::io::Cursor;

use nanorand::{Rng, WyRand};

use super::*;

fn ipl3() -> Vec<u8> {
    (0..IPL3_LEN).map(|i| i as u8).collect()
}

fn program(len: usize) -> Vec<u8> {
    let mut rng = WyRand::new_seed(0x64);
    (0..len).map(|_| rng.generate::<u8>()).collect()
}

#[test]
fn header_layout() {
    let rom = Rom::new(&ipl3(), &[], "HELLO N64").unwrap();
    let bytes = rom.to_bytes().unwrap();

    assert_eq!(bytes.len(), PROGRAM_OFFSET + CHECKSUM_LEN);
    assert_eq!(&bytes[..4], &[0x80, 0x37, 0x12, 0x40]);
    assert_eq!(&bytes[0x20..0x34], b"HELLO N64           ");
    assert_eq!(&bytes[0x3B..0x40], b"N   \0");
    assert_eq!(&bytes[HEADER_LEN..PROGRAM_OFFSET], ipl3().as_slice());
    insta::assert_snapshot!(format!("{:02x?}", &bytes[..16]), @"[80, 37, 12, 40, 00, 00, 00, 0f, 80, 00, 04, 00, 00, 00, 14, 44]");
}

#[test]
fn program_is_padded() {
    let rom = Rom::new(&ipl3(), &[1, 2, 3, 4], "").unwrap();
    assert_eq!(rom.program.len(), CHECKSUM_LEN);
    assert_eq!(&rom.program[..4], &[1, 2, 3, 4]);
    assert!(rom.program[4..].iter().all(|&b| b == 0xFF));

    let large = program(CHECKSUM_LEN + 4);
    let rom = Rom::new(&ipl3(), &large, "").unwrap();
    assert_eq!(rom.program, large);
}

#[test]
fn checksum_covers_first_megabyte() {
    let mut data = program(CHECKSUM_LEN + 16);
    let sum = checksum(&data);
    assert_eq!(checksum(&data), sum);

    // past the checksummed area
    data[CHECKSUM_LEN] ^= 1;
    assert_eq!(checksum(&data), sum);

    data[CHECKSUM_LEN / 2] ^= 0x10;
    assert_ne!(checksum(&data), sum);
}

#[test]
fn read_back() {
    let rom = Rom::new(&ipl3(), &program(0x2345), "ROUND").unwrap();
    assert!(rom.is_valid());

    let bytes = rom.to_bytes().unwrap();
    let read = Rom::read(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(read.header, rom.header);
    assert_eq!(read.header.title(), "ROUND");
    assert_eq!(read.program, rom.program);
    assert!(read.is_valid());

    let mut damaged = bytes.clone();
    damaged[PROGRAM_OFFSET + 8] ^= 0x80;
    let read = Rom::read(&mut Cursor::new(&damaged)).unwrap();
    assert!(!read.is_valid());

    // byteswapped images are rejected
    let swapped = bytes
        .chunks_exact(2)
        .flat_map(|pair| [pair[1], pair[0]])
        .collect::<Vec<_>>();
    assert!(matches!(
        Rom::read(&mut Cursor::new(&swapped)),
        Err(RomError::Format { .. })
    ));
}

#[test]
fn boot_block_header_is_replaced() {
    let mut block = vec![0xAB; HEADER_LEN];
    block.extend(ipl3());

    let rom = Rom::new(&block, &[], "X").unwrap();
    assert_eq!(rom.ipl3, ipl3());
    assert_eq!(rom.header.title(), "X");
}

#[test]
fn errors() {
    assert!(matches!(
        Rom::new(&[0; 16], &[], ""),
        Err(RomError::Ipl3 { len: 16 })
    ));
    assert!(matches!(
        Rom::new(&ipl3(), &[], "THIS TITLE IS FAR TOO LONG"),
        Err(RomError::Title { .. })
    ));
    assert!(matches!(
        Rom::new(&ipl3(), &[], "ポケモン"),
        Err(RomError::Title { .. })
    ));

    let short = Rom::new(&ipl3(), &[], "").unwrap().to_bytes().unwrap();
    assert!(matches!(
        Rom::read(&mut Cursor::new(&short[..0x2000])),
        Err(RomError::Truncated)
    ));
}
