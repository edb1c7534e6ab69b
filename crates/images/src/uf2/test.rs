use std::io::Cursor;

use super::*;

fn uf2(family: Family, addr: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    write(&mut out, family, addr, data).unwrap();
    out.into_inner()
}

#[test]
fn block_layout() {
    let bytes = uf2(Family::Rp2040, 0x1000_0000, &[0xAA; 3]);
    assert_eq!(bytes.len(), BLOCK_LEN);

    insta::assert_snapshot!(format!("{:02x?}", &bytes[..32]), @"[55, 46, 32, 0a, 57, 51, 5d, 9e, 00, 20, 00, 00, 00, 00, 00, 10, 00, 01, 00, 00, 00, 00, 00, 00, 01, 00, 00, 00, 56, ff, 8b, e4]");
    assert_eq!(&bytes[32..35], &[0xAA; 3]);
    assert!(bytes[35..508].iter().all(|&b| b == 0));
    assert_eq!(&bytes[508..], &0x0AB1_6F30_u32.to_le_bytes());
}

#[test]
fn blocks_are_sequenced() {
    let data = (0..1000u32).map(|i| i as u8).collect::<Vec<_>>();
    let bytes = uf2(Family::Rp2040, 0x2000_0000, &data);

    let blocks = read(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(blocks.len(), 4);

    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.seq, i as u32);
        assert_eq!(block.total, 4);
        assert_eq!(block.addr, 0x2000_0000 + (i * PAYLOAD_LEN) as u32);
        assert_eq!(block.family(), Some(Family::Rp2040));
        assert!(block.flags.family_id_present());
    }

    let payload = blocks
        .iter()
        .flat_map(|block| block.payload().iter().copied())
        .collect::<Vec<_>>();
    assert_eq!(&payload[..data.len()], data.as_slice());
    assert!(payload[data.len()..].iter().all(|&b| b == 0));
}

#[test]
fn writes_in_pieces() {
    let data = (0..600u32).map(|i| (i * 7) as u8).collect::<Vec<_>>();

    let mut out = Cursor::new(Vec::new());
    let mut writer = Uf2Writer::new(&mut out, Family::Rp2040, 0, data.len());
    for piece in data.chunks(100) {
        writer.write(piece).unwrap();
    }
    writer.finish().unwrap();

    assert_eq!(out.into_inner(), uf2(Family::Rp2040, 0, &data));
}

#[test]
fn damaged_block() {
    let mut bytes = uf2(Family::Rp2040, 0, &[1; 16]);
    bytes[511] ^= 0xFF;
    assert!(matches!(
        read(&mut Cursor::new(bytes)),
        Err(Uf2Error::Format { .. })
    ));
}

#[test]
fn picocart_deduplicates() {
    let mut rom = vec![0xFF; 8 * PICOCART_CHUNK_LEN];
    rom[2 * PICOCART_CHUNK_LEN..3 * PICOCART_CHUNK_LEN].fill(0x11);
    rom[5 * PICOCART_CHUNK_LEN..6 * PICOCART_CHUNK_LEN].fill(0x11);
    rom.extend_from_slice(&[0x22; 10]);

    let out = picocart_compress(&rom).unwrap();
    let map_end = 16 + 2 * PICOCART_CHUNK_MAP_LEN;
    assert_eq!(&out[..16], b"picocartcompress");
    assert_eq!(out.len(), map_end + 2 * PICOCART_CHUNK_LEN + 10);

    let map = out[16..map_end]
        .chunks_exact(2)
        .map(|id| u16::from_le_bytes([id[0], id[1]]))
        .take(9)
        .collect::<Vec<_>>();
    assert_eq!(map, [0, 0, 1, 0, 0, 1, 0, 0, 2]);
    assert_eq!(&out[map_end + 2 * PICOCART_CHUNK_LEN..], &[0x22; 10]);
}

#[test]
fn picocart_map_overflow() {
    let rom = vec![0; (PICOCART_CHUNK_MAP_LEN + 1) * PICOCART_CHUNK_LEN];
    assert!(matches!(
        picocart_compress(&rom),
        Err(Uf2Error::ChunkMapOverflow { .. })
    ));
}

#[test]
fn picocart_uf2() {
    let mut out = Cursor::new(Vec::new());
    write_picocart(&mut out, &[0x55; 4096]).unwrap();

    let blocks = read(&mut Cursor::new(out.into_inner())).unwrap();
    assert_eq!(blocks[0].addr, PICOCART_ADDR);
    assert_eq!(&blocks[0].payload()[..16], b"picocartcompress");
}
