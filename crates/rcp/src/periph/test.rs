use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

use nanorand::{Rng, tls_rng};

use super::*;
use crate::sim::{self, Sim};

const ISVIEWER: u32 = 0x13ff_0000;

fn device(offset: u32, size: u32) -> Device {
    Sim::install();
    Device::new(PhysAddr(ISVIEWER + offset), size)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7) ^ seed).collect()
}

#[test]
fn write_then_read_unaligned() {
    let _guard = sim::exclusive();
    let dev = device(0x1000, 0x800);

    for (offset, len) in [(0, 64), (1, 63), (3, 100), (0x101, 1), (0x200, 0x1FF), (0x7FF, 1)] {
        let data = pattern(len, offset as u8);
        let (n, err) = dev.write_at(&data, offset);
        assert_eq!(n, len);
        assert!(err.is_none());

        let mut out = vec![0; len];
        let (n, err) = dev.read_at(&mut out, offset);
        assert_eq!(n, len);
        assert_eq!(err.is_some(), offset + len as u64 == 0x800);
        assert_eq!(out, data, "offset {offset:#x}, len {len}");
    }
}

#[test]
fn dma_into_aligned_buffer() {
    let _guard = sim::exclusive();
    let dev = device(0x1800, 0x400);

    let data = pattern(0x400, 0x5A);
    assert!(dev.write_at(&data, 0).1.is_none());

    // odd offsets rule out dma entirely, even ones use it for the aligned middle
    for offset in [0u64, 2, 5] {
        let mut buf = cpu::make_aligned(0x100, 1);
        assert!(dev.read_at(&mut buf[3..], offset).1.is_none());
        assert_eq!(&buf[3..], &data[offset as usize..][..0xFD]);
        assert_eq!(&buf[..3], &[0, 0, 0]);
    }
}

#[test]
fn write_past_end() {
    let _guard = sim::exclusive();
    let dev = device(0x2000, 16);

    let (n, err) = dev.write_at(&[1; 8], 12);
    assert_eq!(n, 4);
    assert!(matches!(err, Some(DeviceError::EndOfDevice)));

    let mut out = [0; 8];
    let (n, err) = dev.read_at(&mut out, 12);
    assert_eq!(n, 4);
    assert!(matches!(err, Some(DeviceError::EndOfDevice)));
    assert_eq!(&out[..4], &[1; 4]);

    assert!(matches!(
        dev.read_at(&mut out, 17),
        (0, Some(DeviceError::InvalidOffset))
    ));
}

#[test]
fn read_up_to_end() {
    let _guard = sim::exclusive();
    let dev = device(0x2080, 16);
    assert!(dev.write_at(&pattern(16, 0x33), 0).1.is_none());

    // ending on the last byte already reports the end of the device
    let mut out = [0; 8];
    let (n, err) = dev.read_at(&mut out, 8);
    assert_eq!(n, 8);
    assert!(matches!(err, Some(DeviceError::EndOfDevice)));
    assert_eq!(&out[..], &pattern(16, 0x33)[8..]);

    let mut out = [0; 32];
    let (n, err) = dev.read_at(&mut out, 8);
    assert_eq!(n, 8);
    assert!(matches!(err, Some(DeviceError::EndOfDevice)));

    assert!(matches!(
        dev.read_at(&mut out, 16),
        (0, Some(DeviceError::EndOfDevice))
    ));

    let mut out = [0; 4];
    assert!(matches!(dev.read_at(&mut out, 4), (4, None)));
}

#[test]
fn seek_bounds() {
    let _guard = sim::exclusive();
    let mut dev = device(0x2100, 0x100);

    assert_eq!(dev.seek(SeekFrom::End(-16)).unwrap(), 0xF0);
    assert!(dev.seek(SeekFrom::Current(0x20)).is_err());
    assert_eq!(dev.position(), 0xF0);
    assert!(dev.seek(SeekFrom::Current(-0x100)).is_err());
    assert!(matches!(
        dev.seek_to(SeekFrom::Start(0x101)),
        Err(DeviceError::SeekOutOfRange)
    ));
    assert_eq!(dev.seek(SeekFrom::Start(0x100)).unwrap(), 0x100);
}

#[test]
fn cursor_io() {
    let _guard = sim::exclusive();
    let mut dev = device(0x2200, 0x20);

    dev.write_all(b"hello, ").unwrap();
    dev.write_all(b"world").unwrap();
    Write::flush(&mut dev).unwrap();

    // a write at the end of the device is an error
    dev.seek(SeekFrom::End(0)).unwrap();
    assert!(dev.write(b"!").is_err());

    dev.rewind().unwrap();
    let mut out = [0; 12];
    dev.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"hello, world");

    let mut rest = Vec::new();
    dev.read_to_end(&mut rest).unwrap();
    assert_eq!(rest.len(), 0x20 - 12);
}

#[test]
fn domain_timing_registers() {
    let _guard = sim::exclusive();
    Sim::install();

    let timing = DomainTiming {
        latency: 0x40,
        pulse_width: 0x12,
        page_size: 0x07,
        release: 0x03,
    };

    set_domain_timing(1, timing);
    assert_eq!(domain_timing(1), timing);
}

#[test]
#[should_panic(expected = "invalid pi bus range")]
fn device_outside_of_bus() {
    Sim::install();
    Device::new(PhysAddr(0x0400_0000), 0x1000);
}

#[test]
#[should_panic(expected = "invalid pi bus range")]
fn device_range_overflows() {
    Sim::install();
    Device::new(PhysAddr(0x1000_0000), u32::MAX);
}

#[test]
fn concurrent_writers() {
    let _guard = sim::exclusive();
    Sim::install();

    const SIZE: u32 = 0x800;
    const CHUNK: usize = 128;

    let writers: Vec<_> = (0..4u32)
        .map(|index| {
            std::thread::spawn(move || {
                let dev = Device::new(PhysAddr(ISVIEWER + 0x4000 + index * SIZE), SIZE);
                let mut shadow = vec![0u8; SIZE as usize];
                dev.write_at(&shadow, 0);

                let mut rng = tls_rng();
                let deadline = Instant::now() + Duration::from_millis(500);
                let mut seq = 0u8;
                while Instant::now() < deadline {
                    let offset = rng.generate_range(0..SIZE as usize - CHUNK);
                    let chunk = pattern(CHUNK, seq ^ index as u8);
                    let (n, err) = dev.write_at(&chunk, offset as u64);
                    assert_eq!(n, CHUNK);
                    assert!(err.is_none());

                    shadow[offset..offset + CHUNK].copy_from_slice(&chunk);
                    seq = seq.wrapping_add(1);

                    if rng.generate_range(0..16u32) == 0 {
                        let mut out = vec![0; CHUNK];
                        assert_eq!(dev.read_at(&mut out, offset as u64).0, CHUNK);
                        assert_eq!(out, chunk);
                    }
                }

                dev.flush();
                let mut out = vec![0; SIZE as usize];
                assert_eq!(dev.read_at(&mut out, 0).0, SIZE as usize);
                assert!(out == shadow, "device {index} is corrupted");
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
}
