use std::sync::Arc;

use vr4300::CACHE_LINE;

use super::*;
use crate::sim::Sim;

#[test]
fn pads_of_aligned_region() {
    assert_eq!(pads(0x100, 64, 64), (0, 64));
    assert_eq!(pads(0x100, 10, 16), (0, 10));
}

#[test]
fn pads_of_unaligned_region() {
    // head up to the next line, tail back to the previous one
    assert_eq!(pads(0x104, 56, 56), (12, 44));
    assert_eq!(pads(0x108, 8, 8), (0, 0));
    assert_eq!(pads(0x100, 20, 20), (0, 16));
}

#[test]
fn pads_with_spare_capacity() {
    // capacity past the length covers the partial tail line
    assert_eq!(pads(0x100, 20, 32), (0, 20));
}

#[test]
fn pad_shrinks_to_cache_safe_part() {
    let mut storage = vec![0u8; 256];
    let offset = (CACHE_LINE - storage.as_ptr() as usize % CACHE_LINE) % CACHE_LINE + 3;
    let bytes = &mut storage[offset..offset + 100];

    let (inner, head, tail) = pad(bytes);
    assert_eq!(head, CACHE_LINE - 3);
    assert_eq!(head + inner.len() + tail, 100);
    assert!(is_aligned(inner));
}

#[test]
fn make_aligned_is_cache_safe() {
    Sim::install();

    for (len, align) in [(1, 1), (15, 1), (16, 1), (100, 8), (100, 64), (4096, 256)] {
        let buf = make_aligned(len, align);
        assert!(buf.is_aligned());
        assert!(is_aligned(&buf[..]) || len % CACHE_LINE != 0);
        assert_eq!(buf.len(), len);
        assert!(buf.capacity() >= len);
        assert_eq!(buf.as_ptr() as usize % align, 0);
        assert!(buf.iter().all(|b| *b == 0));
    }
}

#[test]
fn buffers_have_distinct_physical_addresses() {
    Sim::install();

    let a = Buffer::<u32>::new(64);
    let b = Buffer::<u32>::new(64);
    let (pa, pb) = (a.physical().value(), b.physical().value());
    assert_ne!(pa, pb);
    assert_eq!(pa % CACHE_LINE as u32, 0);
    assert!(pa + a.capacity() as u32 <= pb || pb + b.capacity() as u32 <= pa);
}

#[test]
fn uncached_view_aliases_buffer() {
    Sim::install();

    let mut buf = Buffer::<u16>::from_slice(&[1, 2, 3, 4]);
    {
        let mut view = buf.uncached();
        assert_eq!(view.len(), 4);
        assert_eq!(view.read(2), 3);
        view.write(0, 0xAAAA);
        view.copy_from_slice(2, &[7, 8]);
    }

    assert_eq!(&buf[..], &[0xAAAA, 2, 7, 8]);

    buf.uncached().fill(5);
    assert_eq!(&buf[..], &[5; 4]);
}

#[test]
#[should_panic(expected = "unpadded cache invalidate")]
fn invalidate_rejects_unaligned() {
    Sim::install();

    let mut buf = make_aligned(64, 1);
    invalidate(&mut buf[1..17]);
}

#[test]
fn pinner_coalesces_duplicates() {
    let a = Arc::new([0u8; 16]);
    let b = Arc::new([1u8; 16]);

    let mut pinner = Pinner::new();
    pinner.pin(&a);
    pinner.pin(&a);
    pinner.pin_slice(&[a.clone(), b.clone()]);
    assert_eq!(pinner.len(), 2);
    assert_eq!(Arc::strong_count(&a), 2);

    pinner.unpin();
    assert!(pinner.is_empty());
    assert_eq!(Arc::strong_count(&a), 1);
}

#[test]
#[should_panic(expected = "memory leak")]
fn pinner_dropped_with_pins() {
    let a = Arc::new(0u32);
    let mut pinner = Pinner::new();
    pinner.pin(&a);
}
