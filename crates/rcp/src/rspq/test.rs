use std::sync::MutexGuard;

use super::*;
use crate::sim::{self, Sim};

const QUEUE_DATA: usize = 0x140;

fn queue_ucode() -> Ucode {
    Ucode::new("rsp_queue", 0, &[0; 16], &[0; QUEUE_DATA]).unwrap()
}

/// An overlay with two commands, one and three words long, and 8 bytes of state.
fn overlay_ucode() -> Ucode {
    let mut data = vec![0; QUEUE_DATA];
    let state_start = QUEUE_DATA as u16 + 0x10;
    data.extend_from_slice(&state_start.to_be_bytes());
    data.extend_from_slice(&7u16.to_be_bytes());
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(&0x1010u16.to_be_bytes());
    data.extend_from_slice(&0x3020u16.to_be_bytes());
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(&[0xAA; 8]);

    Ucode::new("overlay", 0, &[0; 32], &data).unwrap()
}

fn start() -> MutexGuard<'static, ()> {
    let guard = sim::exclusive();
    Sim::install();
    init(queue_ucode()).unwrap();
    guard
}

fn dmem_u32(offset: usize) -> u32 {
    let mut word = [0; 4];
    rsp::read_dmem(offset, &mut word);
    u32::from_be_bytes(word)
}

#[test]
fn reset_header() {
    let _guard = start();

    let lowpri = with(|queue| queue.lowpri.physical(0).value());
    let highpri = with(|queue| queue.highpri.physical(0).value());
    assert_eq!(dmem_u32(0xD0), lowpri);
    assert_eq!(dmem_u32(0xD4), highpri);
    assert_eq!(dmem_u32(0xD8), lowpri);

    assert!(rsp::halted());
    assert_eq!(rsp::signals(), signal::BUFDONE_LOW | signal::BUFDONE_HIGH);
    assert!(!crashed());
}

#[test]
fn rejects_small_queue_data() {
    let _guard = sim::exclusive();
    Sim::install();

    let ucode = Ucode::new("rsp_queue", 0, &[0; 8], &[0; 64]).unwrap();
    assert!(matches!(init(ucode), Err(QueueError::QueueData { len: 64 })));
}

#[test]
fn command_words() {
    let _guard = start();

    write(Command::Noop as u8, &[]);
    write(Command::WriteStatus as u8, &[0]);
    let point = syncpoint();
    wait_syncpoint(point);

    let words = with(|queue| {
        let buffer = queue.lowpri.buffers[0].uncached();
        (0..6)
            .map(|i| format!("{:08x}", buffer.read(i)))
            .collect::<Vec<_>>()
            .join("\n")
    });

    insta::assert_snapshot!(words, @r"
    01000000
    06000000
    08004000
    00000200
    00000000
    00000000
    ");
}

#[test]
fn noop_stream_wraps() {
    let _guard = start();

    for _ in 0..3000 {
        write(Command::Noop as u8, &[]);
    }
    wait();
    assert!(!crashed());

    // the rsp waits right where the next command goes
    let current = with(|queue| {
        let ctx = &queue.lowpri;
        ctx.physical(ctx.index).value() + 4 * ctx.cur as u32
    });
    assert_eq!(dmem_u32(0xD8), current);
    assert_eq!(rsp::signals() & signal::BUFDONE_LOW, signal::BUFDONE_LOW);
}

#[test]
fn unknown_command_crashes() {
    let _guard = start();

    write(0xDE, &[]);
    assert!(rsp::halted());
    assert!(crashed());

    reset();
    assert!(!crashed());
    write(Command::Noop as u8, &[]);
    wait();
}

#[test]
fn high_priority() {
    let _guard = start();

    write(Command::Noop as u8, &[]);

    highpri_begin();
    for _ in 0..3 {
        write(Command::Noop as u8, &[]);
    }
    highpri_end();

    write(Command::Noop as u8, &[]);
    wait();

    let highpri = with(|queue| queue.highpri.physical(0).value());
    // three noops and the swap back
    assert_eq!(dmem_u32(0xD4), highpri + 6 * 4);
    assert_eq!(
        rsp::signals() & (signal::HIGHPRI_RUNNING | signal::HIGHPRI_REQUESTED),
        0
    );
    assert!(!crashed());
}

#[test]
fn dmem_transfers() {
    let _guard = start();

    let data: Vec<u8> = (1..=32).collect();
    let src = Arc::new(Buffer::from_slice(&data));
    let dst = Arc::new(Buffer::new(32));

    dma_to_dmem(&src, 0x800, 32);
    dma_from_dmem(&dst, 0x800, 32);
    wait();

    assert_eq!(&dst[..], &data[..]);
    let mut dmem = [0; 32];
    rsp::read_dmem(0x800, &mut dmem);
    assert_eq!(&dmem[..], &data[..]);
    assert!(with(|queue| queue.transfers.is_empty()));
}

#[test]
fn overlay_commands() {
    let _guard = start();

    let id = register(overlay_ucode()).unwrap();
    assert_eq!(id.id(), 1);
    assert_eq!(id.command(1), 0x11);

    let mut table = [0; 16];
    rsp::read_dmem(QUEUE_HEADER, &mut table);
    assert_eq!(table[1], 16);
    assert!(table.iter().enumerate().all(|(i, &e)| i == 1 || e == 0));

    // the rsp reads the command base from the overlay's data
    let data = dmem_u32(QUEUE_HEADER + 16 + 16 + 4);
    let base = Sim::install().with(|state| {
        let mut header = [0; 8];
        state.memory.read(PhysAddr(data), &mut header);
        u16::from_be_bytes([header[4], header[5]])
    });
    assert_eq!(base, 1 << 5);

    write(id.command(0), &[]);
    write(id.command(1), &[0, 1, 2]);
    wait();
    assert!(!crashed());

    // past the end of the command table
    write(id.command(2), &[]);
    assert!(crashed());

    let second = register(overlay_ucode()).unwrap();
    assert_eq!(second.id(), 2);
}

#[test]
fn overlay_header() {
    let _guard = sim::exclusive();
    Sim::install();

    let ucode = overlay_ucode();
    let overlay = Overlay::parse(&ucode.data()[QUEUE_DATA..]).unwrap();

    assert_eq!(overlay.commands, [0x1010, 0x3020]);
    assert_eq!(overlay.slots(), 1);
    assert_eq!(overlay.state_len(), 8);
    assert_eq!(overlay.header.state_start.get() as usize, QUEUE_DATA + 0x10);
    assert_eq!(Overlay::parse(&[0; 4]), None);
}
