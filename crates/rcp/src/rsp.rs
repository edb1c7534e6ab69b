//! Signal processor (RSP): loading and running microcode.
//!
//! The RSP is a MIPS core with a vector unit, running programs ("microcode") out of its own 4 KiB
//! instruction memory (IMEM) on data in its 4 KiB data memory (DMEM). Both memories are reached
//! by the CPU through MMIO or through the RSP's DMA engine.
pub mod ucode;


use std::sync::{Mutex, Once, PoisonError};
use std::time::{Duration, Instant};

use bitos::bitos;
use vr4300::PhysAddr;

use crate::cpu;
use crate::hw;
use crate::interrupt::{self, CriticalSection, Source};
use crate::mmio::{self, Reg, reg_value};
use crate::periph::DeviceError;
use crate::sync::Note;

pub use ucode::{Ucode, UcodeError};

pub const BASE: u32 = 0x0404_0000;
/// Size of IMEM and DMEM each.
pub const MEM_SIZE: usize = 0x1000;

pub const DMEM: Memory = Memory(PhysAddr(0x0400_0000));
pub const IMEM: Memory = Memory(PhysAddr(0x0400_1000));

const TIMEOUT: Duration = Duration::from_secs(1);

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Status {
    #[bits(0)]
    pub halted: bool,
    #[bits(1)]
    pub broke: bool,
    #[bits(2)]
    pub dma_busy: bool,
    #[bits(3)]
    pub dma_full: bool,
    #[bits(4)]
    pub io_busy: bool,
    #[bits(5)]
    pub single_step: bool,
    #[bits(6)]
    pub interrupt_on_break: bool,
    #[bits(7..15)]
    pub signals: u8,
}

/// The write side of the status register: every flag has a bit to set it and one to clear it.
#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusWrite {
    #[bits(0)]
    pub clear_halt: bool,
    #[bits(1)]
    pub set_halt: bool,
    #[bits(2)]
    pub clear_broke: bool,
    #[bits(3)]
    pub clear_interrupt: bool,
    #[bits(4)]
    pub set_interrupt: bool,
    #[bits(5)]
    pub clear_single_step: bool,
    #[bits(6)]
    pub set_single_step: bool,
    #[bits(7)]
    pub clear_interrupt_on_break: bool,
    #[bits(8)]
    pub set_interrupt_on_break: bool,
}

impl StatusWrite {
    const SIGNALS: u32 = 9;

    /// Sets the signals in `mask`.
    pub fn with_signals_set(self, mask: u8) -> Self {
        Self::from_bits(self.to_bits() | Self::spread(mask, 1))
    }

    /// Clears the signals in `mask`.
    pub fn with_signals_cleared(self, mask: u8) -> Self {
        Self::from_bits(self.to_bits() | Self::spread(mask, 0))
    }

    fn spread(mask: u8, set: u32) -> u32 {
        (0..8)
            .filter(|i| mask & (1 << i) != 0)
            .fold(0, |acc, i| acc | (1 << (Self::SIGNALS + 2 * i + set)))
    }
}

reg_value!(Status, StatusWrite);

pub mod regs {
    use super::*;

    /// Address in IMEM/DMEM of the next DMA.
    pub const MEM_ADDR: Reg = Reg::at(BASE);
    pub const DRAM_ADDR: Reg<PhysAddr> = Reg::at(BASE + 0x04);
    /// RDRAM to IMEM/DMEM transfer. Writing it starts the transfer.
    pub const READ_LEN: Reg = Reg::at(BASE + 0x08);
    /// IMEM/DMEM to RDRAM transfer. Writing it starts the transfer.
    pub const WRITE_LEN: Reg = Reg::at(BASE + 0x0C);
    pub const STATUS: Reg<Status> = Reg::at(BASE + 0x10);
    pub const STATUS_WRITE: Reg<StatusWrite> = Reg::at(BASE + 0x10);
    pub const DMA_FULL: Reg = Reg::at(BASE + 0x14);
    pub const DMA_BUSY: Reg = Reg::at(BASE + 0x18);
    pub const SEMAPHORE: Reg = Reg::at(BASE + 0x1C);
    /// Program counter. Only accessible while halted.
    pub const PC: Reg = Reg::at(0x0408_0000);
}

/// One of the two RSP memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory(PhysAddr);

static DMA_LOCK: Mutex<()> = Mutex::new(());

fn wait_dma() {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let status = regs::STATUS.load();
        if !(status.dma_busy() || status.io_busy()) {
            return;
        }

        assert!(Instant::now() < deadline, "rsp: dma timeout");
        std::thread::yield_now();
    }
}

impl Memory {
    pub fn addr(self) -> PhysAddr {
        self.0
    }

    /// Clamps an access of `len` bytes at `offset`.
    fn range(self, len: usize, offset: u64) -> Result<usize, DeviceError> {
        if offset > MEM_SIZE as u64 {
            return Err(DeviceError::InvalidOffset);
        }

        Ok(len.min(MEM_SIZE - offset as usize))
    }

    /// Returns the part of `bytes` that can be transferred with DMA when placed at `addr`, along
    /// with its physical address.
    fn split(bytes: &[u8], addr: PhysAddr) -> Option<(usize, usize, PhysAddr)> {
        let (head, mut tail) = cpu::pads(bytes.as_ptr() as usize, bytes.len(), bytes.len());
        tail -= (tail - head) % 8;

        // both sides must share their alignment
        if head == tail || !(addr + head as u32).is_aligned(8) {
            return None;
        }

        let dram = hw::get().physical(bytes[head..].as_ptr())?;
        Some((head, tail, dram))
    }

    /// Copies from RSP memory at `offset`. Returns the number of bytes read, short at the end of
    /// the memory.
    pub fn read_at(self, out: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        let len = self.range(out.len(), offset)?;
        let out = &mut out[..len];
        let addr = self.0 + offset as u32;

        let _lock = DMA_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let (head, tail) = match Self::split(out, addr) {
            Some((head, tail, dram)) => {
                cpu::invalidate(&mut out[head..tail]);

                regs::MEM_ADDR.store((addr + head as u32).value());
                regs::DRAM_ADDR.store(dram);
                tracing::trace!("rsp: dma {} -> {dram} ({} bytes)", addr + head as u32, tail - head);
                regs::WRITE_LEN.store((tail - head) as u32 - 1);
                wait_dma();

                (head, tail)
            }
            None => (len, len),
        };

        mmio::read_io(addr, &mut out[..head]);
        mmio::read_io(addr + tail as u32, &mut out[tail..]);
        Ok(len)
    }

    /// Copies into RSP memory at `offset`. Returns the number of bytes written, short at the end
    /// of the memory.
    pub fn write_at(self, data: &[u8], offset: u64) -> Result<usize, DeviceError> {
        let len = self.range(data.len(), offset)?;
        let data = &data[..len];
        let addr = self.0 + offset as u32;

        let _lock = DMA_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((head, tail, dram)) = Self::split(data, addr) else {
            mmio::write_io(addr, data);
            return Ok(len);
        };

        mmio::write_io(addr, &data[..head]);
        mmio::write_io(addr + tail as u32, &data[tail..]);

        cpu::writeback(&data[head..tail]);
        regs::MEM_ADDR.store((addr + head as u32).value());
        regs::DRAM_ADDR.store(dram);
        tracing::trace!("rsp: dma {dram} -> {} ({} bytes)", addr + head as u32, tail - head);
        regs::READ_LEN.store((tail - head) as u32 - 1);
        wait_dma();

        Ok(len)
    }
}

/// Writes `data` to DMEM at `offset`.
///
/// # Panics
/// Panics if the range doesn't fit DMEM.
pub fn write_dmem(offset: usize, data: &[u8]) {
    assert!(offset + data.len() <= MEM_SIZE, "rsp: dmem write out of range");
    DMEM.write_at(data, offset as u64)
        .expect("rsp: dmem range checked");
}

/// Reads DMEM at `offset` into `out`.
///
/// # Panics
/// Panics if the range doesn't fit DMEM.
pub fn read_dmem(offset: usize, out: &mut [u8]) {
    assert!(offset + out.len() <= MEM_SIZE, "rsp: dmem read out of range");
    DMEM.read_at(out, offset as u64)
        .expect("rsp: dmem range checked");
}

/// Copies `data` to `mem` at `offset`, asserting it fits.
pub fn load_bytes(mem: Memory, offset: usize, data: &[u8]) {
    assert!(offset + data.len() <= MEM_SIZE, "rsp: load out of range");
    mem.write_at(data, offset as u64)
        .expect("rsp: memory range checked");
}

static CURRENT: Mutex<Option<String>> = Mutex::new(None);
static BREAK: Note = Note::new();
static INIT: Once = Once::new();

fn handler(cs: &CriticalSection) {
    regs::STATUS_WRITE.store(StatusWrite::default().with_clear_interrupt(true));
    tracing::trace!("rsp: break");
    BREAK.signal(cs);
}

/// Halts the RSP and installs its interrupt handler. Called on first use.
pub fn init() {
    INIT.call_once(|| {
        regs::STATUS_WRITE.store(
            StatusWrite::default()
                .with_set_halt(true)
                .with_clear_single_step(true)
                .with_clear_interrupt(true),
        );
        regs::PC.store(0);

        interrupt::set_handler(Source::Sp, handler);
        interrupt::enable(Source::Sp);
    });
}

pub fn status() -> Status {
    regs::STATUS.load()
}

pub fn halted() -> bool {
    status().halted()
}

pub fn broke() -> bool {
    status().broke()
}

pub fn pc() -> u32 {
    regs::PC.load()
}

pub fn set_pc(pc: u32) {
    assert!(halted(), "rsp: pc written while running");
    regs::PC.store(pc);
}

pub fn signals() -> u8 {
    status().signals()
}

pub fn set_signals(mask: u8) {
    regs::STATUS_WRITE.store(StatusWrite::default().with_signals_set(mask));
}

pub fn clear_signals(mask: u8) {
    regs::STATUS_WRITE.store(StatusWrite::default().with_signals_cleared(mask));
}

/// Whether a break instruction raises the SP interrupt.
pub fn set_interrupt_on_break(enable: bool) {
    init();
    let write = if enable {
        StatusWrite::default().with_set_interrupt_on_break(true)
    } else {
        StatusWrite::default().with_clear_interrupt_on_break(true)
    };

    regs::STATUS_WRITE.store(write);
}

/// Halts the RSP and loads `ucode` into its memories.
pub fn load(ucode: &Ucode) {
    init();
    regs::STATUS_WRITE.store(StatusWrite::default().with_set_halt(true));

    load_bytes(IMEM, 0, ucode.text());
    load_bytes(DMEM, 0, ucode.data());
    regs::PC.store(ucode.entry());

    tracing::debug!("rsp: loaded {ucode:?}");
    *CURRENT.lock().unwrap_or_else(PoisonError::into_inner) = Some(ucode.name().to_owned());
}

/// Name of the ucode loaded last.
pub fn current() -> Option<String> {
    CURRENT.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Lets the RSP run from its current program counter.
pub fn resume() {
    BREAK.clear();
    regs::STATUS_WRITE.store(
        StatusWrite::default()
            .with_clear_halt(true)
            .with_clear_broke(true),
    );
}

/// Waits for the RSP to hit a break instruction. Requires interrupt on break.
pub fn wait_break(timeout: Duration) -> bool {
    BREAK.wait(timeout)
}

/// Loads and runs `ucode` until it halts.
///
/// # Panics
/// Panics if the RSP doesn't halt within a second.
pub fn run(ucode: &Ucode) {
    load(ucode);
    resume();

    let deadline = Instant::now() + TIMEOUT;
    loop {
        let status = status();
        if status.halted() && !status.dma_busy() && !status.dma_full() {
            return;
        }

        assert!(Instant::now() < deadline, "rsp: {} timed out", ucode.name());
        std::thread::yield_now();
    }
}
