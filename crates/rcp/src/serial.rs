//! Serial interface (SI): running commands on the PIF.
//!
//! The PIF is the microcontroller behind console startup, reset and, most importantly, the
//! joybus the controllers and their accessories hang off. Commands are exchanged through its 64
//! bytes of RAM: the CPU DMAs a command block in, the PIF executes it and the CPU DMAs the
//! replies back out.
//!
//! The serial interface is slow. A command block takes a few hundred microseconds to run.
pub mod controller;
pub mod eeprom;
pub mod joybus;

#[cfg(test)]
mod test;

use std::io;
use std::sync::{Mutex, Once, PoisonError};
use std::time::Duration;

use easyerr::Error;
use strum::FromRepr;
use vr4300::PhysAddr;

use crate::cpu::Buffer;
use crate::hw;
use crate::interrupt::{self, CriticalSection, Source};
use crate::mmio::Reg;
use crate::sync::{IntrInput, Note};

pub const BASE: u32 = 0x0480_0000;

/// Address of the PIF RAM.
pub const PIF_RAM: PhysAddr = PhysAddr(0x1fc0_07c0);
pub const PIF_RAM_SIZE: usize = 64;

const COMMAND: usize = PIF_RAM_SIZE - 1;
const TIMEOUT: Duration = Duration::from_secs(1);

pub mod regs {
    use super::*;

    pub const DRAM_ADDR: Reg<PhysAddr> = Reg::at(BASE);
    /// Writing it copies PIF RAM to RDRAM.
    pub const PIF_READ_64B: Reg<PhysAddr> = Reg::at(BASE + 0x04);
    pub const PIF_WRITE_4B: Reg<PhysAddr> = Reg::at(BASE + 0x08);
    /// Writing it copies RDRAM to PIF RAM, which runs the command in it.
    pub const PIF_WRITE_64B: Reg<PhysAddr> = Reg::at(BASE + 0x10);
    pub const PIF_READ_4B: Reg<PhysAddr> = Reg::at(BASE + 0x14);
    /// Any write acknowledges the interrupt.
    pub const STATUS: Reg = Reg::at(BASE + 0x18);
}

/// Commands the PIF runs on its RAM, written to the last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum PifCommand {
    ConfigureJoybus = 0x01,
    CicChallenge = 0x02,
    TerminateBoot = 0x08,
    LockRom = 0x10,
    AcquireChecksum = 0x20,
    RunChecksum = 0x40,
}

/// Errors of the byte-addressed joybus accessories (paks and EEPROMs).
#[derive(Debug, Error)]
pub enum AccessoryError {
    #[error("offset out of range")]
    OutOfRange,
    #[error(transparent)]
    Joybus { source: joybus::JoybusError },
}

impl From<AccessoryError> for io::Error {
    fn from(value: AccessoryError) -> Self {
        let kind = match value {
            AccessoryError::OutOfRange => io::ErrorKind::InvalidInput,
            AccessoryError::Joybus {
                source: joybus::JoybusError::NoResponse,
            } => io::ErrorKind::NotConnected,
            AccessoryError::Joybus { .. } => io::ErrorKind::InvalidData,
        };

        io::Error::new(kind, value)
    }
}

/// Resolves a seek on an accessory of `size` bytes with its cursor at `pos`.
fn seek_within(pos: u64, size: u64, from: io::SeekFrom) -> io::Result<u64> {
    let target = match from {
        io::SeekFrom::Start(offset) => Some(offset),
        io::SeekFrom::End(delta) => size.checked_add_signed(delta),
        io::SeekFrom::Current(delta) => pos.checked_add_signed(delta),
    };

    match target {
        Some(target) if target <= size => Ok(target),
        _ => Err(AccessoryError::OutOfRange.into()),
    }
}

/// Buffer for a command and its replies, laid out like the PIF RAM.
pub struct CommandBlock {
    cmd: PifCommand,
    buf: Buffer,
    len: usize,
}

impl CommandBlock {
    pub fn new(cmd: PifCommand) -> Self {
        Self {
            cmd,
            buf: Buffer::new(PIF_RAM_SIZE),
            len: 0,
        }
    }

    pub fn command(&self) -> PifCommand {
        self.cmd
    }

    /// Number of bytes still available for messages.
    pub fn free(&self) -> usize {
        // the last byte holds the command
        COMMAND - self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The raw contents, including the command byte.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl joybus::Allocator for CommandBlock {
    fn alloc(&mut self, n: usize) -> Result<usize, joybus::JoybusError> {
        if n > self.free() {
            return Err(joybus::JoybusError::Full);
        }

        self.len += n;
        Ok(self.len - n)
    }

    fn data(&self) -> &[u8] {
        &self.buf
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// The command block being run, shared with the interrupt handler.
#[derive(Debug, Clone, Copy)]
struct Running {
    host: usize,
    phys: PhysAddr,
}

static LOCK: Mutex<()> = Mutex::new(());
static FINISHED: Note = Note::new();
static RUNNING: IntrInput<Option<Running>> = IntrInput::new();
static INIT: Once = Once::new();

/// Installs the SI interrupt handler. Called on first use.
pub fn init() {
    INIT.call_once(|| {
        regs::STATUS.store(0);
        interrupt::set_handler(Source::Si, handler);
        interrupt::enable(Source::Si);
    });
}

fn handler(cs: &CriticalSection) {
    regs::STATUS.store(0);

    let (Some(Some(running)), _) = RUNNING.get(cs) else {
        return;
    };

    // the pif clears the command byte once it's done
    let uncached = hw::get().uncached(running.host as *mut u8);
    let command = unsafe { uncached.add(COMMAND).read_volatile() };
    if command == 0 {
        tracing::trace!("si: read back finished");
        FINISHED.signal(cs);
    } else {
        tracing::trace!("si: write finished, reading back");
        hw::get().invalidate(running.host as *mut u8, PIF_RAM_SIZE);
        regs::DRAM_ADDR.store(running.phys);
        regs::PIF_READ_64B.store(PIF_RAM);
    }
}

/// Runs `block` on the PIF and blocks until its replies were read back.
///
/// # Panics
/// Panics if the PIF doesn't finish within a second.
pub fn run(block: &mut CommandBlock) {
    init();
    let _lock = LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    block.buf[COMMAND] = block.cmd as u8;
    let running = Running {
        host: block.buf.as_ptr() as usize,
        phys: block.buf.physical(),
    };

    FINISHED.clear();
    RUNNING.put(Some(running));
    block.buf.writeback();

    regs::DRAM_ADDR.store(running.phys);
    regs::PIF_WRITE_64B.store(PIF_RAM);

    if !FINISHED.wait(TIMEOUT) {
        panic!("si: pif timeout");
    }

    RUNNING.put(None);
    block.buf.invalidate();
}
