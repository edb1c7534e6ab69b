//! Peripheral interface (PI): I/O and DMA on the cartridge bus.
//!
//! The PI has a single DMA engine shared by every device on the bus. Transfers are queued in a
//! global [`IntrQueue`] and started one after the other, either by the submitting thread when the
//! engine is idle or by the PI interrupt handler when the previous transfer finishes.
//!
//! A transfer uses DMA for the largest part of the buffer that is cache-safe and 2-byte aligned on
//! the bus side. Whatever is left at the edges is copied with MMIO.
#[cfg(test)]
mod test;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bitos::bitos;
use easyerr::Error;
use vr4300::PhysAddr;

use crate::cpu::{self, Buffer};
use crate::interrupt::{self, CriticalSection, Source};
use crate::mmio::{self, Bus, RegValue, reg_value};
use crate::sync::{IntrQueue, Note};
use crate::{hw, mmio::Reg as SysReg};

const BUS0: std::ops::Range<u32> = 0x0500_0000..0x1fc0_0000;
const BUS1: std::ops::Range<u32> = 0x1fd0_0000..0x8000_0000;

const TIMEOUT: Duration = Duration::from_secs(1);

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Status {
    #[bits(0)]
    pub dma_busy: bool,
    #[bits(1)]
    pub io_busy: bool,
    #[bits(2)]
    pub error: bool,
    #[bits(3)]
    pub interrupt: bool,
}

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusWrite {
    #[bits(0)]
    pub reset: bool,
    #[bits(1)]
    pub clear_interrupt: bool,
}

/// Access timing of one of the two bus domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainTiming {
    pub latency: u8,
    pub pulse_width: u8,
    pub page_size: u8,
    pub release: u8,
}

reg_value!(Status, StatusWrite);

pub const BASE: u32 = 0x0460_0000;

pub mod regs {
    use super::*;

    pub const DRAM_ADDR: SysReg<PhysAddr> = SysReg::at(BASE);
    pub const CART_ADDR: SysReg<PhysAddr> = SysReg::at(BASE + 0x04);
    /// RDRAM to cart transfer length minus one. Writing it starts the transfer.
    pub const READ_LEN: SysReg = SysReg::at(BASE + 0x08);
    /// Cart to RDRAM transfer length minus one. Writing it starts the transfer.
    pub const WRITE_LEN: SysReg = SysReg::at(BASE + 0x0C);
    pub const STATUS: SysReg<Status> = SysReg::at(BASE + 0x10);
    pub const STATUS_WRITE: SysReg<StatusWrite> = SysReg::at(BASE + 0x10);

    /// Timing registers of a domain, in the order latency, pulse width, page size, release.
    pub const fn domain(index: u32) -> [SysReg; 4] {
        let base = BASE + 0x14 + 0x10 * index;
        [
            SysReg::at(base),
            SysReg::at(base + 0x04),
            SysReg::at(base + 0x08),
            SysReg::at(base + 0x0C),
        ]
    }
}

/// Reads the timing of bus domain `index` (0 or 1).
pub fn domain_timing(index: u32) -> DomainTiming {
    let [latency, pulse_width, page_size, release] = regs::domain(index).map(|r| r.load() as u8);
    DomainTiming {
        latency,
        pulse_width,
        page_size,
        release,
    }
}

/// Programs the timing of bus domain `index` (0 or 1).
pub fn set_domain_timing(index: u32, timing: DomainTiming) {
    let values = [
        timing.latency,
        timing.pulse_width,
        timing.page_size,
        timing.release,
    ];
    for (reg, value) in regs::domain(index).iter().zip(values) {
        reg.store(value as u32);
    }
}

fn busy() -> bool {
    let status = regs::STATUS.load();
    status.dma_busy() || status.io_busy()
}

fn spin_until_idle() {
    while busy() {
        std::hint::spin_loop();
    }
}

/// The PI bus as seen by MMIO. Every access waits for the bus to be idle first, since accesses
/// during a transfer return garbage.
pub struct PiBus;

impl Bus for PiBus {
    fn load(&self, addr: PhysAddr) -> u32 {
        spin_until_idle();
        hw::get().load(addr)
    }

    fn store(&self, addr: PhysAddr, value: u32) {
        spin_until_idle();
        hw::get().store(addr, value);
    }
}

/// Copies `data` to `addr` on the PI bus.
pub fn write_io(addr: PhysAddr, data: &[u8]) {
    mmio::write_io_on(&PiBus, addr, data);
}

/// Copies from `addr` on the PI bus into `out`.
pub fn read_io(addr: PhysAddr, out: &mut [u8]) {
    mmio::read_io_on(&PiBus, addr, out);
}

/// A 32-bit register on the PI bus.
///
/// Thread-mode accesses wait for every queued DMA transfer to finish. Accesses from interrupt
/// handlers can't wait, so they spin on the busy bits instead.
pub struct Reg<T = u32> {
    inner: SysReg<T>,
}

impl<T> Clone for Reg<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Reg<T> {}

impl<T: RegValue> Reg<T> {
    pub const fn at(addr: u32) -> Self {
        Self {
            inner: SysReg::at(addr),
        }
    }

    pub const fn addr(&self) -> PhysAddr {
        self.inner.addr()
    }

    pub fn load(&self) -> T {
        barrier();
        spin_until_idle();
        self.inner.load()
    }

    pub fn store(&self, value: T) {
        barrier();
        spin_until_idle();
        self.inner.store(value);
    }

    /// Like [`Reg::load`], for interrupt handlers.
    pub fn load_safe(&self, _cs: &CriticalSection) -> T {
        spin_until_idle();
        self.inner.load()
    }

    /// Like [`Reg::store`], for interrupt handlers.
    pub fn store_safe(&self, _cs: &CriticalSection, value: T) {
        spin_until_idle();
        self.inner.store(value);
    }
}

#[derive(Debug)]
enum Data {
    /// A private copy of the data to store on the bus.
    Store(Buffer),
    /// Caller memory to load into. The caller blocks until the job is done.
    Load { ptr: *mut u8, len: usize },
}

#[derive(Debug)]
struct Job {
    id: u64,
    cart: PhysAddr,
    data: Option<Data>,
    done: Option<Arc<Note>>,
}

// SAFETY: the memory behind a load pointer is kept alive and untouched by its owner until the job
// is done
unsafe impl Send for Job {}

impl Job {
    fn bytes(&mut self) -> Option<&mut [u8]> {
        match self.data.as_mut()? {
            Data::Store(buf) => Some(buf.bytes_mut()),
            Data::Load { ptr, len } => Some(unsafe { std::slice::from_raw_parts_mut(*ptr, *len) }),
        }
    }

    /// Returns `bytes[head..tail]`, the part that can be transferred with DMA.
    fn split(bytes: &[u8], cart: PhysAddr) -> (usize, usize) {
        if hw::get().physical(bytes.as_ptr()).is_none() {
            return (0, 0);
        }

        let (head, tail) = cpu::pads(bytes.as_ptr() as usize, bytes.len(), bytes.len());

        if (cart.value() + head as u32) & 1 != 0 {
            return (0, 0);
        }

        (head, tail)
    }

    /// Starts the transfer. Returns `false` if the job doesn't need the DMA engine, in which
    /// case it must be finished right away.
    fn initiate(&mut self) -> bool {
        let cart = self.cart;
        let store = matches!(self.data, Some(Data::Store(_)));
        let Some(bytes) = self.bytes() else {
            return false;
        };

        let (head, tail) = Self::split(bytes, cart);
        if store {
            write_io(cart, &bytes[..head]);
            write_io(cart + tail as u32, &bytes[tail..]);
        }

        if head == tail {
            return false;
        }

        let dma = &mut bytes[head..tail];
        let len = dma.len() as u32 - 1;
        let Some(dram) = hw::get().physical(dma.as_ptr()) else {
            return false;
        };

        regs::DRAM_ADDR.store(dram);
        regs::CART_ADDR.store(cart + head as u32);
        if store {
            cpu::writeback(dma);
            tracing::trace!("pi: dma {dram} -> {} ({} bytes)", cart + head as u32, len + 1);
            regs::READ_LEN.store(len);
        } else {
            cpu::invalidate(dma);
            tracing::trace!("pi: dma {} -> {dram} ({} bytes)", cart + head as u32, len + 1);
            regs::WRITE_LEN.store(len);
        }

        interrupt::enable(Source::Pi);
        true
    }

    fn finish(mut self, cs: &CriticalSection) {
        interrupt::disable(Source::Pi);

        let cart = self.cart;
        let load = matches!(self.data, Some(Data::Load { .. }));
        if let Some(bytes) = self.bytes()
            && load
        {
            // after the transfer, since invalidating the middle may have touched the edges
            let (head, tail) = Self::split(bytes, cart);
            read_io(cart, &mut bytes[..head]);
            read_io(cart + tail as u32, &mut bytes[tail..]);
        }

        COMPLETED.fetch_max(self.id, Ordering::AcqRel);
        if let Some(done) = &self.done {
            done.signal(cs);
        }
    }
}

static QUEUE: IntrQueue<Job, 64> = IntrQueue::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static COMPLETED: AtomicU64 = AtomicU64::new(0);

/// Whether a job is in flight, in which case the interrupt handler starts the next one.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Installs the PI interrupt handler.
pub fn init() {
    regs::STATUS_WRITE.store(StatusWrite::default().with_clear_interrupt(true));
    interrupt::set_handler(Source::Pi, handler);
}

fn handler(cs: &CriticalSection) {
    regs::STATUS_WRITE.store(StatusWrite::default().with_clear_interrupt(true));
    match QUEUE.pop(cs) {
        Some(job) => job.finish(cs),
        None => panic!("pi: unexpected dma interrupt"),
    }

    kick(cs);
}

/// Starts the oldest job that needs the engine, finishing every job before it that doesn't.
fn kick(cs: &CriticalSection) {
    loop {
        let started = match QUEUE.peek_mut(cs) {
            Some(job) => job.initiate(),
            None => {
                ACTIVE.store(false, Ordering::Release);
                return;
            }
        };

        if started {
            ACTIVE.store(true, Ordering::Release);
            return;
        }

        if let Some(job) = QUEUE.pop(cs) {
            job.finish(cs);
        }
    }
}

/// Queues a transfer. Returns its id.
fn submit(cart: PhysAddr, data: Option<Data>, done: Option<Arc<Note>>) -> u64 {
    if interrupt::handler(Source::Pi).is_none() {
        init();
    }

    let mut job = Job {
        id: 0,
        cart,
        data,
        done,
    };

    // ids are assigned in queue order, so they also complete in order
    let id = loop {
        let pushed = interrupt::free(|_| {
            job.id = NEXT_ID.load(Ordering::Relaxed);
            let id = job.id;
            QUEUE.push(job).map(|()| {
                NEXT_ID.store(id + 1, Ordering::Relaxed);
                id
            })
        });

        match pushed {
            Ok(id) => break id,
            Err(back) => {
                job = back;
                std::thread::yield_now();
            }
        }
    };

    interrupt::free(|cs| {
        if !ACTIVE.load(Ordering::Acquire) {
            kick(cs);
        }
    });

    id
}

fn wait(note: &Note) {
    if !note.wait(TIMEOUT) {
        panic!("pi: dma timeout");
    }
}

/// Whether the job `id` has finished.
fn completed(id: u64) -> bool {
    COMPLETED.load(Ordering::Acquire) >= id
}

/// Blocks until every transfer queued so far has finished.
pub fn barrier() {
    let last = NEXT_ID.load(Ordering::Relaxed) - 1;
    if completed(last) {
        return;
    }

    let note = Arc::new(Note::new());
    submit(PhysAddr(0), None, Some(note.clone()));
    wait(&note);
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("seek out of range")]
    SeekOutOfRange,
    #[error("invalid offset")]
    InvalidOffset,
    #[error("end of device")]
    EndOfDevice,
}

impl From<DeviceError> for io::Error {
    fn from(value: DeviceError) -> Self {
        let kind = match value {
            DeviceError::SeekOutOfRange | DeviceError::InvalidOffset => io::ErrorKind::InvalidInput,
            DeviceError::EndOfDevice => io::ErrorKind::WriteZero,
        };

        io::Error::new(kind, value)
    }
}

/// A memory range on the PI bus, accessed with DMA where alignment allows it and MMIO
/// everywhere else.
#[derive(Debug)]
pub struct Device {
    addr: PhysAddr,
    size: u32,
    pos: u64,
    last: AtomicU64,
}

impl Device {
    /// # Panics
    /// Panics if the range is not on the PI bus.
    pub fn new(addr: PhysAddr, size: u32) -> Self {
        let start = addr.value();
        let valid = start.checked_add(size).is_some_and(|end| {
            (BUS0.contains(&start) && end <= BUS0.end) || (BUS1.contains(&start) && end <= BUS1.end)
        });
        assert!(valid, "invalid pi bus range {addr}+{size:#x}");

        Self {
            addr,
            size,
            pos: 0,
            last: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> PhysAddr {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Reads into `out` starting at `offset`. Returns the number of bytes read.
    ///
    /// A read that reaches the end of the device, including one that ends exactly on its last
    /// byte, reports [`DeviceError::EndOfDevice`] along with the number of bytes read.
    pub fn read_at(&self, out: &mut [u8], offset: u64) -> (usize, Option<DeviceError>) {
        if offset > self.size as u64 {
            return (0, Some(DeviceError::InvalidOffset));
        }

        let left = (self.size as u64 - offset) as usize;
        let (out, err) = if out.len() >= left {
            (&mut out[..left], Some(DeviceError::EndOfDevice))
        } else {
            (out, None)
        };

        if out.is_empty() {
            return (0, err);
        }

        let note = Arc::new(Note::new());
        let data = Data::Load {
            ptr: out.as_mut_ptr(),
            len: out.len(),
        };

        let id = submit(self.addr + offset as u32, Some(data), Some(note.clone()));
        self.last.store(id, Ordering::Relaxed);
        wait(&note);

        (out.len(), err)
    }

    /// Queues a write of `data` at `offset`. Returns once the data is copied, without waiting for
    /// the transfer.
    ///
    /// A write that doesn't fit is cut short at the end of the device and reports
    /// [`DeviceError::EndOfDevice`] along with the number of bytes written.
    pub fn write_at(&self, data: &[u8], offset: u64) -> (usize, Option<DeviceError>) {
        if offset > self.size as u64 {
            return (0, Some(DeviceError::InvalidOffset));
        }

        let left = (self.size as u64 - offset) as usize;
        let (data, err) = if data.len() > left {
            (&data[..left], Some(DeviceError::EndOfDevice))
        } else {
            (data, None)
        };

        if !data.is_empty() {
            let buf = Buffer::from_slice(data);
            let id = submit(self.addr + offset as u32, Some(Data::Store(buf)), None);
            self.last.store(id, Ordering::Relaxed);
        }

        (data.len(), err)
    }

    /// Blocks until every write to this device has reached the bus.
    pub fn flush(&self) {
        if completed(self.last.load(Ordering::Relaxed)) {
            return;
        }

        barrier();
    }

    /// Moves the cursor used by [`Read`] and [`Write`].
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64, DeviceError> {
        let pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(offset) => self.pos.checked_add_signed(offset),
            SeekFrom::End(offset) => (self.size as u64).checked_add_signed(offset),
        };

        match pos {
            Some(pos) if pos <= self.size as u64 => {
                self.pos = pos;
                Ok(pos)
            }
            _ => Err(DeviceError::SeekOutOfRange),
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for Device {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (n, err) = self.read_at(buf, self.pos);
        self.pos += n as u64;
        match err {
            None | Some(DeviceError::EndOfDevice) => Ok(n),
            Some(err) => Err(err.into()),
        }
    }
}

impl Write for Device {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (n, err) = self.write_at(buf, self.pos);
        self.pos += n as u64;
        match err {
            Some(err) if n == 0 => Err(err.into()),
            _ => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Device::flush(self);
        Ok(())
    }
}

impl Seek for Device {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}
