//! Audio interface (AI): streams 16-bit stereo PCM out of RDRAM to the audio DAC.
//!
//! Samples are written through a [`Writer`] into one of three buffers. A full buffer becomes
//! pending, and is handed to the AI DMA as soon as its two-entry queue has room, either right
//! away or by the interrupt raised when the next queued buffer starts playing.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use std::time::{Duration, Instant};

use bitos::bitos;
use easyerr::Error;
use vr4300::PhysAddr;

use crate::cpu::Buffer;
use crate::interrupt::{self, CriticalSection, Source};
use crate::mmio::{Reg, reg_value};
use crate::sync::{IntrInput, Note};
use crate::video::{self, Standard};

pub const BASE: u32 = 0x0450_0000;

/// DMA addresses and lengths are multiples of this.
const DMA_ALIGN: usize = 8;
const BUFFERS_PER_SECOND: u32 = 25;
const TIMEOUT: Duration = Duration::from_secs(1);
/// Dividers the DAC accepts. Below the minimum the bit clock divider is zero.
const DAC_RATES: std::ops::RangeInclusive<u32> = 66..=0x4000;

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Status {
    #[bits(25)]
    pub enabled: bool,
    /// A buffer is playing.
    #[bits(30)]
    pub busy: bool,
    /// Both queue entries are taken.
    #[bits(31)]
    pub full: bool,
}

reg_value!(Status);

pub mod regs {
    use super::*;

    pub const DRAM_ADDR: Reg<PhysAddr> = Reg::at(BASE);
    /// Writing queues a DMA of that many bytes.
    pub const LENGTH: Reg = Reg::at(BASE + 0x04);
    /// Bit 0 enables DMA.
    pub const CONTROL: Reg = Reg::at(BASE + 0x08);
    /// Writing acknowledges the interrupt.
    pub const STATUS: Reg<Status> = Reg::at(BASE + 0x0C);
    /// DAC clock divider, minus one.
    pub const DAC_RATE: Reg = Reg::at(BASE + 0x10);
    pub const BIT_RATE: Reg = Reg::at(BASE + 0x14);
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("playback stopped")]
    Stopped,
    #[error("sample rate of {hz} Hz is out of the dac range")]
    InvalidRate { hz: u32 },
}

impl From<AudioError> for io::Error {
    fn from(value: AudioError) -> Self {
        let kind = match value {
            AudioError::Stopped => io::ErrorKind::BrokenPipe,
            AudioError::InvalidRate { .. } => io::ErrorKind::InvalidInput,
        };

        io::Error::new(kind, value)
    }
}

/// Clock the DAC rate divides, which depends on the video standard.
pub fn dac_clock(standard: Standard) -> u32 {
    match standard {
        Standard::Ntsc => 48_681_818,
        Standard::Pal => 49_656_530,
        Standard::Mpal => 48_628_322,
    }
}

/// A buffer handed to the DMA.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    addr: PhysAddr,
    len: u32,
}

struct Player {
    /// Each is one DMA granule larger than the capacity, see [`Player::place`].
    buffers: [Buffer; 3],
    /// Start of the samples in each buffer.
    offsets: [usize; 3],
    writing: usize,
    len: usize,
    capacity: usize,
}

impl Player {
    fn new(capacity: usize) -> Self {
        Self {
            buffers: std::array::from_fn(|_| Buffer::new(capacity + DMA_ALIGN)),
            offsets: [0; 3],
            writing: 0,
            len: 0,
            capacity,
        }
    }

    /// Moves the samples of the current buffer so they don't end on an 8 KiB boundary. The
    /// DMA misbehaves on those.
    fn place(&mut self) -> usize {
        let buffer = &mut self.buffers[self.writing];
        let offset = self.offsets[self.writing];
        let end = buffer.physical().value() as usize + offset + self.len;
        if end & 0x1FFF != 0 {
            return offset;
        }

        let moved = DMA_ALIGN - offset;
        buffer.copy_within(offset..offset + self.len, moved);
        self.offsets[self.writing] = moved;
        tracing::trace!("ai: moved buffer {} off an 8 KiB boundary", self.writing);
        moved
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let offset = self.offsets[self.writing];
        let n = data.len().min(self.capacity - self.len);
        let start = offset + self.len;
        self.buffers[self.writing][start..start + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// Hands the current buffer over for playback and moves on to the next one, once it's no
    /// longer played.
    fn submit(&mut self) -> Result<(), AudioError> {
        if self.len == 0 {
            return Ok(());
        }

        wait_until(|| PENDING.consumed());
        if !RUNNING.load(Ordering::Acquire) {
            return Err(AudioError::Stopped);
        }

        // the dma reads whole granules
        let padded = self.len.next_multiple_of(DMA_ALIGN);
        let offset = self.offsets[self.writing];
        self.buffers[self.writing][offset + self.len..offset + padded].fill(0);
        self.len = padded;

        let offset = self.place();
        let buffer = &self.buffers[self.writing];
        let chunk = Chunk {
            addr: buffer.physical() + offset as u32,
            len: self.len as u32,
        };

        buffer.writeback();
        PENDING.put(chunk);
        interrupt::free(feed);

        self.writing = (self.writing + 1) % self.buffers.len();
        self.len = 0;

        // two buffers in flight at most, the third is written
        wait_until(|| queued() + !PENDING.consumed() as usize <= 2);
        Ok(())
    }
}

static PLAYER: Mutex<Option<Player>> = Mutex::new(None);
static PENDING: IntrInput<Chunk> = IntrInput::new();
static RUNNING: AtomicBool = AtomicBool::new(false);
static STARTED: Note = Note::new();
static INIT: Once = Once::new();

fn player() -> MutexGuard<'static, Option<Player>> {
    PLAYER.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of buffers in the DMA queue, playing or about to.
fn queued() -> usize {
    let status = regs::STATUS.load();
    if status.full() {
        2
    } else {
        status.busy() as usize
    }
}

/// Waits for `done`, rechecking each time a buffer starts playing.
///
/// # Panics
/// Panics if no buffer starts within a second.
fn wait_until(done: impl Fn() -> bool) {
    loop {
        STARTED.clear();
        if done() {
            return;
        }

        if !STARTED.wait(TIMEOUT) {
            panic!("audio: dma timeout");
        }
    }
}

/// Queues the pending buffer, if there's room for it.
fn feed(cs: &CriticalSection) {
    if !RUNNING.load(Ordering::Acquire) || regs::STATUS.load().full() {
        return;
    }

    if let (Some(chunk), true) = PENDING.get(cs) {
        regs::DRAM_ADDR.store(chunk.addr);
        regs::LENGTH.store(chunk.len);
        regs::CONTROL.store(1);
        tracing::trace!("ai: queued {} bytes at {}", chunk.len, chunk.addr);
    }
}

fn handler(cs: &CriticalSection) {
    regs::STATUS.store(Status::default());
    feed(cs);
    STARTED.signal(cs);
}

/// Starts playback at about `hz` samples per second. Returns the actual sample rate.
///
/// Fails if the DAC can't be clocked at `hz`, which leaves playback untouched.
pub fn start(hz: u32) -> Result<u32, AudioError> {
    let clock = dac_clock(video::config().standard);
    let dac_rate = (2 * clock)
        .checked_div(hz)
        .map(|rate| rate.div_ceil(2))
        .filter(|rate| DAC_RATES.contains(rate))
        .ok_or(AudioError::InvalidRate { hz })?;

    INIT.call_once(|| {
        interrupt::set_handler(Source::Ai, handler);
        interrupt::enable(Source::Ai);
    });

    stop();

    let bit_rate = (dac_rate / 66).min(16);
    let hz = (2 * clock) / (2 * dac_rate - 1);

    let samples = (hz / BUFFERS_PER_SECOND) as usize & !(DMA_ALIGN - 1);
    let capacity = samples * 4;

    regs::DAC_RATE.store(dac_rate - 1);
    regs::BIT_RATE.store(bit_rate - 1);
    *player() = Some(Player::new(capacity));
    RUNNING.store(true, Ordering::Release);

    tracing::debug!("ai: {hz} Hz, {capacity} byte buffers");
    Ok(hz)
}

/// Stops playback once the submitted buffers played. Samples not yet submitted are dropped.
///
/// # Panics
/// Panics if the submitted buffers don't finish within a second.
pub fn stop() {
    if !RUNNING.load(Ordering::Acquire) {
        return;
    }

    wait_until(|| PENDING.consumed());
    RUNNING.store(false, Ordering::Release);

    let deadline = Instant::now() + TIMEOUT;
    while regs::STATUS.load().busy() {
        assert!(Instant::now() < deadline, "audio: stop timeout");
        std::thread::yield_now();
    }

    regs::CONTROL.store(0);
    // drop what the dma won't pick up anymore
    interrupt::free(|cs| PENDING.get(cs));

    if let Some(player) = player().as_mut() {
        player.len = 0;
    }
    tracing::debug!("ai: stopped");
}

/// Whether samples are being accepted.
pub fn running() -> bool {
    RUNNING.load(Ordering::Acquire)
}

/// Writes 16-bit big-endian stereo samples for playback. Nothing plays until a buffer fills up
/// or the writer is flushed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Writer;

impl Writer {
    /// Bytes a buffer holds, a 25th of a second of playback.
    pub fn capacity(&self) -> usize {
        player().as_ref().map_or(0, |player| player.capacity)
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut player = player();
        let Some(player) = player.as_mut() else {
            return Err(AudioError::Stopped.into());
        };

        if !RUNNING.load(Ordering::Acquire) {
            return Err(AudioError::Stopped.into());
        }

        let mut written = 0;
        while written < buf.len() {
            written += player.write(&buf[written..]);
            if player.len == player.capacity {
                player.submit()?;
            }
        }

        Ok(written)
    }

    /// Submits a partially filled buffer.
    fn flush(&mut self) -> io::Result<()> {
        match player().as_mut() {
            Some(player) => Ok(player.submit()?),
            None => Err(AudioError::Stopped.into()),
        }
    }
}
