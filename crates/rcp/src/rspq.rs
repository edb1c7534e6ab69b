//! Command queue for the RSP.
//!
//! The queue microcode runs on the RSP permanently and executes commands the CPU streams into
//! RDRAM. There are two queues: the low priority one, where most work goes, and a smaller high
//! priority one the RSP switches to as soon as it's requested. Each consists of two buffers the
//! CPU alternates between, so one can be refilled while the RSP is still reading the other.
//!
//! Commands are sequences of 32-bit words. The top byte of the first word selects the command,
//! the rest of the word is its first argument. Codes below 0x10 belong to the queue itself, the
//! rest are dispatched by their high nibble to overlays: microcodes registered with the queue
//! that it swaps into IMEM on demand.
pub mod header;

#[cfg(test)]
mod test;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use easyerr::Error;
use strum::FromRepr;
use vr4300::PhysAddr;
use zerocopy::IntoBytes;

use crate::cpu::{Buffer, Pinner};
use crate::hw;
use crate::rsp::{self, IMEM, Status, StatusWrite, Ucode};

use header::{OVERLAY_SLOTS, Overlay, OverlayDescriptor, OverlayHeader, QUEUE_HEADER, QueueHeader};

/// Longest command, in words.
pub const MAX_COMMAND_SIZE: usize = 62;
/// Longest command that can be written without checking for a buffer switch, in words.
pub const MAX_SHORT_COMMAND_SIZE: usize = 16;

const LOWPRI_WORDS: usize = 0x200;
const HIGHPRI_WORDS: usize = 0x80;
/// Words a buffer keeps free for the jump into the other one.
const WRAP_WORDS: usize = 2;

/// Instruction the RSP spins on after a crash, placed right after the halted PC.
const BREAK_LOOP: u32 = 0x00ba_000d;
const TIMEOUT: Duration = Duration::from_secs(1);

/// DMA status bits the queue waits on before starting a transfer.
const DMA_BUSY_OR_FULL: u32 = 12;
const DMA_TO_RDRAM: u32 = 0xFFFF_8000;

/// RSP signals used by the queue.
pub mod signal {
    /// Set by a full sync on the RDP while its interrupt is pending.
    pub const RDP_SYNCFULL: u8 = 1 << 1;
    /// Set by the RSP when it reached a syncpoint.
    pub const SYNCPOINT: u8 = 1 << 2;
    /// Set while the RSP executes the high priority queue.
    pub const HIGHPRI_RUNNING: u8 = 1 << 3;
    /// Set by the CPU to have the RSP switch to the high priority queue.
    pub const HIGHPRI_REQUESTED: u8 = 1 << 4;
    /// Set by the RSP when it finished a high priority buffer.
    pub const BUFDONE_HIGH: u8 = 1 << 5;
    /// Set by the RSP when it finished a low priority buffer.
    pub const BUFDONE_LOW: u8 = 1 << 6;
    /// Set by the CPU when it wrote more commands to the current queue.
    pub const MORE: u8 = 1 << 7;
}

/// Commands implemented by the queue itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Command {
    WaitNewInput = 0x00,
    Noop = 0x01,
    Jump = 0x02,
    Call = 0x03,
    Ret = 0x04,
    Dma = 0x05,
    WriteStatus = 0x06,
    SwapBuffers = 0x07,
    TestWriteStatus = 0x08,
    RdpWaitIdle = 0x09,
    RdpSetBuffer = 0x0A,
    RdpAppendBuffer = 0x0B,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue ucode has {len} bytes of data, too few for its header")]
    QueueData { len: usize },
    #[error("ucode has no valid overlay header")]
    OverlayHeader,
    #[error("every overlay descriptor is taken")]
    TooManyOverlays,
    #[error("no {slots} consecutive overlay ids are free")]
    TooManyCommands { slots: usize },
}

/// Identifies a registered overlay. Its commands are numbered from `id << 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayId(u8);

impl OverlayId {
    pub fn id(self) -> u8 {
        self.0
    }

    /// Code of the overlay's `index`th command.
    pub fn command(self, index: u8) -> u8 {
        let code = ((self.0 as u16) << 4) + index as u16;
        assert!(code <= 0xFF, "rspq: command {index} out of range");
        code as u8
    }
}

/// Marks a point in the queue. See [`syncpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncPoint(u64);

/// One priority level: a pair of buffers written alternately.
struct Context {
    buffers: [Buffer<u32>; 2],
    index: usize,
    /// Write position in the current buffer, in words.
    cur: usize,
    bufdone: u8,
}

impl Context {
    fn new(words: usize, bufdone: u8) -> Self {
        let buffers = [Buffer::new(words), Buffer::new(words)];
        for buffer in &buffers {
            buffer.writeback();
        }

        Self {
            buffers,
            index: 0,
            cur: 0,
            bufdone,
        }
    }

    fn reset(&mut self) {
        self.clear(0);
        self.clear(1);
        self.index = 0;
        self.cur = 0;
    }

    fn clear(&mut self, index: usize) {
        self.buffers[index].uncached().fill(0);
    }

    fn physical(&self, index: usize) -> PhysAddr {
        self.buffers[index].physical()
    }

    fn len(&self) -> usize {
        self.buffers[self.index].len()
    }

    /// Appends a command to buffer `index` at the cursor. The first word is written last, so the
    /// RSP never sees a partial command.
    fn append(&mut self, index: usize, command: u8, args: &[u32]) {
        let mut buffer = self.buffers[index].uncached();
        let Some((&first, rest)) = args.split_first() else {
            buffer.write(self.cur, (command as u32) << 24);
            self.cur += 1;
            return;
        };

        assert!(first & 0xFF00_0000 == 0, "rspq: first argument overlaps the command");
        buffer.copy_from_slice(self.cur + 1, rest);
        buffer.write(self.cur, first | ((command as u32) << 24));
        self.cur += args.len();
    }

    /// Switches to the other buffer, once the RSP is done with it, and links the current one to it.
    fn next_buffer(&mut self) {
        let deadline = Instant::now() + TIMEOUT;
        while rsp::signals() & self.bufdone == 0 {
            assert!(Instant::now() < deadline, "rspq: buffer-done timeout");
            rsp::resume();
            std::thread::yield_now();
        }

        rsp::clear_signals(self.bufdone);

        let old = self.index;
        self.index = 1 - old;
        self.clear(self.index);

        let done = StatusWrite::default().with_signals_set(self.bufdone).to_bits();
        let next = self.physical(self.index).value();
        self.append(old, Command::WriteStatus as u8, &[done]);
        self.append(old, Command::Jump as u8, &[next]);

        rsp::resume();
        self.cur = 0;
        tracing::debug!("rspq: switched to buffer {} at {}", self.index, PhysAddr(next));
    }
}

struct Queue {
    ucode: Ucode,
    lowpri: Context,
    highpri: Context,
    highpri_active: bool,
    header: QueueHeader,
    dummy_state: Buffer<u64>,
    /// Registered overlays, kept alive while the RSP may load them.
    overlays: Pinner,
    /// Buffers of queued DMA commands, kept alive until the next syncpoint is reached.
    transfers: Pinner,
    syncpoints: u64,
    reached: u64,
}

static QUEUE: Mutex<Option<Queue>> = Mutex::new(None);

fn with<R>(f: impl FnOnce(&mut Queue) -> R) -> R {
    let mut queue = QUEUE.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(queue) = queue.as_mut() else {
        panic!("rspq: queue not initialised");
    };

    f(queue)
}

/// Installs `ucode` as the queue microcode and starts it.
pub fn init(ucode: Ucode) -> Result<(), QueueError> {
    let len = ucode.data().len();
    if len < QUEUE_HEADER + size_of::<QueueHeader>() || len + size_of::<OverlayHeader>() > rsp::MEM_SIZE {
        return Err(QueueError::QueueData { len });
    }

    let dummy_state = Buffer::<u64>::new(2);
    dummy_state.writeback();

    let mut queue = QUEUE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(old) = queue.as_mut() {
        rsp::load(&old.ucode);
        old.overlays.unpin();
        old.transfers.unpin();
    }

    let queue = queue.insert(Queue {
        ucode,
        lowpri: Context::new(LOWPRI_WORDS, signal::BUFDONE_LOW),
        highpri: Context::new(HIGHPRI_WORDS, signal::BUFDONE_HIGH),
        highpri_active: false,
        header: QueueHeader::default(),
        dummy_state,
        overlays: Pinner::new(),
        transfers: Pinner::new(),
        syncpoints: 0,
        reached: 0,
    });

    queue.reset();
    Ok(())
}

/// Reloads the queue microcode and starts over with empty queues. Registered overlays are
/// forgotten.
pub fn reset() {
    with(Queue::reset);
}

/// Appends a command to the active queue and has the RSP run it.
///
/// # Panics
/// Panics if `args` is longer than [`MAX_COMMAND_SIZE`] or the RSP doesn't release a buffer in
/// time.
pub fn write(command: u8, args: &[u32]) {
    with(|queue| queue.write(command, args));
}

/// Whether the RSP is stuck in the crash handler of the queue.
pub fn crashed() -> bool {
    if !rsp::halted() {
        return false;
    }

    let mut instr = [0; 4];
    let after = (rsp::pc() & 0xFFC) as u64 + 4;
    match IMEM.read_at(&mut instr, after) {
        Ok(4) => u32::from_be_bytes(instr) == BREAK_LOOP,
        _ => false,
    }
}

/// Registers `ucode` as an overlay, assigning it ids for its commands.
pub fn register(ucode: Ucode) -> Result<OverlayId, QueueError> {
    with(|queue| queue.register(ucode))
}

/// Switches to the high priority queue. The RSP handles it before any pending low priority
/// command.
pub fn highpri_begin() {
    with(|queue| {
        assert!(!queue.highpri_active, "rspq: high priority queue already active");
        queue.highpri_active = true;

        rsp::set_signals(signal::HIGHPRI_REQUESTED);
        rsp::resume();
        tracing::debug!("rspq: high priority begin");
    });
}

/// Switches back to the low priority queue, where the RSP continues once it has run everything
/// queued with high priority.
pub fn highpri_end() {
    with(|queue| {
        assert!(queue.highpri_active, "rspq: high priority queue not active");

        let running = StatusWrite::default()
            .with_signals_cleared(signal::HIGHPRI_RUNNING)
            .to_bits();
        queue.write(
            Command::SwapBuffers as u8,
            &[QueueHeader::LOWPRI_SLOT, QueueHeader::HIGHPRI_SLOT, running],
        );

        queue.highpri_active = false;
        tracing::debug!("rspq: high priority end");
    });
}

/// Queues a syncpoint. The RSP can only pass it once every earlier syncpoint was acknowledged.
pub fn syncpoint() -> SyncPoint {
    with(Queue::syncpoint)
}

/// Whether the RSP got past `point`.
pub fn syncpoint_reached(point: SyncPoint) -> bool {
    with(|queue| {
        queue.acknowledge();
        queue.reached >= point.0
    })
}

/// Blocks until the RSP got past `point`.
///
/// # Panics
/// Panics if the RSP crashed or doesn't get there within a second.
pub fn wait_syncpoint(point: SyncPoint) {
    let deadline = Instant::now() + TIMEOUT;
    while !syncpoint_reached(point) {
        assert!(!crashed(), "rspq: rsp crashed");
        assert!(Instant::now() < deadline, "rspq: syncpoint timeout");
        std::thread::yield_now();
    }
}

/// Blocks until the RSP ran everything queued so far.
pub fn wait() {
    wait_syncpoint(syncpoint());
    with(|queue| queue.transfers.unpin());
}

fn dma(rdram: PhysAddr, dmem: u32, len: usize, flags: u32) {
    assert!(
        dmem.is_multiple_of(8) && len.is_multiple_of(8) && len > 0,
        "rspq: unaligned dma"
    );
    write(Command::Dma as u8, &[rdram.value(), dmem, len as u32 - 1, flags]);
}

/// Queues a copy of the first `len` bytes of `buf` to DMEM at `dmem`. The buffer is kept alive
/// until the next [`wait`].
pub fn dma_to_dmem(buf: &Arc<Buffer>, dmem: u32, len: usize) {
    assert!(len <= buf.len(), "rspq: dma past the buffer");
    buf.writeback();
    with(|queue| queue.transfers.pin(buf));
    dma(buf.physical(), dmem, len, DMA_BUSY_OR_FULL);
}

/// Queues a copy of `len` bytes from DMEM at `dmem` into `buf`. The contents are valid, and the
/// buffer is kept alive, until the next [`wait`].
pub fn dma_from_dmem(buf: &Arc<Buffer>, dmem: u32, len: usize) {
    assert!(len <= buf.len(), "rspq: dma past the buffer");
    hw::get().invalidate(buf.as_ptr().cast_mut(), buf.capacity());
    with(|queue| queue.transfers.pin(buf));
    dma(buf.physical(), dmem, len, DMA_TO_RDRAM | DMA_BUSY_OR_FULL);
}

impl Queue {
    fn data_size(&self) -> usize {
        self.ucode.data().len()
    }

    fn text_size(&self) -> usize {
        self.ucode.text().len()
    }

    fn context(&mut self) -> &mut Context {
        if self.highpri_active {
            &mut self.highpri
        } else {
            &mut self.lowpri
        }
    }

    fn reset(&mut self) {
        rsp::load(&self.ucode);
        self.overlays.unpin();
        self.transfers.unpin();

        self.lowpri.reset();
        self.highpri.reset();
        self.highpri_active = false;
        self.syncpoints = 0;
        self.reached = 0;

        let lowpri = self.lowpri.physical(0).value();
        let mut header = QueueHeader::default();
        header.lowpri.set(lowpri);
        header.highpri.set(self.highpri.physical(0).value());
        header.current.set(lowpri);

        let dummy = &mut header.descriptors[0];
        dummy.state.set(self.dummy_state.physical().value());
        dummy.data_size.set((self.dummy_state.bytes().len() - 1) as u16);

        self.header = header;
        rsp::write_dmem(QUEUE_HEADER, self.header.as_bytes());

        // the queue itself runs as overlay 0, without commands of its own
        let dummy = OverlayHeader {
            state_size: (size_of::<u64>() as u16 - 1).into(),
            ..Default::default()
        };
        rsp::write_dmem(self.data_size(), dummy.as_bytes());

        rsp::clear_signals(0xFF);
        rsp::set_signals(signal::BUFDONE_LOW | signal::BUFDONE_HIGH);
        rsp::resume();

        tracing::debug!("rspq: reset, low priority queue at {}", PhysAddr(lowpri));
    }

    fn write(&mut self, command: u8, args: &[u32]) {
        assert!(args.len() <= MAX_COMMAND_SIZE, "rspq: command too long");

        let ctx = self.context();
        let index = ctx.index;
        ctx.append(index, command, args);

        rsp::set_signals(signal::MORE);
        rsp::resume();

        if ctx.cur + MAX_COMMAND_SIZE + WRAP_WORDS > ctx.len() {
            ctx.next_buffer();
        }
    }

    fn syncpoint(&mut self) -> SyncPoint {
        let set = StatusWrite::default()
            .with_signals_set(signal::SYNCPOINT)
            .to_bits();
        let test = Status::default().with_signals(signal::SYNCPOINT).to_bits();
        self.write(Command::TestWriteStatus as u8, &[set, test]);

        self.syncpoints += 1;
        SyncPoint(self.syncpoints)
    }

    /// Counts a reached syncpoint, letting the RSP continue to the next one.
    fn acknowledge(&mut self) {
        if rsp::signals() & signal::SYNCPOINT != 0 {
            rsp::clear_signals(signal::SYNCPOINT);
            self.reached += 1;
            rsp::resume();
        }
    }

    fn register(&mut self, mut ucode: Ucode) -> Result<OverlayId, QueueError> {
        let (text_size, data_size) = (self.text_size(), self.data_size());
        let mut overlay = ucode
            .data()
            .get(data_size..)
            .and_then(Overlay::parse)
            .ok_or(QueueError::OverlayHeader)?;

        let state_start = overlay.header.state_start.get() as usize;
        if state_start + overlay.state_len() > ucode.data().len() || ucode.text().len() < text_size {
            return Err(QueueError::OverlayHeader);
        }

        let index = self
            .header
            .descriptors
            .iter()
            .skip(1)
            .position(|desc| desc.code.get() == 0)
            .map(|i| i + 1)
            .ok_or(QueueError::TooManyOverlays)?;

        let slots = overlay.slots().max(1);
        let id = (1..=OVERLAY_SLOTS - slots)
            .find(|&id| self.header.overlay_table[id..id + slots].iter().all(|&e| e == 0))
            .ok_or(QueueError::TooManyCommands { slots })?;

        overlay.header.command_base.set((id << 5) as u16);
        ucode.data_mut()[data_size..data_size + size_of::<OverlayHeader>()]
            .copy_from_slice(overlay.header.as_bytes());
        ucode.writeback();

        let desc = &mut self.header.descriptors[index];
        desc.code.set(ucode.text_addr(text_size).value());
        desc.data.set(ucode.data_addr(data_size).value());
        desc.state.set(ucode.data_addr(state_start).value());
        desc.code_size.set((ucode.text().len() - text_size).saturating_sub(1) as u16);
        desc.data_size.set((ucode.data().len() - data_size).saturating_sub(1) as u16);

        let offset = (index * size_of::<OverlayDescriptor>()) as u8;
        self.header.overlay_table[id..id + slots].fill(offset);

        tracing::debug!(
            "rspq: registered {} as overlay {id} ({} commands)",
            ucode.name(),
            overlay.commands.len()
        );
        self.overlays.pin(&Arc::new(ucode));

        // only the tables: the rsp owns the queue pointers that follow
        let deadline = Instant::now() + TIMEOUT;
        while !rsp::halted() {
            assert!(Instant::now() < deadline, "rspq: rsp busy");
            std::thread::yield_now();
        }

        let tables = std::mem::offset_of!(QueueHeader, pointer_stack);
        rsp::write_dmem(QUEUE_HEADER, &self.header.as_bytes()[..tables]);

        Ok(OverlayId(id as u8))
    }
}
