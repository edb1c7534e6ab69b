//! Register-level model of the RCP and the devices on its buses.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use vr4300::PhysAddr;

use super::memory::Memory;
use super::pif::Pif;
use super::{queue, raster};
use crate::interrupt::{Source, Sources};

const DMEM: u32 = 0x0400_0000;
const IMEM: u32 = 0x0400_1000;
const SP_REGS: u32 = 0x0404_0000;
const SP_PC: u32 = 0x0408_0000;
const DP_REGS: u32 = 0x0410_0000;
const MI_REGS: u32 = 0x0430_0000;
const VI_REGS: u32 = 0x0440_0000;
const AI_REGS: u32 = 0x0450_0000;
const PI_REGS: u32 = 0x0460_0000;
const SI_REGS: u32 = 0x0480_0000;
const PIF_RAM: u32 = 0x1fc0_07c0;

const SRAM: u32 = 0x0800_0000;
const SRAM_SIZE: usize = 0x8000;
const ROM: u32 = 0x1000_0000;
const ISVIEWER: u32 = 0x13ff_0000;
const ISVIEWER_SIZE: usize = 0x1_0000;
const ISVIEWER_TOKEN: u32 = 0x4953_3634;

fn load_be(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(word)
}

fn store_be(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[derive(Default)]
pub struct Mi {
    pub mode: u32,
    pub pending: Sources,
    pub mask: Sources,
}

#[derive(Default)]
pub struct Pi {
    pub dram: u32,
    pub cart: u32,
    pub timing: [u32; 8],
}

pub struct Cart {
    pub rom: Vec<u8>,
    pub sram: Vec<u8>,
    pub isviewer: Vec<u8>,
    /// Text the ISViewer printed.
    pub log: Vec<u8>,
}

impl Cart {
    fn new() -> Self {
        Self {
            rom: Vec::new(),
            sram: vec![0; SRAM_SIZE],
            isviewer: vec![0; ISVIEWER_SIZE],
            log: Vec::new(),
        }
    }

    /// Returns the backing memory of the byte at `addr`.
    fn backing(&mut self, addr: u32) -> Option<(&mut [u8], usize)> {
        let isviewer = ISVIEWER..ISVIEWER + ISVIEWER_SIZE as u32;
        let sram = SRAM..SRAM + SRAM_SIZE as u32;
        if isviewer.contains(&addr) {
            Some((&mut self.isviewer, (addr - ISVIEWER) as usize))
        } else if sram.contains(&addr) {
            Some((&mut self.sram, (addr - SRAM) as usize))
        } else if addr >= ROM && ((addr - ROM) as usize) < self.rom.len() {
            Some((&mut self.rom, (addr - ROM) as usize))
        } else {
            None
        }
    }

    fn is_writable(addr: u32) -> bool {
        (ISVIEWER..ISVIEWER + ISVIEWER_SIZE as u32).contains(&addr)
            || (SRAM..SRAM + SRAM_SIZE as u32).contains(&addr)
    }

    pub fn read(&mut self, addr: u32, out: &mut [u8]) {
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = match self.backing(addr + i as u32) {
                Some((mem, offset)) => mem[offset],
                None => 0,
            };
        }
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let addr = addr + i as u32;
            if !Self::is_writable(addr) {
                continue;
            }

            if let Some((mem, offset)) = self.backing(addr) {
                mem[offset] = *byte;
            }
        }
    }

    fn load(&mut self, addr: u32) -> u32 {
        let mut word = [0; 4];
        self.read(addr, &mut word);
        u32::from_be_bytes(word)
    }

    fn store(&mut self, addr: u32, value: u32) {
        self.write(addr, &value.to_be_bytes());
        if addr == ISVIEWER && value == ISVIEWER_TOKEN {
            self.print();
        }
    }

    /// Consumes the text between the read and write pointers.
    fn print(&mut self) {
        let read = load_be(&self.isviewer, 0x04) as usize;
        let write = load_be(&self.isviewer, 0x14) as usize;
        let end = (0x20 + write).min(ISVIEWER_SIZE);
        let start = (0x20 + read).min(end);
        let text = self.isviewer[start..end].to_vec();
        self.log.extend_from_slice(&text);
        store_be(&mut self.isviewer, 0x04, write as u32);
    }
}

#[derive(Default)]
pub struct Si {
    pub dram: u32,
}

pub mod sp_status {
    pub const HALTED: u32 = 1 << 0;
    pub const BROKE: u32 = 1 << 1;
    pub const SSTEP: u32 = 1 << 5;
    pub const INTBREAK: u32 = 1 << 6;
    pub const SIGNALS: u32 = 7;
}

pub struct Sp {
    pub dmem: Vec<u8>,
    pub imem: Vec<u8>,
    pub mem_addr: u32,
    pub dram_addr: u32,
    /// Status as it reads.
    pub status: u32,
    pub pc: u32,
    pub semaphore: bool,
}

impl Sp {
    fn new() -> Self {
        Self {
            dmem: vec![0; 0x1000],
            imem: vec![0; 0x1000],
            mem_addr: 0,
            dram_addr: 0,
            status: sp_status::HALTED,
            pc: 0,
            semaphore: false,
        }
    }

    pub fn signals(&self) -> u8 {
        (self.status >> sp_status::SIGNALS) as u8
    }

    pub fn set_signals(&mut self, set: u8) {
        self.status |= (set as u32) << sp_status::SIGNALS;
    }

    pub fn clear_signals(&mut self, clear: u8) {
        self.status &= !((clear as u32) << sp_status::SIGNALS);
    }

    pub fn halted(&self) -> bool {
        self.status & sp_status::HALTED != 0
    }

    fn mem(&mut self, addr: u32) -> &mut [u8] {
        if addr & 0x1000 != 0 {
            &mut self.imem
        } else {
            &mut self.dmem
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ColorImage {
    pub addr: u32,
    pub format: u8,
    /// Bits per pixel, as the size field encodes them.
    pub size: u8,
    pub width: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Scissor {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Default)]
pub struct Dp {
    pub start: u32,
    pub end: u32,
    pub current: u32,
    pub start_pending: bool,
    pub flags: u32,
    pub color_image: Option<ColorImage>,
    pub fill_color: u32,
    pub cycle_type: u8,
    pub scissor: Scissor,
    /// Every command word processed, in order.
    pub history: Vec<u64>,
}

#[derive(Default)]
pub struct Vi {
    pub regs: [u32; 14],
    last_vblank: Option<Instant>,
    pub frames: u64,
}

impl Vi {
    const CONTROL: usize = 0;
    const ORIGIN: usize = 1;
    const V_CURRENT: usize = 4;

    pub fn enabled(&self) -> bool {
        self.regs[Self::CONTROL] & 0x3 != 0
    }

    pub fn origin(&self) -> u32 {
        self.regs[Self::ORIGIN]
    }
}

#[derive(Debug, Clone, Copy)]
struct Playback {
    len: u32,
    ends: Option<Instant>,
}

#[derive(Default)]
pub struct Ai {
    pub dram: u32,
    pub control: u32,
    pub dacrate: u32,
    pub bitrate: u32,
    fifo: VecDeque<Playback>,
    /// Number of buffers that started playing.
    pub played: u64,
}

impl Ai {
    const CLOCK: u64 = 48_681_812;

    fn duration(&self, len: u32) -> Duration {
        let rate = Self::CLOCK / (self.dacrate as u64 + 1);
        let frames = len as u64 / 4;
        Duration::from_micros(frames * 1_000_000 / rate.max(1))
    }

    fn start_front(&mut self, now: Instant) -> bool {
        let duration = match self.fifo.front() {
            Some(playback) => self.duration(playback.len),
            None => return false,
        };

        if let Some(front) = self.fifo.front_mut() {
            front.ends = Some(now + duration);
        }

        self.played += 1;
        true
    }
}

/// The state of the whole simulated console.
pub struct State {
    pub memory: Memory,
    pub mi: Mi,
    pub pi: Pi,
    pub cart: Cart,
    pub si: Si,
    pub pif: Pif,
    pub sp: Sp,
    pub dp: Dp,
    pub vi: Vi,
    pub ai: Ai,
    started: Instant,
}

impl State {
    pub fn new() -> Self {
        Self {
            memory: Memory::default(),
            mi: Mi::default(),
            pi: Pi::default(),
            cart: Cart::new(),
            si: Si::default(),
            pif: Pif::default(),
            sp: Sp::new(),
            dp: Dp::default(),
            vi: Vi::default(),
            ai: Ai::default(),
            started: Instant::now(),
        }
    }

    pub fn raise(&mut self, source: Source) {
        self.mi.pending = self.mi.pending | source.into();
    }

    pub fn lower(&mut self, source: Source) {
        self.mi.pending = Sources::from_bits(self.mi.pending.to_bits() & !(1 << source as u32));
    }

    fn is_pending(&self, source: Source) -> bool {
        self.mi.pending.contains(source)
    }

    pub fn load(&mut self, addr: u32) -> u32 {
        match addr {
            DMEM..0x0400_2000 => {
                let offset = (addr & 0xFFC) as usize;
                load_be(self.sp.mem(addr), offset)
            }
            SP_REGS..0x0404_0020 => self.load_sp(addr - SP_REGS),
            SP_PC => self.sp.pc,
            DP_REGS..0x0410_0020 => self.load_dp(addr - DP_REGS),
            MI_REGS..0x0430_0010 => match addr - MI_REGS {
                0x00 => self.mi.mode,
                0x04 => 0x0202_0102,
                0x08 => self.mi.pending.to_bits(),
                _ => self.mi.mask.to_bits(),
            },
            VI_REGS..0x0440_0038 => {
                let index = ((addr - VI_REGS) / 4) as usize;
                if index == Vi::V_CURRENT {
                    // ~15.7 kHz line rate over 525 half-lines
                    let lines = self.started.elapsed().as_micros() / 63;
                    (lines % 525) as u32 & !1
                } else {
                    self.vi.regs[index]
                }
            }
            AI_REGS..0x0450_0018 => self.load_ai(addr - AI_REGS),
            PI_REGS..0x0460_0034 => match addr - PI_REGS {
                0x00 => self.pi.dram,
                0x04 => self.pi.cart,
                0x10 => (self.is_pending(Source::Pi) as u32) << 3,
                offset @ 0x14.. => self.pi.timing[((offset - 0x14) / 4) as usize],
                _ => 0x7F,
            },
            SI_REGS..0x0480_001C => match addr - SI_REGS {
                0x00 => self.si.dram,
                0x18 => (self.is_pending(Source::Si) as u32) << 12,
                _ => 0,
            },
            PIF_RAM..0x1fc0_0800 => load_be(&self.pif.ram, (addr - PIF_RAM) as usize & !3),
            0x0500_0000..0x1fc0_0000 | 0x1fd0_0000..0x8000_0000 => self.cart.load(addr & !3),
            _ => panic!("sim: load from unmapped address {}", PhysAddr(addr)),
        }
    }

    pub fn store(&mut self, addr: u32, value: u32) {
        match addr {
            DMEM..0x0400_2000 => {
                let offset = (addr & 0xFFC) as usize;
                store_be(self.sp.mem(addr), offset, value);
            }
            SP_REGS..0x0404_0020 => self.store_sp(addr - SP_REGS, value),
            SP_PC => self.sp.pc = value & 0xFFC,
            DP_REGS..0x0410_0020 => self.store_dp(addr - DP_REGS, value),
            MI_REGS..0x0430_0010 => match addr - MI_REGS {
                0x00 => {
                    self.mi.mode = value & 0x7F;
                    if value & (1 << 11) != 0 {
                        self.lower(Source::Dp);
                    }
                }
                0x0C => {
                    let mut mask = self.mi.mask.to_bits();
                    for source in 0..6 {
                        if value & (1 << (2 * source)) != 0 {
                            mask &= !(1 << source);
                        }
                        if value & (1 << (2 * source + 1)) != 0 {
                            mask |= 1 << source;
                        }
                    }
                    self.mi.mask = Sources::from_bits(mask);
                }
                _ => (),
            },
            VI_REGS..0x0440_0038 => {
                let index = ((addr - VI_REGS) / 4) as usize;
                if index == Vi::V_CURRENT {
                    self.lower(Source::Vi);
                } else {
                    self.vi.regs[index] = value;
                }
            }
            AI_REGS..0x0450_0018 => self.store_ai(addr - AI_REGS, value),
            PI_REGS..0x0460_0034 => self.store_pi(addr - PI_REGS, value),
            SI_REGS..0x0480_001C => self.store_si(addr - SI_REGS, value),
            PIF_RAM..0x1fc0_0800 => {
                store_be(&mut self.pif.ram, (addr - PIF_RAM) as usize & !3, value);
            }
            0x0500_0000..0x1fc0_0000 | 0x1fd0_0000..0x8000_0000 => self.cart.store(addr & !3, value),
            _ => panic!("sim: store to unmapped address {}", PhysAddr(addr)),
        }
    }

    fn store_pi(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => self.pi.dram = value & 0x00FF_FFFF,
            0x04 => self.pi.cart = value,
            0x08 => {
                // rdram to cart
                assert!(self.pi.dram & 7 == 0, "sim: unaligned pi dma rdram address");
                assert!(self.pi.cart & 1 == 0, "sim: unaligned pi dma cart address");
                let len = (value & 0x00FF_FFFF) as usize + 1;
                let mut data = vec![0; len];
                self.memory.read(PhysAddr(self.pi.dram), &mut data);
                self.cart.write(self.pi.cart, &data);
                self.raise(Source::Pi);
            }
            0x0C => {
                // cart to rdram
                assert!(self.pi.dram & 7 == 0, "sim: unaligned pi dma rdram address");
                assert!(self.pi.cart & 1 == 0, "sim: unaligned pi dma cart address");
                let len = (value & 0x00FF_FFFF) as usize + 1;
                let mut data = vec![0; len];
                self.cart.read(self.pi.cart, &mut data);
                self.memory.write(PhysAddr(self.pi.dram), &data);
                self.raise(Source::Pi);
            }
            0x10 => {
                if value & 0b10 != 0 {
                    self.lower(Source::Pi);
                }
            }
            _ => self.pi.timing[((offset - 0x14) / 4) as usize] = value,
        }
    }

    fn store_si(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => self.si.dram = value & 0x00FF_FFFF,
            0x04 => {
                // pif to rdram
                let ram = self.pif.ram;
                self.memory.write(PhysAddr(self.si.dram), &ram);
                self.raise(Source::Si);
            }
            0x10 => {
                // rdram to pif
                let mut ram = [0; 64];
                self.memory.read(PhysAddr(self.si.dram), &mut ram);
                self.pif.ram = ram;
                self.pif.process();
                self.raise(Source::Si);
            }
            0x18 => self.lower(Source::Si),
            _ => (),
        }
    }

    fn load_sp(&mut self, offset: u32) -> u32 {
        match offset {
            0x00 => self.sp.mem_addr,
            0x04 => self.sp.dram_addr,
            0x10 => self.sp.status,
            0x1C => {
                let taken = self.sp.semaphore;
                self.sp.semaphore = true;
                taken as u32
            }
            _ => 0,
        }
    }

    fn sp_dma(&mut self, value: u32, to_rdram: bool) {
        let len = ((value & 0xFFF) + 1).next_multiple_of(8) as usize;
        let count = ((value >> 12) & 0xFF) as usize + 1;
        let skip = (value >> 20) as usize & 0xFF8;

        let mut mem_addr = self.sp.mem_addr & 0x1FF8;
        let mut dram = self.sp.dram_addr & 0x00FF_FFF8;
        for _ in 0..count {
            let bank = mem_addr & 0x1000;
            for i in 0..len as u32 {
                let offset = ((mem_addr + i) & 0xFFF) as usize;
                let addr = PhysAddr(dram + i);
                if to_rdram {
                    let byte = self.sp.mem(bank)[offset];
                    self.memory.write(addr, &[byte]);
                } else {
                    let mut byte = [0];
                    self.memory.read(addr, &mut byte);
                    self.sp.mem(bank)[offset] = byte[0];
                }
            }

            mem_addr = bank | ((mem_addr + len as u32) & 0xFFF);
            dram += (len + skip) as u32;
        }

        self.sp.mem_addr = mem_addr;
        self.sp.dram_addr = dram;
    }

    fn store_sp(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => self.sp.mem_addr = value & 0x1FF8,
            0x04 => self.sp.dram_addr = value & 0x00FF_FFF8,
            0x08 => self.sp_dma(value, false),
            0x0C => self.sp_dma(value, true),
            0x10 => self.sp_status(value),
            0x1C => self.sp.semaphore = false,
            _ => (),
        }
    }

    /// Applies a write to the SP status register.
    pub fn sp_status(&mut self, value: u32) {
        use sp_status::*;

        let mut status = self.sp.status;
        let mut resume = false;
        if value & (1 << 0) != 0 {
            resume = status & HALTED != 0;
            status &= !HALTED;
        }
        if value & (1 << 1) != 0 {
            status |= HALTED;
        }
        if value & (1 << 2) != 0 {
            status &= !BROKE;
        }
        if value & (1 << 3) != 0 {
            self.lower(Source::Sp);
        }
        if value & (1 << 4) != 0 {
            self.raise(Source::Sp);
        }
        if value & (1 << 5) != 0 {
            status &= !SSTEP;
        }
        if value & (1 << 6) != 0 {
            status |= SSTEP;
        }
        if value & (1 << 7) != 0 {
            status &= !INTBREAK;
        }
        if value & (1 << 8) != 0 {
            status |= INTBREAK;
        }
        for signal in 0..8 {
            if value & (1 << (9 + 2 * signal)) != 0 {
                status &= !(1 << (SIGNALS + signal));
            }
            if value & (1 << (10 + 2 * signal)) != 0 {
                status |= 1 << (SIGNALS + signal);
            }
        }

        self.sp.status = status;
        if resume {
            queue::run(self);
        }
    }

    /// Halts the RSP on a break instruction.
    pub fn sp_break(&mut self) {
        self.sp.status |= sp_status::HALTED | sp_status::BROKE;
        if self.sp.status & sp_status::INTBREAK != 0 {
            self.raise(Source::Sp);
        }
    }

    fn load_dp(&mut self, offset: u32) -> u32 {
        match offset {
            0x00 => self.dp.start,
            0x04 => self.dp.end,
            0x08 => self.dp.current,
            0x0C => self.dp.flags | ((self.dp.start_pending as u32) << 10) | (1 << 7),
            _ => 0,
        }
    }

    fn store_dp(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => {
                if !self.dp.start_pending {
                    self.dp.start = value & 0x00FF_FFF8;
                    self.dp.start_pending = true;
                }
            }
            0x04 => {
                self.dp.end = value & 0x00FF_FFF8;
                if self.dp.start_pending {
                    self.dp.current = self.dp.start;
                    self.dp.start_pending = false;
                }

                let (from, to) = (self.dp.current, self.dp.end);
                raster::run(self, from, to);
                self.dp.current = to;
            }
            0x0C => {
                let mut flags = self.dp.flags;
                for bit in 0..3 {
                    if value & (1 << (2 * bit)) != 0 {
                        flags &= !(1 << bit);
                    }
                    if value & (1 << (2 * bit + 1)) != 0 {
                        flags |= 1 << bit;
                    }
                }
                self.dp.flags = flags;
            }
            _ => (),
        }
    }

    fn load_ai(&mut self, offset: u32) -> u32 {
        match offset {
            0x04 => self.ai.fifo.front().map_or(0, |p| p.len),
            0x0C => {
                let full = (self.ai.fifo.len() >= 2) as u32;
                let busy = !self.ai.fifo.is_empty() as u32;
                let enabled = (self.ai.control & 1) as u32;
                (full << 31) | (busy << 30) | (enabled << 25) | full
            }
            _ => 0,
        }
    }

    fn store_ai(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => self.ai.dram = value & 0x00FF_FFF8,
            0x04 => {
                if self.ai.fifo.len() < 2 {
                    self.ai.fifo.push_back(Playback {
                        len: value & 0x3_FFF8,
                        ends: None,
                    });

                    if self.ai.fifo.len() == 1 && self.ai.start_front(Instant::now()) {
                        self.raise(Source::Ai);
                    }
                }
            }
            0x08 => self.ai.control = value & 1,
            0x0C => self.lower(Source::Ai),
            0x10 => self.ai.dacrate = value & 0x3FFF,
            0x14 => self.ai.bitrate = value & 0xF,
            _ => (),
        }
    }

    /// Advances the free-running devices.
    pub fn tick(&mut self) {
        let now = Instant::now();

        if self.vi.enabled() {
            let due = self
                .vi
                .last_vblank
                .is_none_or(|last| now - last >= Duration::from_micros(16_683));
            if due {
                self.vi.last_vblank = Some(now);
                self.vi.frames += 1;
                self.raise(Source::Vi);
            }
        }

        let finished = self
            .ai
            .fifo
            .front()
            .and_then(|p| p.ends)
            .is_some_and(|ends| now >= ends);
        if finished {
            self.ai.fifo.pop_front();
            if self.ai.start_front(now) {
                self.raise(Source::Ai);
            }
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
