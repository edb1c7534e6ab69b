//! Video interface (VI): scans a frame buffer out of RDRAM as an NTSC, PAL or M-PAL signal.
//!
//! Reconfiguration that would tear the picture is deferred to the vertical blank, where the
//! interrupt handler picks up the latest frame buffer and output area.
#[cfg(test)]
mod test;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;

use bitos::bitos;
use bitos::integer::{u10, u12};
use vr4300::PhysAddr;

use crate::interrupt::{self, CriticalSection, Source};
use crate::mmio::{Reg, reg_value};
use crate::rdp::Rect;
use crate::sync::{IntrInput, Note};
use crate::texture::{ALIGN_FRAMEBUFFER, Format, Texture};

pub const BASE: u32 = 0x0440_0000;

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorDepth {
    #[default]
    Blank = 0,
    Reserved = 1,
    Bpp16 = 2,
    Bpp32 = 3,
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AntiAlias {
    /// Antialiasing and resampling, fetching extra lines every time.
    #[default]
    FetchAlways = 0,
    /// Antialiasing and resampling, fetching extra lines only when needed.
    Enabled = 1,
    Resample = 2,
    /// Neither, pixels are replicated.
    Off = 3,
}

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Control {
    #[bits(0..2)]
    pub depth: ColorDepth,
    #[bits(2)]
    pub gamma_dither: bool,
    #[bits(3)]
    pub gamma: bool,
    #[bits(4)]
    pub divot: bool,
    /// Serrated vertical sync, for interlaced output.
    #[bits(6)]
    pub serrate: bool,
    #[bits(8..10)]
    pub antialias: AntiAlias,
    #[bits(16)]
    pub dedither: bool,
}

/// Start and end of the active area, horizontally in pixels or vertically in half lines.
#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Span {
    #[bits(0..10)]
    pub end: u10,
    #[bits(16..26)]
    pub start: u10,
}

/// Frame buffer pixels per output pixel in 2.10 fixed point, plus a subpixel offset.
#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Scale {
    #[bits(0..12)]
    pub factor: u12,
    #[bits(16..28)]
    pub offset: u12,
}

reg_value!(Control, Span, Scale);

pub mod regs {
    use super::*;

    pub const CONTROL: Reg<Control> = Reg::at(BASE);
    pub const ORIGIN: Reg<PhysAddr> = Reg::at(BASE + 0x04);
    /// Frame buffer stride in pixels.
    pub const WIDTH: Reg = Reg::at(BASE + 0x08);
    /// Half line to raise the interrupt at.
    pub const V_INTR: Reg = Reg::at(BASE + 0x0C);
    /// Half line being output. Writing it acknowledges the interrupt.
    pub const V_CURRENT: Reg = Reg::at(BASE + 0x10);
    pub const BURST: Reg = Reg::at(BASE + 0x14);
    /// Half lines per field.
    pub const V_SYNC: Reg = Reg::at(BASE + 0x18);
    pub const H_SYNC: Reg = Reg::at(BASE + 0x1C);
    pub const H_SYNC_LEAP: Reg = Reg::at(BASE + 0x20);
    pub const H_VIDEO: Reg<Span> = Reg::at(BASE + 0x24);
    pub const V_VIDEO: Reg<Span> = Reg::at(BASE + 0x28);
    pub const V_BURST: Reg = Reg::at(BASE + 0x2C);
    pub const X_SCALE: Reg<Scale> = Reg::at(BASE + 0x30);
    pub const Y_SCALE: Reg<Scale> = Reg::at(BASE + 0x34);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Standard {
    #[default]
    Ntsc,
    Pal,
    /// The Brazilian PAL variant, with NTSC timing.
    Mpal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub standard: Standard,
    pub interlace: bool,
    /// Outputs PAL at 60 Hz, with the NTSC line count. The pixel aspect ratio stays the same,
    /// leaving black borders at the top and bottom.
    pub pal60: bool,
}

struct Timing {
    lines: u32,
    h_sync: u32,
    h_sync_leap: u32,
    v_burst: u32,
    burst: u32,
    /// Largest output area.
    limits: Rect,
}

const NTSC_LIMITS: Rect = Rect::new(108, 35, 748, 515);
const PAL_LIMITS: Rect = Rect::new(128, 45, 768, 621);

impl Timing {
    fn of(config: Config) -> Self {
        match config.standard {
            Standard::Ntsc => Self {
                lines: 525,
                h_sync: 3093,
                h_sync_leap: (3093 << 16) | 3093,
                v_burst: (14 << 16) | 516,
                burst: (62 << 20) | (5 << 16) | (34 << 8) | 57,
                limits: NTSC_LIMITS,
            },
            Standard::Pal => {
                let mut timing = Self {
                    lines: 625,
                    h_sync: (0b10101 << 16) | 3177,
                    h_sync_leap: (3183 << 16) | 3182,
                    v_burst: (9 << 16) | 619,
                    burst: (64 << 20) | (4 << 16) | (35 << 8) | 58,
                    limits: PAL_LIMITS,
                };

                if config.pal60 {
                    timing.lines = 525;
                    timing.limits.y0 = NTSC_LIMITS.y0;
                    timing.limits.y1 = NTSC_LIMITS.y1;
                }

                timing
            }
            Standard::Mpal => Self {
                lines: 525,
                h_sync: (0b00100 << 16) | 3089,
                h_sync_leap: (3097 << 16) | 3098,
                v_burst: (14 << 16) | 516,
                burst: (70 << 20) | (5 << 16) | (30 << 8) | 57,
                limits: NTSC_LIMITS,
            },
        }
    }
}

struct State {
    config: Config,
    limits: Rect,
}

static STATE: Mutex<State> = Mutex::new(State {
    config: Config {
        standard: Standard::Ntsc,
        interlace: false,
        pal60: false,
    },
    limits: NTSC_LIMITS,
});

static FRAMEBUFFER: IntrInput<Option<Arc<Texture>>> = IntrInput::new();
static AREA: IntrInput<Rect> = IntrInput::new();
static INTERLACED: AtomicBool = AtomicBool::new(false);
static VSYNC: AtomicBool = AtomicBool::new(true);
static FRAMES: AtomicU64 = AtomicU64::new(0);
static VBLANK: Note = Note::new();
static INIT: Once = Once::new();

const TIMEOUT: Duration = Duration::from_millis(100);

/// Address to scan out of for the current field. Odd fields start a line lower.
fn origin(fb: &Texture, odd: bool) -> PhysAddr {
    let row = fb.format().bytes(fb.stride() as usize) as u32;
    if odd { fb.addr() + row } else { fb.addr() }
}

fn handler(cs: &CriticalSection) {
    let line = regs::V_CURRENT.load();
    regs::V_CURRENT.store(line);

    let (area, updated) = AREA.get(cs);
    if updated && let Some(area) = area {
        regs::H_VIDEO.store(
            Span::default()
                .with_start(u10::new(area.x0 as u16))
                .with_end(u10::new(area.x1 as u16)),
        );
        regs::V_VIDEO.store(
            Span::default()
                .with_start(u10::new(area.y0 as u16))
                .with_end(u10::new(area.y1 as u16)),
        );
    }

    if let (Some(Some(fb)), _) = FRAMEBUFFER.get(cs) {
        let odd = INTERLACED.load(Ordering::Relaxed) && line & 1 != 0;
        regs::ORIGIN.store(origin(&fb, odd));
    }

    FRAMES.fetch_add(1, Ordering::Relaxed);
    tracing::trace!("vi: vblank at line {line}");
    VBLANK.signal(cs);
}

fn init() {
    INIT.call_once(|| {
        interrupt::set_handler(Source::Vi, handler);
        interrupt::enable(Source::Vi);
    });
}

fn state() -> std::sync::MutexGuard<'static, State> {
    STATE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures the video signal. The frame buffer, if any, stays on screen.
pub fn setup(config: Config) {
    init();
    let fb = framebuffer();
    set_framebuffer(None);

    let timing = Timing::of(config);
    INTERLACED.store(config.interlace, Ordering::Relaxed);
    {
        let mut state = state();
        state.config = config;
        state.limits = timing.limits;
    }

    // interlaced fields are a half line shorter
    regs::V_SYNC.store(timing.lines - config.interlace as u32);
    regs::H_SYNC.store(timing.h_sync);
    regs::H_SYNC_LEAP.store(timing.h_sync_leap);
    regs::V_BURST.store(timing.v_burst);
    regs::BURST.store(timing.burst);

    set_scale(timing.limits);
    regs::V_INTR.store(2);
    tracing::debug!("vi: {config:?}");

    set_framebuffer(fb);
}

pub fn config() -> Config {
    state().config
}

/// Area of the screen covered by the output.
pub fn scale() -> Rect {
    AREA.read().unwrap_or(state().limits)
}

/// Sets the area of the screen covered by the output, from the next vertical blank on.
///
/// Areas beyond the screen are shrunk and then moved onto the screen. Areas too small for the
/// scaler are grown. Returns the area actually set.
pub fn set_scale(area: Rect) -> Rect {
    let limits = state().limits;
    let (mut x0, mut y0) = (i64::from(area.x0.min(area.x1)), i64::from(area.y0.min(area.y1)));
    let (mut x1, mut y1) = (i64::from(area.x0.max(area.x1)), i64::from(area.y0.max(area.y1)));

    let (width, height) = (i64::from(limits.width()), i64::from(limits.height()));
    x1 -= (x1 - x0 - width).max(0);
    y1 -= (y1 - y0 - height).max(0);

    // the scaler can't shrink much, this is a conservative guess
    let (min_width, min_height) = match framebuffer() {
        Some(fb) => (i64::from(fb.width()), i64::from(fb.height())),
        None => (width, height),
    };
    x1 += (min_width / 4 * 3 - (x1 - x0)).max(0);
    y1 += (min_height / 4 * 3 - (y1 - y0)).max(0);

    let (lx0, ly0) = (i64::from(limits.x0), i64::from(limits.y0));
    let (lx1, ly1) = (i64::from(limits.x1), i64::from(limits.y1));
    let dx = (lx0 - x0).max(0) + (lx1 - x1).min(0);
    let dy = (ly0 - y0).max(0) + (ly1 - y1).min(0);

    let area = Rect::new(
        (x0 + dx) as u32,
        (y0 + dy) as u32,
        (x1 + dx) as u32,
        (y1 + dy) as u32,
    );

    AREA.put(area);
    area
}

/// Whether [`set_framebuffer`] defers swaps to the vertical blank.
pub fn set_vsync(enabled: bool) {
    VSYNC.store(enabled, Ordering::Relaxed);
}

/// The frame buffer on screen, or about to be.
pub fn framebuffer() -> Option<Arc<Texture>> {
    FRAMEBUFFER.read().flatten()
}

/// Puts `fb` on screen, or blanks the screen for `None`.
///
/// Swapping for a frame buffer of the same size and depth takes effect at the next vertical
/// blank, so the previous one may still be read until then. Anything else reconfigures the
/// output right away.
///
/// # Panics
/// Panics if `fb` isn't RGBA16 or RGBA32.
pub fn set_framebuffer(fb: Option<Arc<Texture>>) {
    init();
    let Some(fb) = fb else {
        regs::CONTROL.store(Control::default());
        FRAMEBUFFER.put(None);
        return;
    };

    let depth = match fb.format() {
        Format::Rgba16 => ColorDepth::Bpp16,
        Format::Rgba32 => ColorDepth::Bpp32,
        format => panic!("video: unsupported framebuffer format {format:?}"),
    };
    assert!(
        fb.addr().is_aligned(ALIGN_FRAMEBUFFER as u32),
        "video: framebuffer at {} isn't aligned",
        fb.addr()
    );

    let reconfigure = framebuffer().is_none_or(|current| {
        current.format().depth() != fb.format().depth()
            || current.width() != fb.width()
            || current.height() != fb.height()
    });

    if !reconfigure {
        let addr = fb.addr();
        FRAMEBUFFER.put(Some(fb));
        if !VSYNC.load(Ordering::Relaxed) {
            regs::ORIGIN.store(addr);
        }
        return;
    }

    let interlaced = INTERLACED.load(Ordering::Relaxed);
    let control = Control::default()
        .with_depth(depth)
        .with_antialias(AntiAlias::Resample)
        .with_serrate(interlaced);

    regs::CONTROL.store(Control::default());
    let (width, height, stride, addr) = (fb.width(), fb.height(), fb.stride(), fb.addr());
    FRAMEBUFFER.put(Some(fb));

    let area = set_scale(scale());
    let (out_width, out_height) = (area.width().max(1), area.height().max(2));
    let x_scale = ((width << 10) + (out_width >> 1)) / out_width;
    let y_scale = ((height << 10) + (out_height >> 2)) / (out_height >> 1);
    regs::X_SCALE.store(Scale::default().with_factor(u12::new(x_scale.min(0xFFF) as u16)));
    regs::Y_SCALE.store(Scale::default().with_factor(u12::new(y_scale.min(0xFFF) as u16)));
    regs::WIDTH.store(stride);
    regs::ORIGIN.store(addr);
    regs::CONTROL.store(control);

    tracing::debug!("vi: {width}x{height} {depth:?} framebuffer");
}

/// Resolution output to the screen. Frame buffers of this size, or a divisor of it, are shown
/// without resampling. Without interlacing only every other line is output.
pub fn native_resolution() -> (u32, u32) {
    let area = scale();
    if INTERLACED.load(Ordering::Relaxed) {
        (area.width(), area.height())
    } else {
        (area.width(), area.height() >> 1)
    }
}

/// Number of vertical blanks so far.
pub fn frames() -> u64 {
    FRAMES.load(Ordering::Relaxed)
}

/// Waits for the next vertical blank. Returns false if there's none within 100 ms, such as when
/// the output is off.
pub fn wait_vblank() -> bool {
    VBLANK.clear();
    VBLANK.wait(TIMEOUT)
}
