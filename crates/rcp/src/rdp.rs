//! Display processor (RDP): the rasteriser, fed 64-bit commands out of RDRAM.
//!
//! A [`DisplayList`] streams commands into one of two buffers while the RDP drains the other,
//! skipping state changes that wouldn't change anything.
pub mod combiner;
pub mod command;

#[cfg(test)]
mod test;

use std::sync::{Arc, Once};
use std::time::Duration;

use bitos::bitos;

use crate::cpu::{Buffer, Pinner};
use crate::interrupt::{self, CriticalSection, ModeWrite, Source};
use crate::mmio::{Reg, reg_value};
use crate::sync::Note;
use crate::texture::{Color, Depth, Format, Texture};

pub use combiner::{BlendMode, CombineMode, CombinePass, Equation, Input};
pub use command::{
    Command, CycleType, FixedRect, Interlace, Key, Opcode, OtherModes, SyncKind, Tile,
};

pub const BASE: u32 = 0x0410_0000;

/// Words in each of the two command buffers.
pub const BUFFER_WORDS: usize = 0x400;

const TIMEOUT: Duration = Duration::from_secs(1);
const STALL_RETRIES: u32 = 1 << 22;

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Status {
    /// Commands are fetched from DMEM instead of RDRAM.
    #[bits(0)]
    pub xbus: bool,
    #[bits(1)]
    pub freeze: bool,
    #[bits(2)]
    pub flush: bool,
    #[bits(3)]
    pub start_gclk: bool,
    #[bits(4)]
    pub tmem_busy: bool,
    #[bits(5)]
    pub pipe_busy: bool,
    #[bits(6)]
    pub busy: bool,
    #[bits(7)]
    pub ready: bool,
    #[bits(8)]
    pub dma_busy: bool,
    #[bits(9)]
    pub end_pending: bool,
    /// A start address was written and not yet picked up.
    #[bits(10)]
    pub start_pending: bool,
}

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusWrite {
    #[bits(0)]
    pub clear_xbus: bool,
    #[bits(1)]
    pub set_xbus: bool,
    #[bits(2)]
    pub clear_freeze: bool,
    #[bits(3)]
    pub set_freeze: bool,
    #[bits(4)]
    pub clear_flush: bool,
    #[bits(5)]
    pub set_flush: bool,
    #[bits(6)]
    pub clear_tmem_counter: bool,
    #[bits(7)]
    pub clear_pipe_counter: bool,
    #[bits(8)]
    pub clear_command_counter: bool,
    #[bits(9)]
    pub clear_clock_counter: bool,
}

reg_value!(Status, StatusWrite);

pub mod regs {
    use vr4300::PhysAddr;

    use super::*;

    /// Start of the commands to run. Latched until the commands up to the current end are done.
    pub const START: Reg<PhysAddr> = Reg::at(BASE);
    /// End of the commands to run. Writing it starts fetching.
    pub const END: Reg<PhysAddr> = Reg::at(BASE + 0x04);
    pub const CURRENT: Reg<PhysAddr> = Reg::at(BASE + 0x08);
    pub const STATUS: Reg<Status> = Reg::at(BASE + 0x0C);
    pub const STATUS_WRITE: Reg<StatusWrite> = Reg::at(BASE + 0x0C);
    pub const CLOCK: Reg = Reg::at(BASE + 0x10);
    pub const COMMAND_BUSY: Reg = Reg::at(BASE + 0x14);
    pub const PIPE_BUSY: Reg = Reg::at(BASE + 0x18);
    pub const TMEM_BUSY: Reg = Reg::at(BASE + 0x1C);
}

static FULL_SYNC: Note = Note::new();
static INIT: Once = Once::new();

fn handler(cs: &CriticalSection) {
    interrupt::regs::MODE_WRITE.store(ModeWrite::default().with_clear_dp(true));
    tracing::trace!("rdp: full sync");
    FULL_SYNC.signal(cs);
}

/// Installs the DP interrupt handler. Called on first use.
pub fn init() {
    INIT.call_once(|| {
        regs::STATUS_WRITE.store(
            StatusWrite::default()
                .with_clear_xbus(true)
                .with_clear_freeze(true)
                .with_clear_flush(true),
        );

        interrupt::set_handler(Source::Dp, handler);
        interrupt::enable(Source::Dp);
    });
}

pub fn status() -> Status {
    regs::STATUS.load()
}

/// Spins until the RDP picked up the last start address written.
fn wait_start_idle() {
    for _ in 0..STALL_RETRIES {
        if !status().start_pending() {
            return;
        }

        std::hint::spin_loop();
    }

    panic!("rdp stall");
}

/// A rectangle in pixels. The maximum is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub const fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// The rectangle at the origin with the size of `texture`.
    pub fn of(texture: &Texture) -> Self {
        Self::new(0, 0, texture.width(), texture.height())
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// In 10.2 fixed point, with the maximum included if `inclusive`.
    fn fixed(&self, inclusive: bool) -> FixedRect {
        let end = |v: u32| if inclusive { v.saturating_sub(1) } else { v };
        FixedRect::from_pixels(self.x0, self.y0, end(self.x1), end(self.y1))
    }
}

/// The colour image, as last set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorImage {
    addr: vr4300::PhysAddr,
    format: Format,
    width: u32,
}

/// Last value written by every state command, to skip the ones that change nothing.
#[derive(Debug, Default)]
struct Shadow {
    other_modes: Option<OtherModes>,
    combine: Option<CombineMode>,
    fill: Option<u32>,
    fog: Option<Color>,
    blend: Option<Color>,
    primitive: Option<(Color, u8, u8)>,
    environment: Option<Color>,
    /// As requested, the maximum excluded.
    scissor: Option<(Rect, Interlace)>,
    /// As written, which depends on the cycle type.
    real_scissor: Option<Command>,
    color_image: Option<ColorImage>,
}

impl Shadow {
    fn cycle_type(&self) -> CycleType {
        self.other_modes.map_or(CycleType::One, |modes| modes.cycle_type())
    }
}

/// A stream of commands for the RDP.
///
/// Commands are appended to one of two buffers. When it's full the RDP is handed what was
/// written and the other buffer takes over, once the RDP is done with it. Nothing is handed
/// over before that or before [`DisplayList::flush`].
pub struct DisplayList {
    buffers: [Buffer<u64>; 2],
    index: usize,
    len: usize,
    /// Whether the RDP was given the start of the current buffer.
    started: bool,
    /// Whether primitives were drawn since the last pipe sync.
    drawn: bool,
    shadow: Shadow,
    pins: Pinner,
}

impl DisplayList {
    pub fn new() -> Self {
        init();
        Self {
            buffers: [Buffer::new(BUFFER_WORDS), Buffer::new(BUFFER_WORDS)],
            index: 0,
            len: 0,
            started: false,
            drawn: false,
            shadow: Shadow::default(),
            pins: Pinner::new(),
        }
    }

    /// Number of words written to the current buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Words written to the current buffer.
    pub fn words(&mut self) -> Vec<u64> {
        let len = self.len;
        let buffer = self.buffers[self.index].uncached();
        (0..len).map(|i| buffer.read(i)).collect()
    }

    /// Appends `command` as is.
    pub fn push(&mut self, command: Command) {
        let words = command.encode();
        let words = &words[..command.len()];
        if self.len + words.len() > BUFFER_WORDS {
            self.wrap();
        }

        let mut buffer = self.buffers[self.index].uncached();
        for (i, &word) in words.iter().enumerate() {
            buffer.write(self.len + i, word);
        }
        self.len += words.len();
    }

    /// Hands the RDP everything written to the current buffer so far.
    fn publish(&mut self) {
        let base = self.buffers[self.index].physical();
        if !self.started {
            wait_start_idle();
            regs::START.store(base);
            self.started = true;
        }

        let end = base + (self.len * 8) as u32;
        tracing::trace!("rdp: end {end}");
        regs::END.store(end);
    }

    fn wrap(&mut self) {
        self.publish();
        self.index ^= 1;
        self.len = 0;

        // once the start of the buffer just published is picked up, the other one is drained
        wait_start_idle();
        let base = self.buffers[self.index].physical();
        regs::START.store(base);
        regs::END.store(base);
        self.started = true;

        tracing::debug!("rdp: switched to buffer {}", self.index);
    }

    /// Emits a pipe sync if primitives were drawn with the modes about to change.
    fn sync_modes(&mut self) {
        if self.drawn {
            self.push(Command::Sync(SyncKind::Pipe));
            self.drawn = false;
        }
    }

    pub fn sync_full(&mut self) {
        self.push(Command::Sync(SyncKind::Full));
        self.drawn = false;
    }

    pub fn sync_pipe(&mut self) {
        self.push(Command::Sync(SyncKind::Pipe));
        self.drawn = false;
    }

    pub fn sync_load(&mut self) {
        self.push(Command::Sync(SyncKind::Load));
    }

    pub fn sync_tile(&mut self) {
        self.push(Command::Sync(SyncKind::Tile));
    }

    /// Waits for the RDP to finish every command and releases every pin.
    ///
    /// # Panics
    /// Panics if the RDP doesn't finish within a second.
    pub fn flush(&mut self) {
        FULL_SYNC.clear();
        self.sync_full();
        self.publish();

        if !FULL_SYNC.wait(TIMEOUT) {
            panic!("rdp: full sync timeout");
        }

        // the next frame likely draws to another frame buffer
        self.shadow.color_image = None;
        self.pins.unpin();

        // the rdp is idle, start over
        self.len = 0;
        self.started = false;
        tracing::trace!("rdp: flushed");
    }

    /// Sets the frame buffer to draw to.
    ///
    /// # Panics
    /// Panics if the format can't be drawn to.
    pub fn set_color_image(&mut self, image: &Arc<Texture>) {
        let format = image.format();
        assert!(
            matches!(format, Format::Rgba32 | Format::Rgba16 | Format::I8 | Format::Ci8),
            "rdp: can't draw to {format:?}"
        );
        assert!(
            image.addr().is_aligned(64),
            "rdp: color image at {} isn't aligned",
            image.addr()
        );

        self.pins.pin(image);
        let current = ColorImage {
            addr: image.addr(),
            format,
            width: image.stride(),
        };
        if self.shadow.color_image == Some(current) {
            return;
        }

        self.sync_modes();
        self.shadow.color_image = Some(current);
        self.push(Command::SetColorImage {
            format,
            width: current.width,
            addr: current.addr,
        });
    }

    /// Sets the depth buffer, a 16 bit image as wide as the frame buffer.
    pub fn set_depth_image(&mut self, image: &Arc<Texture>) {
        assert_eq!(image.format().depth(), Depth::Bpp16, "rdp: depth image must be 16 bits");
        self.pins.pin(image);
        self.sync_modes();
        self.push(Command::SetDepthImage { addr: image.addr() });
    }

    /// Sets the image later loads read from.
    pub fn set_texture_image(&mut self, image: &Arc<Texture>) {
        image.writeback();
        self.pins.pin(image);
        self.push(Command::SetTextureImage {
            format: image.format(),
            width: image.stride(),
            addr: image.addr(),
        });
    }

    pub fn set_tile(&mut self, tile: Tile) {
        self.push(Command::SetTile(tile));
    }

    /// Sets the texel area `rect` of `tile`.
    pub fn set_tile_size(&mut self, tile: u8, rect: Rect) {
        self.push(Command::SetTileSize {
            tile,
            rect: rect.fixed(true),
        });
    }

    /// Loads the texels in `rect` of the texture image into TMEM through `tile`.
    pub fn load_tile(&mut self, tile: u8, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        self.push(Command::LoadTile {
            tile,
            rect: rect.fixed(true),
        });
    }

    /// Loads `texels` texels starting at (`s`, `t`) into TMEM through `tile`, for a texture
    /// `width` texels wide.
    pub fn load_block(&mut self, tile: u8, format: Format, s: u16, t: u16, texels: u16, width: u32) {
        // number of 8 byte words per row, as 1.11 reciprocal
        let words = format.tmem_words(width as usize).max(1);
        let dxt = (0x800 + words - 1) / words;
        self.push(Command::LoadBlock {
            tile,
            s,
            t,
            texels,
            dxt: dxt as u16,
        });
    }

    /// Loads the palette of `texture` into the upper half of TMEM.
    ///
    /// # Panics
    /// Panics if `texture` has no palette.
    pub fn load_palette(&mut self, tile: u8, texture: &Texture) {
        let Some(palette) = texture.palette() else {
            panic!("rdp: {texture:?} has no palette");
        };

        let entries = palette.width() * palette.height();
        self.set_texture_image(palette);
        self.set_tile(Tile::new(tile, Format::Rgba16, 0x100, 0));
        self.push(Command::LoadTlut {
            tile,
            first: 0,
            last: (entries.clamp(1, 256) - 1) as u8,
        });
    }

    /// Sets the other modes, rewriting the scissor if the cycle type changes how its bounds are
    /// read.
    ///
    /// # Panics
    /// Panics if the cycle type can't draw to the colour image.
    pub fn set_other_modes(&mut self, modes: OtherModes) {
        if let Some(image) = self.shadow.color_image {
            let depth = image.format.depth();
            match modes.cycle_type() {
                CycleType::Copy => {
                    assert_ne!(depth, Depth::Bpp32, "rdp: copy mode can't draw 32 bit images")
                }
                CycleType::Fill => {
                    assert_ne!(depth, Depth::Bpp4, "rdp: fill mode can't draw 4 bit images")
                }
                _ => (),
            }
        }

        if self.shadow.other_modes == Some(modes) {
            return;
        }

        self.sync_modes();
        let inclusive = self.shadow.cycle_type().inclusive();
        self.shadow.other_modes = Some(modes);
        self.push(Command::SetOtherModes(modes));

        if inclusive != modes.cycle_type().inclusive()
            && let Some((rect, interlace)) = self.shadow.scissor
        {
            self.write_scissor(rect, interlace);
        }
    }

    /// The other modes as last set.
    pub fn other_modes(&self) -> OtherModes {
        self.shadow.other_modes.unwrap_or_default()
    }

    /// Changes the cycle type, keeping every other mode.
    pub fn set_cycle_type(&mut self, cycle: CycleType) {
        self.set_other_modes(self.other_modes().with_cycle_type(cycle));
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) {
        self.set_other_modes(self.other_modes().with_blend(blend));
    }

    pub fn set_combine_mode(&mut self, mode: CombineMode) {
        if self.shadow.combine == Some(mode) {
            return;
        }

        self.sync_modes();
        self.shadow.combine = Some(mode);
        self.push(Command::SetCombineMode(mode));
    }

    /// Limits drawing to `rect`, and to every other line if `interlace` says so.
    pub fn set_scissor(&mut self, rect: Rect, interlace: Interlace) {
        self.shadow.scissor = Some((rect, interlace));
        self.write_scissor(rect, interlace);
    }

    fn write_scissor(&mut self, rect: Rect, interlace: Interlace) {
        let command = Command::SetScissor {
            rect: rect.fixed(self.shadow.cycle_type().inclusive()),
            interlace,
        };
        if self.shadow.real_scissor == Some(command) {
            return;
        }

        self.sync_modes();
        self.shadow.real_scissor = Some(command);
        self.push(command);
    }

    /// Sets the fill colour, packed for the current colour image.
    pub fn set_fill_color(&mut self, color: Color) {
        let depth = self.shadow.color_image.map_or(Depth::Bpp32, |image| image.format.depth());
        let value = match depth {
            Depth::Bpp32 => color.to_rgba32(),
            Depth::Bpp16 => {
                let pixel = u32::from(color.to_rgba16());
                (pixel << 16) | pixel
            }
            _ => u32::from(color.intensity()) * 0x0101_0101,
        };

        if self.shadow.fill == Some(value) {
            return;
        }

        self.sync_modes();
        self.shadow.fill = Some(value);
        self.push(Command::SetFillColor(value));
    }

    pub fn set_fog_color(&mut self, color: Color) {
        if self.shadow.fog == Some(color) {
            return;
        }

        self.sync_modes();
        self.shadow.fog = Some(color);
        self.push(Command::SetFogColor(color));
    }

    pub fn set_blend_color(&mut self, color: Color) {
        if self.shadow.blend == Some(color) {
            return;
        }

        self.sync_modes();
        self.shadow.blend = Some(color);
        self.push(Command::SetBlendColor(color));
    }

    /// Sets the primitive colour. It doesn't need a pipe sync.
    pub fn set_primitive_color(&mut self, color: Color) {
        self.set_primitive_color_lod(color, 0, 0);
    }

    pub fn set_primitive_color_lod(&mut self, color: Color, min_lod: u8, lod_fraction: u8) {
        let value = (color, min_lod, lod_fraction);
        if self.shadow.primitive == Some(value) {
            return;
        }

        self.shadow.primitive = Some(value);
        self.push(Command::SetPrimitiveColor {
            color,
            min_lod,
            lod_fraction,
        });
    }

    pub fn set_environment_color(&mut self, color: Color) {
        if self.shadow.environment == Some(color) {
            return;
        }

        self.sync_modes();
        self.shadow.environment = Some(color);
        self.push(Command::SetEnvironmentColor(color));
    }

    pub fn set_prim_depth(&mut self, z: u16, dz: u16) {
        self.push(Command::SetPrimDepth { z, dz });
    }

    pub fn set_key_r(&mut self, red: Key) {
        self.sync_modes();
        self.push(Command::SetKeyR(red));
    }

    pub fn set_key_gb(&mut self, green: Key, blue: Key) {
        self.sync_modes();
        self.push(Command::SetKeyGb { green, blue });
    }

    pub fn set_convert(&mut self, coefficients: [i16; 6]) {
        self.sync_modes();
        self.push(Command::SetConvert(coefficients));
    }

    /// Fills `rect` with the fill colour or the blender output, depending on the cycle type. An
    /// empty rectangle draws nothing.
    pub fn fill_rectangle(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        let inclusive = self.shadow.cycle_type().inclusive();
        self.push(Command::FillRectangle(rect.fixed(inclusive)));
        self.drawn = true;
    }

    /// Fills `rect` with `color` in fill mode.
    pub fn fill(&mut self, rect: Rect, color: Color) {
        self.set_cycle_type(CycleType::Fill);
        self.set_fill_color(color);
        self.fill_rectangle(rect);
    }

    /// Draws `rect` textured through `tile`, starting at texel (`s`, `t`) and stepping by
    /// `1 / scale` texels per pixel.
    pub fn texture_rectangle(&mut self, rect: Rect, tile: u8, s: f32, t: f32, scale: (f32, f32)) {
        if rect.is_empty() {
            return;
        }

        let cycle = self.shadow.cycle_type();
        // copy mode writes four pixels per step
        let copy = if cycle == CycleType::Copy { 4.0 } else { 1.0 };
        self.push(Command::TextureRectangle {
            rect: rect.fixed(cycle.inclusive()),
            tile,
            s: (s * 32.0) as i16,
            t: (t * 32.0) as i16,
            dsdx: (copy * 1024.0 / scale.0) as i16,
            dtdy: (1024.0 / scale.1) as i16,
        });
        self.drawn = true;
    }

    /// Copies `texture` to (`x`, `y`) of the colour image, a block of rows at a time.
    ///
    /// The texture must be 16 bits or less per pixel and rows at most 256 texels.
    pub fn blit(&mut self, texture: &Arc<Texture>, x: u32, y: u32) {
        let format = texture.format();
        assert!(format.depth() != Depth::Bpp32, "rdp: can't blit {format:?}");
        assert!(texture.width() <= 256, "rdp: blit of {} texels wide", texture.width());
        if texture.width() == 0 || texture.height() == 0 {
            return;
        }

        self.set_cycle_type(CycleType::Copy);
        if format.is_indexed() {
            self.load_palette(7, texture);
            self.set_other_modes(self.other_modes().with_tlut(true));
        }

        self.set_texture_image(texture);
        let line = format.tmem_words(texture.stride() as usize).max(1);
        // half of tmem holds the palette
        let tmem = if format.is_indexed() { 256 } else { 512 };
        let rows = (tmem / line).clamp(1, texture.height() as usize) as u32;

        let mut row = 0;
        while row < texture.height() {
            let height = rows.min(texture.height() - row);
            let area = Rect::new(0, row, texture.width(), row + height);

            self.sync_load();
            self.set_tile(Tile::new(0, format, 0, texture.stride()));
            self.load_tile(0, area);
            self.set_tile_size(0, area);
            self.texture_rectangle(
                Rect::new(x, y + row, x + texture.width(), y + row + height),
                0,
                0.0,
                row as f32,
                (1.0, 1.0),
            );
            row += height;
        }
    }
}

impl Default for DisplayList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisplayList {
    fn drop(&mut self) {
        let pending = self.len > 0 || !self.pins.is_empty();
        if pending && !std::thread::panicking() {
            self.flush();
        }
    }
}

/// Runs `dl` to completion.
pub fn run(dl: &mut DisplayList) {
    dl.flush();
}
