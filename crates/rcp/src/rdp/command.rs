//! Encoding of RDP commands.
use bitos::bitos;
use bitos::integer::{u2, u3, u4, u9};
use strum::FromRepr;
use vr4300::PhysAddr;

use super::combiner::{BlendMode, CombineMode};
use crate::texture::{Color, Format};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    TextureRectangle = 0xE4,
    TextureRectangleFlip = 0xE5,
    SyncLoad = 0xE6,
    SyncPipe = 0xE7,
    SyncTile = 0xE8,
    SyncFull = 0xE9,
    SetKeyGb = 0xEA,
    SetKeyR = 0xEB,
    SetConvert = 0xEC,
    SetScissor = 0xED,
    SetPrimDepth = 0xEE,
    SetOtherModes = 0xEF,
    LoadTlut = 0xF0,
    SetTileSize = 0xF2,
    LoadBlock = 0xF3,
    LoadTile = 0xF4,
    SetTile = 0xF5,
    FillRectangle = 0xF6,
    SetFillColor = 0xF7,
    SetFogColor = 0xF8,
    SetBlendColor = 0xF9,
    SetPrimitiveColor = 0xFA,
    SetEnvironmentColor = 0xFB,
    SetCombineMode = 0xFC,
    SetTextureImage = 0xFD,
    SetDepthImage = 0xFE,
    SetColorImage = 0xFF,
}

impl Opcode {
    /// The opcode of a command word.
    pub fn of(word: u64) -> Option<Self> {
        Self::from_repr((word >> 56) as u8)
    }

    fn word(self, fields: u64) -> u64 {
        debug_assert_eq!(fields >> 56, 0);
        ((self as u64) << 56) | fields
    }
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    /// One pixel per cycle.
    #[default]
    One = 0,
    /// One pixel every two cycles, for two combiner and blender passes.
    Two = 1,
    /// Copies texels straight to the frame buffer, four pixels per cycle.
    Copy = 2,
    /// Fills with the fill colour, four 16 bit pixels per cycle.
    Fill = 3,
}

impl CycleType {
    /// Whether rectangle bounds are inclusive in this mode.
    pub fn inclusive(self) -> bool {
        matches!(self, Self::Copy | Self::Fill)
    }
}

/// Rendering modes that aren't covered by any other command.
#[bitos(64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OtherModes {
    #[bits(0)]
    pub alpha_compare: bool,
    #[bits(1)]
    pub dither_alpha: bool,
    /// Take depth from the primitive depth instead of per pixel.
    #[bits(2)]
    pub z_source_primitive: bool,
    #[bits(3)]
    pub antialias: bool,
    #[bits(4)]
    pub z_compare: bool,
    #[bits(5)]
    pub z_update: bool,
    /// Read the frame buffer, for blending against memory.
    #[bits(6)]
    pub image_read: bool,
    #[bits(7)]
    pub color_on_coverage: bool,
    #[bits(8..10)]
    pub coverage_dest: u2,
    #[bits(10..12)]
    pub z_mode: u2,
    #[bits(12)]
    pub coverage_times_alpha: bool,
    #[bits(13)]
    pub alpha_coverage_select: bool,
    #[bits(14)]
    pub force_blend: bool,
    #[bits(16..32)]
    pub blend: BlendMode,
    #[bits(36..38)]
    pub alpha_dither: u2,
    #[bits(38..40)]
    pub rgb_dither: u2,
    #[bits(40)]
    pub chroma_key: bool,
    #[bits(41)]
    pub convert_one: bool,
    #[bits(42)]
    pub bilerp1: bool,
    #[bits(43)]
    pub bilerp0: bool,
    #[bits(44)]
    pub mid_texel: bool,
    #[bits(45)]
    pub sample_bilinear: bool,
    /// Palette entries are IA16 instead of RGBA16.
    #[bits(46)]
    pub tlut_ia16: bool,
    #[bits(47)]
    pub tlut: bool,
    #[bits(48)]
    pub texture_lod: bool,
    #[bits(49)]
    pub sharpen: bool,
    #[bits(50)]
    pub detail: bool,
    #[bits(51)]
    pub perspective: bool,
    #[bits(52..54)]
    pub cycle_type: CycleType,
    #[bits(55)]
    pub atomic: bool,
}

impl OtherModes {
    /// Fill mode, for clearing with the fill colour.
    pub fn fill() -> Self {
        Self::default().with_cycle_type(CycleType::Fill)
    }

    /// Copy mode, for blitting textures without any filtering.
    pub fn copy() -> Self {
        Self::default().with_cycle_type(CycleType::Copy)
    }

    /// One cycle mode, for textured and shaded primitives.
    pub fn standard() -> Self {
        Self::default()
            .with_cycle_type(CycleType::One)
            .with_bilerp0(true)
            .with_bilerp1(true)
    }
}

/// Configuration of one of the eight tile descriptors: how a region of TMEM is sampled.
#[bitos(64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tile {
    #[bits(0..4)]
    pub shift_s: u4,
    /// Wraps at `1 << mask_s` texels, zero for no wrapping.
    #[bits(4..8)]
    pub mask_s: u4,
    #[bits(8)]
    pub mirror_s: bool,
    #[bits(9)]
    pub clamp_s: bool,
    #[bits(10..14)]
    pub shift_t: u4,
    #[bits(14..18)]
    pub mask_t: u4,
    #[bits(18)]
    pub mirror_t: bool,
    #[bits(19)]
    pub clamp_t: bool,
    /// Palette for 4 bit indexed textures.
    #[bits(20..24)]
    pub palette: u4,
    #[bits(24..27)]
    pub index: u3,
    /// TMEM address, in 8 byte words.
    #[bits(32..41)]
    pub tmem_addr: u9,
    /// Length of a row in TMEM, in 8 byte words.
    #[bits(41..50)]
    pub line: u9,
    #[bits(51..53)]
    pub depth: u2,
    #[bits(53..56)]
    pub components: u3,
}

impl Tile {
    /// A tile of `format` at `tmem_addr` with rows `width` texels long.
    pub fn new(index: u8, format: Format, tmem_addr: u16, width: u32) -> Self {
        Self::default()
            .with_index(u3::new(index))
            .with_components(u3::new(format.components() as u8))
            .with_depth(u2::new(format.depth() as u8))
            .with_tmem_addr(u9::new(tmem_addr))
            .with_line(u9::new(format.tmem_words(width as usize) as u16))
    }
}

/// Which fields of the frame buffer are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interlace {
    #[default]
    None,
    /// Only odd lines.
    Odd,
    /// Only even lines.
    Even,
}

impl Interlace {
    fn bits(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Odd => 2,
            Self::Even => 3,
        }
    }
}

/// Screen or texture coordinates in 10.2 fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedRect {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
}

impl FixedRect {
    /// Largest coordinate the 12 bit fields hold.
    pub const MAX: u32 = 0xFFF;

    /// Converts whole pixels, clamping to the largest coordinate.
    pub fn from_pixels(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let fixed = |v: u32| v.saturating_mul(4).min(Self::MAX) as u16;
        Self {
            x0: fixed(x0),
            y0: fixed(y0),
            x1: fixed(x1),
            y1: fixed(y1),
        }
    }

    /// Fields of a command with the first corner high and the second one low.
    fn fields(self) -> u64 {
        (u64::from(self.x0) << 44)
            | (u64::from(self.y0) << 32)
            | (u64::from(self.x1) << 12)
            | u64::from(self.y1)
    }

    fn swapped(self) -> Self {
        Self {
            x0: self.x1,
            y0: self.y1,
            x1: self.x0,
            y1: self.y0,
        }
    }
}

/// Parameters of one colour component of chroma keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Key {
    /// 4.8 fixed point.
    pub width: u16,
    pub center: u8,
    pub scale: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Waits for everything to finish and raises the DP interrupt.
    Full,
    /// Waits for the pipeline, before changing modes.
    Pipe,
    /// Waits for TMEM loads, before reusing TMEM.
    Load,
    /// Waits for tile reads, before changing a tile descriptor.
    Tile,
}

/// A command for the RDP, one or two words long.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Sync(SyncKind),
    SetColorImage {
        format: Format,
        width: u32,
        addr: PhysAddr,
    },
    SetTextureImage {
        format: Format,
        width: u32,
        addr: PhysAddr,
    },
    /// The depth buffer is always 16 bits per pixel, with the colour image's width.
    SetDepthImage {
        addr: PhysAddr,
    },
    SetTile(Tile),
    SetTileSize {
        tile: u8,
        rect: FixedRect,
    },
    /// Loads a rectangle of the texture image into TMEM. Bounds are inclusive.
    LoadTile {
        tile: u8,
        rect: FixedRect,
    },
    /// Loads `texels` consecutive texels, advancing a row every `1 / dxt` words.
    LoadBlock {
        tile: u8,
        s: u16,
        t: u16,
        texels: u16,
        dxt: u16,
    },
    /// Loads palette entries `first..=last` from the texture image.
    LoadTlut {
        tile: u8,
        first: u8,
        last: u8,
    },
    SetOtherModes(OtherModes),
    SetCombineMode(CombineMode),
    SetScissor {
        rect: FixedRect,
        interlace: Interlace,
    },
    /// The fill value, already packed for the colour image depth.
    SetFillColor(u32),
    SetFogColor(Color),
    SetBlendColor(Color),
    SetPrimitiveColor {
        color: Color,
        min_lod: u8,
        lod_fraction: u8,
    },
    SetEnvironmentColor(Color),
    SetPrimDepth {
        z: u16,
        dz: u16,
    },
    SetKeyR(Key),
    SetKeyGb {
        green: Key,
        blue: Key,
    },
    /// YUV to RGB conversion coefficients, 9 bit signed.
    SetConvert([i16; 6]),
    FillRectangle(FixedRect),
    TextureRectangle {
        rect: FixedRect,
        tile: u8,
        /// Texture coordinates of the top left corner, s10.5.
        s: i16,
        t: i16,
        /// Texture coordinate steps per pixel, s5.10.
        dsdx: i16,
        dtdy: i16,
    },
}

fn image(op: Opcode, format: Format, width: u32, addr: PhysAddr) -> u64 {
    assert!((1..=1024).contains(&width), "rdp: image width {width} out of range");
    op.word(
        ((format.components() as u64) << 53)
            | ((format.depth() as u64) << 51)
            | (u64::from(width - 1) << 32)
            | u64::from(addr.value() & 0x03FF_FFFF),
    )
}

fn key(key: Key, shift: u32) -> u64 {
    ((u64::from(key.center) << 8) | u64::from(key.scale)) << shift
}

impl Command {
    /// Number of words the command takes.
    pub fn len(&self) -> usize {
        match self {
            Self::TextureRectangle { .. } => 2,
            _ => 1,
        }
    }

    /// Encodes the command. The second word is only meaningful for two word commands.
    pub fn encode(self) -> [u64; 2] {
        let word = match self {
            Self::Sync(kind) => {
                let op = match kind {
                    SyncKind::Full => Opcode::SyncFull,
                    SyncKind::Pipe => Opcode::SyncPipe,
                    SyncKind::Load => Opcode::SyncLoad,
                    SyncKind::Tile => Opcode::SyncTile,
                };
                op.word(0)
            }
            Self::SetColorImage {
                format,
                width,
                addr,
            } => image(Opcode::SetColorImage, format, width, addr),
            Self::SetTextureImage {
                format,
                width,
                addr,
            } => image(Opcode::SetTextureImage, format, width, addr),
            Self::SetDepthImage { addr } => {
                Opcode::SetDepthImage.word(u64::from(addr.value() & 0x03FF_FFFF))
            }
            Self::SetTile(tile) => Opcode::SetTile.word(tile.to_bits()),
            Self::SetTileSize { tile, rect } => {
                Opcode::SetTileSize.word(rect.fields() | (u64::from(tile & 7) << 24))
            }
            Self::LoadTile { tile, rect } => {
                Opcode::LoadTile.word(rect.fields() | (u64::from(tile & 7) << 24))
            }
            Self::LoadBlock {
                tile,
                s,
                t,
                texels,
                dxt,
            } => {
                assert!((1..=2048).contains(&texels), "rdp: load block of {texels} texels");
                Opcode::LoadBlock.word(
                    (u64::from(s & 0xFFF) << 44)
                        | (u64::from(t & 0xFFF) << 32)
                        | (u64::from(tile & 7) << 24)
                        | (u64::from(texels - 1) << 12)
                        | u64::from(dxt & 0xFFF),
                )
            }
            Self::LoadTlut { tile, first, last } => Opcode::LoadTlut.word(
                (u64::from(first) << 46) | (u64::from(tile & 7) << 24) | (u64::from(last) << 14),
            ),
            Self::SetOtherModes(modes) => {
                // bits 32..36 are reserved and set
                Opcode::SetOtherModes.word((modes.to_bits() & 0x00FF_FFFF_FFFF_FFFF) | (0xF << 32))
            }
            Self::SetCombineMode(mode) => Opcode::SetCombineMode.word(mode.to_bits()),
            Self::SetScissor { rect, interlace } => {
                Opcode::SetScissor.word(rect.fields() | (interlace.bits() << 24))
            }
            Self::SetFillColor(value) => Opcode::SetFillColor.word(u64::from(value)),
            Self::SetFogColor(color) => Opcode::SetFogColor.word(u64::from(color.to_rgba32())),
            Self::SetBlendColor(color) => Opcode::SetBlendColor.word(u64::from(color.to_rgba32())),
            Self::SetPrimitiveColor {
                color,
                min_lod,
                lod_fraction,
            } => Opcode::SetPrimitiveColor.word(
                (u64::from(min_lod & 0x1F) << 40)
                    | (u64::from(lod_fraction) << 32)
                    | u64::from(color.to_rgba32()),
            ),
            Self::SetEnvironmentColor(color) => {
                Opcode::SetEnvironmentColor.word(u64::from(color.to_rgba32()))
            }
            Self::SetPrimDepth { z, dz } => {
                Opcode::SetPrimDepth.word((u64::from(z) << 16) | u64::from(dz))
            }
            Self::SetKeyR(red) => {
                Opcode::SetKeyR.word((u64::from(red.width & 0xFFF) << 16) | key(red, 0))
            }
            Self::SetKeyGb { green, blue } => Opcode::SetKeyGb.word(
                (u64::from(green.width & 0xFFF) << 44)
                    | (u64::from(blue.width & 0xFFF) << 32)
                    | key(green, 16)
                    | key(blue, 0),
            ),
            Self::SetConvert(k) => Opcode::SetConvert.word(
                k.iter()
                    .fold(0, |acc, &k| (acc << 9) | u64::from(k as u16 & 0x1FF)),
            ),
            Self::FillRectangle(rect) => Opcode::FillRectangle.word(rect.swapped().fields()),
            Self::TextureRectangle {
                rect,
                tile,
                s,
                t,
                dsdx,
                dtdy,
            } => {
                let first =
                    Opcode::TextureRectangle.word(rect.swapped().fields() | (u64::from(tile & 7) << 24));
                let second = (u64::from(s as u16) << 48)
                    | (u64::from(t as u16) << 32)
                    | (u64::from(dsdx as u16) << 16)
                    | u64::from(dtdy as u16);
                return [first, second];
            }
        };

        [word, 0]
    }
}
