//! Images shared with the RDP and the video interface: textures and frame buffers.
#[cfg(test)]
mod test;

use std::sync::Arc;

use strum::{EnumIter, FromRepr};
use vr4300::PhysAddr;

use crate::cpu::Buffer;
use crate::hw;

/// Alignment of frame buffers, which the video interface fetches in whole bursts.
pub const ALIGN_FRAMEBUFFER: usize = 64;
/// Alignment of textures.
pub const ALIGN_TEXTURE: usize = 8;

/// Colour components of a pixel format, as the RDP encodes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Components {
    Rgba = 0,
    Yuv = 1,
    ColorIndex = 2,
    IntensityAlpha = 3,
    Intensity = 4,
}

/// Pixel depth, as the RDP encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromRepr)]
#[repr(u8)]
pub enum Depth {
    Bpp4 = 0,
    Bpp8 = 1,
    Bpp16 = 2,
    Bpp32 = 3,
}

impl Depth {
    pub fn bits(self) -> usize {
        4 << self as usize
    }
}

/// Pixel formats the RDP can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Format {
    /// 8:8:8:8
    Rgba32,
    /// 5:5:5:1
    Rgba16,
    /// 8 bits intensity, 8 bits alpha
    Ia16,
    /// 4 bits intensity, 4 bits alpha
    Ia8,
    I8,
    I4,
    /// 8 bit index into an RGBA16 palette
    Ci8,
    /// 4 bit index into an RGBA16 palette
    Ci4,
}

impl Format {
    pub fn components(self) -> Components {
        match self {
            Self::Rgba32 | Self::Rgba16 => Components::Rgba,
            Self::Ia16 | Self::Ia8 => Components::IntensityAlpha,
            Self::I8 | Self::I4 => Components::Intensity,
            Self::Ci8 | Self::Ci4 => Components::ColorIndex,
        }
    }

    pub fn depth(self) -> Depth {
        match self {
            Self::Rgba32 => Depth::Bpp32,
            Self::Rgba16 | Self::Ia16 => Depth::Bpp16,
            Self::Ia8 | Self::I8 | Self::Ci8 => Depth::Bpp8,
            Self::I4 | Self::Ci4 => Depth::Bpp4,
        }
    }

    /// The format with `components` and `depth`, if the RDP has one.
    pub fn from_rdp(components: Components, depth: Depth) -> Option<Self> {
        use Components::*;
        use Depth::*;

        Some(match (components, depth) {
            (Rgba, Bpp32) => Self::Rgba32,
            (Rgba, Bpp16) => Self::Rgba16,
            (IntensityAlpha, Bpp16) => Self::Ia16,
            (IntensityAlpha, Bpp8) => Self::Ia8,
            (Intensity, Bpp8) => Self::I8,
            (Intensity, Bpp4) => Self::I4,
            (ColorIndex, Bpp8) => Self::Ci8,
            (ColorIndex, Bpp4) => Self::Ci4,
            _ => return None,
        })
    }

    pub fn bits_per_pixel(self) -> usize {
        self.depth().bits()
    }

    /// Size in bits of `pixels` pixels.
    pub fn bits(self, pixels: usize) -> usize {
        pixels * self.bits_per_pixel()
    }

    /// Size in bytes of `pixels` pixels, rounded up.
    pub fn bytes(self, pixels: usize) -> usize {
        self.bits(pixels).div_ceil(8)
    }

    /// Size in TMEM words (8 bytes) of `pixels` pixels, rounded up.
    pub fn tmem_words(self, pixels: usize) -> usize {
        self.bits(pixels).div_ceil(64)
    }

    /// Whether pixels are indices into a palette.
    pub fn is_indexed(self) -> bool {
        self.components() == Components::ColorIndex
    }
}

/// A colour with 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0, 0xFF);
    pub const WHITE: Self = Self::new(0xFF, 0xFF, 0xFF, 0xFF);
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Packs as 8:8:8:8, red in the most significant byte.
    pub fn to_rgba32(self) -> u32 {
        u32::from_be_bytes([self.r, self.g, self.b, self.a])
    }

    pub fn from_rgba32(value: u32) -> Self {
        let [r, g, b, a] = value.to_be_bytes();
        Self { r, g, b, a }
    }

    /// Packs as 5:5:5:1. Alpha is set if it's at least half opaque.
    pub fn to_rgba16(self) -> u16 {
        let r = (self.r >> 3) as u16;
        let g = (self.g >> 3) as u16;
        let b = (self.b >> 3) as u16;
        let a = (self.a >> 7) as u16;
        (r << 11) | (g << 6) | (b << 1) | a
    }

    /// Unpacks 5:5:5:1, replicating the high bits of each channel into the low ones.
    pub fn from_rgba16(value: u16) -> Self {
        let expand = |c: u16| {
            let c = (c & 0x1F) as u8;
            (c << 3) | (c >> 2)
        };

        Self {
            r: expand(value >> 11),
            g: expand(value >> 6),
            b: expand(value >> 1),
            a: if value & 1 != 0 { 0xFF } else { 0 },
        }
    }

    /// Average of the colour channels.
    pub fn intensity(self) -> u8 {
        ((self.r as u16 + self.g as u16 + self.b as u16) / 3) as u8
    }

    /// Multiplies the colour channels with alpha.
    pub fn premultiplied(self) -> Self {
        let mul = |c: u8| ((c as u16 * self.a as u16) / 0xFF) as u8;
        Self::new(mul(self.r), mul(self.g), mul(self.b), self.a)
    }
}

/// An image in a format the RDP understands, backed by a cache-safe buffer.
pub struct Texture {
    buf: Buffer,
    width: u32,
    height: u32,
    /// Distance between rows, in pixels.
    stride: u32,
    format: Format,
    premultiplied: bool,
    palette: Option<Arc<Texture>>,
}

impl Texture {
    /// Allocates a zeroed image, aligned for use as a frame buffer.
    ///
    /// # Panics
    /// Panics for indexed formats, which need [`Texture::with_palette`].
    pub fn new(format: Format, width: u32, height: u32) -> Self {
        assert!(!format.is_indexed(), "texture: {format:?} needs a palette");
        Self::alloc(format, width, height, ALIGN_FRAMEBUFFER)
    }

    /// Allocates a zeroed indexed image, its colours looked up in `palette`.
    ///
    /// # Panics
    /// Panics if `format` isn't indexed or `palette` isn't RGBA16.
    pub fn with_palette(format: Format, width: u32, height: u32, palette: Arc<Texture>) -> Self {
        assert!(format.is_indexed(), "texture: {format:?} takes no palette");
        assert_eq!(palette.format, Format::Rgba16, "texture: palette must be rgba16");

        let mut tex = Self::alloc(format, width, height, ALIGN_TEXTURE);
        tex.palette = Some(palette);
        tex
    }

    /// Copies `pixels`, stored row by row without padding, into a new texture.
    ///
    /// # Panics
    /// Panics if `pixels` is too short for the image.
    pub fn from_pixels(format: Format, width: u32, height: u32, pixels: &[u8]) -> Self {
        let mut tex = Self::alloc(format, width, height, ALIGN_TEXTURE);
        let len = tex.row_bytes() * height as usize;
        assert!(pixels.len() >= len, "texture: {} bytes of pixels for {len}", pixels.len());

        tex.buf[..len].copy_from_slice(&pixels[..len]);
        tex.writeback();
        tex
    }

    fn alloc(format: Format, width: u32, height: u32, align: usize) -> Self {
        // 4 bit rows start on a byte
        let stride = if format.depth() == Depth::Bpp4 {
            width.next_multiple_of(2)
        } else {
            width
        };

        let len = format.bytes(stride as usize) * height as usize;
        Self {
            buf: Buffer::aligned(len, align),
            width,
            height,
            stride,
            format,
            premultiplied: true,
            palette: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Distance between rows, in pixels.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn palette(&self) -> Option<&Arc<Texture>> {
        self.palette.as_ref()
    }

    /// Whether colour channels are premultiplied with alpha.
    pub fn premultiplied(&self) -> bool {
        self.premultiplied
    }

    pub fn set_premultiplied(&mut self, premultiplied: bool) {
        self.premultiplied = premultiplied;
    }

    /// Physical address of the first pixel.
    pub fn addr(&self) -> PhysAddr {
        self.buf.physical()
    }

    fn row_bytes(&self) -> usize {
        self.format.bytes(self.stride as usize)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Writes the pixels back to memory, before the RCP reads them.
    pub fn writeback(&self) {
        self.buf.writeback();
    }

    /// Discards cached pixels, before the CPU reads what the RCP drew.
    pub fn invalidate(&self) {
        // the buffer covers whole cache lines, no neighbour is affected
        hw::get().invalidate(self.buf.as_ptr().cast_mut(), self.buf.capacity());
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(x < self.width && y < self.height, "texture: ({x}, {y}) out of bounds");
        y as usize * self.row_bytes() + self.format.bits(x as usize) / 8
    }

    /// Reads the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        let offset = self.offset(x, y);
        let bytes = &self.buf[offset..];
        let nibble = |b: u8| if x % 2 == 0 { b >> 4 } else { b & 0xF };

        match self.format {
            Format::Rgba32 => {
                Color::from_rgba32(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            Format::Rgba16 => Color::from_rgba16(u16::from_ne_bytes([bytes[0], bytes[1]])),
            Format::Ia16 => Color::new(bytes[0], bytes[0], bytes[0], bytes[1]),
            Format::Ia8 => {
                let i = (bytes[0] >> 4) * 0x11;
                let a = (bytes[0] & 0xF) * 0x11;
                Color::new(i, i, i, a)
            }
            Format::I8 => Color::new(bytes[0], bytes[0], bytes[0], bytes[0]),
            Format::I4 => {
                let i = nibble(bytes[0]) * 0x11;
                Color::new(i, i, i, i)
            }
            Format::Ci8 => self.lookup(bytes[0]),
            Format::Ci4 => self.lookup(nibble(bytes[0])),
        }
    }

    /// Writes the pixel at (`x`, `y`). Indexed formats store the red channel as the index.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        let offset = self.offset(x, y);
        let format = self.format;
        let bytes = &mut self.buf[offset..];
        let set_nibble = |b: &mut u8, v: u8| {
            *b = if x % 2 == 0 {
                (*b & 0x0F) | (v << 4)
            } else {
                (*b & 0xF0) | (v & 0xF)
            }
        };

        match format {
            Format::Rgba32 => bytes[..4].copy_from_slice(&color.to_rgba32().to_ne_bytes()),
            Format::Rgba16 => bytes[..2].copy_from_slice(&color.to_rgba16().to_ne_bytes()),
            Format::Ia16 => {
                bytes[0] = color.intensity();
                bytes[1] = color.a;
            }
            Format::Ia8 => bytes[0] = (color.intensity() & 0xF0) | (color.a >> 4),
            Format::I8 => bytes[0] = color.intensity(),
            Format::I4 => set_nibble(&mut bytes[0], color.intensity() >> 4),
            Format::Ci8 => bytes[0] = color.r,
            Format::Ci4 => set_nibble(&mut bytes[0], color.r),
        }
    }

    fn lookup(&self, index: u8) -> Color {
        match &self.palette {
            Some(palette) => palette.pixel(index as u32 % palette.width, index as u32 / palette.width),
            None => Color::TRANSPARENT,
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}
