use strum::IntoEnumIterator;

use super::*;
use crate::sim;

#[test]
fn formats_round_trip_through_rdp_encoding() {
    for format in Format::iter() {
        assert_eq!(Format::from_rdp(format.components(), format.depth()), Some(format));
    }

    assert_eq!(Format::from_rdp(Components::Yuv, Depth::Bpp16), None);
    assert_eq!(Format::from_rdp(Components::Intensity, Depth::Bpp32), None);
}

#[test]
fn format_sizes() {
    assert_eq!(Format::Rgba32.bytes(3), 12);
    assert_eq!(Format::Ia16.bits(1), 16);
    assert_eq!(Format::I4.bytes(3), 2);
    assert_eq!(Format::Ci4.tmem_words(17), 2);
    assert_eq!(Format::Rgba16.tmem_words(32), 8);
}

#[test]
fn color_packing() {
    let color = Color::new(0, 0x37, 0x77, 0xFF);
    assert_eq!(color.to_rgba16(), 0x019D);
    assert_eq!(color.to_rgba32(), 0x0037_77FF);
    assert_eq!(Color::from_rgba32(0x0037_77FF), color);

    assert_eq!(Color::from_rgba16(0xFFFF), Color::WHITE);
    assert_eq!(Color::from_rgba16(0x0001), Color::BLACK);
    assert_eq!(Color::new(0xFF, 0, 0, 0x7F).to_rgba16(), 0xF800);
    assert_eq!(Color::new(0xFF, 0x80, 0, 0x80).premultiplied(), Color::new(0x80, 0x40, 0, 0x80));
}

#[test]
fn pixels() {
    let _guard = sim::exclusive();

    let mut tex = Texture::new(Format::Rgba16, 7, 3);
    assert_eq!(tex.stride(), 7);
    assert!(tex.addr().is_aligned(ALIGN_FRAMEBUFFER as u32));

    tex.set_pixel(6, 2, Color::WHITE);
    assert_eq!(tex.pixel(6, 2), Color::WHITE);
    assert_eq!(tex.pixel(5, 2), Color::TRANSPARENT);
    assert_eq!(&tex.bytes()[40..42], &0xFFFFu16.to_ne_bytes());

    let mut tex = Texture::new(Format::I4, 5, 2);
    assert_eq!(tex.stride(), 6);
    tex.set_pixel(0, 1, Color::new(0xF0, 0xF0, 0xF0, 0xFF));
    tex.set_pixel(1, 1, Color::new(0x30, 0x30, 0x30, 0xFF));
    assert_eq!(tex.bytes()[3], 0xF3);
    assert_eq!(tex.pixel(1, 1), Color::new(0x33, 0x33, 0x33, 0x33));
}

#[test]
fn palette_lookup() {
    let _guard = sim::exclusive();

    let mut palette = Texture::new(Format::Rgba16, 16, 1);
    palette.set_pixel(3, 0, Color::WHITE);
    let mut tex = Texture::with_palette(Format::Ci4, 4, 4, Arc::new(palette));

    tex.set_pixel(2, 2, Color::new(3, 0, 0, 0));
    assert_eq!(tex.pixel(2, 2), Color::WHITE);
    assert_eq!(tex.pixel(3, 2), Color::TRANSPARENT);
}

#[test]
#[should_panic(expected = "needs a palette")]
fn indexed_needs_palette() {
    let _guard = sim::exclusive();
    Texture::new(Format::Ci8, 8, 8);
}

#[test]
fn from_pixels_copies_rows() {
    let _guard = sim::exclusive();

    let pixels: Vec<u8> = (0..32).collect();
    let tex = Texture::from_pixels(Format::I8, 8, 4, &pixels);
    assert_eq!(tex.pixel(3, 2), Color::new(19, 19, 19, 19));
}
