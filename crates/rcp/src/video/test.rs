use super::*;
use crate::sim::{self, Sim};

fn vi_reg(index: usize) -> u32 {
    Sim::install().with(|state| state.vi.regs[index])
}

#[test]
fn ntsc_framebuffer() {
    let _guard = sim::exclusive();

    setup(Config::default());
    let fb = Arc::new(Texture::new(Format::Rgba16, 320, 240));
    set_framebuffer(Some(fb.clone()));

    let control = Control::from_bits(vi_reg(0));
    assert_eq!(control.depth(), ColorDepth::Bpp16);
    assert!(!control.serrate());
    assert_eq!(vi_reg(1), fb.addr().value());
    assert_eq!(vi_reg(2), 320);
    assert_eq!(vi_reg(6), 525);
    assert_eq!(Scale::from_bits(vi_reg(12)).factor().value(), 0x200);
    assert_eq!(Scale::from_bits(vi_reg(13)).factor().value(), 0x400);
    assert_eq!(native_resolution(), (640, 240));

    set_framebuffer(None);
    assert_eq!(vi_reg(0), 0);
    assert!(framebuffer().is_none());
}

#[test]
fn swap_waits_for_vblank() {
    let _guard = sim::exclusive();

    setup(Config::default());
    let front = Arc::new(Texture::new(Format::Rgba16, 320, 240));
    let back = Arc::new(Texture::new(Format::Rgba16, 320, 240));
    set_framebuffer(Some(front.clone()));
    assert!(wait_vblank());

    let frames = frames();
    set_framebuffer(Some(back.clone()));
    assert_eq!(vi_reg(1), front.addr().value());

    assert!(wait_vblank());
    assert!(frames() > frames);
    assert_eq!(vi_reg(1), back.addr().value());

    // output area set by setup, applied at the first vblank
    let h_video = Span::from_bits(vi_reg(9));
    assert_eq!((h_video.start().value(), h_video.end().value()), (108, 748));

    set_framebuffer(None);
    assert_eq!(vi_reg(0), 0);
}

#[test]
fn scale_is_clamped() {
    let _guard = sim::exclusive();

    setup(Config::default());
    let fb = Arc::new(Texture::new(Format::Rgba16, 320, 240));
    set_framebuffer(Some(fb));

    // too wide, too short, off screen
    let area = set_scale(Rect::new(0, 0, 2000, 100));
    assert_eq!(area, Rect::new(108, 35, 748, 215));
    assert_eq!(scale(), area);

    set_framebuffer(None);
}

#[test]
fn pal60_keeps_ntsc_height() {
    let _guard = sim::exclusive();

    setup(Config {
        standard: Standard::Pal,
        interlace: true,
        pal60: true,
    });
    assert_eq!(vi_reg(6), 524);
    assert_eq!(scale(), Rect::new(128, 35, 768, 515));
    assert_eq!(native_resolution(), (640, 480));

    let fb = Arc::new(Texture::new(Format::Rgba32, 640, 480));
    set_framebuffer(Some(fb));
    assert!(Control::from_bits(vi_reg(0)).serrate());
    assert_eq!(Control::from_bits(vi_reg(0)).depth(), ColorDepth::Bpp32);

    set_framebuffer(None);
    setup(Config::default());
}

#[test]
#[should_panic(expected = "unsupported framebuffer format")]
fn rejects_intensity_framebuffer() {
    let _guard = sim::exclusive();
    set_framebuffer(Some(Arc::new(Texture::new(Format::I8, 64, 64))));
}
