use super::*;
use crate::sim::{self, Sim};

fn hex(words: &[u64]) -> String {
    words
        .iter()
        .map(|word| format!("{word:016x}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn history_len() -> usize {
    Sim::install().with(|state| state.dp.history.len())
}

#[test]
fn fill_frame_buffer() {
    let _guard = sim::exclusive();

    let fb = Arc::new(Texture::new(Format::Rgba16, 320, 240));
    let mut dl = DisplayList::new();
    dl.set_color_image(&fb);
    dl.sync_full();
    dl.set_scissor(Rect::of(&fb), Interlace::None);
    dl.fill(Rect::of(&fb), Color::new(0, 0x37, 0x77, 0xFF));
    run(&mut dl);

    fb.invalidate();
    let raw = u16::from_ne_bytes([fb.bytes()[0], fb.bytes()[1]]);
    assert_eq!(raw, 0x019D);
    assert_eq!(fb.pixel(319, 239).to_rgba16(), 0x019D);
    assert_eq!(Arc::strong_count(&fb), 1);
}

#[test]
fn fill_32_bit_rectangle() {
    let _guard = sim::exclusive();

    let fb = Arc::new(Texture::new(Format::Rgba32, 64, 32));
    let mut dl = DisplayList::new();
    dl.set_color_image(&fb);
    dl.set_scissor(Rect::of(&fb), Interlace::None);
    dl.fill(Rect::of(&fb), Color::BLACK);
    dl.fill(Rect::new(8, 4, 16, 12), Color::new(0x12, 0x34, 0x56, 0x78));
    dl.flush();

    fb.invalidate();
    assert_eq!(fb.pixel(8, 4), Color::new(0x12, 0x34, 0x56, 0x78));
    assert_eq!(fb.pixel(15, 11), Color::new(0x12, 0x34, 0x56, 0x78));
    // the maximum is excluded
    assert_eq!(fb.pixel(16, 11), Color::BLACK);
    assert_eq!(fb.pixel(15, 12), Color::BLACK);
    assert_eq!(fb.pixel(7, 3), Color::BLACK);
}

#[test]
fn state_changes_coalesce() {
    let _guard = sim::exclusive();

    let mut dl = DisplayList::new();
    dl.set_scissor(Rect::new(0, 0, 320, 240), Interlace::None);
    dl.set_other_modes(OtherModes::fill());
    dl.set_other_modes(OtherModes::fill());
    dl.set_fill_color(Color::new(0xFF, 0, 0, 0xFF));
    dl.set_fill_color(Color::new(0xFF, 0, 0, 0xFF));
    dl.fill_rectangle(Rect::new(8, 8, 16, 16));
    dl.set_fill_color(Color::new(0xFF, 0, 0, 0xFF));
    dl.set_fill_color(Color::WHITE);
    dl.fill_rectangle(Rect::new(0, 0, 0, 10));

    insta::assert_snapshot!(hex(&dl.words()), @r"
    ed000000005003c0
    ef30000f00000000
    ed000000004fc3bc
    f7000000ff0000ff
    f603c03c00020020
    e700000000000000
    f7000000ffffffff
    ");
}

#[test]
fn scissor_follows_cycle_type() {
    let _guard = sim::exclusive();

    let mut dl = DisplayList::new();
    dl.set_scissor(Rect::new(0, 0, 64, 64), Interlace::Even);
    dl.set_cycle_type(CycleType::Two);
    dl.set_cycle_type(CycleType::Copy);
    dl.set_cycle_type(CycleType::Fill);
    dl.set_cycle_type(CycleType::One);

    let scissors = dl
        .words()
        .into_iter()
        .filter(|&word| Opcode::of(word) == Some(Opcode::SetScissor))
        .collect::<Vec<_>>();

    insta::assert_snapshot!(hex(&scissors), @r"
    ed00000003100100
    ed000000030fc0fc
    ed00000003100100
    ");
}

#[test]
fn buffers_wrap() {
    let _guard = sim::exclusive();

    let mut dl = DisplayList::new();
    let before = history_len();
    for _ in 0..BUFFER_WORDS + 100 {
        dl.push(Command::Sync(SyncKind::Pipe));
    }

    // the first buffer was handed over when it filled up
    assert_eq!(history_len() - before, BUFFER_WORDS);
    assert_eq!(dl.len(), 100);

    dl.flush();
    assert_eq!(history_len() - before, BUFFER_WORDS + 101);
    assert!(dl.is_empty());
}

#[test]
fn exactly_full_buffer_does_not_wrap() {
    let _guard = sim::exclusive();

    let mut dl = DisplayList::new();
    let before = history_len();
    for _ in 0..BUFFER_WORDS - 1 {
        dl.push(Command::Sync(SyncKind::Tile));
    }

    let index = dl.index;
    dl.flush();
    assert_eq!(dl.index, index);
    assert_eq!(history_len() - before, BUFFER_WORDS);
}

#[test]
fn flush_releases_pins() {
    let _guard = sim::exclusive();

    let fb = Arc::new(Texture::new(Format::Rgba16, 32, 32));
    let tex = Arc::new(Texture::new(Format::I8, 16, 16));
    let mut dl = DisplayList::new();
    dl.set_color_image(&fb);
    dl.set_color_image(&fb);
    dl.set_texture_image(&tex);
    assert_eq!(dl.len(), 2);
    assert_eq!(Arc::strong_count(&fb), 2);
    assert_eq!(Arc::strong_count(&tex), 2);

    dl.flush();
    assert_eq!(Arc::strong_count(&fb), 1);
    assert_eq!(Arc::strong_count(&tex), 1);

    // the next frame sets the colour image again
    dl.set_color_image(&fb);
    assert_eq!(dl.len(), 1);
    dl.flush();
}

#[test]
fn drop_runs_unpinned_commands() {
    let _guard = sim::exclusive();

    let mut dl = DisplayList::new();
    let before = history_len();
    for _ in 0..10 {
        dl.push(Command::Sync(SyncKind::Tile));
    }
    drop(dl);

    // the commands plus the closing full sync
    assert_eq!(history_len() - before, 11);
}

#[test]
fn blit_of_empty_texture_draws_nothing() {
    let _guard = sim::exclusive();

    let fb = Arc::new(Texture::new(Format::Rgba16, 32, 32));
    let mut dl = DisplayList::new();
    dl.set_color_image(&fb);
    let len = dl.len();

    for (width, height) in [(0, 16), (16, 0)] {
        let tex = Arc::new(Texture::new(Format::Rgba16, width, height));
        dl.blit(&tex, 4, 4);
        assert_eq!(dl.len(), len);
        assert_eq!(Arc::strong_count(&tex), 1);
    }

    dl.flush();
}

#[test]
#[should_panic(expected = "copy mode can't draw 32 bit images")]
fn copy_mode_rejects_32_bit_images() {
    let _guard = sim::exclusive();

    let fb = Arc::new(Texture::new(Format::Rgba32, 32, 32));
    let mut dl = DisplayList::new();
    dl.set_color_image(&fb);
    dl.set_cycle_type(CycleType::Copy);
}

#[test]
fn texture_commands() {
    let _guard = sim::exclusive();

    let mut dl = DisplayList::new();
    dl.set_cycle_type(CycleType::One);
    dl.set_tile(Tile::new(0, Format::Rgba16, 0, 32));
    dl.load_tile(0, Rect::new(0, 0, 32, 16));
    dl.set_tile_size(0, Rect::new(0, 0, 32, 16));
    dl.texture_rectangle(Rect::new(10, 20, 42, 36), 0, 0.0, 0.0, (1.0, 1.0));
    dl.sync_load();

    insta::assert_snapshot!(hex(&dl.words()), @r"
    ef00000f00000000
    f510100000000000
    f40000000007c03c
    f20000000007c03c
    e40a809000028050
    0000000004000400
    e600000000000000
    ");
}

#[test]
fn fixed_rect_clamps_large_coordinates() {
    let rect = FixedRect::from_pixels(10, 0x3FF, 0x400, 1 << 30);
    assert_eq!(
        rect,
        FixedRect {
            x0: 40,
            y0: 0xFFC,
            x1: FixedRect::MAX as u16,
            y1: FixedRect::MAX as u16,
        }
    );
    assert_eq!(FixedRect::from_pixels(u32::MAX, 0, 0, 0).x0, 0xFFF);
}

#[test]
fn combiner_encoding() {
    let mode = CombineMode::One(CombinePass::TEXTURE_PRIMITIVE);
    assert_eq!(mode.to_bits(), 0x0011_9623_882F_FFFF);
    assert_eq!(BlendMode::alpha().to_bits(), 0x0050);
}

#[test]
#[should_panic(expected = "can't feed combiner slot")]
fn combiner_rejects_unavailable_input() {
    let pass = CombinePass {
        rgb: Equation::only(Input::Noise),
        alpha: Equation::only(Input::One),
    };

    CombineMode::One(pass).to_bits();
}
