//! High-level emulation of the RDP.
//!
//! Commands are decoded as they are fetched. Only fill-mode rectangles actually touch pixels,
//! everything else just updates the tracked state.
use vr4300::PhysAddr;

use super::bus::{ColorImage, Scissor, State};
use crate::interrupt::Source;

const CYCLE_FILL: u8 = 3;

fn bits(word: u64, shift: u32, len: u32) -> u32 {
    ((word >> shift) & ((1 << len) - 1)) as u32
}

/// Processes the commands in `[from, to)`.
pub fn run(state: &mut State, from: u32, to: u32) {
    let mut addr = from;
    while addr < to {
        let word = state.memory.read_u64(PhysAddr(addr));
        state.dp.history.push(word);
        execute(state, word);
        addr += 8;
    }
}

fn execute(state: &mut State, word: u64) {
    let opcode = (word >> 56) as u8 & 0x3F;
    match opcode {
        // sync full
        0x29 => state.raise(Source::Dp),
        // set other modes
        0x2F => state.dp.cycle_type = bits(word, 52, 2) as u8,
        // set scissor
        0x2D => {
            state.dp.scissor = Scissor {
                x0: bits(word, 44, 12),
                y0: bits(word, 32, 12),
                x1: bits(word, 12, 12),
                y1: bits(word, 0, 12),
            }
        }
        // set fill color
        0x37 => state.dp.fill_color = word as u32,
        // set color image
        0x3F => {
            state.dp.color_image = Some(ColorImage {
                addr: bits(word, 0, 26),
                format: bits(word, 53, 3) as u8,
                size: bits(word, 51, 2) as u8,
                width: bits(word, 32, 10) + 1,
            })
        }
        // fill rectangle
        0x36 => fill_rectangle(state, word),
        _ => (),
    }
}

fn fill_rectangle(state: &mut State, word: u64) {
    if state.dp.cycle_type != CYCLE_FILL {
        return;
    }

    let Some(image) = state.dp.color_image else {
        return;
    };

    let scissor = state.dp.scissor;
    let x0 = bits(word, 12, 12).max(scissor.x0) >> 2;
    let y0 = bits(word, 0, 12).max(scissor.y0) >> 2;
    let x1 = bits(word, 44, 12).min(scissor.x1) >> 2;
    let y1 = bits(word, 32, 12).min(scissor.y1) >> 2;

    let fill = state.dp.fill_color;
    for y in y0..=y1 {
        for x in x0..=x1.min(image.width.saturating_sub(1)) {
            let index = y * image.width + x;
            match image.size {
                // 8 bits
                1 => {
                    let byte = (fill >> (24 - 8 * (x & 3))) as u8;
                    state.memory.write(PhysAddr(image.addr + index), &[byte]);
                }
                // 16 bits
                2 => {
                    let pixel = (if x & 1 == 0 { fill >> 16 } else { fill }) as u16;
                    state.memory.write_u16(PhysAddr(image.addr + 2 * index), pixel);
                }
                // 32 bits
                3 => state.memory.write_u32(PhysAddr(image.addr + 4 * index), fill),
                _ => (),
            }
        }
    }
}
