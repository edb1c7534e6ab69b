//! High-level emulation of the RSP command queue microcode.
//!
//! The RSP doesn't execute microcode in the model. Whenever it is resumed and the queue header in
//! DMEM points at a command buffer, the commands are interpreted here until the queue runs dry.
use vr4300::PhysAddr;

use super::bus::State;

const OVERLAY_TABLE: usize = 32;
const DESCRIPTORS: usize = OVERLAY_TABLE + 16;
const POINTER_STACK: usize = 0xB0;
const LOWPRI_ADDR: usize = 0xD0;
const HIGHPRI_ADDR: usize = 0xD4;
const CURRENT_ADDR: usize = 0xD8;

const SIG_HIGHPRI_RUNNING: u8 = 1 << 3;
const SIG_HIGHPRI_REQUESTED: u8 = 1 << 4;
const SIG_MORE: u8 = 1 << 7;

const BREAK_PC: u32 = 0xFF8;
const BREAK_LOOP: u32 = 0x00ba_000d;

const STEP_LIMIT: usize = 1 << 20;

fn dmem_u32(state: &State, offset: usize) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&state.sp.dmem[offset..offset + 4]);
    u32::from_be_bytes(word)
}

fn set_dmem_u32(state: &mut State, offset: usize, value: u32) {
    state.sp.dmem[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn crash(state: &mut State, reason: &str) {
    tracing::debug!("sim: rsp queue crashed: {reason}");
    state.sp.pc = BREAK_PC;
    state.sp.imem[0xFFC..].copy_from_slice(&BREAK_LOOP.to_be_bytes());
    state.sp_break();
}

enum Step {
    Continue,
    Halt,
    Crash,
}

/// Runs the queue until it waits for input or crashes.
pub fn run(state: &mut State) {
    let mut cur = dmem_u32(state, CURRENT_ADDR);
    if cur == 0 {
        state.sp_break();
        return;
    }

    for _ in 0..STEP_LIMIT {
        let signals = state.sp.signals();
        if signals & SIG_HIGHPRI_REQUESTED != 0 && signals & SIG_HIGHPRI_RUNNING == 0 {
            set_dmem_u32(state, LOWPRI_ADDR, cur);
            cur = dmem_u32(state, HIGHPRI_ADDR);
            state.sp.set_signals(SIG_HIGHPRI_RUNNING);
            state.sp.clear_signals(SIG_HIGHPRI_REQUESTED);
        }

        if !state.memory.is_mapped(PhysAddr(cur), 4) {
            crash(state, "command pointer outside of rdram");
            return;
        }

        match step(state, &mut cur) {
            Step::Continue => (),
            Step::Halt => {
                set_dmem_u32(state, CURRENT_ADDR, cur);
                state.sp_break();
                return;
            }
            Step::Crash => {
                set_dmem_u32(state, CURRENT_ADDR, cur);
                crash(state, "invalid command");
                return;
            }
        }

        set_dmem_u32(state, CURRENT_ADDR, cur);
    }

    panic!("sim: rsp queue never went idle");
}

fn arg(state: &State, cur: u32, index: u32) -> u32 {
    state.memory.read_u32(PhysAddr(cur + 4 * index))
}

fn step(state: &mut State, cur: &mut u32) -> Step {
    let word = state.memory.read_u32(PhysAddr(*cur));
    let command = (word >> 24) as u8;
    let low = word & 0x00FF_FFFF;

    match command {
        // wait for new input
        0x00 => {
            if state.sp.signals() & SIG_MORE != 0 {
                state.sp.clear_signals(SIG_MORE);
                return Step::Continue;
            }

            Step::Halt
        }
        // noop
        0x01 => {
            *cur += 4;
            Step::Continue
        }
        // jump
        0x02 => {
            *cur = low;
            Step::Continue
        }
        // call
        0x03 => {
            let slot = arg(state, *cur, 1) as usize;
            set_dmem_u32(state, POINTER_STACK + slot, *cur + 8);
            *cur = low;
            Step::Continue
        }
        // return
        0x04 => {
            *cur = dmem_u32(state, POINTER_STACK + low as usize);
            Step::Continue
        }
        // dma
        0x05 => {
            let dmem = arg(state, *cur, 1) as usize & 0x1FF8;
            let len = arg(state, *cur, 2) as usize + 1;
            let flags = arg(state, *cur, 3);
            let rdram = PhysAddr(low);
            let (bank, offset) = if dmem & 0x1000 != 0 {
                (&mut state.sp.imem, dmem & 0xFFF)
            } else {
                (&mut state.sp.dmem, dmem)
            };

            let len = len.min(0x1000 - offset);
            if flags & 0x8000 != 0 {
                state.memory.write(rdram, &bank[offset..offset + len]);
            } else {
                state.memory.read(rdram, &mut bank[offset..offset + len]);
            }

            *cur += 16;
            Step::Continue
        }
        // write status
        0x06 => {
            *cur += 4;
            state.sp_status(low);
            Step::Continue
        }
        // swap buffers
        0x07 => {
            let high_slot = arg(state, *cur, 1) as usize;
            let status = arg(state, *cur, 2);
            set_dmem_u32(state, POINTER_STACK + high_slot, *cur + 12);
            *cur = dmem_u32(state, POINTER_STACK + low as usize);
            state.sp_status(status);
            Step::Continue
        }
        // test and write status
        0x08 => {
            let test = arg(state, *cur, 1);
            if state.sp.status & test != 0 {
                // resumed once the signal is cleared
                return Step::Halt;
            }

            *cur += 8;
            state.sp_status(low);
            Step::Continue
        }
        // rdp wait idle
        0x09 => {
            *cur += 4;
            Step::Continue
        }
        // rdp set buffer
        0x0A => {
            let start = arg(state, *cur, 1);
            *cur += 12;
            state.store(0x0410_0000, start);
            state.store(0x0410_0004, low);
            Step::Continue
        }
        // rdp append buffer
        0x0B => {
            *cur += 4;
            state.store(0x0410_0004, low);
            Step::Continue
        }
        _ => overlay(state, cur, command),
    }
}

fn overlay(state: &mut State, cur: &mut u32, command: u8) -> Step {
    let id = (command >> 4) as usize;
    let descriptor = state.sp.dmem[OVERLAY_TABLE + id] as usize;
    if descriptor == 0 {
        return Step::Crash;
    }

    let data = dmem_u32(state, DESCRIPTORS + descriptor + 4);
    let mut header = [0; 8];
    state.memory.read(PhysAddr(data), &mut header);
    let command_base = u16::from_be_bytes([header[4], header[5]]) as usize;

    let Some(index) = (command as usize).checked_sub((command_base >> 5) << 4) else {
        return Step::Crash;
    };

    let mut entry = [0; 2];
    state
        .memory
        .read(PhysAddr(data + 8 + 2 * index as u32), &mut entry);
    let entry = u16::from_be_bytes(entry);
    if entry == 0 {
        return Step::Crash;
    }

    let words = ((entry >> 12) & 0xF).max(1) as u32;
    tracing::trace!("sim: overlay command {command:#04x} ({words} words)");
    *cur += 4 * words;
    Step::Continue
}
