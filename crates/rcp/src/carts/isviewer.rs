//! Logging through an ISViewer.
//!
//! The ISViewer was a development cartridge that printed whatever the console wrote into its
//! buffer. The real hardware is long gone, but emulators and some flashcarts still emulate
//! its protocol: write the text, publish the write pointer and the token, then wait for the
//! host to move the read pointer up to the write pointer.
#[cfg(test)]
mod test;

use std::io::{self, Write};

use vr4300::PhysAddr;

use super::Cart;
use crate::periph::{self, Device};

const BASE: u32 = 0x13ff_0000;
const BUFFER: u32 = BASE + 0x20;
const BUFFER_SIZE: u32 = 0x1400_0000 - BUFFER;

const TOKEN: u32 = 0x4953_3634;
const PROBE: u32 = 0xbeef_cafe;

mod regs {
    use super::*;

    pub const TOKEN: periph::Reg = periph::Reg::at(BASE);
    pub const READ_PTR: periph::Reg = periph::Reg::at(BASE + 0x04);
    pub const WRITE_PTR: periph::Reg = periph::Reg::at(BASE + 0x14);
}

pub struct IsViewer {
    buf: Device,
}

impl IsViewer {
    /// Returns the ISViewer if one answers.
    pub fn probe() -> Option<Self> {
        regs::TOKEN.store(PROBE);
        if regs::TOKEN.load() != PROBE {
            return None;
        }

        regs::READ_PTR.store(0);
        regs::WRITE_PTR.store(0);
        Some(Self {
            buf: Device::new(PhysAddr(BUFFER), BUFFER_SIZE),
        })
    }
}

impl Write for IsViewer {
    fn write(&mut self, mut data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while !data.is_empty() {
            let chunk = &data[..data.len().min(self.buf.size())];
            let (n, _) = self.buf.write_at(chunk, 0);
            data = &data[n..];

            regs::READ_PTR.store(0);
            regs::WRITE_PTR.store(n as u32);
            regs::TOKEN.store(TOKEN);
            while regs::READ_PTR.load() != regs::WRITE_PTR.load() {
                std::hint::spin_loop();
            }

            regs::TOKEN.store(0);
            written += n;
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Cart for IsViewer {
    fn name(&self) -> &'static str {
        "isviewer"
    }
}
