//! Save EEPROM on the cartridge, reached through joybus channel 4.
#[cfg(test)]
mod test;

use std::io::{self, Read, Seek, SeekFrom, Write};

use easyerr::ResultExt;

use super::joybus::{
    self, DeviceType, InfoCommand, JoybusError, ReadEepromCommand, WriteEepromCommand, ctrl,
};
use super::{AccessoryCtx, AccessoryError, CommandBlock, PifCommand};

/// EEPROMs are accessed in blocks of this size.
pub const BLOCK_SIZE: usize = 8;

const CHANNEL: usize = 4;

/// Capacity of an EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EepromKind {
    /// 4 kbit, 64 blocks.
    K4,
    /// 16 kbit, 256 blocks.
    K16,
}

impl EepromKind {
    pub fn size(self) -> usize {
        match self {
            Self::K4 => 512,
            Self::K16 => 2048,
        }
    }
}

fn block_on_channel() -> Result<CommandBlock, JoybusError> {
    let mut block = CommandBlock::new(PifCommand::ConfigureJoybus);
    for _ in 0..CHANNEL {
        joybus::control_byte(&mut block, ctrl::SKIP)?;
    }

    Ok(block)
}

/// Asks channel 4 for an EEPROM. Returns its kind if one answered.
pub fn probe() -> Option<EepromKind> {
    let query = || -> Result<(DeviceType, u8), JoybusError> {
        let mut block = block_on_channel()?;
        let info = InfoCommand::new(&mut block)?;
        joybus::control_byte(&mut block, ctrl::ABORT)?;

        super::run(&mut block);
        info.info(&block)
    };

    match query() {
        Ok((DeviceType::EEPROM_4K, _)) => Some(EepromKind::K4),
        Ok((DeviceType::EEPROM_16K, _)) => Some(EepromKind::K16),
        Ok((other, _)) => {
            tracing::warn!("eeprom: unknown device type {:#06x}", other.0);
            None
        }
        Err(err) => {
            tracing::debug!("eeprom: not found: {err}");
            None
        }
    }
}

/// Byte-addressed EEPROM device.
pub struct Eeprom {
    kind: EepromKind,
    read_block: CommandBlock,
    read: ReadEepromCommand,
    write_block: CommandBlock,
    write: WriteEepromCommand,
    pos: u64,
}

impl Eeprom {
    /// Opens the EEPROM if the cartridge has one.
    pub fn open() -> Option<Self> {
        let kind = probe()?;

        let build = || -> Result<Self, JoybusError> {
            let mut read_block = block_on_channel()?;
            let read = ReadEepromCommand::new(&mut read_block)?;
            joybus::control_byte(&mut read_block, ctrl::ABORT)?;

            let mut write_block = block_on_channel()?;
            let write = WriteEepromCommand::new(&mut write_block)?;
            joybus::control_byte(&mut write_block, ctrl::ABORT)?;

            Ok(Self {
                kind,
                read_block,
                read,
                write_block,
                write,
                pos: 0,
            })
        };

        match build() {
            Ok(eeprom) => Some(eeprom),
            Err(err) => panic!("eeprom: blocks don't fit the pif ram: {err}"),
        }
    }

    pub fn kind(&self) -> EepromKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.kind.size() as u64
    }

    pub fn read_block(&mut self, block: u8, out: &mut [u8; BLOCK_SIZE]) -> Result<(), JoybusError> {
        self.read.command().reset(&mut self.read_block);
        self.read.set_block(&mut self.read_block, block);
        super::run(&mut self.read_block);

        out.copy_from_slice(self.read.data(&self.read_block)?);
        Ok(())
    }

    pub fn write_block(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<(), JoybusError> {
        self.write.command().reset(&mut self.write_block);
        self.write.set_block(&mut self.write_block, block, data)?;
        super::run(&mut self.write_block);

        self.write.result(&self.write_block).map(|_| ())
    }

    fn check_range(&self, len: usize, offset: u64) -> Result<usize, AccessoryError> {
        if offset > self.size() {
            return Err(AccessoryError::OutOfRange);
        }

        Ok(len.min((self.size() - offset) as usize))
    }

    pub fn read_at(&mut self, out: &mut [u8], offset: u64) -> Result<usize, AccessoryError> {
        let len = self.check_range(out.len(), offset)?;

        let mut block = [0; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let addr = offset as usize + done;
            let skip = addr % BLOCK_SIZE;
            let n = (BLOCK_SIZE - skip).min(len - done);

            self.read_block((addr / BLOCK_SIZE) as u8, &mut block)
                .context(AccessoryCtx::Joybus)?;
            out[done..done + n].copy_from_slice(&block[skip..skip + n]);
            done += n;
        }

        Ok(len)
    }

    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, AccessoryError> {
        let len = self.check_range(data.len(), offset)?;

        let mut block = [0; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let addr = offset as usize + done;
            let index = (addr / BLOCK_SIZE) as u8;
            let skip = addr % BLOCK_SIZE;
            let n = (BLOCK_SIZE - skip).min(len - done);

            if n != BLOCK_SIZE {
                self.read_block(index, &mut block)
                    .context(AccessoryCtx::Joybus)?;
            }

            block[skip..skip + n].copy_from_slice(&data[done..done + n]);
            self.write_block(index, &block)
                .context(AccessoryCtx::Joybus)?;
            done += n;
        }

        Ok(len)
    }
}

impl Read for Eeprom {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for Eeprom {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Eeprom {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = super::seek_within(self.pos, self.size(), pos)?;
        Ok(self.pos)
    }
}
