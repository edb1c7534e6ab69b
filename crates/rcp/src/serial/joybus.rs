//! Joybus messages as the PIF lays them out in its RAM.
//!
//! Every command is preceded by a two byte header with the number of bytes to send and to
//! receive, followed by the bytes to send (starting with the command byte) and space for the
//! reply. Flags in the header bytes tell the PIF to skip or reset the channel, and tell the CPU
//! whether the device answered.
//!
//! This module only builds and decodes messages. Running them is up to [`crate::serial`].
#[cfg(test)]
mod test;

use std::ops::{BitAnd, BitOr, BitXor, Not};

use easyerr::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoybusError {
    #[error("pif reported no response")]
    NoResponse,
    #[error("pif reported an invalid response")]
    InvalidResponse,
    #[error("invalid header")]
    Header,
    #[error("checksum mismatch")]
    Checksum,
    #[error("invalid data length")]
    DataLength,
    #[error("command block is full")]
    Full,
}

/// Space for messages.
pub trait Allocator {
    /// Reserves the next `n` bytes. Returns their offset.
    fn alloc(&mut self, n: usize) -> Result<usize, JoybusError>;

    fn data(&self) -> &[u8];

    fn data_mut(&mut self) -> &mut [u8];
}

/// Control bytes between messages.
pub mod ctrl {
    /// Skips to the next channel.
    pub const SKIP: u8 = 0x00;
    /// Skips to the next channel as well. Some devices want this one.
    pub const RESET: u8 = 0xfd;
    /// Ends the message list.
    pub const ABORT: u8 = 0xfe;
    /// Ignored.
    pub const NOP: u8 = 0xff;
}

/// Appends a control byte.
pub fn control_byte(alloc: &mut impl Allocator, ctrl: u8) -> Result<(), JoybusError> {
    let offset = alloc.alloc(1)?;
    alloc.data_mut()[offset] = ctrl;
    Ok(())
}

const HEADER_LEN: usize = 3;

// first header byte
const FLAG_SKIP: u8 = 0x80;
const FLAG_RESET: u8 = 0x40;

// second header byte
const FLAG_NO_RESPONSE: u8 = 0x80;
const FLAG_INVALID_RESPONSE: u8 = 0x40;

const FLAG_MASK: u8 = 0xc0;

/// Header of each command: bytes to send, bytes to receive and the command byte.
type Header = [u8; HEADER_LEN];

const RESET: Header = [0x01, 0x03, 0xff];
const INFO: Header = [0x01, 0x03, 0x00];
const CONTROLLER_STATE: Header = [0x01, 0x04, 0x01];
const READ_PAK: Header = [0x03, 0x21, 0x02];
const WRITE_PAK: Header = [0x23, 0x01, 0x03];
const READ_EEPROM: Header = [0x02, 0x08, 0x04];
const WRITE_EEPROM: Header = [0x0a, 0x01, 0x05];
const RTC_INFO: Header = [0x01, 0x03, 0x06];
const READ_RTC: Header = [0x02, 0x09, 0x07];
const WRITE_RTC: Header = [0x0a, 0x01, 0x08];

/// CRC-8 with polynomial 0x85, used by paks to check transferred blocks.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x85
            } else {
                crc << 1
            };
        }
    }

    crc
}

/// Encodes a pak address: the low five bits of the 32-byte aligned `addr` are replaced by a
/// checksum of the high eleven.
pub fn address_crc(addr: u16) -> u16 {
    const LUT: [u16; 11] = [
        0x01, 0x1a, 0x0d, 0x1c, 0x0e, 0x07, 0x19, 0x16, 0x0b, 0x1f, 0x15,
    ];

    let mut encoded = addr & !0x1f;
    for (i, value) in LUT.iter().enumerate() {
        if addr & (1 << (15 - i)) != 0 {
            encoded ^= value;
        }
    }

    encoded
}

/// A message in a command block, identified by its offset.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    offset: usize,
    header: Header,
}

impl Command {
    fn new(alloc: &mut impl Allocator, header: Header) -> Result<Self, JoybusError> {
        let len = 2 + header[0] as usize + header[1] as usize;
        let offset = alloc.alloc(len)?;
        let data = alloc.data_mut();
        data[offset..offset + len].fill(0);
        data[offset..offset + HEADER_LEN].copy_from_slice(&header);
        Ok(Self { offset, header })
    }

    fn tx_size(&self) -> usize {
        self.header[0] as usize
    }

    fn rx_size(&self) -> usize {
        self.header[1] as usize
    }

    fn tx_mut<'a>(&self, data: &'a mut [u8]) -> &'a mut [u8] {
        &mut data[self.offset + 2..][..self.tx_size()]
    }

    fn rx<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset + 2 + self.tx_size()..][..self.rx_size()]
    }

    /// Prepares the message to be sent again: clears the reply and the flags the PIF set.
    pub fn reset(&self, alloc: &mut impl Allocator) {
        let data = alloc.data_mut();
        data[self.offset..self.offset + HEADER_LEN].copy_from_slice(&self.header);
        let rx = self.offset + 2 + self.tx_size();
        data[rx..rx + self.rx_size()].fill(0);
    }

    /// Sets whether the PIF should skip this message.
    pub fn set_skip(&self, alloc: &mut impl Allocator, skip: bool) {
        let byte = &mut alloc.data_mut()[self.offset];
        *byte = if skip { *byte | FLAG_SKIP } else { *byte & !FLAG_SKIP };
    }

    /// Sets whether the PIF should reset the channel before sending this message.
    pub fn set_channel_reset(&self, alloc: &mut impl Allocator, reset: bool) {
        let byte = &mut alloc.data_mut()[self.offset];
        *byte = if reset {
            *byte | FLAG_RESET
        } else {
            *byte & !FLAG_RESET
        };
    }

    /// Checks the header the PIF left behind.
    fn validate(&self, data: &[u8]) -> Result<(), JoybusError> {
        let mut got: Header = [0; HEADER_LEN];
        got.copy_from_slice(&data[self.offset..self.offset + HEADER_LEN]);
        got[0] &= !FLAG_MASK;
        if got == self.header {
            return Ok(());
        }

        let flags = got[1] & FLAG_MASK;
        got[1] &= !FLAG_MASK;
        if got != self.header {
            return Err(JoybusError::Header);
        }

        match flags {
            FLAG_NO_RESPONSE => Err(JoybusError::NoResponse),
            FLAG_INVALID_RESPONSE => Err(JoybusError::InvalidResponse),
            _ => Err(JoybusError::Header),
        }
    }
}

/// Kind of device on a joybus channel, as reported by the info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceType(pub u16);

impl DeviceType {
    pub const CONTROLLER: Self = Self(0x0500);
    pub const VRU: Self = Self(0x0001);
    pub const MOUSE: Self = Self(0x0200);
    pub const KEYBOARD: Self = Self(0x0002);
    pub const LINK_CABLE: Self = Self(0x0003);
    pub const EEPROM_4K: Self = Self(0x0080);
    pub const EEPROM_16K: Self = Self(0x00c0);
}

/// Info or reset command: both reply with the device type and a status byte.
#[derive(Debug, Clone, Copy)]
pub struct InfoCommand(Command);

impl InfoCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, INFO).map(Self)
    }

    /// Like [`InfoCommand::new`], but also resets the device.
    pub fn new_reset(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, RESET).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn info(&self, alloc: &impl Allocator) -> Result<(DeviceType, u8), JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        let rx = self.0.rx(data);
        Ok((DeviceType(u16::from_be_bytes([rx[0], rx[1]])), rx[2]))
    }
}

/// Buttons of a controller, in the bit order of the state reply.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ButtonMask(pub u16);

impl ButtonMask {
    pub const NONE: Self = Self(0);
    pub const A: Self = Self(1 << 15);
    pub const B: Self = Self(1 << 14);
    pub const Z: Self = Self(1 << 13);
    pub const START: Self = Self(1 << 12);
    pub const D_UP: Self = Self(1 << 11);
    pub const D_DOWN: Self = Self(1 << 10);
    pub const D_LEFT: Self = Self(1 << 9);
    pub const D_RIGHT: Self = Self(1 << 8);
    /// L, R and start pressed at once.
    pub const RESET: Self = Self(1 << 7);
    pub const UNKNOWN: Self = Self(1 << 6);
    pub const L: Self = Self(1 << 5);
    pub const R: Self = Self(1 << 4);
    pub const C_UP: Self = Self(1 << 3);
    pub const C_DOWN: Self = Self(1 << 2);
    pub const C_LEFT: Self = Self(1 << 1);
    pub const C_RIGHT: Self = Self(1 << 0);

    const NAMES: [&str; 16] = [
        "A", "B", "Z", "Start", "↑", "↓", "←", "→", "Reset", "Unknown", "L", "R", "C↑", "C↓", "C←",
        "C→",
    ];

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitAnd for ButtonMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for ButtonMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for ButtonMask {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Not for ButtonMask {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl std::fmt::Display for ButtonMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (i, name) in Self::NAMES.iter().enumerate() {
            if self.0 & (1 << (15 - i)) == 0 {
                continue;
            }

            if !first {
                f.write_str(" + ")?;
            }

            f.write_str(name)?;
            first = false;
        }

        Ok(())
    }
}

impl std::fmt::Debug for ButtonMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ButtonMask({self})")
    }
}

/// Buttons and stick position of a controller.
#[derive(Debug, Clone, Copy)]
pub struct ControllerStateCommand(Command);

impl ControllerStateCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, CONTROLLER_STATE).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn state(&self, alloc: &impl Allocator) -> Result<(ButtonMask, i8, i8), JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        let rx = self.0.rx(data);
        Ok((
            ButtonMask(u16::from_be_bytes([rx[0], rx[1]])),
            rx[2] as i8,
            rx[3] as i8,
        ))
    }
}

fn set_pak_address(cmd: &Command, data: &mut [u8], addr: u16) {
    let encoded = address_crc(addr).to_be_bytes();
    cmd.tx_mut(data)[1..3].copy_from_slice(&encoded);
}

/// Reads a 32-byte block from a controller pak.
#[derive(Debug, Clone, Copy)]
pub struct ReadPakCommand(Command);

impl ReadPakCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, READ_PAK).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn set_address(&self, alloc: &mut impl Allocator, addr: u16) {
        set_pak_address(&self.0, alloc.data_mut(), addr);
    }

    /// Returns the block read, after checking it arrived intact.
    pub fn data<'a>(&self, alloc: &'a impl Allocator) -> Result<&'a [u8], JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        let (block, crc) = self.0.rx(data).split_at(32);
        if crc8(block) != crc[0] {
            return Err(JoybusError::Checksum);
        }

        Ok(block)
    }

    /// Returns the block as received, without any checks.
    pub fn raw_data<'a>(&self, alloc: &'a impl Allocator) -> &'a [u8] {
        &self.0.rx(alloc.data())[..32]
    }
}

/// Writes a 32-byte block to a controller pak.
#[derive(Debug, Clone, Copy)]
pub struct WritePakCommand {
    cmd: Command,
    crc: u8,
}

impl WritePakCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, WRITE_PAK).map(|cmd| Self { cmd, crc: 0 })
    }

    pub fn command(&self) -> &Command {
        &self.cmd
    }

    pub fn set_address(&self, alloc: &mut impl Allocator, addr: u16) {
        set_pak_address(&self.cmd, alloc.data_mut(), addr);
    }

    /// Sets the block to write. `src` must be exactly 32 bytes.
    pub fn set_data(&mut self, alloc: &mut impl Allocator, src: &[u8]) -> Result<(), JoybusError> {
        let tx = self.cmd.tx_mut(alloc.data_mut());
        let block = &mut tx[3..];
        if src.len() != block.len() {
            return Err(JoybusError::DataLength);
        }

        block.copy_from_slice(src);
        self.crc = crc8(src);
        Ok(())
    }

    /// Checks that the pak received the block intact.
    pub fn result(&self, alloc: &impl Allocator) -> Result<(), JoybusError> {
        let data = alloc.data();
        self.cmd.validate(data)?;
        if self.cmd.rx(data)[0] != self.crc {
            return Err(JoybusError::Checksum);
        }

        Ok(())
    }
}

/// Reads an 8-byte EEPROM block.
#[derive(Debug, Clone, Copy)]
pub struct ReadEepromCommand(Command);

impl ReadEepromCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, READ_EEPROM).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn set_block(&self, alloc: &mut impl Allocator, block: u8) {
        self.0.tx_mut(alloc.data_mut())[1] = block;
    }

    pub fn data<'a>(&self, alloc: &'a impl Allocator) -> Result<&'a [u8], JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        Ok(self.0.rx(data))
    }
}

/// Writes an 8-byte EEPROM block.
#[derive(Debug, Clone, Copy)]
pub struct WriteEepromCommand(Command);

impl WriteEepromCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, WRITE_EEPROM).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn set_block(&self, alloc: &mut impl Allocator, block: u8, src: &[u8]) -> Result<(), JoybusError> {
        let tx = self.0.tx_mut(alloc.data_mut());
        if src.len() != tx.len() - 2 {
            return Err(JoybusError::DataLength);
        }

        tx[1] = block;
        tx[2..].copy_from_slice(src);
        Ok(())
    }

    /// Returns the status byte. Bit 7 is set while the EEPROM is busy writing.
    pub fn result(&self, alloc: &impl Allocator) -> Result<u8, JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        Ok(self.0.rx(data)[0])
    }
}

/// Queries the real-time clock.
#[derive(Debug, Clone, Copy)]
pub struct RtcInfoCommand(Command);

impl RtcInfoCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, RTC_INFO).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn info(&self, alloc: &impl Allocator) -> Result<(DeviceType, u8), JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        let rx = self.0.rx(data);
        Ok((DeviceType(u16::from_be_bytes([rx[0], rx[1]])), rx[2]))
    }
}

/// Reads one of the real-time clock's 8-byte blocks.
#[derive(Debug, Clone, Copy)]
pub struct ReadRtcCommand(Command);

impl ReadRtcCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, READ_RTC).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn set_block(&self, alloc: &mut impl Allocator, block: u8) {
        self.0.tx_mut(alloc.data_mut())[1] = block;
    }

    /// Returns the block and the status byte.
    pub fn data<'a>(&self, alloc: &'a impl Allocator) -> Result<(&'a [u8], u8), JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        let (block, status) = self.0.rx(data).split_at(8);
        Ok((block, status[0]))
    }
}

/// Writes one of the real-time clock's 8-byte blocks.
#[derive(Debug, Clone, Copy)]
pub struct WriteRtcCommand(Command);

impl WriteRtcCommand {
    pub fn new(alloc: &mut impl Allocator) -> Result<Self, JoybusError> {
        Command::new(alloc, WRITE_RTC).map(Self)
    }

    pub fn command(&self) -> &Command {
        &self.0
    }

    pub fn set_block(&self, alloc: &mut impl Allocator, block: u8, src: &[u8]) -> Result<(), JoybusError> {
        let tx = self.0.tx_mut(alloc.data_mut());
        if src.len() != tx.len() - 2 {
            return Err(JoybusError::DataLength);
        }

        tx[1] = block;
        tx[2..].copy_from_slice(src);
        Ok(())
    }

    pub fn result(&self, alloc: &impl Allocator) -> Result<u8, JoybusError> {
        let data = alloc.data();
        self.0.validate(data)?;
        Ok(self.0.rx(data)[0])
    }
}
