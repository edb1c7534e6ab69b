//! Controllers and the paks inserted into them.
#[cfg(test)]
mod test;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, PoisonError};

use easyerr::ResultExt;

use super::joybus::{
    self, ButtonMask, ControllerStateCommand, DeviceType, InfoCommand, JoybusError,
    ReadPakCommand, WritePakCommand, ctrl,
};
use super::{AccessoryCtx, AccessoryError, CommandBlock, PifCommand};

pub const PORTS: usize = 4;

/// Size of the memory a controller pak holds.
pub const PAK_SIZE: usize = 0x8000;
/// Paks are accessed in blocks of this size.
pub const BLOCK_SIZE: usize = 32;

/// Snapshot of a controller port, with the edges since the previous poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct Controller {
    port: u8,
    device: Option<DeviceType>,
    pak: bool,
    down: ButtonMask,
    x: i8,
    y: i8,
    previous: Option<Previous>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Previous {
    present: bool,
    pak: bool,
    down: ButtonMask,
}

impl Controller {
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Device on the port, if any answered.
    pub fn device(&self) -> Option<DeviceType> {
        self.device
    }

    pub fn present(&self) -> bool {
        self.device == Some(DeviceType::CONTROLLER)
    }

    /// Whether a pak is inserted.
    pub fn pak(&self) -> bool {
        self.pak
    }

    pub fn down(&self) -> ButtonMask {
        self.down
    }

    pub fn x(&self) -> i8 {
        self.x
    }

    pub fn y(&self) -> i8 {
        self.y
    }

    fn previous(&self) -> Previous {
        self.previous.unwrap_or_default()
    }

    /// Buttons that changed since the previous poll.
    pub fn changed(&self) -> ButtonMask {
        self.down ^ self.previous().down
    }

    pub fn pressed(&self) -> ButtonMask {
        self.changed() & self.down
    }

    pub fn released(&self) -> ButtonMask {
        self.changed() & !self.down
    }

    pub fn plugged(&self) -> bool {
        self.present() && !self.previous().present
    }

    pub fn unplugged(&self) -> bool {
        !self.present() && self.previous().present
    }

    pub fn pak_inserted(&self) -> bool {
        self.pak && !self.previous().pak
    }

    pub fn pak_removed(&self) -> bool {
        !self.pak && self.previous().pak
    }
}

struct Poller {
    info: CommandBlock,
    infos: [InfoCommand; PORTS],
    state: CommandBlock,
    states: [ControllerStateCommand; PORTS],
    last: [Controller; PORTS],
}

impl Poller {
    fn new() -> Result<Self, JoybusError> {
        let mut info = CommandBlock::new(PifCommand::ConfigureJoybus);
        let infos = [
            InfoCommand::new(&mut info)?,
            InfoCommand::new(&mut info)?,
            InfoCommand::new(&mut info)?,
            InfoCommand::new(&mut info)?,
        ];
        joybus::control_byte(&mut info, ctrl::ABORT)?;

        let mut state = CommandBlock::new(PifCommand::ConfigureJoybus);
        let states = [
            ControllerStateCommand::new(&mut state)?,
            ControllerStateCommand::new(&mut state)?,
            ControllerStateCommand::new(&mut state)?,
            ControllerStateCommand::new(&mut state)?,
        ];
        joybus::control_byte(&mut state, ctrl::ABORT)?;

        Ok(Self {
            info,
            infos,
            state,
            states,
            last: Default::default(),
        })
    }

    fn poll(&mut self) -> [Controller; PORTS] {
        for info in &self.infos {
            info.command().reset(&mut self.info);
        }
        for state in &self.states {
            state.command().reset(&mut self.state);
        }

        super::run(&mut self.info);
        super::run(&mut self.state);

        let mut controllers = [Controller::default(); PORTS];
        for (port, controller) in controllers.iter_mut().enumerate() {
            let last = &self.last[port];
            controller.port = port as u8;
            controller.previous = Some(Previous {
                present: last.present(),
                pak: last.pak,
                down: last.down,
            });

            match self.infos[port].info(&self.info) {
                Ok((device, status)) => {
                    controller.device = Some(device);
                    controller.pak = device == DeviceType::CONTROLLER && status & 0x01 != 0;
                }
                Err(JoybusError::NoResponse) => (),
                Err(err) => tracing::debug!("controller {port}: info failed: {err}"),
            }

            if controller.present()
                && let Ok((down, x, y)) = self.states[port].state(&self.state)
            {
                controller.down = down;
                controller.x = x;
                controller.y = y;
            }
        }

        self.last = controllers;
        controllers
    }
}

static POLLER: Mutex<Option<Poller>> = Mutex::new(None);

/// Reads the state of the four controller ports.
pub fn poll() -> [Controller; PORTS] {
    let mut poller = POLLER.lock().unwrap_or_else(PoisonError::into_inner);
    let poller = match &mut *poller {
        Some(poller) => poller,
        slot @ None => match Poller::new() {
            Ok(poller) => slot.insert(poller),
            Err(err) => panic!("controller: poll blocks don't fit the pif ram: {err}"),
        },
    };

    poller.poll()
}

/// Kind of pak inserted into a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakKind {
    Memory,
    Rumble,
    Transfer,
}

const PROBE_ADDR: u16 = 0x8000;
const PROBE_RUMBLE: u8 = 0x80;
const PROBE_TRANSFER: u8 = 0x84;
const PROBE_RESET: u8 = 0xfe;
const RUMBLE_ADDR: u16 = 0xc000;

/// Block-level access to the pak of a controller port.
pub struct Pak {
    port: u8,
    read_block: CommandBlock,
    read: ReadPakCommand,
    write_block: CommandBlock,
    write: WritePakCommand,
    pos: u64,
}

/// Starts a command block addressed to `port`.
fn block_for(port: u8) -> Result<CommandBlock, JoybusError> {
    let mut block = CommandBlock::new(PifCommand::ConfigureJoybus);
    for _ in 0..port {
        joybus::control_byte(&mut block, ctrl::SKIP)?;
    }

    Ok(block)
}

impl Pak {
    pub fn new(port: u8) -> Self {
        assert!((port as usize) < PORTS, "invalid controller port");

        // at most three skip bytes and one command, which always fits
        let build = || -> Result<Self, JoybusError> {
            let mut read_block = block_for(port)?;
            let read = ReadPakCommand::new(&mut read_block)?;
            joybus::control_byte(&mut read_block, ctrl::ABORT)?;

            let mut write_block = block_for(port)?;
            let write = WritePakCommand::new(&mut write_block)?;
            joybus::control_byte(&mut write_block, ctrl::ABORT)?;

            Ok(Self {
                port,
                read_block,
                read,
                write_block,
                write,
                pos: 0,
            })
        };

        match build() {
            Ok(pak) => pak,
            Err(err) => panic!("controller: pak blocks don't fit the pif ram: {err}"),
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn size(&self) -> u64 {
        PAK_SIZE as u64
    }

    /// Reads the 32-byte block at `addr`, which is rounded down to a block boundary.
    pub fn read_block(&mut self, addr: u16, out: &mut [u8; BLOCK_SIZE]) -> Result<(), JoybusError> {
        self.read.command().reset(&mut self.read_block);
        self.read.set_address(&mut self.read_block, addr);
        super::run(&mut self.read_block);

        out.copy_from_slice(self.read.data(&self.read_block)?);
        Ok(())
    }

    /// Writes the 32-byte block at `addr`, which is rounded down to a block boundary.
    pub fn write_block(&mut self, addr: u16, data: &[u8; BLOCK_SIZE]) -> Result<(), JoybusError> {
        self.write.command().reset(&mut self.write_block);
        self.write.set_address(&mut self.write_block, addr);
        self.write.set_data(&mut self.write_block, data)?;
        super::run(&mut self.write_block);

        self.write.result(&self.write_block)
    }

    fn check_range(&self, len: usize, offset: u64) -> Result<usize, AccessoryError> {
        if offset > self.size() {
            return Err(AccessoryError::OutOfRange);
        }

        Ok(len.min((self.size() - offset) as usize))
    }

    /// Reads pak memory at `offset`. Returns the number of bytes read, short at the end of the
    /// pak.
    pub fn read_at(&mut self, out: &mut [u8], offset: u64) -> Result<usize, AccessoryError> {
        let len = self.check_range(out.len(), offset)?;

        let mut block = [0; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let addr = offset as usize + done;
            let skip = addr % BLOCK_SIZE;
            let n = (BLOCK_SIZE - skip).min(len - done);

            self.read_block(addr as u16, &mut block)
                .context(AccessoryCtx::Joybus)?;
            out[done..done + n].copy_from_slice(&block[skip..skip + n]);
            done += n;
        }

        Ok(len)
    }

    /// Writes pak memory at `offset`. Partial blocks are read back first.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, AccessoryError> {
        let len = self.check_range(data.len(), offset)?;

        let mut block = [0; BLOCK_SIZE];
        let mut done = 0;
        while done < len {
            let addr = offset as usize + done;
            let skip = addr % BLOCK_SIZE;
            let n = (BLOCK_SIZE - skip).min(len - done);

            if n != BLOCK_SIZE {
                self.read_block(addr as u16, &mut block)
                    .context(AccessoryCtx::Joybus)?;
            }

            block[skip..skip + n].copy_from_slice(&data[done..done + n]);
            self.write_block(addr as u16, &block)
                .context(AccessoryCtx::Joybus)?;
            done += n;
        }

        Ok(len)
    }

    /// Identifies the inserted pak by writing probe values to the accessory area.
    pub fn probe(&mut self) -> Result<PakKind, JoybusError> {
        let mut block = [0; BLOCK_SIZE];

        for (probe, kind) in [
            (PROBE_RUMBLE, PakKind::Rumble),
            (PROBE_TRANSFER, PakKind::Transfer),
        ] {
            self.write_block(PROBE_ADDR, &[probe; BLOCK_SIZE])?;
            self.read_block(PROBE_ADDR, &mut block)?;
            if block[BLOCK_SIZE - 1] == probe {
                if kind == PakKind::Transfer {
                    self.write_block(PROBE_ADDR, &[PROBE_RESET; BLOCK_SIZE])?;
                }

                tracing::debug!("controller {}: {kind:?} pak", self.port);
                return Ok(kind);
            }
        }

        tracing::debug!("controller {}: memory pak", self.port);
        Ok(PakKind::Memory)
    }
}

impl Read for Pak {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for Pak {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Pak {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = super::seek_within(self.pos, self.size(), pos)?;
        Ok(self.pos)
    }
}

/// The motor of a rumble pak.
pub struct RumblePak(Pak);

impl RumblePak {
    /// Wraps `pak` if it is a rumble pak.
    pub fn new(mut pak: Pak) -> Result<Option<Self>, JoybusError> {
        Ok((pak.probe()? == PakKind::Rumble).then_some(Self(pak)))
    }

    pub fn set(&mut self, on: bool) -> Result<(), JoybusError> {
        self.0.write_block(RUMBLE_ADDR, &[on as u8; BLOCK_SIZE])
    }

    pub fn into_inner(self) -> Pak {
        self.0
    }
}
