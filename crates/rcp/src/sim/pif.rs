//! PIF and the joybus devices behind it.
use crate::serial::joybus::crc8;

const COMMAND: usize = 63;
const CONFIGURE_JOYBUS: u8 = 0x01;

const PAK_SIZE: usize = 0x8000;

/// An accessory inserted into a controller.
#[derive(Debug, Clone)]
pub enum Pak {
    Memory(Vec<u8>),
    Rumble { probe: u8, on: bool },
}

impl Pak {
    pub fn memory() -> Self {
        Self::Memory(vec![0; PAK_SIZE])
    }

    pub fn rumble() -> Self {
        Self::Rumble { probe: 0, on: false }
    }

    fn read(&self, addr: usize, out: &mut [u8]) {
        match self {
            Pak::Memory(data) => {
                for (i, byte) in out.iter_mut().enumerate() {
                    *byte = data.get(addr + i).copied().unwrap_or(0);
                }
            }
            Pak::Rumble { probe, .. } => {
                let value = if (0x8000..0x9000).contains(&addr) && *probe == 0x80 {
                    0x80
                } else {
                    0x00
                };
                out.fill(value);
            }
        }
    }

    fn write(&mut self, addr: usize, data: &[u8]) {
        match self {
            Pak::Memory(mem) => {
                if addr + data.len() <= mem.len() {
                    mem[addr..addr + data.len()].copy_from_slice(data);
                }
            }
            Pak::Rumble { probe, on } => match addr {
                0x8000..0x9000 => *probe = data[data.len() - 1],
                0xC000..0xD000 => *on = data[data.len() - 1] & 1 != 0,
                _ => (),
            },
        }
    }
}

/// A controller plugged into a port.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    pub buttons: u16,
    pub x: i8,
    pub y: i8,
    pub pak: Option<Pak>,
}

impl Controller {
    /// Executes a command. Returns false if the controller doesn't answer it.
    fn execute(&mut self, tx: &[u8], rx: &mut [u8]) -> bool {
        match (tx[0], tx.len(), rx.len()) {
            (0x00 | 0xFF, 1, 3) => {
                let status = if self.pak.is_some() { 0x01 } else { 0x02 };
                rx.copy_from_slice(&[0x05, 0x00, status]);
            }
            (0x01, 1, 4) => {
                let [hi, lo] = self.buttons.to_be_bytes();
                rx.copy_from_slice(&[hi, lo, self.x as u8, self.y as u8]);
            }
            (0x02, 3, 33) => {
                let addr = u16::from_be_bytes([tx[1], tx[2]]) as usize & !0x1F;
                let (data, crc) = rx.split_at_mut(32);
                match &self.pak {
                    Some(pak) => {
                        pak.read(addr, data);
                        crc[0] = crc8(data);
                    }
                    None => {
                        data.fill(0);
                        crc[0] = !crc8(data);
                    }
                }
            }
            (0x03, 35, 1) => {
                let addr = u16::from_be_bytes([tx[1], tx[2]]) as usize & !0x1F;
                let data = &tx[3..];
                match &mut self.pak {
                    Some(pak) => {
                        pak.write(addr, data);
                        rx[0] = crc8(data);
                    }
                    None => rx[0] = !crc8(data),
                }
            }
            _ => return false,
        }

        true
    }
}

#[derive(Debug, Clone)]
pub struct Pif {
    pub ram: [u8; 64],
    pub ports: [Option<Controller>; 4],
    pub eeprom: Option<Vec<u8>>,
}

impl Default for Pif {
    fn default() -> Self {
        Self {
            ram: [0; 64],
            ports: Default::default(),
            eeprom: None,
        }
    }
}

fn eeprom_execute(eeprom: &mut [u8], tx: &[u8], rx: &mut [u8]) -> bool {
    match (tx[0], tx.len(), rx.len()) {
        (0x00 | 0xFF, 1, 3) => {
            let kind = if eeprom.len() > 512 { 0xC0 } else { 0x80 };
            rx.copy_from_slice(&[0x00, kind, 0x00]);
        }
        (0x04, 2, 8) => {
            let offset = tx[1] as usize * 8;
            match eeprom.get(offset..offset + 8) {
                Some(block) => rx.copy_from_slice(block),
                None => rx.fill(0),
            }
        }
        (0x05, 10, 1) => {
            let offset = tx[1] as usize * 8;
            if let Some(block) = eeprom.get_mut(offset..offset + 8) {
                block.copy_from_slice(&tx[2..]);
            }
            rx[0] = 0x00;
        }
        _ => return false,
    }

    true
}

impl Pif {
    /// Runs the command in the last byte of PIF RAM.
    pub fn process(&mut self) {
        let command = self.ram[COMMAND];
        if command & CONFIGURE_JOYBUS != 0 {
            self.joybus();
        }

        self.ram[COMMAND] = 0;
    }

    fn joybus(&mut self) {
        let mut index = 0;
        let mut channel = 0;
        while index < COMMAND {
            let header = self.ram[index];
            match header {
                0x00 | 0xFD => {
                    channel += 1;
                    index += 1;
                    continue;
                }
                0xFE => break,
                0xFF => {
                    index += 1;
                    continue;
                }
                _ => (),
            }

            let tx_len = (header & 0x3F) as usize;
            let Some(&rx_header) = self.ram.get(index + 1) else {
                break;
            };
            let rx_len = (rx_header & 0x3F) as usize;

            let tx_start = index + 2;
            let rx_start = tx_start + tx_len;
            let end = rx_start + rx_len;
            if end > COMMAND {
                break;
            }

            if header & 0x80 == 0 && tx_len > 0 {
                let (head, rest) = self.ram.split_at_mut(rx_start);
                let tx = &head[tx_start..];
                let rx = &mut rest[..rx_len];

                let answered = match channel {
                    0..4 => match &mut self.ports[channel] {
                        Some(controller) => controller.execute(tx, rx),
                        None => false,
                    },
                    4 => match &mut self.eeprom {
                        Some(eeprom) => eeprom_execute(eeprom, tx, rx),
                        None => false,
                    },
                    _ => false,
                };

                if !answered {
                    self.ram[index + 1] |= 0x80;
                }
            }

            index = end;
            channel += 1;
        }
    }
}
