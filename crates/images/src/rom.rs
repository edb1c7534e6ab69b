//! Cartridge ROM images in big-endian (`.z64`) byte order.
//!
//! A ROM starts with a 64 byte header, followed by the IPL3 boot code up to `0x1000` and then
//! the program. The IPL3 refuses to boot unless the header holds the checksum of the first
//! megabyte of the program, so the program is padded to at least that size.
#[cfg(test)]
mod test;

use std::io::{self, Read, Seek, Write};

use binrw::{BinRead, BinWrite};
use easyerr::{Error, ResultExt};

pub const HEADER_LEN: usize = 0x40;
/// Offset of the program in the ROM.
pub const PROGRAM_OFFSET: usize = 0x1000;
pub const IPL3_LEN: usize = PROGRAM_OFFSET - HEADER_LEN;
/// Length of the program the checksum covers.
pub const CHECKSUM_LEN: usize = 0x10_0000;
/// Largest program that fits the cartridge address space.
pub const MAX_PROGRAM_LEN: usize = 0x0400_0000 - PROGRAM_OFFSET;
pub const TITLE_LEN: usize = 20;

/// Checksum seed of the 6102 boot chip.
const SEED: u32 = 0xF8CA_4DDC;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ipl3 must be {IPL3_LEN:#x} bytes, or {PROGRAM_OFFSET:#x} with a header, not {len:#x}")]
    Ipl3 { len: usize },
    #[error("title {title:?} is not ascii or longer than {TITLE_LEN} characters")]
    Title { title: String },
    #[error("program of {len} bytes doesn't fit a cartridge")]
    TooLarge { len: usize },
    #[error("rom is shorter than its checksummed area")]
    Truncated,
    #[error(transparent)]
    Io { source: io::Error },
    #[error(transparent)]
    Format { source: binrw::Error },
}

/// The ROM header. The leading PI configuration word doubles as the byte order marker.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big, magic = 0x8037_1240_u32)]
pub struct Header {
    pub clock_rate: u32,
    pub boot_address: u32,
    pub libultra_version: u32,
    pub checksum: [u32; 2],
    #[brw(pad_before = 8)]
    pub title: [u8; TITLE_LEN],
    #[brw(pad_before = 7)]
    pub category: u8,
    pub unique_code: [u8; 2],
    pub destination: u8,
    pub version: u8,
}

impl Header {
    pub fn new(title: &str) -> Result<Self, RomError> {
        if !title.is_ascii() || title.len() > TITLE_LEN {
            return Err(RomError::Title {
                title: title.into(),
            });
        }

        let mut padded = [b' '; TITLE_LEN];
        padded[..title.len()].copy_from_slice(title.as_bytes());

        Ok(Self {
            clock_rate: 0xF,
            boot_address: 0x8000_0400,
            libultra_version: 0x1444,
            checksum: [0; 2],
            title: padded,
            category: b'N',
            unique_code: *b"  ",
            destination: b' ',
            version: 0,
        })
    }

    pub fn title(&self) -> String {
        String::from_utf8_lossy(&self.title).trim_end().to_owned()
    }
}

/// The checksum the IPL3 of the 6102 boot chip verifies, over the first megabyte of `program`.
///
/// # Panics
/// Panics if `program` is shorter than [`CHECKSUM_LEN`].
pub fn checksum(program: &[u8]) -> [u32; 2] {
    let mut t = [SEED; 6];

    for word in program[..CHECKSUM_LEN].chunks_exact(4) {
        let c = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);

        let sum = t[5].wrapping_add(c);
        if sum < t[5] {
            t[3] = t[3].wrapping_add(1);
        }
        t[5] = sum;
        t[2] ^= c;

        let rotated = c.rotate_left(c & 0x1F);
        t[4] = t[4].wrapping_add(rotated);
        if c < t[1] {
            t[1] ^= rotated;
        } else {
            t[1] ^= t[5] ^ c;
        }
        t[0] = t[0].wrapping_add(c ^ t[4]);
    }

    [t[5] ^ t[3] ^ t[2], t[4] ^ t[1] ^ t[0]]
}

/// A ROM image.
#[derive(Debug, Clone)]
pub struct Rom {
    pub header: Header,
    pub ipl3: Vec<u8>,
    pub program: Vec<u8>,
}

impl Rom {
    /// Builds a ROM booting `program`. `ipl3` is either the bare boot code or a whole boot
    /// block, whose header is then replaced.
    pub fn new(ipl3: &[u8], program: &[u8], title: &str) -> Result<Self, RomError> {
        let ipl3 = match ipl3.len() {
            IPL3_LEN => ipl3,
            PROGRAM_OFFSET => &ipl3[HEADER_LEN..],
            len => return Err(RomError::Ipl3 { len }),
        };

        if program.len() > MAX_PROGRAM_LEN {
            return Err(RomError::TooLarge { len: program.len() });
        }

        let mut program = program.to_vec();
        if program.len() < CHECKSUM_LEN {
            program.resize(CHECKSUM_LEN, 0xFF);
        }

        let mut header = Header::new(title)?;
        header.checksum = checksum(&program);
        tracing::debug!(
            "rom: {title:?}, {} bytes, checksum {:08x} {:08x}",
            program.len(),
            header.checksum[0],
            header.checksum[1]
        );

        Ok(Self {
            header,
            ipl3: ipl3.to_vec(),
            program,
        })
    }

    pub fn read(reader: &mut (impl Read + Seek)) -> Result<Self, RomError> {
        let header = Header::read(reader).context(RomCtx::Format)?;

        let mut ipl3 = vec![0; IPL3_LEN];
        reader.read_exact(&mut ipl3).context(RomCtx::Io)?;

        let mut program = Vec::new();
        reader.read_to_end(&mut program).context(RomCtx::Io)?;
        if program.len() < CHECKSUM_LEN {
            return Err(RomError::Truncated);
        }

        Ok(Self {
            header,
            ipl3,
            program,
        })
    }

    pub fn write(&self, writer: &mut (impl Write + Seek)) -> Result<(), RomError> {
        self.header.write(writer).context(RomCtx::Format)?;
        writer.write_all(&self.ipl3).context(RomCtx::Io)?;
        writer.write_all(&self.program).context(RomCtx::Io)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RomError> {
        let mut bytes = io::Cursor::new(Vec::with_capacity(PROGRAM_OFFSET + self.program.len()));
        self.write(&mut bytes)?;
        Ok(bytes.into_inner())
    }

    /// Whether the header checksum matches the program.
    pub fn is_valid(&self) -> bool {
        self.header.checksum == checksum(&self.program)
    }
}
