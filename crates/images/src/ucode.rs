//! The container RSP microcode is shipped in: a name, an entry point and the IMEM and DMEM
//! images, big-endian and each prefixed by its length.
#[cfg(test)]
mod test;

use std::io::{self, Read, Seek, Write};

use binrw::{BinRead, BinWrite, binrw};
use easyerr::{Error, ResultExt};

use crate::elf::{Elf, ElfError};

/// Size of each of IMEM and DMEM.
pub const MEM_SIZE: usize = 0x1000;

#[derive(Debug, Error)]
pub enum UcodeImageError {
    #[error("{section} section of {len} bytes doesn't fit the rsp memory")]
    TooLarge { section: &'static str, len: usize },
    #[error("ucode name is not valid utf-8")]
    Name,
    #[error(transparent)]
    Elf { source: ElfError },
    #[error(transparent)]
    Io { source: io::Error },
    #[error(transparent)]
    Format { source: binrw::Error },
}

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UcodeImage {
    #[bw(calc = name.len() as u32)]
    name_len: u32,
    #[br(count = name_len, try_map = String::from_utf8)]
    #[bw(map = |name: &String| name.as_bytes().to_vec())]
    pub name: String,
    /// Initial program counter, relative to the start of IMEM.
    pub entry: u32,
    #[bw(calc = text.len() as u32)]
    text_len: u32,
    #[br(count = text_len)]
    pub text: Vec<u8>,
    #[bw(calc = data.len() as u32)]
    data_len: u32,
    #[br(count = data_len)]
    pub data: Vec<u8>,
}

impl UcodeImage {
    pub fn new(name: impl Into<String>, entry: u32, text: Vec<u8>, data: Vec<u8>) -> Result<Self, UcodeImageError> {
        let image = Self {
            name: name.into(),
            entry,
            text,
            data,
        };

        image.check()?;
        Ok(image)
    }

    fn check(&self) -> Result<(), UcodeImageError> {
        for (section, len) in [("text", self.text.len()), ("data", self.data.len())] {
            if len > MEM_SIZE {
                return Err(UcodeImageError::TooLarge { section, len });
            }
        }

        Ok(())
    }

    /// Extracts a ucode from an executable linked for the RSP: `.text` goes to IMEM and
    /// `.data` to DMEM. A missing `.data` is an empty DMEM image.
    pub fn from_elf<R>(elf: &mut Elf<R>, name: impl Into<String>) -> Result<Self, UcodeImageError>
    where
        R: Read + Seek,
    {
        let text = elf.section_data(".text").context(UcodeImageCtx::Elf)?;
        let data = match elf.section_data(".data") {
            Ok(data) => data,
            Err(ElfError::NoSection { .. }) => Vec::new(),
            Err(source) => return Err(UcodeImageError::Elf { source }),
        };

        let entry = elf.entry() & (MEM_SIZE as u32 - 1);
        Self::new(name, entry, text, data)
    }

    pub fn read(reader: &mut (impl Read + Seek)) -> Result<Self, UcodeImageError> {
        let image = match <Self as BinRead>::read(reader) {
            Ok(image) => image,
            Err(err) if matches!(err.root_cause(), binrw::Error::Custom { .. }) => {
                return Err(UcodeImageError::Name);
            }
            Err(source) => return Err(UcodeImageError::Format { source }),
        };

        image.check()?;
        Ok(image)
    }

    pub fn write(&self, writer: &mut (impl Write + Seek)) -> Result<(), UcodeImageError> {
        <Self as BinWrite>::write(self, writer).context(UcodeImageCtx::Format)
    }
}
