//! Microcode: a program for the RSP along with its initial data.
use std::io::{Read, Seek, Write};

use easyerr::{Error, ResultExt};
use images::ucode::{UcodeImage, UcodeImageError};

use crate::cpu::Buffer;

use super::MEM_SIZE;

#[derive(Debug, Error)]
pub enum UcodeError {
    #[error("{section} section of {len} bytes doesn't fit the rsp memory")]
    TooLarge { section: &'static str, len: usize },
    #[error(transparent)]
    Image { source: UcodeImageError },
}

/// A program for the RSP. The text is copied to IMEM and the data to DMEM when loaded.
pub struct Ucode {
    name: String,
    entry: u32,
    text: Buffer,
    data: Buffer,
}

impl Ucode {
    pub fn new(name: impl Into<String>, entry: u32, text: &[u8], data: &[u8]) -> Result<Self, UcodeError> {
        for (section, len) in [("text", text.len()), ("data", data.len())] {
            if len > MEM_SIZE {
                return Err(UcodeError::TooLarge { section, len });
            }
        }

        Ok(Self {
            name: name.into(),
            entry,
            text: padded(text),
            data: padded(data),
        })
    }

    pub fn from_image(image: &UcodeImage) -> Result<Self, UcodeError> {
        Self::new(image.name.clone(), image.entry, &image.text, &image.data)
    }

    /// Reads a ucode container.
    pub fn read(reader: &mut (impl Read + Seek)) -> Result<Self, UcodeError> {
        let image = UcodeImage::read(reader).context(UcodeCtx::Image)?;
        Self::from_image(&image)
    }

    /// Writes the ucode as a container. Sections keep their DMA padding.
    pub fn write(&self, writer: &mut (impl Write + Seek)) -> Result<(), UcodeError> {
        let image = UcodeImage {
            name: self.name.clone(),
            entry: self.entry,
            text: self.text.to_vec(),
            data: self.data.to_vec(),
        };

        image.write(writer).context(UcodeCtx::Image)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Initial value of the program counter.
    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Writes both sections back to memory, so the RSP can DMA them in itself.
    pub fn writeback(&self) {
        self.text.writeback();
        self.data.writeback();
    }

    /// Physical addresses of `text[offset..]` and `data[offset..]`.
    pub(crate) fn text_addr(&self, offset: usize) -> vr4300::PhysAddr {
        self.text.physical() + offset as u32
    }

    pub(crate) fn data_addr(&self, offset: usize) -> vr4300::PhysAddr {
        self.data.physical() + offset as u32
    }
}

impl std::fmt::Debug for Ucode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ucode")
            .field("name", &self.name)
            .field("entry", &format_args!("{:#05x}", self.entry))
            .field("text", &self.text.len())
            .field("data", &self.data.len())
            .finish()
    }
}

/// Copies `bytes` into a cache-safe buffer whose length is a multiple of the DMA granularity.
fn padded(bytes: &[u8]) -> Buffer {
    let mut buf = Buffer::new(bytes.len().next_multiple_of(8));
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}
