//! Reading of 32-bit big-endian MIPS ELF executables, as produced by N64 toolchains, and
//! flattening them into the raw memory image a ROM or a ucode is built from.
#[cfg(test)]
pub(crate) mod test;

use std::io::{self, Read, Seek, SeekFrom};

use binrw::BinRead;
use easyerr::{Error, ResultExt};

pub const CLASS_32: u8 = 1;
pub const DATA_BIG_ENDIAN: u8 = 2;
pub const MACHINE_MIPS: u16 = 8;

pub const SECTION_PROGBITS: u32 = 1;
pub const SECTION_NOBITS: u32 = 8;

pub const FLAG_WRITE: u32 = 0x1;
pub const FLAG_ALLOC: u32 = 0x2;
pub const FLAG_EXEC: u32 = 0x4;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("unsupported elf: {reason}")]
    Unsupported { reason: &'static str },
    #[error("section {name} at {addr:#010x} is placed before the entry point {entry:#010x}")]
    BeforeEntry { name: String, addr: u32, entry: u32 },
    #[error("no section named {name}")]
    NoSection { name: String },
    #[error(transparent)]
    Io { source: io::Error },
    #[error(transparent)]
    Format { source: binrw::Error },
}

/// The ELF file header.
#[derive(Debug, Clone, BinRead)]
#[br(big, magic = b"\x7fELF")]
pub struct Header {
    pub class: u8,
    pub data: u8,
    pub ident_version: u8,
    #[br(pad_after = 8)]
    pub os_abi: u8,
    pub kind: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub program_headers: u32,
    pub section_headers: u32,
    pub flags: u32,
    pub header_len: u16,
    pub program_header_len: u16,
    pub program_header_count: u16,
    pub section_header_len: u16,
    pub section_header_count: u16,
    /// Index of the section holding section names.
    pub names_index: u16,
}

#[derive(Debug, Clone, Copy, BinRead)]
#[br(big)]
pub struct SectionHeader {
    /// Offset of the name in the section name table.
    pub name: u32,
    pub kind: u32,
    pub flags: u32,
    pub addr: u32,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub align: u32,
    pub entry_len: u32,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub header: SectionHeader,
}

impl Section {
    /// Whether the section is part of the memory image of the program.
    pub fn is_alloc(&self) -> bool {
        self.header.flags & FLAG_ALLOC != 0
    }

    pub fn is_exec(&self) -> bool {
        self.header.flags & FLAG_EXEC != 0
    }

    /// Whether the section has contents in the file.
    pub fn has_data(&self) -> bool {
        self.header.kind == SECTION_PROGBITS
    }
}

/// An ELF file.
#[derive(Debug)]
pub struct Elf<R> {
    reader: R,
    header: Header,
    sections: Vec<Section>,
}

impl<R> Elf<R>
where
    R: Read + Seek,
{
    pub fn read(mut reader: R) -> Result<Self, ElfError> {
        reader.rewind().context(ElfCtx::Io)?;
        let header = Header::read(&mut reader).context(ElfCtx::Format)?;

        if header.class != CLASS_32 {
            return Err(ElfError::Unsupported {
                reason: "not a 32-bit file",
            });
        }

        if header.data != DATA_BIG_ENDIAN {
            return Err(ElfError::Unsupported {
                reason: "not big-endian",
            });
        }

        if header.machine != MACHINE_MIPS {
            return Err(ElfError::Unsupported {
                reason: "not a mips executable",
            });
        }

        let mut headers = Vec::with_capacity(header.section_header_count as usize);
        for i in 0..header.section_header_count as u64 {
            let offset = header.section_headers as u64 + i * header.section_header_len as u64;
            reader.seek(SeekFrom::Start(offset)).context(ElfCtx::Io)?;
            headers.push(SectionHeader::read(&mut reader).context(ElfCtx::Format)?);
        }

        let names = match headers.get(header.names_index as usize) {
            Some(names) => read_data(&mut reader, names)?,
            None => Vec::new(),
        };

        let sections = headers
            .into_iter()
            .map(|header| {
                let name = names
                    .get(header.name as usize..)
                    .and_then(|name| name.split(|&b| b == 0).next())
                    .map(|name| String::from_utf8_lossy(name).into_owned())
                    .unwrap_or_default();

                Section { name, header }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "elf: entry {:#010x}, {} sections",
            header.entry,
            sections.len()
        );

        Ok(Self {
            reader,
            header,
            sections,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn entry(&self) -> u32 {
        self.header.entry
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Result<&Section, ElfError> {
        self.sections
            .iter()
            .find(|section| section.name == name)
            .ok_or_else(|| ElfError::NoSection { name: name.into() })
    }

    /// Contents of the section named `name`. Sections without data in the file read as zeros.
    pub fn section_data(&mut self, name: &str) -> Result<Vec<u8>, ElfError> {
        let header = self.section(name)?.header;
        read_data(&mut self.reader, &header)
    }

    /// Flattens the allocated sections into a memory image starting at the entry point. Gaps
    /// between sections are zero filled and sections without data in the file are left out.
    pub fn objcopy(&mut self) -> Result<Vec<u8>, ElfError> {
        let entry = self.entry();

        let mut loaded = self
            .sections
            .iter()
            .filter(|section| section.is_alloc() && section.has_data() && section.header.size > 0)
            .cloned()
            .collect::<Vec<_>>();
        loaded.sort_by_key(|section| section.header.addr);

        let mut image = Vec::new();
        for section in loaded {
            let addr = section.header.addr;
            if addr < entry {
                return Err(ElfError::BeforeEntry {
                    name: section.name,
                    addr,
                    entry,
                });
            }

            let data = read_data(&mut self.reader, &section.header)?;
            let start = (addr - entry) as usize;
            let end = start + data.len();
            if image.len() < end {
                image.resize(end, 0);
            }

            tracing::trace!("elf: {} at {start:#x}..{end:#x}", section.name);
            image[start..end].copy_from_slice(&data);
        }

        Ok(image)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn read_data(reader: &mut (impl Read + Seek), header: &SectionHeader) -> Result<Vec<u8>, ElfError> {
    let mut data = vec![0; header.size as usize];
    if header.kind != SECTION_NOBITS {
        reader
            .seek(SeekFrom::Start(header.offset as u64))
            .context(ElfCtx::Io)?;
        reader.read_exact(&mut data).context(ElfCtx::Io)?;
    }

    Ok(data)
}
