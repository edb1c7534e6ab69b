//! The controller pak filesystem.
//!
//! A pak holds at most sixteen files (notes) in a single root directory. Besides its name, each
//! note has a game code and a company code, and its size is always a multiple of the 256 byte
//! page. Names are at most sixteen characters and an extension of up to four, in the character
//! set of [`charmap`].
//!
//! The first page holds the label and four copies of the ID sector. It's followed by the inode
//! table, its backup and two pages of notes. A file is a linked list of pages through the inode
//! table.
#[cfg(test)]
mod test;

pub mod charmap;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

use binrw::{BinRead, BinWrite, binrw};
use easyerr::{Error, ResultExt};

pub const PAGE_SIZE: u64 = 256;
pub const PAGES_PER_BANK: usize = 128;
/// Size of a standard pak with a single bank.
pub const BANK_SIZE: u64 = PAGE_SIZE * PAGES_PER_BANK as u64;
pub const NOTE_COUNT: usize = 16;
pub const NAME_LEN: usize = 16;
pub const EXTENSION_LEN: usize = 4;

const LABEL_LEN: usize = 32;
const ID_SECTORS: [u64; 4] = [0x20, 0x60, 0x80, 0xC0];
const NOTE_LEN: u64 = 32;

const INODE_LAST: u16 = 1;
const INODE_FREE: u16 = 3;

#[derive(Debug, Error)]
pub enum PakfsError {
    #[error("damaged filesystem")]
    Inconsistent,
    #[error("no space left on device")]
    NoSpace,
    #[error("read-only file system")]
    ReadOnly,
    #[error("is a directory")]
    IsDir,
    #[error("{name}: file name too long")]
    NameTooLong { name: String },
    #[error("{name}: file exists")]
    Exist { name: String },
    #[error("{name}: no such file")]
    NotExist { name: String },
    #[error("invalid argument: {reason}")]
    Invalid { reason: String },
    #[error(transparent)]
    Io { source: io::Error },
    #[error(transparent)]
    Format { source: binrw::Error },
}

/// Maps write failures of read-only devices to [`PakfsError::ReadOnly`].
fn write_error(err: io::Error) -> PakfsError {
    match err.kind() {
        io::ErrorKind::ReadOnlyFilesystem | io::ErrorKind::PermissionDenied => PakfsError::ReadOnly,
        _ => PakfsError::Io { source: err },
    }
}

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, Default)]
struct IdSector {
    repaired: u32,
    random: u32,
    serial: [u8; 16],
    device_id: u16,
    bank_count: u8,
    version: u8,
    checksum: u16,
    checksum_inv: u16,
}

impl IdSector {
    fn new(bank_count: u8) -> Self {
        let mut id = Self {
            device_id: 1,
            bank_count,
            ..Default::default()
        };

        (id.checksum, id.checksum_inv) = id.checksums();
        id
    }

    /// Sum of the big-endian halfwords before the checksums, and its complement.
    fn checksums(&self) -> (u16, u16) {
        let words = [
            (self.repaired >> 16) as u16,
            self.repaired as u16,
            (self.random >> 16) as u16,
            self.random as u16,
            self.device_id,
            u16::from_be_bytes([self.bank_count, self.version]),
        ];

        let serial = self
            .serial
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));

        let sum = words
            .into_iter()
            .chain(serial)
            .fold(0u16, u16::wrapping_add);

        (sum, 0xFFF2u16.wrapping_sub(sum))
    }

    fn is_valid(&self) -> bool {
        self.bank_count != 0 && self.checksums() == (self.checksum, self.checksum_inv)
    }
}

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Note {
    game_code: [u8; 4],
    company_code: [u8; 2],
    /// Zero for unused notes, [`INODE_LAST`] for empty files.
    start_page: u16,
    status: u8,
    reserved: [u8; 3],
    extension: [u8; EXTENSION_LEN],
    name: [u8; NAME_LEN],
}

impl Note {
    fn is_used(&self) -> bool {
        self.start_page != 0
    }

    fn name(&self) -> String {
        let name = charmap::decode(&self.name);
        let extension = charmap::decode(&self.extension);
        if extension.is_empty() {
            name
        } else {
            format!("{name}.{extension}")
        }
    }

    fn set_name(&mut self, full: &str) -> Result<(), PakfsError> {
        if full.is_empty() {
            return Err(PakfsError::Invalid {
                reason: "empty file name".into(),
            });
        }

        let (name, extension) = match full.rsplit_once('.') {
            Some((name, extension)) if !extension.is_empty() => (name, extension),
            _ => (full, ""),
        };

        let encode = |text: &str, len: usize| {
            let bytes = charmap::encode(text).map_err(|c| PakfsError::Invalid {
                reason: format!("{full}: {c:?} has no character code"),
            })?;

            if bytes.len() > len {
                return Err(PakfsError::NameTooLong { name: full.into() });
            }

            Ok(bytes)
        };

        let name = encode(name, NAME_LEN)?;
        let extension = encode(extension, EXTENSION_LEN)?;

        self.name = [0; NAME_LEN];
        self.name[..name.len()].copy_from_slice(&name);
        self.extension = [0; EXTENSION_LEN];
        self.extension[..extension.len()].copy_from_slice(&extension);
        Ok(())
    }
}

/// Information about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub name: String,
    pub size: u64,
    pub game_code: [u8; 4],
    pub company_code: [u8; 2],
}

/// A controller pak filesystem on a device.
#[derive(Debug)]
pub struct Pakfs<D> {
    dev: D,
    id: IdSector,
    inodes: Vec<u16>,
    notes: [Note; NOTE_COUNT],
}

impl<D> Pakfs<D> {
    fn banks(&self) -> usize {
        self.id.bank_count as usize
    }

    fn inodes_offset(&self, backup: bool) -> u64 {
        (1 + backup as u64 * self.banks() as u64) * PAGE_SIZE
    }

    fn note_offset(&self, index: usize) -> u64 {
        (1 + 2 * self.banks() as u64) * PAGE_SIZE + index as u64 * NOTE_LEN
    }

    /// First page that can hold file data.
    fn first_page(&self) -> usize {
        first_page(self.id.bank_count)
    }

    fn is_valid_page(&self, page: u16) -> bool {
        let page = page as usize;
        page >= self.first_page() && page < self.inodes.len() && page % PAGES_PER_BANK != 0
    }

    /// Pages of a bank that can hold file data. The first inode of each bank is its checksum.
    fn bank_pages(&self, bank: usize) -> Range<usize> {
        let start = if bank == 0 {
            self.first_page()
        } else {
            bank * PAGES_PER_BANK + 1
        };

        start..(bank + 1) * PAGES_PER_BANK
    }

    /// Pages that can hold file data, bank by bank.
    fn data_pages(&self) -> impl Iterator<Item = usize> + use<D> {
        let ranges = (0..self.banks()).map(|bank| self.bank_pages(bank)).collect::<Vec<_>>();
        ranges.into_iter().flatten()
    }

    /// Checks the per-bank checksums of the inode table, or updates them.
    fn inode_checksums(&mut self, update: bool) -> bool {
        let mut valid = true;
        for bank in 0..self.banks() {
            let sum = self.inodes[self.bank_pages(bank)]
                .iter()
                .fold(0u16, |sum, &inode| sum.wrapping_add(inode));

            let slot = &mut self.inodes[bank * PAGES_PER_BANK];
            if (sum & 0xFF) != (*slot & 0xFF) {
                valid = false;
                if !update {
                    break;
                }

                *slot = (*slot & 0xFF00) | (sum & 0xFF);
            }
        }

        valid
    }

    /// Total storage for file data, in bytes.
    pub fn size(&self) -> u64 {
        self.data_pages().count() as u64 * PAGE_SIZE
    }

    /// Unused storage, in bytes.
    pub fn free(&self) -> u64 {
        let free = self
            .data_pages()
            .filter(|&page| self.inodes[page] == INODE_FREE)
            .count();

        free as u64 * PAGE_SIZE
    }

    /// The pages of a note, in order.
    fn pages(&self, index: usize) -> Result<Vec<u16>, PakfsError> {
        let mut pages = Vec::new();
        let mut page = self.notes[index].start_page;
        if page == 0 {
            return Ok(pages);
        }

        while page != INODE_LAST {
            if !self.is_valid_page(page) || pages.len() >= self.inodes.len() {
                return Err(PakfsError::Inconsistent);
            }

            pages.push(page);
            page = self.inodes[page as usize];
        }

        Ok(pages)
    }

    fn find(&self, name: &str) -> Result<usize, PakfsError> {
        if name == "." {
            return Err(PakfsError::IsDir);
        }

        self.notes
            .iter()
            .position(|note| note.is_used() && note.name() == name)
            .ok_or_else(|| PakfsError::NotExist { name: name.into() })
    }

    fn stat_note(&self, index: usize) -> Stat {
        let note = &self.notes[index];
        Stat {
            name: note.name(),
            size: self.pages(index).map_or(0, |pages| pages.len() as u64 * PAGE_SIZE),
            game_code: note.game_code,
            company_code: note.company_code,
        }
    }

    /// The files of the root directory.
    pub fn read_dir(&self) -> Vec<Stat> {
        (0..NOTE_COUNT)
            .filter(|&index| self.notes[index].is_used())
            .map(|index| self.stat_note(index))
            .collect()
    }

    pub fn stat(&self, name: &str) -> Result<Stat, PakfsError> {
        self.find(name).map(|index| self.stat_note(index))
    }

    pub fn into_inner(self) -> D {
        self.dev
    }
}

fn first_page(bank_count: u8) -> usize {
    1 + 2 * bank_count as usize + 2
}

impl<D> Pakfs<D>
where
    D: Read + Seek,
{
    fn read_at(dev: &mut D, offset: u64, buf: &mut [u8]) -> Result<(), PakfsError> {
        dev.seek(SeekFrom::Start(offset)).context(PakfsCtx::Io)?;
        dev.read_exact(buf).context(PakfsCtx::Io)
    }

    /// Reads the filesystem of `dev`. Damaged ID sectors and inode tables are tolerated as
    /// long as one copy is intact.
    pub fn read(mut dev: D) -> Result<Self, PakfsError> {
        let mut id = None;
        for offset in ID_SECTORS {
            dev.seek(SeekFrom::Start(offset)).context(PakfsCtx::Io)?;
            let sector = IdSector::read(&mut dev).context(PakfsCtx::Format)?;
            if sector.is_valid() {
                id = Some(sector);
                break;
            }

            tracing::debug!("pakfs: id sector at {offset:#x} damaged");
        }

        let Some(id) = id else {
            return Err(PakfsError::Inconsistent);
        };

        if first_page(id.bank_count) >= PAGES_PER_BANK {
            return Err(PakfsError::Inconsistent);
        }

        let mut fs = Self {
            dev,
            id,
            inodes: Vec::new(),
            notes: [Note::default(); NOTE_COUNT],
        };

        let table_len = fs.banks() * PAGES_PER_BANK * 2;
        let mut valid = false;
        for backup in [false, true] {
            let mut table = vec![0; table_len];
            let offset = fs.inodes_offset(backup);
            Self::read_at(&mut fs.dev, offset, &mut table)?;
            fs.inodes = table
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();

            if fs.inode_checksums(false) {
                valid = true;
                break;
            }

            tracing::debug!("pakfs: inode table (backup: {backup}) damaged");
        }

        if !valid {
            return Err(PakfsError::Inconsistent);
        }

        let offset = fs.note_offset(0);
        fs.dev.seek(SeekFrom::Start(offset)).context(PakfsCtx::Io)?;
        for note in &mut fs.notes {
            *note = Note::read(&mut fs.dev).context(PakfsCtx::Format)?;
        }

        Ok(fs)
    }

    /// The label in the first block of the pak. Rarely holds anything useful.
    pub fn label(&mut self) -> Result<String, PakfsError> {
        let mut label = [0; LABEL_LEN];
        Self::read_at(&mut self.dev, 0, &mut label)?;

        let len = label.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        Ok(String::from_utf8_lossy(&label[..len]).into_owned())
    }

    /// Opens the named file.
    pub fn open(&mut self, name: &str) -> Result<File<'_, D>, PakfsError> {
        let index = self.find(name)?;
        Ok(File { fs: self, index })
    }

    /// Reads at `offset` of a note into `buf`. Returns less than requested at the end of the
    /// file.
    fn read_note(&mut self, index: usize, buf: &mut [u8], offset: u64) -> Result<usize, PakfsError> {
        let (pages, _) = self.section(index, offset, buf.len() as u64)?;

        let mut read = 0;
        let mut page_offset = offset % PAGE_SIZE;
        for page in pages {
            let len = ((PAGE_SIZE - page_offset) as usize).min(buf.len() - read);
            let addr = page as u64 * PAGE_SIZE + page_offset;
            Self::read_at(&mut self.dev, addr, &mut buf[read..read + len])?;

            read += len;
            page_offset = 0;
        }

        Ok(read)
    }

    /// The pages holding `len` bytes at `offset` of a note, and the number of pages missing at
    /// its end.
    fn section(&self, index: usize, offset: u64, len: u64) -> Result<(Vec<u16>, usize), PakfsError> {
        if len == 0 {
            return Ok((Vec::new(), 0));
        }

        let pages = self.pages(index)?;
        let start = (offset / PAGE_SIZE) as usize;
        let end = (offset + len).div_ceil(PAGE_SIZE) as usize;

        let missing = end.saturating_sub(pages.len());
        let end = end.min(pages.len());
        let start = start.min(end);
        Ok((pages[start..end].to_vec(), missing))
    }
}

impl<D> Pakfs<D>
where
    D: Read + Write + Seek,
{
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), PakfsError> {
        self.dev.seek(SeekFrom::Start(offset)).context(PakfsCtx::Io)?;
        self.dev.write_all(data).map_err(write_error)
    }

    /// Creates an empty filesystem on `dev`, which must hold `banks` banks of 32 KiB.
    pub fn format(dev: D, banks: u8) -> Result<Self, PakfsError> {
        if banks == 0 || first_page(banks) >= PAGES_PER_BANK {
            return Err(PakfsError::Invalid {
                reason: format!("can't format {banks} banks"),
            });
        }

        let mut fs = Self {
            dev,
            id: IdSector::new(banks),
            inodes: vec![0; banks as usize * PAGES_PER_BANK],
            notes: [Note::default(); NOTE_COUNT],
        };

        for page in fs.data_pages().collect::<Vec<_>>() {
            fs.inodes[page] = INODE_FREE;
        }

        fs.write_at(0, &[0; PAGE_SIZE as usize])?;
        let mut id = Vec::new();
        fs.id
            .write(&mut io::Cursor::new(&mut id))
            .context(PakfsCtx::Format)?;

        for offset in ID_SECTORS {
            fs.write_at(offset, &id)?;
        }

        fs.sync_inodes()?;
        for index in 0..NOTE_COUNT {
            fs.sync_note(index)?;
        }

        tracing::debug!("pakfs: formatted {banks} banks, {} bytes free", fs.free());
        Ok(fs)
    }

    /// Writes the inode table and its backup.
    fn sync_inodes(&mut self) -> Result<(), PakfsError> {
        self.inode_checksums(true);

        let table = self
            .inodes
            .iter()
            .flat_map(|inode| inode.to_be_bytes())
            .collect::<Vec<_>>();

        for backup in [false, true] {
            self.write_at(self.inodes_offset(backup), &table)?;
        }

        Ok(())
    }

    fn sync_note(&mut self, index: usize) -> Result<(), PakfsError> {
        let mut note = Vec::with_capacity(NOTE_LEN as usize);
        self.notes[index]
            .write(&mut io::Cursor::new(&mut note))
            .context(PakfsCtx::Format)?;

        self.write_at(self.note_offset(index), &note)
    }

    /// Appends `count` zeroed pages to a note.
    fn alloc_pages(&mut self, index: usize, count: usize) -> Result<(), PakfsError> {
        let new = self
            .data_pages()
            .filter(|&page| self.inodes[page] == INODE_FREE)
            .take(count)
            .collect::<Vec<_>>();

        if new.len() < count {
            return Err(PakfsError::NoSpace);
        }

        let Some(&last) = new.last() else {
            return Ok(());
        };

        let pages = self.pages(index)?;
        for pair in new.windows(2) {
            self.inodes[pair[0]] = pair[1] as u16;
        }
        self.inodes[last] = INODE_LAST;

        match pages.last() {
            Some(&tail) => self.inodes[tail as usize] = new[0] as u16,
            None => {
                self.notes[index].start_page = new[0] as u16;
                self.sync_note(index)?;
            }
        }

        for &page in &new {
            self.write_at(page as u64 * PAGE_SIZE, &[0; PAGE_SIZE as usize])?;
        }

        self.sync_inodes()
    }

    /// Frees up to `count` pages at the end of a note.
    fn free_pages(&mut self, index: usize, count: usize) -> Result<(), PakfsError> {
        let mut pages = self.pages(index)?;
        let keep = pages.len().saturating_sub(count);
        for &page in &pages[keep..] {
            self.inodes[page as usize] = INODE_FREE;
        }
        pages.truncate(keep);

        match pages.last() {
            Some(&tail) => self.inodes[tail as usize] = INODE_LAST,
            None => {
                self.notes[index].start_page = INODE_LAST;
                self.sync_note(index)?;
            }
        }

        self.sync_inodes()
    }

    fn write_note(&mut self, index: usize, data: &[u8], offset: u64) -> Result<usize, PakfsError> {
        let (_, missing) = self.section(index, offset, data.len() as u64)?;
        if missing > 0 {
            self.alloc_pages(index, missing)?;
        }

        let (pages, _) = self.section(index, offset, data.len() as u64)?;
        let mut written = 0;
        let mut page_offset = offset % PAGE_SIZE;
        for page in pages {
            let len = ((PAGE_SIZE - page_offset) as usize).min(data.len() - written);
            let addr = page as u64 * PAGE_SIZE + page_offset;
            self.write_at(addr, &data[written..written + len])?;

            written += len;
            page_offset = 0;
        }

        Ok(written)
    }

    /// Creates an empty file.
    pub fn create(&mut self, name: &str) -> Result<File<'_, D>, PakfsError> {
        if name.contains('/') {
            return Err(PakfsError::NotExist { name: name.into() });
        }

        match self.find(name) {
            Ok(_) => return Err(PakfsError::Exist { name: name.into() }),
            Err(PakfsError::NotExist { .. }) => (),
            Err(err) => return Err(err),
        }

        let Some(index) = self.notes.iter().position(|note| !note.is_used()) else {
            return Err(PakfsError::NoSpace);
        };

        let mut note = Note {
            start_page: INODE_LAST,
            status: 2,
            ..Default::default()
        };
        note.set_name(name)?;

        self.notes[index] = note;
        self.sync_note(index)?;

        tracing::debug!("pakfs: created {name} in note {index}");
        Ok(File { fs: self, index })
    }

    /// Deletes the named file.
    pub fn remove(&mut self, name: &str) -> Result<(), PakfsError> {
        let index = self.find(name)?;
        self.free_pages(index, usize::MAX)?;
        self.notes[index] = Note::default();
        self.sync_note(index)
    }

    /// Renames a file, replacing the file at `to` if there is one.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), PakfsError> {
        if from == to {
            return Ok(());
        }

        if to.contains('/') {
            return Err(PakfsError::NotExist { name: to.into() });
        }

        let index = self.find(from)?;
        let mut renamed = self.notes[index];
        renamed.set_name(to)?;

        match self.remove(to) {
            Ok(()) | Err(PakfsError::NotExist { .. }) => (),
            Err(err) => return Err(err),
        }

        self.notes[index] = renamed;
        self.sync_note(index)
    }

    /// Resizes a file to `size` rounded up to whole pages. Bytes past `size` are zeroed.
    pub fn truncate(&mut self, name: &str, size: u64) -> Result<(), PakfsError> {
        let index = self.find(name)?;
        let pages = self.pages(index)?;
        let wanted = size.div_ceil(PAGE_SIZE) as usize;

        if wanted > pages.len() {
            return self.alloc_pages(index, wanted - pages.len());
        }

        self.free_pages(index, pages.len() - wanted)?;
        if let Some(&last) = pages[..wanted].last() {
            let tail = size % PAGE_SIZE;
            if tail != 0 {
                let zeros = [0; PAGE_SIZE as usize];
                self.write_at(last as u64 * PAGE_SIZE + tail, &zeros[tail as usize..])?;
            }
        }

        Ok(())
    }
}

/// A file of a [`Pakfs`].
#[derive(Debug)]
pub struct File<'fs, D> {
    fs: &'fs mut Pakfs<D>,
    index: usize,
}

impl<D> File<'_, D> {
    pub fn name(&self) -> String {
        self.fs.notes[self.index].name()
    }

    /// Size in bytes, always a multiple of [`PAGE_SIZE`].
    pub fn size(&self) -> u64 {
        self.fs.stat_note(self.index).size
    }

    pub fn game_code(&self) -> [u8; 4] {
        self.fs.notes[self.index].game_code
    }

    pub fn company_code(&self) -> [u8; 2] {
        self.fs.notes[self.index].company_code
    }

    pub fn stat(&self) -> Stat {
        self.fs.stat_note(self.index)
    }
}

impl<D> File<'_, D>
where
    D: Read + Seek,
{
    /// Reads at `offset`. Returns less than `buf.len()` at the end of the file.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, PakfsError> {
        self.fs.read_note(self.index, buf, offset)
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>, PakfsError> {
        let mut data = vec![0; self.size() as usize];
        let read = self.read_at(&mut data, 0)?;
        data.truncate(read);
        Ok(data)
    }
}

impl<D> File<'_, D>
where
    D: Read + Write + Seek,
{
    /// Writes at `offset`, growing the file as needed. New pages are zeroed.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, PakfsError> {
        self.fs.write_note(self.index, data, offset)
    }

    pub fn set_game_code(&mut self, code: [u8; 4]) -> Result<(), PakfsError> {
        self.fs.notes[self.index].game_code = code;
        self.fs.sync_note(self.index)
    }

    pub fn set_company_code(&mut self, code: [u8; 2]) -> Result<(), PakfsError> {
        self.fs.notes[self.index].company_code = code;
        self.fs.sync_note(self.index)
    }
}
