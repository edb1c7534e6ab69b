//! Cartfs: a read-only filesystem stored in cartridge ROM, so assets don't have to be loaded
//! into RAM along with the program.
//!
//! An image is a table of entries followed by the concatenated paths of all entries and then
//! the file data, each file padded to [`ALIGN`]. Everything is big-endian. Directories have a
//! trailing `/` and no data.
//!
//! Entries are sorted by parent directory first and name second, so the contents of a
//! directory are contiguous and can be found with a binary search.
#[cfg(test)]
mod test;

use std::cmp::Ordering;
use std::io::{self, Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite, binrw};
use easyerr::{Error, ResultExt};
use rustc_hash::FxHashSet;

/// Alignment of the data section and of every file in it.
pub const ALIGN: u64 = 8;

#[derive(Debug, Error)]
pub enum CartfsError {
    #[error("{path}: no such file or directory")]
    NotExist { path: String },
    #[error("{path}: is a directory")]
    IsDir { path: String },
    #[error("{path}: not a directory")]
    NotDir { path: String },
    #[error("{path}: invalid path")]
    InvalidPath { path: String },
    #[error("{path}: added twice")]
    Duplicate { path: String },
    #[error("damaged image: {reason}")]
    Invalid { reason: &'static str },
    #[error(transparent)]
    Io { source: io::Error },
    #[error(transparent)]
    Format { source: binrw::Error },
}

#[binrw]
#[brw(big)]
#[derive(Debug, Clone, Copy)]
struct RawEntry {
    /// Range of the path in the path table.
    start: u64,
    end: u64,
    size: u64,
    /// Relative to the start of the data section.
    offset: u64,
}

#[binrw]
#[brw(big)]
#[derive(Debug)]
struct Table {
    #[bw(calc = entries.len() as u64)]
    entry_count: u64,
    #[br(count = entry_count)]
    entries: Vec<RawEntry>,
    #[bw(calc = paths.len() as u64)]
    paths_len: u64,
    #[br(count = paths_len)]
    paths: Vec<u8>,
}

/// Splits a path into its parent directory, its name and whether it's a directory.
fn split(path: &str) -> (&str, &str, bool) {
    let (path, is_dir) = match path.strip_suffix('/') {
        Some(path) => (path, true),
        None => (path, false),
    };

    match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name, is_dir),
        None => (".", path, is_dir),
    }
}

/// Order of entries in an image.
fn compare(a: &str, b: &str) -> Ordering {
    let (a_dir, a_name, _) = split(a);
    let (b_dir, b_name, _) = split(b);
    a_dir.cmp(b_dir).then_with(|| a_name.cmp(b_name))
}

/// A file or directory in a cartfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Full path, with a trailing slash for directories.
    path: String,
    size: u64,
    /// Absolute offset of the data in the image.
    offset: u64,
}

impl Entry {
    fn root() -> Self {
        Self {
            path: "./".into(),
            size: 0,
            offset: 0,
        }
    }

    pub fn path(&self) -> &str {
        self.path.strip_suffix('/').unwrap_or(&self.path)
    }

    pub fn name(&self) -> &str {
        split(&self.path).1
    }

    pub fn parent(&self) -> &str {
        split(&self.path).0
    }

    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A cartfs image.
#[derive(Debug)]
pub struct Cartfs<R> {
    reader: R,
    entries: Vec<Entry>,
}

impl<R> Cartfs<R>
where
    R: Read + Seek,
{
    /// Reads the entry table of the image starting at the current position of `reader`.
    pub fn read(mut reader: R) -> Result<Self, CartfsError> {
        let start = reader.stream_position().context(CartfsCtx::Io)?;
        let table = Table::read(&mut reader).context(CartfsCtx::Format)?;
        let end = reader.stream_position().context(CartfsCtx::Io)?;
        let base = start + (end - start).next_multiple_of(ALIGN);

        let mut entries = Vec::with_capacity(table.entries.len());
        for raw in &table.entries {
            let range = raw.start as usize..raw.end as usize;
            let Some(path) = table.paths.get(range) else {
                return Err(CartfsError::Invalid {
                    reason: "path out of bounds",
                });
            };

            let Ok(path) = String::from_utf8(path.to_vec()) else {
                return Err(CartfsError::Invalid {
                    reason: "path is not utf-8",
                });
            };

            if path.is_empty() {
                return Err(CartfsError::Invalid {
                    reason: "empty path",
                });
            }

            entries.push(Entry {
                path,
                size: raw.size,
                offset: base + raw.offset,
            });
        }

        if !entries.is_sorted_by(|a, b| compare(&a.path, &b.path).is_lt()) {
            return Err(CartfsError::Invalid {
                reason: "entries out of order",
            });
        }

        tracing::debug!("cartfs: {} entries, data at {base:#x}", entries.len());
        Ok(Self { reader, entries })
    }

    /// All entries, in image order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    fn lookup(&self, path: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|entry| compare(entry.path(), path))
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Returns the entry at `path`. The root directory is `.`.
    pub fn stat(&self, path: &str) -> Result<Entry, CartfsError> {
        if path == "." {
            return Ok(Entry::root());
        }

        self.lookup(path)
            .cloned()
            .ok_or_else(|| CartfsError::NotExist { path: path.into() })
    }

    /// Returns the contents of the directory at `path`, sorted by name.
    pub fn read_dir(&self, path: &str) -> Result<&[Entry], CartfsError> {
        let path = path.strip_suffix('/').unwrap_or(path);
        if !self.stat(path)?.is_dir() {
            return Err(CartfsError::NotDir { path: path.into() });
        }

        let start = self.entries.partition_point(|entry| entry.parent() < path);
        let end = self.entries.partition_point(|entry| entry.parent() <= path);
        Ok(&self.entries[start..end])
    }

    /// Opens the file at `path` for reading.
    pub fn open(&mut self, path: &str) -> Result<File<'_, R>, CartfsError> {
        let entry = self.stat(path)?;
        if entry.is_dir() {
            return Err(CartfsError::IsDir { path: path.into() });
        }

        Ok(File {
            reader: &mut self.reader,
            start: entry.offset,
            size: entry.size,
            position: 0,
        })
    }

    /// Reads the whole file at `path`.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, CartfsError> {
        let mut file = self.open(path)?;
        let mut data = Vec::with_capacity(file.size as usize);
        file.read_to_end(&mut data).context(CartfsCtx::Io)?;
        Ok(data)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// A file of a [`Cartfs`] open for reading.
#[derive(Debug)]
pub struct File<'fs, R> {
    reader: &'fs mut R,
    start: u64,
    size: u64,
    position: u64,
}

impl<R> File<'_, R> {
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<R> Read for File<'_, R>
where
    R: Read + Seek,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size.saturating_sub(self.position);
        let len = buf.len().min(remaining as usize);
        if len == 0 {
            return Ok(0);
        }

        self.reader.seek(SeekFrom::Start(self.start + self.position))?;
        let read = self.reader.read(&mut buf[..len])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl<R> Seek for File<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.size.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
        };

        let Some(position) = position else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        };

        self.position = position;
        Ok(position)
    }
}

/// Builds a cartfs image from a set of files. Directories are created as needed.
#[derive(Debug, Default)]
pub struct Builder {
    files: Vec<(String, Vec<u8>)>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file. Paths are relative, `/` separated and have no `.` or `..` components.
    pub fn add(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<&mut Self, CartfsError> {
        let path = path.into();
        let valid = !path.is_empty()
            && path
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");

        if !valid {
            return Err(CartfsError::InvalidPath { path });
        }

        if self.files.iter().any(|(other, _)| *other == path) {
            return Err(CartfsError::Duplicate { path });
        }

        self.files.push((path, data.into()));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Every file and directory of the image, sorted.
    fn names(&self) -> Result<Vec<String>, CartfsError> {
        let mut names = FxHashSet::default();
        for (path, _) in &self.files {
            names.insert(path.clone());

            let mut dir = path.as_str();
            while let Some((parent, _)) = dir.rsplit_once('/') {
                names.insert(format!("{parent}/"));
                dir = parent;
            }
        }

        if let Some((path, _)) = self
            .files
            .iter()
            .find(|(path, _)| names.contains(&format!("{path}/")))
        {
            return Err(CartfsError::InvalidPath { path: path.clone() });
        }

        let mut names = names.into_iter().collect::<Vec<_>>();
        names.sort_by(|a, b| compare(a, b));
        Ok(names)
    }

    /// Writes the image. Returns its size.
    pub fn write(&self, writer: &mut (impl Write + Seek)) -> Result<u64, CartfsError> {
        let names = self.names()?;

        let mut entries = Vec::with_capacity(names.len());
        let mut paths = Vec::new();
        let mut data = Vec::with_capacity(names.len());
        let mut offset = 0;
        for name in &names {
            let file = self
                .files
                .iter()
                .find(|(path, _)| path == name)
                .map(|(_, data)| data.as_slice());

            let size = file.map_or(0, |file| file.len() as u64);
            entries.push(RawEntry {
                start: paths.len() as u64,
                end: (paths.len() + name.len()) as u64,
                size,
                offset,
            });

            paths.extend_from_slice(name.as_bytes());
            data.extend(file);
            offset = (offset + size).next_multiple_of(ALIGN);
        }

        let start = writer.stream_position().context(CartfsCtx::Io)?;
        Table { entries, paths }.write(writer).context(CartfsCtx::Format)?;
        pad(writer, start)?;

        for file in data {
            writer.write_all(file).context(CartfsCtx::Io)?;
            pad(writer, start)?;
        }

        let end = writer.stream_position().context(CartfsCtx::Io)?;
        tracing::debug!("cartfs: wrote {} entries, {} bytes", names.len(), end - start);
        Ok(end - start)
    }
}

/// Pads with zeros up to the next multiple of [`ALIGN`] past `start`.
fn pad(writer: &mut (impl Write + Seek), start: u64) -> Result<(), CartfsError> {
    let len = writer.stream_position().context(CartfsCtx::Io)? - start;
    let padding = len.next_multiple_of(ALIGN) - len;
    writer
        .write_all(&[0; ALIGN as usize][..padding as usize])
        .context(CartfsCtx::Io)
}
