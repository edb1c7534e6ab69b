//! UF2, the block format used to flash microcontrollers over USB mass storage, and the
//! compressed ROM layout of the PicoCart flash cartridge.
#[cfg(test)]
mod test;

use std::io::{self, Seek, Write};

use binrw::{BinRead, BinWrite, binrw};
use bitos::bitos;
use easyerr::{Error, ResultExt};
use strum::FromRepr;

/// Payload bytes carried by each block.
pub const PAYLOAD_LEN: usize = 256;
pub const BLOCK_LEN: usize = 512;
const END_MAGIC: u32 = 0x0AB1_6F30;

/// Where the PicoCart firmware expects the compressed ROM in flash.
pub const PICOCART_ADDR: u32 = 0x1003_0000;
const PICOCART_FLASH_END: u32 = 0x1000_0000 + 2 * 1024 * 1024;
const PICOCART_MAGIC: &[u8; 16] = b"picocartcompress";
/// Size of the chunks ROMs are deduplicated in.
pub const PICOCART_CHUNK_LEN: usize = 1024;
const PICOCART_CHUNK_MAP_LEN: usize = (0x8000 - PICOCART_MAGIC.len()) / 2;

#[derive(Debug, Error)]
pub enum Uf2Error {
    #[error("rom has {chunks} chunks, but at most {PICOCART_CHUNK_MAP_LEN} can be mapped")]
    ChunkMapOverflow { chunks: usize },
    #[error("{len} bytes at {addr:#010x} don't fit the flash")]
    TooLarge { addr: u32, len: usize },
    #[error(transparent)]
    Io { source: io::Error },
    #[error(transparent)]
    Format { source: binrw::Error },
}

/// Flags of a block.
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    #[bits(0)]
    pub not_main_flash: bool,
    #[bits(12)]
    pub file_container: bool,
    #[bits(13)]
    pub family_id_present: bool,
    #[bits(14)]
    pub md5_present: bool,
    #[bits(15)]
    pub extension_tags: bool,
}

/// Known microcontroller families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum Family {
    Rp2040 = 0xE48B_FF56,
    Rp2350ArmSecure = 0xE48B_FF59,
}

/// A single block of an UF2 file.
#[binrw]
#[brw(little, magic = b"UF2\nWQ]\x9E")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    #[br(map = Flags::from_bits)]
    #[bw(map = |flags: &Flags| flags.to_bits())]
    pub flags: Flags,
    /// Flash address the payload is written to.
    pub addr: u32,
    pub len: u32,
    /// Index of this block in the file.
    pub seq: u32,
    pub total: u32,
    /// Family id, or the file size if [`Flags::family_id_present`] is clear.
    pub family: u32,
    #[brw(pad_size_to = 476)]
    pub payload: [u8; PAYLOAD_LEN],
    #[br(assert(end_magic == END_MAGIC))]
    #[bw(calc = END_MAGIC)]
    end_magic: u32,
}

impl Block {
    pub fn family(&self) -> Option<Family> {
        self.flags
            .family_id_present()
            .then(|| Family::from_repr(self.family))
            .flatten()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..(self.len as usize).min(PAYLOAD_LEN)]
    }
}

/// Writes a flash image as UF2 blocks. The number of blocks must be known beforehand, since
/// every block carries it.
pub struct Uf2Writer<W> {
    writer: W,
    family: Family,
    addr: u32,
    seq: u32,
    total: u32,
    buf: Vec<u8>,
}

impl<W> Uf2Writer<W>
where
    W: Write + Seek,
{
    /// Creates a writer for `len` bytes flashed at `addr`.
    pub fn new(writer: W, family: Family, addr: u32, len: usize) -> Self {
        Self {
            writer,
            family,
            addr,
            seq: 0,
            total: len.div_ceil(PAYLOAD_LEN) as u32,
            buf: Vec::with_capacity(PAYLOAD_LEN),
        }
    }

    fn write_block(&mut self) -> Result<(), Uf2Error> {
        let mut payload = [0; PAYLOAD_LEN];
        payload[..self.buf.len()].copy_from_slice(&self.buf);

        let block = Block {
            flags: Flags::default().with_family_id_present(true),
            addr: self.addr,
            len: PAYLOAD_LEN as u32,
            seq: self.seq,
            total: self.total,
            family: self.family as u32,
            payload,
        };

        block.write(&mut self.writer).context(Uf2Ctx::Format)?;
        self.addr += PAYLOAD_LEN as u32;
        self.seq += 1;
        self.buf.clear();

        Ok(())
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<(), Uf2Error> {
        while !data.is_empty() {
            let len = data.len().min(PAYLOAD_LEN - self.buf.len());
            self.buf.extend_from_slice(&data[..len]);
            data = &data[len..];

            if self.buf.len() == PAYLOAD_LEN {
                self.write_block()?;
            }
        }

        Ok(())
    }

    /// Writes the last partial block, padded with zeros, and returns the inner writer.
    pub fn finish(mut self) -> Result<W, Uf2Error> {
        if !self.buf.is_empty() {
            self.write_block()?;
        }

        if self.seq != self.total {
            tracing::warn!("uf2: wrote {} blocks, expected {}", self.seq, self.total);
        }

        self.writer.flush().context(Uf2Ctx::Io)?;
        Ok(self.writer)
    }
}

/// Writes `data` flashed at `addr` as a whole UF2 file.
pub fn write(writer: &mut (impl Write + Seek), family: Family, addr: u32, data: &[u8]) -> Result<(), Uf2Error> {
    let mut uf2 = Uf2Writer::new(writer, family, addr, data.len());
    uf2.write(data)?;
    uf2.finish()?;
    Ok(())
}

/// Reads every block of an UF2 file.
pub fn read(reader: &mut (impl io::Read + Seek)) -> Result<Vec<Block>, Uf2Error> {
    let len = reader.seek(io::SeekFrom::End(0)).context(Uf2Ctx::Io)?;
    reader.rewind().context(Uf2Ctx::Io)?;

    let count = len as usize / BLOCK_LEN;
    (0..count)
        .map(|_| Block::read(reader).context(Uf2Ctx::Format))
        .collect()
}

/// Compresses a ROM for the PicoCart: the ROM is split into [`PICOCART_CHUNK_LEN`] byte
/// chunks, identical chunks are stored once and a map from chunk to stored chunk index
/// precedes the stored chunks.
pub fn picocart_compress(rom: &[u8]) -> Result<Vec<u8>, Uf2Error> {
    let chunks = rom.len().div_ceil(PICOCART_CHUNK_LEN);
    if chunks > PICOCART_CHUNK_MAP_LEN {
        return Err(Uf2Error::ChunkMapOverflow { chunks });
    }

    let mut map = vec![0u16; PICOCART_CHUNK_MAP_LEN];
    let mut stored: Vec<&[u8]> = Vec::new();
    let mut index = rustc_hash::FxHashMap::default();
    for (i, chunk) in rom.chunks(PICOCART_CHUNK_LEN).enumerate() {
        let id = *index.entry(chunk).or_insert_with(|| {
            stored.push(chunk);
            stored.len() - 1
        });

        map[i] = id as u16;
    }

    tracing::debug!("picocart: {chunks} chunks, {} unique", stored.len());

    let mut out = Vec::with_capacity(
        PICOCART_MAGIC.len() + 2 * PICOCART_CHUNK_MAP_LEN + stored.len() * PICOCART_CHUNK_LEN,
    );
    out.extend_from_slice(PICOCART_MAGIC);
    out.extend(map.iter().flat_map(|id| id.to_le_bytes()));
    for chunk in stored {
        out.extend_from_slice(chunk);
    }

    Ok(out)
}

/// Compresses a ROM for the PicoCart and writes it as an UF2 file for the RP2040.
pub fn write_picocart(writer: &mut (impl Write + Seek), rom: &[u8]) -> Result<(), Uf2Error> {
    let data = picocart_compress(rom)?;
    if PICOCART_ADDR as usize + data.len() > PICOCART_FLASH_END as usize {
        tracing::warn!(
            "picocart: {} compressed bytes overflow a 2 MiB flash",
            data.len()
        );
    }

    let Some(end) = u32::try_from(data.len())
        .ok()
        .and_then(|len| PICOCART_ADDR.checked_add(len))
    else {
        return Err(Uf2Error::TooLarge {
            addr: PICOCART_ADDR,
            len: data.len(),
        });
    };

    tracing::debug!("picocart: flashing {PICOCART_ADDR:#010x}..{end:#010x}");
    write(writer, Family::Rp2040, PICOCART_ADDR, &data)
}
